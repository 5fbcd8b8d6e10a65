use std::path::Path;

use clap::Parser;
use serde_json::Value;

use chainquorum::cli::{Cli, Commands};
use chainquorum::config::load_settings;
use chainquorum::context::ClientContext;
use chainquorum::log::init_logging;

/// Each CLI parameter is parsed as JSON; bare words fall back to strings so
/// `name_show d/example` works without quoting.
fn parse_params(params: Vec<String>) -> Value {
    Value::Array(
        params
            .into_iter()
            .map(|p| serde_json::from_str(&p).unwrap_or(Value::String(p)))
            .collect(),
    )
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    init_logging();

    let settings = load_settings(Path::new(&cli.config))?;
    let context = ClientContext::new(settings)?;

    match cli.command {
        Commands::Call { method, params } => {
            let result = context.node_client().call(&method, parse_params(params)).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        },
        Commands::Electrum { method, params } => {
            let result = context
                .electrum_client()
                .call(&method, parse_params(params))
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        },
        Commands::Rank => {
            let ranking = context.selector().refresh().await;
            if ranking.is_empty() {
                println!("No candidate agreed on a consensus height.");
            } else {
                for (position, url) in ranking.iter().enumerate() {
                    println!("{:>3}. {}", position + 1, url);
                }
            }
        },
        Commands::Names { prefix } => {
            let names = context.node_client().get_names(&prefix).await?;
            println!("{}", serde_json::to_string_pretty(&names)?);
        },
    }

    Ok(())
}
