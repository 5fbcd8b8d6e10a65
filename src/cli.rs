use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chainquorum")]
#[command(about = "Resilient multi-node JSON-RPC client", long_about = None)]
pub struct Cli {
    #[arg(
        short,
        long,
        help = "Path to the configuration file",
        default_value = "config/config.toml"
    )]
    pub config: String,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Issue a JSON-RPC call against the node pool
    Call {
        #[arg(help = "Method name, e.g. getblockcount")]
        method: String,
        #[arg(help = "Parameters, each parsed as JSON (bare words become strings)")]
        params: Vec<String>,
    },
    /// Issue a call over the persistent indexer connection
    Electrum {
        #[arg(help = "Dotted method name, e.g. blockchain.headers.subscribe")]
        method: String,
        #[arg(help = "Parameters, each parsed as JSON (bare words become strings)")]
        params: Vec<String>,
    },
    /// Run a rating pass and print the trust-ordered node ranking
    Rank,
    /// Look up name-value records under a prefix and decode their payloads
    Names {
        #[arg(help = "Record prefix, e.g. dns")]
        prefix: String,
    },
}
