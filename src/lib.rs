pub mod cli;
pub mod config;
pub mod context;
pub mod electrum;
pub mod http;
pub mod log;
pub mod nvs;
pub mod rpc;
pub mod util;

pub use crate::config::Settings;
pub use crate::context::ClientContext;
pub use crate::electrum::ElectrumClient;
pub use crate::http::{BatchQueue, NodeClient, NodeSelector};
pub use crate::rpc::RpcError;
