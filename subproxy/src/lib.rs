pub mod types;
pub mod config;
pub mod protocols;
pub mod parser;
pub mod fetcher;
pub mod processing;
pub mod singbox;
pub mod storage;
pub mod supervisor;
pub mod runner;
pub mod service;

pub use types::*;
pub use config::{load_config, LogLevel, NormalizedConfig};
pub use fetcher::{FetchConfig, Fetcher};
pub use parser::{custom_nodes, parse_subscription_content};
pub use processing::{filter_nodes, rename_nodes, NodePipeline, ProcessingStage};
pub use protocols::parse_share_link;
pub use runner::Runner;
pub use service::{Platform, ServiceManager};
pub use singbox::{build_singbox_config, SingBoxConfig};
pub use storage::write_json_if_changed;
pub use supervisor::ProcessSupervisor;
