//! Core application infrastructure

pub mod cli;
pub mod config;
pub mod constants;
pub mod idgen;
pub mod shutdown;

pub use crate::app::CoreApp;
pub use cli::CliConfig;
pub use config::{AppConfig, IdGenConfig, KvConfig, PubSubConfig, ServerConfig, StaticPubSub};
pub use idgen::{IdGen, valid_string_id};
pub use shutdown::ShutdownService;
