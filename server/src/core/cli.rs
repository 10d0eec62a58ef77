use std::path::PathBuf;

use clap::Parser;

use super::constants::{
    ENV_API_TOKEN, ENV_CONFIG, ENV_HOST, ENV_KV_DSN, ENV_KV_ENABLED, ENV_METRICS_TOKEN, ENV_PORT,
};

#[derive(Parser, Debug)]
#[command(name = "pubcast")]
#[command(version, about = "Publish/subscribe broker over Server-Sent Events", long_about = None)]
pub struct CliConfig {
    /// Server host address
    #[arg(long, short = 'H', env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', env = ENV_PORT)]
    pub port: Option<u16>,

    /// Path to config file
    #[arg(long, short = 'c', env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Management API access token
    #[arg(long, env = ENV_API_TOKEN)]
    pub api_access_token: Option<String>,

    /// Metrics access token (also the token of the reserved metrics topic)
    #[arg(long, env = ENV_METRICS_TOKEN)]
    pub metrics_access_token: Option<String>,

    /// Enable the persistent topic recorder
    #[arg(long, env = ENV_KV_ENABLED)]
    pub kv_enabled: Option<bool>,

    /// Data path for the persistent topic recorder
    #[arg(long, env = ENV_KV_DSN)]
    pub kv_dsn: Option<String>,
}

/// Parse command line arguments
pub fn parse() -> CliConfig {
    CliConfig::parse()
}
