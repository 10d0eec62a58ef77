use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use super::cli::CliConfig;
use super::constants::{
    CONFIG_FILE_NAME, DEFAULT_HOST, DEFAULT_IDGEN_EPOCH_SECS, DEFAULT_IDGEN_NODE_BITS,
    DEFAULT_PORT, DEFAULT_RECEIVE_WINDOW_MS, DEFAULT_TICK_SECS,
};

// =============================================================================
// File Config Structs (JSON deserialization)
// =============================================================================

/// Server configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Identifier generator configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct IdGenFileConfig {
    /// Node identifier embedded in every id; 0 picks a random node
    pub node: Option<u16>,
    /// Unix-seconds epoch that generated ids count from
    pub epoch_time_in_seconds: Option<i64>,
    /// Number of node bits in a generated id
    pub node_bits: Option<u8>,
}

/// Persistent recorder configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct KvFileConfig {
    pub enabled: Option<bool>,
    /// Filesystem path of the embedded store
    pub dsn: Option<String>,
}

/// Static topic declaration
#[derive(Debug, Clone, Deserialize)]
pub struct StaticPubSubFileConfig {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub token: String,
}

/// Pub/sub engine configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PubSubFileConfig {
    pub api_access_token: Option<String>,
    pub metrics_access_token: Option<String>,
    /// Upper bound on a single per-subscriber delivery, in milliseconds
    pub max_subscriber_receive_ms: Option<u64>,
    /// SSE heartbeat period, in seconds
    pub tick_secs: Option<u64>,
    pub static_pubsubs: Option<Vec<StaticPubSubFileConfig>>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub server: Option<ServerFileConfig>,
    pub idgen: Option<IdGenFileConfig>,
    pub kv: Option<KvFileConfig>,
    pub pubsub: Option<PubSubFileConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }
}

// =============================================================================
// Runtime Config Structs (final merged configuration)
// =============================================================================

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Identifier generator configuration
#[derive(Debug, Clone)]
pub struct IdGenConfig {
    pub node: u16,
    pub epoch_time_in_seconds: i64,
    pub node_bits: u8,
}

/// Persistent recorder configuration
#[derive(Debug, Clone)]
pub struct KvConfig {
    pub enabled: bool,
    pub dsn: String,
}

/// Static topic declaration (final/runtime)
#[derive(Debug, Clone)]
pub struct StaticPubSub {
    pub id: i64,
    pub name: String,
    pub token: String,
}

/// Pub/sub engine configuration (final/runtime)
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    pub api_access_token: String,
    pub metrics_access_token: String,
    pub max_subscriber_receive_ms: u64,
    pub tick_secs: u64,
    pub static_pubsubs: Vec<StaticPubSub>,
}

/// Final merged application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub idgen: IdGenConfig,
    pub kv: KvConfig,
    pub pubsub: PubSubConfig,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Config file (CLI-specified path or `pubcast.json` in the working
    ///    directory)
    /// 3. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        let file_path = if let Some(ref path) = cli.config {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Some(path.clone())
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        let file_config = match file_path {
            Some(ref path) => {
                let config = FileConfig::load_from_file(path)?;
                config.warn_unknown_fields();
                config
            }
            None => FileConfig::default(),
        };

        let file_server = file_config.server.unwrap_or_default();
        let file_idgen = file_config.idgen.unwrap_or_default();
        let file_kv = file_config.kv.unwrap_or_default();
        let file_pubsub = file_config.pubsub.unwrap_or_default();

        let host = cli
            .host
            .clone()
            .or(file_server.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = cli.port.or(file_server.port).unwrap_or(DEFAULT_PORT);

        let idgen = IdGenConfig {
            node: file_idgen.node.unwrap_or(0),
            epoch_time_in_seconds: file_idgen
                .epoch_time_in_seconds
                .unwrap_or(DEFAULT_IDGEN_EPOCH_SECS),
            node_bits: file_idgen.node_bits.unwrap_or(DEFAULT_IDGEN_NODE_BITS),
        };

        let kv = KvConfig {
            enabled: cli.kv_enabled.or(file_kv.enabled).unwrap_or(false),
            dsn: cli.kv_dsn.clone().or(file_kv.dsn).unwrap_or_default(),
        };

        let pubsub = PubSubConfig {
            api_access_token: cli
                .api_access_token
                .clone()
                .or(file_pubsub.api_access_token)
                .unwrap_or_default(),
            metrics_access_token: cli
                .metrics_access_token
                .clone()
                .or(file_pubsub.metrics_access_token)
                .unwrap_or_default(),
            max_subscriber_receive_ms: file_pubsub
                .max_subscriber_receive_ms
                .unwrap_or(DEFAULT_RECEIVE_WINDOW_MS),
            tick_secs: file_pubsub.tick_secs.unwrap_or(DEFAULT_TICK_SECS),
            static_pubsubs: file_pubsub
                .static_pubsubs
                .unwrap_or_default()
                .into_iter()
                .map(|s| StaticPubSub {
                    id: s.id,
                    name: s.name,
                    token: s.token,
                })
                .collect(),
        };

        let config = Self {
            server: ServerConfig { host, port },
            idgen,
            kv,
            pubsub,
        };
        config.validate()?;

        tracing::debug!(
            host = %config.server.host,
            port = config.server.port,
            kv_enabled = config.kv.enabled,
            static_pubsubs = config.pubsub.static_pubsubs.len(),
            tick_secs = config.pubsub.tick_secs,
            receive_window_ms = config.pubsub.max_subscriber_receive_ms,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Validate the configuration for consistency and correctness
    fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            anyhow::bail!("Configuration error: server.host must not be empty");
        }
        if self.server.port == 0 {
            anyhow::bail!("Configuration error: server.port must be greater than 0");
        }

        if self.pubsub.api_access_token.is_empty() {
            anyhow::bail!("Configuration error: pubsub.api_access_token must be set");
        }
        if self.pubsub.metrics_access_token.is_empty() {
            anyhow::bail!("Configuration error: pubsub.metrics_access_token must be set");
        }
        if self.pubsub.max_subscriber_receive_ms == 0 {
            anyhow::bail!(
                "Configuration error: pubsub.max_subscriber_receive_ms must be greater than 0"
            );
        }
        if self.pubsub.tick_secs == 0 {
            anyhow::bail!("Configuration error: pubsub.tick_secs must be greater than 0");
        }

        // The reserved metrics topic owns id 0; declared topics start at 1.
        for st in &self.pubsub.static_pubsubs {
            if st.id < 1 {
                anyhow::bail!(
                    "Configuration error: static pubsub '{}' must have id >= 1, got {}",
                    st.name,
                    st.id
                );
            }
            if st.token.is_empty() {
                anyhow::bail!(
                    "Configuration error: static pubsub '{}' (id {}) must have a non-empty token",
                    st.name,
                    st.id
                );
            }
        }

        if !(DEFAULT_IDGEN_NODE_BITS..=16).contains(&self.idgen.node_bits) {
            anyhow::bail!(
                "Configuration error: idgen.node_bits must be between {} and 16",
                DEFAULT_IDGEN_NODE_BITS
            );
        }
        if u32::from(self.idgen.node) >= (1u32 << self.idgen.node_bits) {
            anyhow::bail!(
                "Configuration error: idgen.node {} does not fit in {} node bits",
                self.idgen.node,
                self.idgen.node_bits
            );
        }
        if self.idgen.epoch_time_in_seconds <= 0 {
            anyhow::bail!("Configuration error: idgen.epoch_time_in_seconds must be positive");
        }

        if self.kv.enabled && self.kv.dsn.is_empty() {
            anyhow::bail!("Configuration error: kv.dsn must be set when kv.enabled is true");
        }

        Ok(())
    }
}
