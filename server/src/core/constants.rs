// =============================================================================
// Application Identity
// =============================================================================

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "pubcast";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "pubcast.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "PUBCAST_CONFIG";

// =============================================================================
// Environment Variables - Server
// =============================================================================

/// Environment variable for server host
pub const ENV_HOST: &str = "PUBCAST_HOST";

/// Environment variable for server port
pub const ENV_PORT: &str = "PUBCAST_PORT";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "PUBCAST_LOG";

// =============================================================================
// Environment Variables - Access Tokens
// =============================================================================

/// Environment variable for the management API access token
pub const ENV_API_TOKEN: &str = "PUBCAST_API_TOKEN";

/// Environment variable for the metrics access token
pub const ENV_METRICS_TOKEN: &str = "PUBCAST_METRICS_TOKEN";

// =============================================================================
// Environment Variables - Persistence
// =============================================================================

/// Environment variable enabling the persistent recorder
pub const ENV_KV_ENABLED: &str = "PUBCAST_KV_ENABLED";

/// Environment variable for the recorder data path
pub const ENV_KV_DSN: &str = "PUBCAST_KV_DSN";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 8808;

/// Default request body limit in bytes
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

// =============================================================================
// Identifier Generation Defaults
// =============================================================================

/// Default idgen epoch (2020-01-01T00:00:00Z), in Unix seconds
pub const DEFAULT_IDGEN_EPOCH_SECS: i64 = 1_577_836_800;

/// Default number of node bits in a generated identifier
pub const DEFAULT_IDGEN_NODE_BITS: u8 = 8;

// =============================================================================
// Pub/Sub Defaults
// =============================================================================

/// Reserved topic carrying the live metrics stream
pub const METRICS_TOPIC_ID: i64 = 0;

/// Length of a topic access token in base-62 characters
pub const TOPIC_TOKEN_LEN: usize = 64;

/// Default upper bound on a single per-subscriber delivery, in milliseconds
pub const DEFAULT_RECEIVE_WINDOW_MS: u64 = 3_000;

/// Default SSE heartbeat period, in seconds
pub const DEFAULT_TICK_SECS: u64 = 30;
