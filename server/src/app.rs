//! Core application

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::ApiServer;
use crate::core::cli::{self, CliConfig};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::idgen::IdGen;
use crate::core::shutdown::ShutdownService;
use crate::data::{Recorder, RecorderError};
use crate::pubsub::PubSubService;

pub struct CoreApp {
    pub config: AppConfig,
    pub pubsub: Arc<PubSubService>,
    pub shutdown: ShutdownService,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");
        let cli_config = cli::parse();
        let app = Self::init(&cli_config)?;
        Self::start_server(app).await
    }

    fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;

        let idgen = IdGen::new(&config.idgen);
        tracing::debug!(node = idgen.node(), "Identifier generator ready");

        let recorder = match Recorder::open(&config.kv) {
            Ok(recorder) => Some(Arc::new(recorder)),
            Err(RecorderError::NotEnabled) => None,
            Err(e) => return Err(e).context("Failed to open the persistent recorder"),
        };

        let pubsub = Arc::new(
            PubSubService::init(&config.pubsub, idgen, recorder.clone())
                .map_err(|e| anyhow::anyhow!("Failed to initialize pub/sub engine: {e}"))?,
        );
        let shutdown = ShutdownService::new(recorder);

        Ok(Self {
            config,
            pubsub,
            shutdown,
        })
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start_server(app: Self) -> Result<()> {
        // Install signal handlers FIRST (before any blocking calls)
        app.shutdown.install_signal_handlers();

        tracing::info!(
            host = %app.config.server.host,
            port = app.config.server.port,
            kv_enabled = app.config.kv.enabled,
            static_pubsubs = app.config.pubsub.static_pubsubs.len(),
            "Pubcast starting"
        );

        let server = ApiServer::new(app);
        let app = server.start().await?;
        app.shutdown.shutdown().await;

        Ok(())
    }
}
