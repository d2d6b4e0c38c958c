//! Main application entry point for the canvas server.
//!
//! Loads the configuration, sets up logging, installs the session resolver
//! once it is ready and runs the server until a termination signal arrives.

mod cli;
mod config;
mod signals;

use anyhow::{Context, Result};
use canvas_server::session::{HttpSessionResolver, ResolverSlot, SessionResolver, StaticSessionResolver};
use canvas_server::CanvasServer;
use cli::CliArgs;
use clap::Parser;
use config::{AppConfig, LoggingSettings, SessionProvider, SessionSettings};
use signals::setup_signal_handlers;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging system.
///
/// `RUST_LOG` takes precedence over the configured level.
fn setup_logging(config: &LoggingSettings) {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .init();
    }

    info!("Logging initialized with level: {}", log_level);
}

/// Publishes the configured resolver into `slot` once it answers its probe.
///
/// Connections accepted in the meantime wait on the slot.
fn install_resolver(settings: &SessionSettings, slot: ResolverSlot) -> Result<()> {
    let resolver: Arc<dyn SessionResolver> = match settings.provider {
        SessionProvider::Disabled => {
            warn!("Session resolution disabled, every client is anonymous");
            return Ok(());
        }
        SessionProvider::Static => Arc::new(
            settings
                .tokens
                .iter()
                .map(|entry| (entry.token.clone(), entry.identity()))
                .collect::<StaticSessionResolver>(),
        ),
        SessionProvider::Http => Arc::new(
            HttpSessionResolver::new(
                settings.endpoint.clone(),
                Duration::from_millis(settings.request_timeout_ms),
            )
            .context("Failed to build session client")?,
        ),
    };

    let retry = Duration::from_millis(settings.probe_retry_ms.max(1));
    tokio::spawn(async move {
        loop {
            match resolver.probe().await {
                Ok(()) => {
                    slot.install(resolver);
                    return;
                }
                Err(e) => {
                    warn!("Session resolver '{}' not ready: {}", resolver.name(), e);
                    tokio::time::sleep(retry).await;
                }
            }
        }
    });
    Ok(())
}

/// Main application struct.
pub struct Application {
    config: AppConfig,
    server: Arc<CanvasServer>,
}

impl Application {
    /// Loads configuration, applies CLI overrides and opens the server.
    pub async fn new(args: CliArgs) -> Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }
        if let Some(http_address) = args.http_address {
            config.server.http_address = Some(http_address);
        }
        if let Some(journal) = args.journal {
            config.ledger.journal_path = Some(journal);
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        config
            .validate()
            .context("Configuration validation failed")?;

        setup_logging(&config.logging);
        info!("Config: {}", args.config_path.display());

        let server_config = config.to_server_config()?;
        let server = CanvasServer::open(server_config, ResolverSlot::empty()).await?;

        Ok(Self {
            config,
            server: Arc::new(server),
        })
    }

    /// Runs until a termination signal arrives.
    pub async fn run(self) -> Result<()> {
        info!("Starting canvas server {}", env!("CARGO_PKG_VERSION"));
        info!("  WebSocket: {}", self.config.server.bind_address);
        if let Some(http_address) = &self.config.server.http_address {
            info!("  HTTP: {}", http_address);
        }
        info!(
            "  Grid: {0}x{0}, seed: {1:?}",
            self.config.board.grid_size, self.config.board.seed
        );
        info!("  Max connections: {}", self.config.server.max_connections);

        install_resolver(&self.config.session, self.server.resolver_slot())?;

        let server_handle = {
            let server = self.server.clone();
            tokio::spawn(async move {
                if let Err(e) = server.start().await {
                    error!("Server error: {}", e);
                    std::process::exit(1);
                }
            })
        };

        info!("Press Ctrl+C to shut down");
        setup_signal_handlers().await?;

        info!("Shutdown signal received, stopping");
        self.server.shutdown();
        if let Err(e) = server_handle.await {
            warn!("Server task ended abnormally: {}", e);
        }

        info!("Canvas server shutdown complete");
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let app = Application::new(args).await?;
    app.run().await
}
