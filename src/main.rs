//! # permitd
//!
//! Realtime messaging daemon for permit application threads. Loads settings,
//! opens the receipt database, and serves `/ws`, `/health`, and `/metrics`.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use permit_core::logging::{self, LogFormat};
use permit_realtime::{JwtValidator, RealtimeServer, ServerConfig};
use permit_settings::{PermitSettings, load_settings_from_path, settings_path};
use permit_store::{Database, ReceiptRepo};
use tokio::net::TcpListener;

/// Permit realtime server.
#[derive(Parser, Debug)]
#[command(name = "permitd", about = "Permit realtime messaging server")]
struct Cli {
    /// Settings file (defaults to `PERMIT_SETTINGS` or `~/.permit/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, `0` for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Receipt database path (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,
}

impl Cli {
    fn apply(self, settings: &mut PermitSettings) {
        if let Some(host) = self.host {
            settings.server.host = host;
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = self.db_path {
            settings.database.path = path;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = Cli::parse();

    let path = args.settings.take().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    args.apply(&mut settings);

    logging::init_subscriber(
        &settings.logging.level,
        LogFormat::from_setting(&settings.logging.format),
    );
    settings.validate().context("Invalid settings")?;

    let db = Database::open(&settings.database.path).context("Failed to open database")?;
    let validator = Arc::new(JwtValidator::hs256(
        settings.auth.jwt_secret.as_bytes(),
        settings.auth.jwt_issuer.as_deref(),
    ));
    let metrics = permit_realtime::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let server = RealtimeServer::new(
        ServerConfig::from(&settings),
        validator,
        Arc::new(ReceiptRepo::new(db)),
    )
    .with_metrics(metrics);

    let listener = TcpListener::bind((settings.server.host.as_str(), settings.server.port))
        .await
        .with_context(|| {
            format!(
                "Failed to bind {}:{}",
                settings.server.host, settings.server.port
            )
        })?;

    let shutdown = Arc::clone(server.shutdown());
    let _ = tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            return;
        }
        tracing::info!("shutdown signal received");
        shutdown.shutdown();
    });

    server.serve(listener).await.context("Server error")?;
    Ok(())
}
