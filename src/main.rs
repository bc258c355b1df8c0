//! Application entry point for the `sensorflow-tiered` pipeline.
//!
//! This binary orchestrates the full startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Loading or training the anomaly model and connecting every sink
//! - Serving the read-only status routes (`/health`, `/stats`)
//! - Running the cycle loop until Ctrl-C
//!
//! # Environment Variables
//! See [`sensorflow_tiered::config::load_from_env`] for the pipeline settings.
//! Logging is controlled by:
//! - `LOG_LEVEL` (optional) – log verbosity (default: `info`)
//! - `LOG_SPAN_EVENTS` (optional) – span event mode for tracing
//! - `FORCE_COLOR` (optional) – override TTY color detection
use std::env;

use anyhow::Result;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tokio::sync::watch;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use sensorflow_tiered::pipeline::forward_shutdown;
use sensorflow_tiered::{config, routes, Pipeline, StartupError};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let pipeline = match Pipeline::start(&cfg).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!("Pipeline startup failed: {}", e);
            return Err(e.into());
        }
    };

    if let Some(addr) = cfg.status_addr {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| StartupError::StatusServer {
                addr: addr.to_string(),
                source,
            })?;
        let app = routes::router(pipeline.stats());
        tracing::info!("Status server listening on {}", addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Status server stopped: {}", e);
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(forward_shutdown(tokio::signal::ctrl_c(), shutdown_tx));

    let stats = pipeline.run(shutdown_rx).await;
    tracing::info!(
        "Pipeline stopped: total={} anomalies={} errors={}",
        stats.total_readings,
        stats.anomalies_detected,
        stats.errors
    );

    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `LOG_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by `RUST_LOG`, else the `LOG_LEVEL` env var
///
/// Call once at startup before any logging macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("LOG_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
