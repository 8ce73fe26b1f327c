//! promsink receiver binary
//!
//! Accepts Prometheus Remote Write requests on `POST /write` and appends every
//! sample to the output file. Send `SIGUSR1` (or touch the reopen trigger file
//! in marker mode) after moving the file away to make the process reopen it.

use promsink::api::{self, ApiServerConfig};
use promsink::config::{parse_listen_addr, write_pid_file, RotationMode, ServerConfig};
use promsink::ingester::{Ingester, IngesterConfig};
use promsink::schema::RecordFormat;
use promsink::telemetry::{LogFormat, Telemetry};
use promsink::Error;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// promsink receiver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the output file
    #[arg(long, env = "PROMSINK_OUTPUT")]
    output: PathBuf,

    /// Address to listen on (":8080" binds every interface)
    #[arg(long, env = "PROMSINK_LISTEN", default_value = ":8080")]
    listen: String,

    /// Record format: json or tsv
    #[arg(long, env = "PROMSINK_FORMAT", default_value = "json")]
    format: String,

    /// Rotation trigger: signal, marker or none (default: signal, or marker
    /// when --reopen-trigger is given)
    #[arg(long, env = "PROMSINK_ROTATION")]
    rotation: Option<String>,

    /// Marker file whose modification makes the sink reopen
    #[arg(long, env = "PROMSINK_REOPEN_TRIGGER")]
    reopen_trigger: Option<PathBuf>,

    /// Path to pid file
    #[arg(long, env = "PROMSINK_PIDFILE")]
    pidfile: Option<PathBuf>,

    /// Maximum request body size in bytes
    #[arg(long, env = "PROMSINK_MAX_BODY_SIZE", default_value = "33554432")]
    max_body_size: usize,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format: json or text
    #[arg(long, default_value = "json")]
    log_format: String,
}

impl Args {
    fn into_config(self) -> promsink::Result<ServerConfig> {
        let config = ServerConfig {
            ingester: IngesterConfig {
                output: self.output,
                format: self.format.parse::<RecordFormat>()?,
                rotation: RotationMode::resolve(self.rotation.as_deref(), self.reopen_trigger)?,
            },
            api: ApiServerConfig {
                listen: parse_listen_addr(&self.listen)?,
                max_body_size: self.max_body_size,
            },
            pid_file: self.pidfile,
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_format = args.log_format.parse::<LogFormat>()?;
    let _telemetry = Telemetry::init_for_component("promsink", &args.log_level, log_format)?;

    let config = args.into_config()?;

    if let Some(pid_file) = &config.pid_file {
        write_pid_file(pid_file)?;
    }

    info!("Starting promsink");

    // Without a writable sink there is nothing to serve.
    let ingester = Arc::new(Ingester::open(config.ingester.clone()).await?);

    let router = api::build_http_router(ingester.clone(), &config.api);
    let listener = TcpListener::bind(config.api.listen).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    info!(listen = %config.api.listen, "Listening");

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
        .await
        .map_err(|e| Error::Internal(format!("HTTP server error: {e}")));

    info!("promsink shutting down");

    if let Err(e) = ingester.shutdown().await {
        error!(error = %e, "Closing output file failed");
    }
    served?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    if *shutdown.borrow() {
        return;
    }
    let _ = shutdown.changed().await;
}
