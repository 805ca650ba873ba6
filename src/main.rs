use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use wavecast::core::config::AppConfig;
use wavecast::core::shutdown::ShutdownCoordinator;
use wavecast::server::listener::HlsServer;
use wavecast::storage::StorageLayout;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AppConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    info!(version = env!("CARGO_PKG_VERSION"), "wavecast starting");

    let layout = StorageLayout::new(&config.storage);
    if let Err(e) = layout.ensure_roots() {
        error!(error = %e, "failed to prepare storage roots");
        return ExitCode::FAILURE;
    }

    let config = Arc::new(config);
    let layout = Arc::new(layout);

    let shutdown = ShutdownCoordinator::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        signal_shutdown.wait_for_signal_and_shutdown().await;
    });

    let server = HlsServer::new(config.clone(), layout.clone(), shutdown.token());
    match server.run().await {
        Ok(()) => {
            info!("server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(log_level: &str, log_format: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    match log_format {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
