use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use switchyard_config::{CliArgs, Config, default_config_dir};
use switchyard_proxy::{ProxyServer, ProxySettings};

/// Time sessions get to send their disconnect notice after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Resolve config directory
    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);

    // Load or create config, then apply CLI overrides
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config
        .debug
        .log_dir
        .clone()
        .unwrap_or_else(|| config_dir.join("logs"));
    switchyard_log::init_logging(&log_dir, &config);

    let settings = match ProxySettings::from_config(&config) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("Refusing to start: {e}");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        "Default backend {}, {} switch command(s)",
        settings.default_backend,
        config.switch_commands.len()
    );

    let server = Arc::new(ProxyServer::new(settings));
    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received");
            signal_server.shutdown();
        }
    });

    match server.run().await {
        Ok(()) => {
            tokio::time::sleep(SHUTDOWN_GRACE).await;
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Proxy stopped: {e}");
            ExitCode::FAILURE
        }
    }
}
