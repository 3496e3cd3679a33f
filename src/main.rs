use anyhow::{Context, Result};
use ide_host::bridge::transport::serve_stdio;
use ide_host::utils::path_utils::launch_file_from_args;
use ide_host::{Config, Host};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt::format::FmtSpan, FmtSubscriber};

fn setup_logging(log_level_str: &str) -> Result<()> {
    let level = match log_level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ide_host={}", level)));

    // Stdout carries the bridge; logs must stay on stderr.
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_span_events(FmtSpan::CLOSE)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    setup_logging(&config.log_level)?;

    tracing::info!(version = %env!("CARGO_PKG_VERSION"), "Starting ide-host");
    tracing::debug!("Loaded configuration: {:?}", config);

    if config.git_path.is_none() {
        tracing::warn!("git is not installed or not in PATH. Git channels will fail.");
    }

    let host = Arc::new(Host::new(config));
    if let Some(path) = launch_file_from_args(std::env::args_os().map(|a| a.to_string_lossy().into_owned())) {
        host.open_file_on_connect(&path);
    }

    let outcome = tokio::select! {
        result = serve_stdio(host.clone()) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted; stopping bridge");
            Ok(())
        }
    };

    host.shutdown();
    tracing::info!("Host shutdown.");
    outcome
}
