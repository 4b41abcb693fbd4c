use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use echo_service::{AppConfig, CliArgs, EchoServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let cli = CliArgs::parse();
    let config = AppConfig::load(&cli).wrap_err("Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .wrap_err_with(|| format!("Invalid log level '{}'", config.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        address = %config.server.bind_addr,
        max_connections = config.server.limits.max_concurrent_connections,
        "Starting echo server"
    );

    let server = EchoServer::new(config.server);
    server.run().await.wrap_err("Failed to run echo server")?;

    Ok(())
}
