use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use fleetgate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "startup",
        "fleetgate {} starting: RUST_LOG='{}', http_port={}, engine={:?}, state_file='{}'",
        env!("CARGO_PKG_VERSION"),
        rust_log,
        config.http_port,
        config.engine,
        config.state_file.display()
    );

    fleetgate::server::run(config).await
}
