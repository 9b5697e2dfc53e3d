use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

use kbase::config::{parse_bool, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    let ansi = std::env::var("KBASE_LOG_ANSI").ok().and_then(|v| parse_bool(&v)).unwrap_or(true);
    fmt().with_env_filter(filter).with_ansi(ansi).init();

    let config = ServerConfig::from_env()?;

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let store = config.data_dir.as_ref().map(|d| d.display().to_string()).unwrap_or_else(|| "<memory>".to_string());
    info!(
        target: "startup",
        "kbase starting: RUST_LOG='{}', bind={}, issuer='{}', access_ttl={}s, refresh_ttl={}s, store={}, admin_seed={}",
        rust_log,
        config.bind_addr(),
        config.jwt_issuer,
        config.access_ttl.as_secs(),
        config.refresh_ttl.as_secs(),
        store,
        config.admin.is_some()
    );

    kbase::server::run(config).await
}
