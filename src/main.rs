use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let http_port = std::env::var("SQLGATE_HTTP_PORT").unwrap_or_else(|_| "7878".to_string());
    let cache_disabled =
        std::env::var("SQLGATE_CACHE_DISABLED").unwrap_or_else(|_| "false".to_string());
    let targets = std::env::vars()
        .filter(|(key, _)| key.starts_with("SQLGATE_DB_URL"))
        .count();
    info!(
        target: "sqlgate",
        "sqlgate starting: RUST_LOG='{}', http_port={}, targets={}, cache_disabled={}",
        rust_log, http_port, targets, cache_disabled
    );

    sqlgate::server::run().await
}
