use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

use encore::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging; default to info when RUST_LOG is unset or unparsable
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("encore admin backup service\n\nUSAGE:\n  encore [--port N] [--data-root PATH] [--store file|memory]\n\nOPTIONS:\n  --port N           HTTP port (env: ENCORE_HTTP_PORT, default 7878)\n  --data-root PATH   Document store folder (env: ENCORE_DATA_ROOT, default data)\n  --store KIND       file or memory (env: ENCORE_STORE, default file)\n");
        return Ok(());
    }

    let config = Config::from_env().apply_args(&args);
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "startup",
        "encore starting: RUST_LOG='{}', http_port={}, store={:?}, data_root='{}', lock_ttl_secs={}, import_budget_secs={}, import_max_bytes={}, environment={}",
        rust_log, config.http_port, config.store, config.data_root.display(),
        config.lock_ttl.as_secs(), config.import_budget.as_secs(), config.import_max_bytes, config.environment
    );

    encore::server::run(config).await
}
