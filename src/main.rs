use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::{error, info};

use ssap::config::SsapConfig;
use ssap::provider::HttpProviderClient;
use ssap::{build_router, run_startup_checks, AppState};

#[derive(Parser)]
#[command(name = "ssapd", about = "Sandbox Session & Access Proxy", version)]
struct Args {
    /// Address to bind the HTTP/WS server to.
    #[arg(long, env = "SSAP_BIND_ADDR")]
    bind_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "SSAP_LOG")]
    log: Option<String>,

    /// Path to `config.toml` (a `[sandbox]` table). Optional.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = args.log.clone().unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_level).compact().init();

    info!(version = env!("CARGO_PKG_VERSION"), "ssapd starting");

    let config = SsapConfig::load(&args.config, args.bind_addr.clone(), args.log.clone())
        .context("failed to resolve configuration")?;

    if !config.enabled {
        info!("SSAP routes are disabled (enabled=false) — serving /healthz only, 404 everywhere else");
    }

    let config = Arc::new(config);
    let provider: Arc<dyn ssap::provider::ProviderClient> = Arc::new(HttpProviderClient::new(&config.provider));

    if let Err(e) = run_startup_checks(&config, provider.as_ref()).await {
        error!(err = %e, "startup hook failed — refusing to start");
        std::process::exit(1);
    }

    let state = Arc::new(AppState::new(config.clone(), provider));
    let router = build_router(state);

    info!(addr = %config.bind_addr, "listening");
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
