#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Communication pool node entrypoint (systemd-friendly).
//!
//! Loads a [`mpc_comm_pool::config::PoolConfig`] from disk, brings up the
//! local server (if configured) and a client handler for every static peer,
//! then idles until interrupted.

use std::sync::Arc;

use mpc_comm_pool::config::PoolConfig;
use mpc_comm_pool::pool::Pool;
use tracing::{error, info, warn};

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

async fn build_pool(config: &PoolConfig) -> anyhow::Result<Arc<Pool>> {
    let tls = config.server.as_ref().and_then(|s| s.tls.as_ref());
    let pool = Arc::new(Pool::new(
        tls.map(|t| t.private_key.clone()),
        tls.map(|t| t.cert_chain.clone()),
        tls.map(|t| t.ca_bundle.clone()),
        std::time::Duration::from_millis(config.retry_delay_ms),
        config.max_retries,
    ));

    if let Some(server) = &config.server {
        let addr = server.addr.parse()?;
        pool.add_server(addr, Some(server.port), server.external_port).await?;
        info!(addr = %server.addr, port = server.port, "server listening");
    }

    for peer in &config.peers {
        let url = reqwest::Url::parse(&peer.url)?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("peer {} has no host in url {}", peer.name, peer.url))?;
        let port = url.port_or_known_default();
        pool.add_client(&peer.name, host, port, None).await?;
        info!(peer = %peer.name, url = %peer.url, "peer registered");
    }

    Ok(pool)
}

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt().with_target(false).with_level(true).json().try_init();

    let config_path = env("MPC_POOL_CONFIG", "./pool.toml");
    let config = match PoolConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load pool config from {config_path}: {e}");
            std::process::exit(1);
        }
    };

    let pool = match build_pool(&config).await {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "failed to bring up pool");
            std::process::exit(1);
        }
    };

    info!("pool ready; waiting for shutdown signal");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }

    info!("shutting down");
    pool.shutdown().await;
}
