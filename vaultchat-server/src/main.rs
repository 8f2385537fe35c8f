use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};
use vaultchat_core::config::StoreBackend;
use vaultchat_core::{KvStore, MemoryStore, PgStore, SessionVault, VaultChatConfig};

use vaultchat_server::http::{self, HttpState};
use vaultchat_server::maintenance;
use vaultchat_server::upstream::UpstreamClient;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "vaultchat.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience; production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match VaultChatConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    let (tx, _rx) = broadcast::channel(1);

    // Connect the store
    let store: Arc<dyn KvStore> = match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; sessions are lost on restart");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Postgres => match PgStore::connect(&config.store).await {
            Ok(pg) => {
                if !args.health {
                    tokio::spawn(maintenance::run_purge_loop(
                        pg.clone(),
                        Duration::from_secs(config.store.purge_interval_seconds),
                        tx.subscribe(),
                    ));
                }
                Arc::new(pg)
            }
            Err(e) => {
                eprintln!("Failed to connect to store: {}", e);
                std::process::exit(1);
            }
        },
    };

    if args.health {
        match store.ping().await {
            Ok(v) => println!("✅ Store ({}) reachable: {}", store.name(), v),
            Err(e) => {
                println!("❌ Store ({}) check failed: {}", store.name(), e);
                std::process::exit(1);
            }
        }
        println!("✅ VaultChat health check passed");
        return Ok(());
    }

    let vault = match SessionVault::from_config(store, &config.vault) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Invalid vault configuration: {}", e);
            std::process::exit(1);
        }
    };

    let upstream = match UpstreamClient::new(config.upstream.clone().with_env_fallback()) {
        Ok(u) => u,
        Err(e) => {
            eprintln!("Invalid upstream configuration: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!("Forwarding chat requests to {}", upstream.url());

    let state = Arc::new(HttpState {
        vault,
        upstream: Arc::new(upstream),
        identity: config.identity.clone(),
    });

    let shutdown_tx = tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    http::start_http_server(state, &config.http, tx.subscribe()).await?;

    Ok(())
}
