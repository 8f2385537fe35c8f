//! Background expiry sweep for the PostgreSQL store.
//!
//! Reads already ignore expired rows; this only reclaims their space.

use tokio::sync::broadcast;
use tokio::time::{Duration, MissedTickBehavior};
use vaultchat_core::PgStore;

pub async fn run_purge_loop(
    store: PgStore,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!("Expiry sweep started (interval: {}s)", interval.as_secs());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match store.purge_expired().await {
                    Ok(0) => tracing::debug!("Expiry sweep: nothing to purge"),
                    Ok(n) => tracing::info!("Expiry sweep purged {} sessions", n),
                    Err(e) => tracing::warn!("Expiry sweep error (non-fatal): {}", e),
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Expiry sweep shutting down");
                break;
            }
        }
    }
}
