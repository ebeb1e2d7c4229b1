//! Periodic maintenance tasks.

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use versenotes_auth::TokenStore;
use versenotes_core::Clock;

const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(6 * 60 * 60);

/// Deletes expired token rows on a fixed cadence until shutdown.
pub fn spawn_token_cleanup(
    tokens: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    shutdown: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(CLEANUP_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup stays quiet.
        tick.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    info!("token cleanup stopping");
                    break;
                }
                _ = tick.tick() => {
                    match tokens.delete_expired(clock.now()).await {
                        Ok(deleted) => info!(deleted, "expired tokens removed"),
                        Err(err) => error!(error = %err, "scheduled token cleanup failed"),
                    }
                }
            }
        }
    })
}
