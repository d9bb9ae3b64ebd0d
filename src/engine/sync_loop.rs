//! Periodic live sync of the navigation folders.

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::Engine;

/// Spawn the live sync loop. Every tick loads (first time) or syncs each
/// always-visible folder; ticks are skipped while a search is active. The
/// loop ends when `shutdown_rx` receives or its sender is dropped, committing
/// pending actions on the way out.
pub fn spawn_sync_loop(engine: Engine, shutdown_rx: mpsc::Receiver<()>) -> JoinHandle<()> {
    tokio::spawn(sync_loop(engine, shutdown_rx))
}

async fn sync_loop(engine: Engine, mut shutdown_rx: mpsc::Receiver<()>) {
    let mut ticker = tokio::time::interval(engine.config().sync_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let folders = engine.config().always_visible_folders();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if engine.is_searching().await {
                    tracing::debug!("Search active, skipping sync");
                    continue;
                }

                tracing::debug!("Syncing {} folders", folders.len());
                join_all(
                    folders
                        .iter()
                        .map(|folder| engine.initialize_or_sync_folder(folder)),
                )
                .await;
            }

            _ = shutdown_rx.recv() => {
                tracing::debug!("Sync loop received shutdown signal");
                engine.flush_pending().await;
                return;
            }
        }
    }
}
