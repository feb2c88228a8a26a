//! Periodic and on-demand sync triggering.
//!
//! The sync loop owns the reconciler: a startup sync shortly after launch
//! (so a restart right before a meeting still catches it), then a cycle per
//! interval tick or manual trigger. Settings are re-read at each cycle, so a
//! lead-time change applies without a restart.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::reconcile::Reconciler;

/// Delay before the first sync after startup.
const STARTUP_SYNC_DELAY_SECS: u64 = 6;

/// Run the sync loop until every manual-trigger sender is dropped.
pub async fn run_sync_loop(mut reconciler: Reconciler, mut sync_now: mpsc::Receiver<()>) {
    tokio::time::sleep(Duration::from_secs(STARTUP_SYNC_DELAY_SECS)).await;
    reconciler.run_cycle(&Config::load(), Utc::now()).await;

    loop {
        let interval_minutes = Config::load().sync_interval_minutes.max(1);

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(interval_minutes * 60)) => {}
            msg = sync_now.recv() => match msg {
                Some(()) => log::info!("Manual sync requested"),
                None => return,
            },
        }

        reconciler.run_cycle(&Config::load(), Utc::now()).await;
    }
}
