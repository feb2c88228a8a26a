//! Always Early daemon entry point.
//!
//! Wires three long-running tasks over one WAL-mode database: the alarm
//! delivery loop, the dispatcher that opens fired meetings, and the calendar
//! sync loop. On unix, SIGUSR1 requests an immediate sync.

use std::sync::Arc;

use tokio::sync::mpsc;

use always_early::alarms;
use always_early::dispatch::{self, SystemOpener};
use always_early::google::calendar::GoogleCalendarApi;
use always_early::google::GoogleTokenProvider;
use always_early::reconcile::Reconciler;
use always_early::scheduler;
use always_early::store::SyncDb;

/// Channel buffer for fired-alarm keys.
const ALARM_CHANNEL_SIZE: usize = 32;

fn open_db_or_exit() -> SyncDb {
    match SyncDb::open() {
        Ok(db) => db,
        Err(e) => {
            log::error!("Cannot open database: {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Always Early starting");

    let (alarm_tx, mut alarm_rx) = mpsc::channel::<String>(ALARM_CHANNEL_SIZE);
    let (sync_tx, sync_rx) = mpsc::channel::<()>(8);

    // Delivery: due alarms flow from the durable registry to the dispatcher.
    tokio::spawn(alarms::run_alarm_loop(open_db_or_exit(), alarm_tx));

    // Dispatch: consume each fired alarm's payload and open the meeting.
    let dispatch_db = open_db_or_exit();
    tokio::spawn(async move {
        let opener = SystemOpener;
        while let Some(key) = alarm_rx.recv().await {
            dispatch::handle_alarm(&dispatch_db, &opener, &key);
        }
    });

    // Sync: reconcile the calendar window on a fixed cadence or on demand.
    let reconciler = Reconciler::new(
        open_db_or_exit(),
        Arc::new(GoogleTokenProvider),
        Arc::new(GoogleCalendarApi::new()),
    );
    tokio::spawn(scheduler::run_sync_loop(reconciler, sync_rx));

    // SIGUSR1 is the "sync now" signal for external tooling.
    #[cfg(unix)]
    {
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut usr1 = match signal(SignalKind::user_defined1()) {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("SIGUSR1 handler unavailable: {}", e);
                    return;
                }
            };
            while usr1.recv().await.is_some() {
                if sync_tx.send(()).await.is_err() {
                    return;
                }
            }
        });
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
    }
    log::info!("Shutdown signal received, stopping");

    // Closing the manual-sync channel lets the sync loop wind down.
    drop(sync_tx);
}
