//! Durable one-shot alarm registry and delivery loop.
//!
//! The `alarms` table is the process-wide registry of pending fire times.
//! Registrations survive restarts; the delivery loop picks up whatever is due
//! on its next tick, so an alarm that came due while the process was down
//! still fires on the next activation. It never fires twice: the row is
//! deleted before the key is handed to the dispatcher.
//!
//! The namespace is flat and shared: callers tag their keys with their own
//! prefix and filter [`SyncDb::list_alarms`] accordingly when pruning.

use std::time::Duration;

use chrono::Utc;
use rusqlite::params;
use tokio::sync::mpsc;

use crate::store::{DbError, SyncDb};

/// How often the delivery loop checks for due alarms.
const DELIVERY_TICK_SECS: u64 = 10;

/// An alarm overdue by more than this is dropped instead of fired.
const MISSED_ALARM_GRACE_SECS: i64 = 30 * 60;

impl SyncDb {
    // =========================================================================
    // Alarm registry
    // =========================================================================

    /// Register a one-shot alarm for `key` at `fire_at` (epoch seconds).
    /// Re-registering an existing key replaces its fire time.
    pub fn register_alarm(&self, key: &str, fire_at: i64) -> Result<(), DbError> {
        self.conn_ref().execute(
            "INSERT OR REPLACE INTO alarms (key, fire_at) VALUES (?1, ?2)",
            params![key, fire_at],
        )?;
        Ok(())
    }

    pub fn cancel_alarm(&self, key: &str) -> Result<(), DbError> {
        self.conn_ref()
            .execute("DELETE FROM alarms WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// All registered alarm keys, across every namespace.
    pub fn list_alarms(&self) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn_ref().prepare("SELECT key FROM alarms")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    pub fn alarm_fire_time(&self, key: &str) -> Result<Option<i64>, DbError> {
        use rusqlite::OptionalExtension;
        let fire_at = self
            .conn_ref()
            .query_row(
                "SELECT fire_at FROM alarms WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(fire_at)
    }

    /// Alarms whose fire time is at or before `now`, oldest first.
    pub fn due_alarms(&self, now: i64) -> Result<Vec<(String, i64)>, DbError> {
        let mut stmt = self
            .conn_ref()
            .prepare("SELECT key, fire_at FROM alarms WHERE fire_at <= ?1 ORDER BY fire_at")?;
        let due = stmt
            .query_map(params![now], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<(String, i64)>, _>>()?;
        Ok(due)
    }

    /// Delete an alarm row ahead of delivery. Returns false if the row was
    /// already gone (delivered or cancelled by someone else first).
    pub fn consume_alarm(&self, key: &str) -> Result<bool, DbError> {
        let deleted = self
            .conn_ref()
            .execute("DELETE FROM alarms WHERE key = ?1", params![key])?;
        Ok(deleted > 0)
    }
}

/// Run the alarm delivery loop.
///
/// Ticks every [`DELIVERY_TICK_SECS`], consumes each due alarm, and sends its
/// key to the dispatcher. Returns when the dispatcher side of the channel is
/// dropped.
pub async fn run_alarm_loop(db: SyncDb, fired: mpsc::Sender<String>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(DELIVERY_TICK_SECS));

    loop {
        ticker.tick().await;
        let now = Utc::now().timestamp();

        let due = match db.due_alarms(now) {
            Ok(due) => due,
            Err(e) => {
                log::warn!("Alarm check failed: {}", e);
                continue;
            }
        };

        for (key, fire_at) in due {
            match db.consume_alarm(&key) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    log::warn!("Failed to consume alarm {}: {}", key, e);
                    continue;
                }
            }

            let overdue = now - fire_at;
            if overdue > MISSED_ALARM_GRACE_SECS {
                log::info!("Dropping stale alarm {} ({}s overdue)", key, overdue);
                if let Err(e) = db.remove_meeting_url(&key) {
                    log::warn!("Failed to clean up payload for {}: {}", key, e);
                }
                continue;
            }

            if fired.send(key).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (tempfile::TempDir, SyncDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = SyncDb::open_at(dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_register_and_list() {
        let (_dir, db) = temp_db();

        db.register_alarm("meeting::e1", 1_000).unwrap();
        db.register_alarm("meeting::e2", 2_000).unwrap();

        let mut keys = db.list_alarms().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["meeting::e1", "meeting::e2"]);
    }

    #[test]
    fn test_register_replaces_fire_time() {
        let (_dir, db) = temp_db();

        db.register_alarm("meeting::e1", 1_000).unwrap();
        db.register_alarm("meeting::e1", 5_000).unwrap();

        assert_eq!(db.list_alarms().unwrap().len(), 1);
        assert_eq!(db.alarm_fire_time("meeting::e1").unwrap(), Some(5_000));
    }

    #[test]
    fn test_cancel_removes_registration() {
        let (_dir, db) = temp_db();

        db.register_alarm("meeting::e1", 1_000).unwrap();
        db.cancel_alarm("meeting::e1").unwrap();

        assert!(db.list_alarms().unwrap().is_empty());
        assert!(db.alarm_fire_time("meeting::e1").unwrap().is_none());
    }

    #[test]
    fn test_due_alarms_boundary() {
        let (_dir, db) = temp_db();

        db.register_alarm("meeting::past", 900).unwrap();
        db.register_alarm("meeting::exact", 1_000).unwrap();
        db.register_alarm("meeting::future", 1_100).unwrap();

        let due = db.due_alarms(1_000).unwrap();
        let keys: Vec<&str> = due.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["meeting::past", "meeting::exact"]);
    }

    #[test]
    fn test_consume_is_single_shot() {
        let (_dir, db) = temp_db();

        db.register_alarm("meeting::e1", 1_000).unwrap();
        assert!(db.consume_alarm("meeting::e1").unwrap());
        assert!(!db.consume_alarm("meeting::e1").unwrap());
    }

    #[tokio::test]
    async fn test_delivery_sends_due_and_drops_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = SyncDb::open_at(path.clone()).unwrap();

        let now = Utc::now().timestamp();
        db.register_alarm("meeting::due", now - 5).unwrap();
        db.set_meeting_url("meeting::due", "https://meet.x/due")
            .unwrap();
        db.register_alarm("meeting::stale", now - MISSED_ALARM_GRACE_SECS - 60)
            .unwrap();
        db.set_meeting_url("meeting::stale", "https://meet.x/stale")
            .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let loop_db = SyncDb::open_at(path).unwrap();
        let handle = tokio::spawn(run_alarm_loop(loop_db, tx));

        // The stale alarm sorts first, gets dropped, and only the due one
        // reaches the channel.
        let key = rx.recv().await.unwrap();
        assert_eq!(key, "meeting::due");
        handle.abort();

        assert!(db.list_alarms().unwrap().is_empty());
        assert!(db.get_meeting_url("meeting::stale").unwrap().is_none());
        assert!(db.get_meeting_url("meeting::due").unwrap().is_some());
    }
}
