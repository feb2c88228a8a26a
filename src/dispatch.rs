//! Handles fired meeting alarms.
//!
//! Consumption is the serialization point: `take_meeting_url` reads and
//! deletes the payload in one transaction, so however many entry points race
//! on the same key, the browser opens at most once per registration.

use crate::store::SyncDb;

/// Opens (or focuses) a URL for the user.
pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> std::io::Result<()>;
}

/// Production opener: hands the URL to the platform's default browser.
pub struct SystemOpener;

impl UrlOpener for SystemOpener {
    fn open(&self, url: &str) -> std::io::Result<()> {
        open::that(url)
    }
}

/// Consume the payload for a fired alarm and open the meeting.
pub fn handle_alarm(db: &SyncDb, opener: &dyn UrlOpener, key: &str) {
    let url = match db.take_meeting_url(key) {
        Ok(Some(url)) => url,
        Ok(None) => {
            log::warn!("No URL stored for alarm {}", key);
            return;
        }
        Err(e) => {
            log::warn!("Failed to look up alarm {}: {}", key, e);
            return;
        }
    };

    log::info!("Opening meeting for {}: {}", key, url);
    if let Err(e) = opener.open(&url) {
        log::warn!("Failed to open {}: {}", url, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingOpener {
        opened: Mutex<Vec<String>>,
    }

    impl UrlOpener for RecordingOpener {
        fn open(&self, url: &str) -> std::io::Result<()> {
            self.opened.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    struct FailingOpener;

    impl UrlOpener for FailingOpener {
        fn open(&self, _url: &str) -> std::io::Result<()> {
            Err(std::io::Error::other("no browser"))
        }
    }

    fn temp_db() -> (tempfile::TempDir, SyncDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = SyncDb::open_at(dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_opens_payload_exactly_once() {
        let (_dir, db) = temp_db();
        db.set_meeting_url("meeting::e1", "https://meet.x/e1").unwrap();
        let opener = RecordingOpener::default();

        handle_alarm(&db, &opener, "meeting::e1");
        handle_alarm(&db, &opener, "meeting::e1");

        assert_eq!(*opener.opened.lock().unwrap(), vec!["https://meet.x/e1"]);
        assert!(db.get_meeting_url("meeting::e1").unwrap().is_none());
    }

    #[test]
    fn test_absent_key_is_a_no_op() {
        let (_dir, db) = temp_db();
        let opener = RecordingOpener::default();

        handle_alarm(&db, &opener, "meeting::unknown");

        assert!(opener.opened.lock().unwrap().is_empty());
    }

    #[test]
    fn test_opener_failure_still_consumes_payload() {
        let (_dir, db) = temp_db();
        db.set_meeting_url("meeting::e1", "https://meet.x/e1").unwrap();

        handle_alarm(&db, &FailingOpener, "meeting::e1");

        // The registration was spent; the next cycle can re-create it if the
        // event is still upcoming.
        assert!(db.get_meeting_url("meeting::e1").unwrap().is_none());
    }
}
