//! Quiet-period coalescing of record change events.
//!
//! Editors emit several raw filesystem notifications per logical save
//! (autosave, write-then-rename, metadata touches). Acting only after a
//! record has been quiet for a fixed period collapses each burst into a
//! single settle signal and avoids reading a half-written file.
//!
//! Each pending path is a tiny state machine: absence from the table is
//! `Idle`; presence holds the last-event instant, and every new event
//! restarts the quiet timer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Debouncer {
    /// Pending changes: record path -> last change timestamp.
    pending: HashMap<PathBuf, Instant>,
    /// How long a record must stay quiet before it settles.
    quiet: Duration,
}

impl Debouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            quiet,
        }
    }

    /// Note a change event for this path, restarting its quiet timer.
    pub fn touch(&mut self, path: PathBuf) {
        self.pending.insert(path, Instant::now());
    }

    /// Drop a pending path (the record was deleted). Returns whether it
    /// was pending.
    pub fn forget(&mut self, path: &Path) -> bool {
        self.pending.remove(path).is_some()
    }

    /// Take every path whose quiet period has elapsed.
    ///
    /// Settled paths leave the table; they re-enter on the next event.
    pub fn drain_settled(&mut self) -> Vec<PathBuf> {
        let now = Instant::now();
        let mut settled = Vec::new();

        self.pending.retain(|path, last_change| {
            if now.duration_since(*last_change) >= self.quiet {
                settled.push(path.clone());
                false
            } else {
                true
            }
        });

        settled
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn settles_after_quiet_period() {
        let mut debouncer = Debouncer::new(Duration::from_millis(50));

        let path = PathBuf::from("/out/json/tower3_detections.json");
        debouncer.touch(path.clone());

        // immediately after, nothing has settled
        assert!(debouncer.drain_settled().is_empty());
        assert!(!debouncer.is_idle());

        sleep(Duration::from_millis(60));

        let settled = debouncer.drain_settled();
        assert_eq!(settled, vec![path]);
        assert!(debouncer.is_idle());
    }

    #[test]
    fn new_event_restarts_quiet_timer() {
        let mut debouncer = Debouncer::new(Duration::from_millis(50));

        let path = PathBuf::from("/out/json/tower3_detections.json");
        debouncer.touch(path.clone());

        sleep(Duration::from_millis(30));
        debouncer.touch(path.clone());

        // 60ms since the first event, only 30ms since the second
        sleep(Duration::from_millis(30));
        assert!(debouncer.drain_settled().is_empty());

        sleep(Duration::from_millis(30));
        assert_eq!(debouncer.drain_settled(), vec![path]);
    }

    #[test]
    fn paths_settle_independently() {
        let mut debouncer = Debouncer::new(Duration::from_millis(50));

        let first = PathBuf::from("/out/json/a_detections.json");
        let second = PathBuf::from("/out/json/b_detections.json");

        debouncer.touch(first.clone());
        sleep(Duration::from_millis(30));
        debouncer.touch(second.clone());

        sleep(Duration::from_millis(25));
        assert_eq!(debouncer.drain_settled(), vec![first]);
        assert!(!debouncer.is_idle());

        sleep(Duration::from_millis(30));
        assert_eq!(debouncer.drain_settled(), vec![second]);
    }

    #[test]
    fn forget_clears_pending_state() {
        let mut debouncer = Debouncer::new(Duration::from_millis(50));

        let path = PathBuf::from("/out/json/tower3_detections.json");
        debouncer.touch(path.clone());
        assert!(debouncer.forget(&path));
        assert!(debouncer.is_idle());
        assert!(!debouncer.forget(&path));
    }
}
