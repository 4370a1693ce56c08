use std::collections::HashMap;

/// Drops repeated scans of the same uid within a configurable window (§4.7,
/// default 1000ms). One instance per reader/kiosk; not shared across
/// kiosks, since the same physical card can legitimately be presented at
/// two different kiosks in quick succession.
///
/// Takes millisecond timestamps (not [`locker_core::types::Timestamp`],
/// which is second-resolution) since the debounce window itself is
/// sub-second.
pub struct Debouncer {
    window_ms: i64,
    last_seen_ms: HashMap<String, i64>,
}

impl Debouncer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms: window_ms as i64,
            last_seen_ms: HashMap::new(),
        }
    }

    /// Returns `true` if this scan should be processed. Only accepted scans
    /// update `last_seen_ms`, so a rejected burst doesn't keep pushing the
    /// window forward past the original scan.
    pub fn accept(&mut self, uid: &str, now_ms: i64) -> bool {
        if let Some(&last) = self.last_seen_ms.get(uid) {
            if now_ms - last < self.window_ms {
                return false;
            }
        }
        self.last_seen_ms.insert(uid.to_string(), now_ms);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_scan_is_always_accepted() {
        let mut debouncer = Debouncer::new(1000);
        assert!(debouncer.accept("UID1", 0));
    }

    #[test]
    fn repeated_scan_within_window_is_rejected() {
        let mut debouncer = Debouncer::new(1000);
        assert!(debouncer.accept("UID1", 0));
        assert!(!debouncer.accept("UID1", 500));
    }

    #[test]
    fn scan_after_window_elapses_is_accepted_again() {
        let mut debouncer = Debouncer::new(1000);
        assert!(debouncer.accept("UID1", 0));
        assert!(debouncer.accept("UID1", 1200));
    }

    #[test]
    fn a_rejected_burst_does_not_push_the_window_forward() {
        let mut debouncer = Debouncer::new(1000);
        assert!(debouncer.accept("UID1", 0));
        assert!(!debouncer.accept("UID1", 400));
        assert!(!debouncer.accept("UID1", 800));
        // Window measured from the original accepted scan at t=0, not t=800.
        assert!(debouncer.accept("UID1", 1000));
    }

    #[test]
    fn distinct_uids_do_not_debounce_each_other() {
        let mut debouncer = Debouncer::new(1000);
        assert!(debouncer.accept("UID1", 0));
        assert!(debouncer.accept("UID2", 0));
    }
}
