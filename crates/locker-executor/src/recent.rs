use std::collections::{HashMap, VecDeque};

/// The terminal outcome the executor reported for a command, cached so a
/// redelivered claim can be answered without re-actuating hardware (§4.5
/// step 3's "defensive idempotency against duplicate dispatch").
#[derive(Clone, Debug)]
pub struct CachedOutcome {
    pub succeeded: bool,
    pub error: Option<String>,
    pub retryable: bool,
}

/// Bounded LRU of `command_id -> CachedOutcome`. Small and local to one
/// kiosk process, so a `HashMap` + eviction queue is simpler than pulling
/// in a crate for it.
pub struct RecentOutcomes {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, CachedOutcome>,
}

impl RecentOutcomes {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    pub fn get(&self, command_id: &str) -> Option<CachedOutcome> {
        self.entries.get(command_id).cloned()
    }

    pub fn insert(&mut self, command_id: String, outcome: CachedOutcome) {
        if !self.entries.contains_key(&command_id) {
            self.order.push_back(command_id.clone());
            if self.order.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.entries.remove(&evicted);
                }
            }
        }
        self.entries.insert(command_id, outcome);
    }
}

impl Default for RecentOutcomes {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recalls_an_inserted_outcome() {
        let mut recent = RecentOutcomes::new(4);
        recent.insert(
            "cmd-1".into(),
            CachedOutcome {
                succeeded: true,
                error: None,
                retryable: false,
            },
        );
        let cached = recent.get("cmd-1").unwrap();
        assert!(cached.succeeded);
    }

    #[test]
    fn evicts_oldest_entry_once_over_capacity() {
        let mut recent = RecentOutcomes::new(2);
        let ok = CachedOutcome {
            succeeded: true,
            error: None,
            retryable: false,
        };
        recent.insert("a".into(), ok.clone());
        recent.insert("b".into(), ok.clone());
        recent.insert("c".into(), ok);
        assert!(recent.get("a").is_none());
        assert!(recent.get("b").is_some());
        assert!(recent.get("c").is_some());
    }
}
