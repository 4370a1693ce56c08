use std::collections::VecDeque;
use std::sync::Mutex;

use locker_core::constants::{
    HEALTH_CONSECUTIVE_FAILURE_THRESHOLD, HEALTH_ERROR_RATE_THRESHOLD, HEALTH_WINDOW,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Ok,
    Degraded,
    Error,
}

/// Rolling health counters over the last `HEALTH_WINDOW` commands (§4.6).
pub struct HealthCounters {
    inner: Mutex<Inner>,
}

struct Inner {
    window: VecDeque<bool>, // true = success
    total_commands: u64,
    failed_commands: u64,
    consecutive_failures: u32,
    last_error: Option<String>,
}

impl Default for HealthCounters {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                window: VecDeque::with_capacity(HEALTH_WINDOW),
                total_commands: 0,
                failed_commands: 0,
                consecutive_failures: 0,
                last_error: None,
            }),
        }
    }
}

impl HealthCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_commands += 1;
        inner.consecutive_failures = 0;
        push_window(&mut inner.window, true);
    }

    pub fn record_failure(&self, error: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_commands += 1;
        inner.failed_commands += 1;
        inner.consecutive_failures += 1;
        inner.last_error = Some(error.into());
        push_window(&mut inner.window, false);
    }

    pub fn status(&self) -> HealthStatus {
        let inner = self.inner.lock().unwrap();
        let errors_in_window = inner.window.iter().filter(|ok| !**ok).count();
        let error_rate = if inner.window.is_empty() {
            0.0
        } else {
            errors_in_window as f64 / inner.window.len() as f64
        };

        if inner.consecutive_failures >= HEALTH_CONSECUTIVE_FAILURE_THRESHOLD {
            HealthStatus::Error
        } else if error_rate >= HEALTH_ERROR_RATE_THRESHOLD {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().unwrap().last_error.clone()
    }

    pub fn total_commands(&self) -> u64 {
        self.inner.lock().unwrap().total_commands
    }
}

fn push_window(window: &mut VecDeque<bool>, ok: bool) {
    if window.len() == HEALTH_WINDOW {
        window.pop_front();
    }
    window.push_back(ok);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ok_below_thresholds() {
        let health = HealthCounters::new();
        for _ in 0..20 {
            health.record_success();
        }
        assert_eq!(health.status(), HealthStatus::Ok);
    }

    #[test]
    fn status_degraded_once_error_rate_crosses_five_percent() {
        let health = HealthCounters::new();
        for _ in 0..94 {
            health.record_success();
        }
        for _ in 0..6 {
            health.record_failure("timeout");
        }
        assert_eq!(health.status(), HealthStatus::Degraded);
    }

    #[test]
    fn status_error_after_five_consecutive_failures() {
        let health = HealthCounters::new();
        for _ in 0..5 {
            health.record_failure("timeout");
        }
        assert_eq!(health.status(), HealthStatus::Error);
    }
}
