//! In-process sender counters.
//!
//! Counters use relaxed ordering; per-mode latency stats sit behind a short
//! mutex. Nothing here is exported anywhere -- the error-handling contract
//! counts failures, and operators read the numbers out of logs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

/// Atomic counters tracking sender outcomes.
#[derive(Debug, Default)]
pub struct SenderMetrics {
    /// Background task or send pipeline failures.
    pub task_failure: AtomicU64,
    /// Role expansions that resolved nobody.
    pub role_target_lookup_error: AtomicU64,
    /// Resolved names with no matching target row.
    pub target_not_found: AtomicU64,
    /// Messages successfully delivered.
    pub message_send_cnt: AtomicU64,
    /// Out-of-band notifications accepted over RPC.
    pub notification_cnt: AtomicU64,
    /// Messages successfully handed to a slave.
    pub slave_message_send_success_cnt: AtomicU64,
    /// Slave hand-offs that failed and fell through.
    pub slave_message_send_fail_cnt: AtomicU64,

    mode_stats: Mutex<HashMap<String, ModeStat>>,
}

/// Per-mode vendor latency statistics, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModeStat {
    pub cnt: u64,
    pub sent: u64,
    pub fail: u64,
    pub total: f64,
    pub min: f64,
    pub max: f64,
}

impl SenderMetrics {
    pub fn incr_task_failure(&self) {
        self.task_failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_role_target_lookup_error(&self) {
        self.role_target_lookup_error.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_target_not_found(&self) {
        self.target_not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_message_send(&self) {
        self.message_send_cnt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_notification(&self) {
        self.notification_cnt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_slave_send_success(&self) {
        self.slave_message_send_success_cnt
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_slave_send_fail(&self) {
        self.slave_message_send_fail_cnt
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record one vendor send attempt for a mode. `None` means the send
    /// failed; a latency means it succeeded.
    pub fn record_mode_send(&self, mode: &str, latency: Option<Duration>) {
        let mut stats = self.mode_stats.lock();
        let stat = stats.entry(mode.to_owned()).or_default();
        stat.cnt += 1;
        match latency {
            None => stat.fail += 1,
            Some(latency) => {
                let seconds = latency.as_secs_f64();
                stat.total += seconds;
                stat.sent += 1;
                if stat.sent == 1 || seconds < stat.min {
                    stat.min = seconds;
                }
                if seconds > stat.max {
                    stat.max = seconds;
                }
            }
        }
    }

    /// Point-in-time copy of one mode's stats.
    #[must_use]
    pub fn mode_stat(&self, mode: &str) -> ModeStat {
        self.mode_stats.lock().get(mode).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let metrics = SenderMetrics::default();
        metrics.incr_task_failure();
        metrics.incr_task_failure();
        assert_eq!(metrics.task_failure.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn mode_send_stats() {
        let metrics = SenderMetrics::default();
        metrics.record_mode_send("sms", Some(Duration::from_millis(200)));
        metrics.record_mode_send("sms", Some(Duration::from_millis(600)));
        metrics.record_mode_send("sms", None);

        let stat = metrics.mode_stat("sms");
        assert_eq!(stat.cnt, 3);
        assert_eq!(stat.sent, 2);
        assert_eq!(stat.fail, 1);
        assert!((stat.min - 0.2).abs() < 1e-9);
        assert!((stat.max - 0.6).abs() < 1e-9);
        assert!((stat.total - 0.8).abs() < 1e-9);
    }

    #[test]
    fn unknown_mode_stat_is_zero() {
        let metrics = SenderMetrics::default();
        assert_eq!(metrics.mode_stat("call"), ModeStat::default());
    }
}
