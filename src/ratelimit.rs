//! Sliding-window rate limiter shared by all extraction attempts.
//!
//! One limiter instance is the single synchronization point of the whole
//! pipeline: every concurrent document consults it before each outbound
//! service call. All bookkeeping — timestamp eviction, the wait decision,
//! batch-size adjustment, failed-file tracking — happens under one mutex,
//! making call admission a strictly serialized decision. The lock is held
//! only for that decision; the sleep itself runs after the lock is
//! released, so other workers keep checking and updating window state while
//! one worker waits.
//!
//! The thresholds here (wait when fewer than 3 calls remain or utilization
//! reaches 80%, sleep at least a quarter window when at most one call
//! remains, ±20% jitter) are empirical tuning values carried over from
//! production; they are named constants, not derived quantities.

use rand::Rng;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Wait when fewer than this many calls remain in the window.
const MIN_REMAINING_CALLS: usize = 3;

/// Wait when window utilization reaches this percentage.
const UTILIZATION_WAIT_THRESHOLD: f64 = 80.0;

/// With at most one call remaining, sleep at least this fraction of the
/// window so the caller cannot immediately re-violate the limit.
const NEAR_LIMIT_WINDOW_FRACTION: f64 = 0.25;

/// Nominal-wait multiplier when the batch exceeds the per-window cap
/// (spread calls out with a safety buffer).
const OVER_CAP_WAIT_FACTOR: f64 = 1.2;

/// Nominal-wait multiplier when the batch fits in the cap.
const UNDER_CAP_WAIT_FACTOR: f64 = 0.8;

/// Concurrency-safe sliding-window throttle with adaptive wait time.
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    state: Mutex<WindowState>,
}

/// Everything guarded by the limiter's mutex.
struct WindowState {
    /// Time-ordered call timestamps, bounded to `2 × max_calls` entries.
    calls: VecDeque<Instant>,
    batch_size: usize,
    current_wait: Duration,
    /// Document ids whose extraction failed due to throttling, kept for an
    /// externally driven deferred retry pass. Deduplicated.
    failed_files: HashSet<String>,
}

impl RateLimiter {
    /// Create a limiter admitting `max_calls` per `window`.
    pub fn new(max_calls: usize, window: Duration) -> Self {
        let max_calls = max_calls.max(1);
        Self {
            max_calls,
            window,
            state: Mutex::new(WindowState {
                calls: VecDeque::with_capacity(max_calls * 2),
                batch_size: 1,
                current_wait: window.div_f64(max_calls as f64).mul_f64(UNDER_CAP_WAIT_FACTOR),
                failed_files: HashSet::new(),
            }),
        }
    }

    /// Record the intended concurrent batch size and recompute the nominal
    /// inter-call wait: spread out with a 20% buffer when the batch exceeds
    /// the per-window cap, otherwise a sub-nominal wait with a small margin.
    pub fn set_batch_size(&self, batch_size: usize) {
        let mut state = self.lock();
        state.batch_size = batch_size.max(1);
        let nominal = self.window.div_f64(self.max_calls as f64);
        state.current_wait = if state.batch_size > self.max_calls {
            nominal.mul_f64(OVER_CAP_WAIT_FACTOR)
        } else {
            nominal.mul_f64(UNDER_CAP_WAIT_FACTOR)
        };
        info!(
            batch_size = state.batch_size,
            wait_secs = state.current_wait.as_secs_f64(),
            "rate limiter adjusted"
        );
    }

    /// Check whether a call may proceed, sleeping first if the window is
    /// near its cap (or unconditionally when `force` is set). Returns
    /// whether it slept.
    ///
    /// The wait decision and duration are computed under the lock; the
    /// sleep happens after it is released.
    pub async fn wait_if_needed(&self, force: bool) -> bool {
        let wait = {
            let mut state = self.lock();
            state.evict(self.window);

            let used = state.calls.len();
            let remaining = self.max_calls.saturating_sub(used);
            let utilization = used as f64 / self.max_calls as f64 * 100.0;

            if force || remaining < MIN_REMAINING_CALLS || utilization >= UTILIZATION_WAIT_THRESHOLD
            {
                // Jitter spreads concurrent workers that would otherwise all
                // wake and call at the same instant.
                let jitter = rand::thread_rng().gen_range(0.8..1.2);
                let mut wait = state.current_wait.mul_f64(jitter);
                if remaining <= 1 {
                    wait = wait.max(self.window.mul_f64(NEAR_LIMIT_WINDOW_FRACTION));
                }
                info!(
                    wait_secs = wait.as_secs_f64(),
                    used,
                    cap = self.max_calls,
                    "rate limiting: waiting"
                );
                Some(wait)
            } else {
                None
            }
        };

        match wait {
            Some(duration) => {
                tokio::time::sleep(duration).await;
                true
            }
            None => false,
        }
    }

    /// Record an outbound call. Must be called exactly once per actual
    /// request, after [`RateLimiter::wait_if_needed`].
    pub fn add_call(&self) {
        let mut state = self.lock();
        state.calls.push_back(Instant::now());
        // Keep the queue bounded even if eviction lags behind bursts.
        while state.calls.len() > self.max_calls * 2 {
            state.calls.pop_front();
        }
    }

    /// Remember a document whose extraction failed due to throttling.
    pub fn add_failed_file(&self, id: impl Into<String>) {
        let mut state = self.lock();
        let id = id.into();
        if state.failed_files.insert(id.clone()) {
            debug!(%id, "recorded throttled document for deferred retry");
        }
    }

    /// Snapshot of the documents recorded by
    /// [`RateLimiter::add_failed_file`].
    pub fn failed_files(&self) -> Vec<String> {
        let state = self.lock();
        state.failed_files.iter().cloned().collect()
    }

    /// Whether a specific document id is in the throttled set.
    pub fn has_failed_file(&self, id: &str) -> bool {
        self.lock().failed_files.contains(id)
    }

    /// Forget all recorded throttled documents.
    pub fn clear_failed_files(&self) {
        self.lock().failed_files.clear();
    }

    /// Current window utilization as a percentage.
    pub fn utilization(&self) -> f64 {
        let mut state = self.lock();
        state.evict(self.window);
        state.calls.len() as f64 / self.max_calls as f64 * 100.0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WindowState> {
        self.state.lock().expect("rate limiter lock poisoned")
    }
}

impl WindowState {
    /// Drop timestamps older than the window. Idempotent; safe to call
    /// redundantly.
    fn evict(&mut self, window: Duration) {
        let now = Instant::now();
        while let Some(front) = self.calls.front() {
            if now.duration_since(*front) > window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utilization_reflects_recorded_calls() {
        let limiter = RateLimiter::new(10, Duration::from_secs(60));
        for _ in 0..4 {
            limiter.add_call();
        }
        assert!((limiter.utilization() - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn calls_older_than_window_are_excluded() {
        let limiter = RateLimiter::new(10, Duration::from_millis(40));
        limiter.add_call();
        limiter.add_call();
        std::thread::sleep(Duration::from_millis(70));
        assert_eq!(limiter.utilization(), 0.0);
    }

    #[test]
    fn queue_is_bounded_to_twice_the_cap() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        for _ in 0..50 {
            limiter.add_call();
        }
        assert_eq!(limiter.lock().calls.len(), 10);
    }

    #[test]
    fn batch_size_adjusts_nominal_wait() {
        let limiter = RateLimiter::new(10, Duration::from_secs(60));
        limiter.set_batch_size(30);
        let over = limiter.lock().current_wait;
        assert_eq!(over, Duration::from_secs(6).mul_f64(1.2));

        limiter.set_batch_size(5);
        let under = limiter.lock().current_wait;
        assert_eq!(under, Duration::from_secs(6).mul_f64(0.8));
    }

    #[test]
    fn failed_files_are_deduplicated() {
        let limiter = RateLimiter::new(10, Duration::from_secs(60));
        limiter.add_failed_file("a.pdf");
        limiter.add_failed_file("a.pdf");
        limiter.add_failed_file("b.pdf");
        let mut files = limiter.failed_files();
        files.sort();
        assert_eq!(files, vec!["a.pdf", "b.pdf"]);
        assert!(limiter.has_failed_file("a.pdf"));

        limiter.clear_failed_files();
        assert!(limiter.failed_files().is_empty());
    }

    #[tokio::test]
    async fn no_wait_under_low_utilization() {
        let limiter = RateLimiter::new(15, Duration::from_secs(60));
        assert!(!limiter.wait_if_needed(false).await);
    }

    #[tokio::test]
    async fn force_always_waits() {
        let limiter = RateLimiter::new(15, Duration::from_millis(150));
        assert!(limiter.wait_if_needed(true).await);
    }

    #[tokio::test]
    async fn saturated_window_sleeps_at_least_a_quarter_window() {
        let window = Duration::from_millis(400);
        let limiter = RateLimiter::new(15, window);
        for _ in 0..15 {
            limiter.add_call();
        }
        let start = Instant::now();
        let slept = limiter.wait_if_needed(false).await;
        assert!(slept);
        assert!(
            start.elapsed() >= window.mul_f64(0.25),
            "slept only {:?}",
            start.elapsed()
        );
    }
}
