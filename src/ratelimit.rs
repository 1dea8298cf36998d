//! Sliding-window limiter for execution throughput.
//!
//! Admitted executions are remembered as timestamps. An execution is denied
//! once the trailing window already holds `max` of them; the caller is told
//! how long until the oldest ages out. Denials are not recorded.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

pub const DEFAULT_MAX_PER_WINDOW: u32 = 5;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Time source, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += delta;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Result of asking for an execution slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

pub struct RateLimiter {
    max: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    history: Mutex<VecDeque<DateTime<Utc>>>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self::with_clock(max, window, Arc::new(SystemClock))
    }

    pub fn with_clock(max: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max,
            window,
            clock,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Start of the trailing window as of now.
    pub fn window_start(&self) -> DateTime<Utc> {
        self.clock.now() - self.window_delta()
    }

    fn window_delta(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::MAX)
    }

    /// Replace the admitted history with `timestamps`, typically the
    /// attempts a shared store already holds.
    pub fn seed(&self, timestamps: impl IntoIterator<Item = DateTime<Utc>>) {
        let mut history = self.lock();
        history.clear();
        history.extend(timestamps);
        history.make_contiguous().sort();
        let cutoff = self.window_start();
        prune(&mut history, cutoff);
    }

    /// Admit and record an execution, or say when to retry.
    pub fn try_acquire(&self) -> Admission {
        let now = self.clock.now();
        let mut history = self.lock();
        prune(&mut history, now - self.window_delta());

        if (history.len() as u64) < u64::from(self.max) {
            history.push_back(now);
            debug!(in_window = history.len(), max = self.max, "Execution admitted");
            return Admission::Admitted;
        }

        let retry_after = history
            .front()
            .map(|oldest| (*oldest + self.window_delta() - now).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(self.window);
        debug!(in_window = history.len(), max = self.max, ?retry_after, "Execution denied");
        Admission::Denied { retry_after }
    }

    /// Executions currently counted against the window.
    pub fn in_window(&self) -> usize {
        let cutoff = self.window_start();
        let mut history = self.lock();
        prune(&mut history, cutoff);
        history.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<DateTime<Utc>>> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Drop entries at or before `cutoff`.
fn prune(history: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    while history.front().is_some_and(|ts| *ts <= cutoff) {
        history.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn limiter(max: u32) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap());
        let limiter = RateLimiter::with_clock(max, DEFAULT_WINDOW, Arc::new(clock.clone()));
        (limiter, clock)
    }

    #[test]
    fn test_sixth_execution_in_window_denied() {
        let (limiter, clock) = limiter(5);
        for _ in 0..5 {
            assert!(limiter.try_acquire().is_admitted());
            clock.advance(Duration::from_secs(60));
        }
        match limiter.try_acquire() {
            Admission::Denied { retry_after } => {
                // Oldest was 5 minutes ago.
                assert_eq!(retry_after, Duration::from_secs(55 * 60));
            }
            Admission::Admitted => panic!("sixth execution must be denied"),
        }
    }

    #[test]
    fn test_admitted_once_oldest_ages_out() {
        let (limiter, clock) = limiter(5);
        for _ in 0..5 {
            assert!(limiter.try_acquire().is_admitted());
            clock.advance(Duration::from_secs(60));
        }
        assert!(!limiter.try_acquire().is_admitted());

        // The first timestamp is now exactly one window old.
        clock.advance(Duration::from_secs(55 * 60));
        assert!(limiter.try_acquire().is_admitted());
        assert!(!limiter.try_acquire().is_admitted());
    }

    #[test]
    fn test_denials_are_not_counted() {
        let (limiter, clock) = limiter(1);
        assert!(limiter.try_acquire().is_admitted());
        for _ in 0..10 {
            assert!(!limiter.try_acquire().is_admitted());
        }
        clock.advance(DEFAULT_WINDOW);
        assert!(limiter.try_acquire().is_admitted());
        assert_eq!(limiter.in_window(), 1);
    }

    #[test]
    fn test_seed_counts_recent_history_only() {
        let (limiter, clock) = limiter(2);
        let now = clock.now();
        limiter.seed([
            now - chrono::Duration::hours(3),
            now - chrono::Duration::minutes(10),
        ]);
        assert_eq!(limiter.in_window(), 1);
        assert!(limiter.try_acquire().is_admitted());
        assert!(!limiter.try_acquire().is_admitted());
    }

    #[test]
    fn test_seed_replaces_local_history() {
        let (limiter, clock) = limiter(2);
        assert!(limiter.try_acquire().is_admitted());
        assert!(limiter.try_acquire().is_admitted());
        assert!(!limiter.try_acquire().is_admitted());

        limiter.seed([clock.now() - chrono::Duration::minutes(1)]);
        assert_eq!(limiter.in_window(), 1);
        assert!(limiter.try_acquire().is_admitted());
    }

    #[test]
    fn test_zero_ceiling_denies_everything() {
        let (limiter, _clock) = limiter(0);
        assert_eq!(
            limiter.try_acquire(),
            Admission::Denied {
                retry_after: DEFAULT_WINDOW
            }
        );
    }
}
