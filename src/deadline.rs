use std::{
    thread,
    time::{Duration, Instant},
};

use crate::error::{Error, Result};

/// Wall-clock cutoff computed once per run. Every blocking call derives its
/// timeout from here.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

/// Stand-in for budgets too large for the platform clock.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        let now = Instant::now();
        let at = now
            .checked_add(budget)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .or_else(|| now.checked_add(Duration::from_secs(24 * 60 * 60)))
            .unwrap_or(now);
        Self { at }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// `min(cap, max(1s, remaining))`, or `DeadlineExceeded` when nothing is left.
    pub fn timeout_for(&self, cap: Duration) -> Result<Duration> {
        let left = self.remaining();
        if left.is_zero() {
            return Err(Error::DeadlineExceeded);
        }
        Ok(cap.min(left.max(Duration::from_secs(1))))
    }

    /// Sleeps for `wanted`, never past the deadline.
    pub fn sleep_at_most(&self, wanted: Duration) {
        let nap = wanted.min(self.remaining());
        if !nap.is_zero() {
            thread::sleep(nap);
        }
    }

    /// Whole seconds left, rounded up.
    pub fn seconds_left(&self) -> u64 {
        let left = self.remaining();
        left.as_secs() + u64::from(left.subsec_nanos() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_deadline_refuses_new_attempts() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.is_expired());
        assert!(matches!(
            deadline.timeout_for(Duration::from_secs(30)),
            Err(Error::DeadlineExceeded)
        ));
    }

    #[test]
    fn huge_budget_does_not_overflow() {
        let deadline = Deadline::after(Duration::MAX);
        assert!(!deadline.is_expired());
        assert!(deadline.remaining() > Duration::from_secs(365 * 24 * 60 * 60));
    }

    #[test]
    fn timeout_is_capped() {
        let deadline = Deadline::after(Duration::from_secs(300));
        let t = deadline.timeout_for(Duration::from_secs(30)).unwrap();
        assert_eq!(t, Duration::from_secs(30));
    }

    #[test]
    fn timeout_never_drops_below_one_second() {
        let deadline = Deadline::after(Duration::from_millis(200));
        let t = deadline.timeout_for(Duration::from_secs(30)).unwrap();
        assert_eq!(t, Duration::from_secs(1));
    }
}
