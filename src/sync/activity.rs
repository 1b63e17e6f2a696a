//! Activity Signals
//!
//! The three inputs of the adaptive polling interval: recent user
//! interaction, visibility, and the recent fetch error rate.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

use crate::config::PollingConfig;

/// Largest backoff exponent applied to the base interval
const MAX_BACKOFF_EXPONENT: u32 = 6;

// == Error Rate Tracker ==
/// Sliding window over the most recent fetch outcomes.
#[derive(Debug, Clone)]
pub struct ErrorRateTracker {
    window: usize,
    outcomes: VecDeque<bool>,
    consecutive_failures: u32,
}

impl ErrorRateTracker {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            outcomes: VecDeque::with_capacity(window),
            consecutive_failures: 0,
        }
    }

    /// Records one fetch outcome.
    pub fn record(&mut self, success: bool) {
        if self.outcomes.len() == self.window {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
    }

    /// Share of failures in the window, 0.0 when empty.
    pub fn error_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.outcomes.iter().filter(|ok| !**ok).count();
        failures as f64 / self.outcomes.len() as f64
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

// == Activity State ==
/// User presence as reported by the host.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ActivityState {
    /// Last pointer/keyboard/scroll/touch interaction (Unix milliseconds)
    pub last_interaction_ms: u64,
    /// Whether the consumer surface is visible
    pub visible: bool,
}

impl ActivityState {
    pub fn new(now: u64) -> Self {
        Self {
            last_interaction_ms: now,
            visible: true,
        }
    }

    /// Visible and interacted with recently.
    pub fn is_active(&self, now: u64, inactivity_threshold_ms: u64) -> bool {
        self.visible && now.saturating_sub(self.last_interaction_ms) < inactivity_threshold_ms
    }
}

// == Interval Policy ==
/// Computes the next poll delay from the current signals.
#[derive(Debug, Clone)]
pub struct IntervalPolicy {
    config: PollingConfig,
}

impl IntervalPolicy {
    pub fn new(config: PollingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    pub fn next_interval(
        &self,
        now: u64,
        activity: &ActivityState,
        errors: &ErrorRateTracker,
    ) -> Duration {
        let base = if activity.is_active(now, self.config.inactivity_threshold_ms) {
            self.config.active_interval_ms
        } else {
            self.config.background_interval_ms
        };

        let interval = if errors.error_rate() >= self.config.backoff_error_rate
            && errors.consecutive_failures() > 0
        {
            let exponent = errors.consecutive_failures().min(MAX_BACKOFF_EXPONENT);
            base.saturating_mul(1 << exponent)
        } else {
            base
        };

        Duration::from_millis(interval.min(self.config.max_interval_ms.max(base)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> IntervalPolicy {
        IntervalPolicy::new(PollingConfig::default())
    }

    #[test]
    fn test_error_rate_window() {
        let mut tracker = ErrorRateTracker::new(4);
        assert_eq!(tracker.error_rate(), 0.0);

        tracker.record(false);
        tracker.record(true);
        assert_eq!(tracker.error_rate(), 0.5);
        assert_eq!(tracker.consecutive_failures(), 0);

        for _ in 0..4 {
            tracker.record(false);
        }
        assert_eq!(tracker.error_rate(), 1.0);
        assert_eq!(tracker.consecutive_failures(), 4);
    }

    #[test]
    fn test_active_interval() {
        let activity = ActivityState::new(0);
        let interval = policy().next_interval(1_000, &activity, &ErrorRateTracker::new(10));
        assert_eq!(interval, Duration::from_millis(15_000));
    }

    #[test]
    fn test_hidden_uses_background_interval() {
        let mut activity = ActivityState::new(0);
        activity.visible = false;
        let interval = policy().next_interval(1_000, &activity, &ErrorRateTracker::new(10));
        assert_eq!(interval, Duration::from_millis(300_000));
    }

    #[test]
    fn test_inactive_uses_background_interval() {
        let activity = ActivityState::new(0);
        let interval = policy().next_interval(120_000, &activity, &ErrorRateTracker::new(10));
        assert_eq!(interval, Duration::from_millis(300_000));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let activity = ActivityState::new(0);
        let mut errors = ErrorRateTracker::new(10);

        errors.record(false);
        assert_eq!(
            policy().next_interval(0, &activity, &errors),
            Duration::from_millis(30_000)
        );

        errors.record(false);
        assert_eq!(
            policy().next_interval(0, &activity, &errors),
            Duration::from_millis(60_000)
        );

        for _ in 0..10 {
            errors.record(false);
        }
        assert_eq!(
            policy().next_interval(0, &activity, &errors),
            Duration::from_millis(600_000)
        );
    }

    #[test]
    fn test_low_error_rate_does_not_back_off() {
        let activity = ActivityState::new(0);
        let mut errors = ErrorRateTracker::new(10);
        for _ in 0..9 {
            errors.record(true);
        }
        errors.record(false);

        assert_eq!(
            policy().next_interval(0, &activity, &errors),
            Duration::from_millis(15_000)
        );
    }
}
