// src/progress.rs

//! Cosmetic completion estimates for a running module.
//!
//! Nothing here feeds back into dispatch: the estimate only drives UI
//! feedback and [`RunnerEvent::Progress`](crate::workflow::RunnerEvent).

use std::time::Duration;

use tokio::time::Instant;

/// Percent a timed estimate never exceeds before `finish`.
pub const TIMED_CAP: u8 = 99;
/// Percent an untimed estimate never exceeds before `finish`.
pub const UNTIMED_CAP: u8 = 95;
pub const DEFAULT_INCREMENT: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEstimator {
    increment: u8,
}

impl Default for ProgressEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_INCREMENT)
    }
}

impl ProgressEstimator {
    pub fn new(increment: u8) -> Self {
        Self {
            increment: increment.max(1),
        }
    }

    /// Start estimating a module that is expected to take `expected`
    /// (`None` when the module gives no hint).
    pub fn start(&self, expected: Option<Duration>) -> ProgressHandle {
        self.start_at(expected, Instant::now())
    }

    pub fn start_at(&self, expected: Option<Duration>, started: Instant) -> ProgressHandle {
        ProgressHandle {
            increment: self.increment,
            expected: expected.filter(|d| !d.is_zero()),
            started,
            percent: 0,
        }
    }
}

/// Estimate for one module run. Percent never decreases until
/// [`finish`](ProgressHandle::finish).
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    increment: u8,
    expected: Option<Duration>,
    started: Instant,
    percent: u8,
}

impl ProgressHandle {
    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn tick(&mut self) -> u8 {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> u8 {
        let candidate = match self.expected {
            Some(expected) => {
                let elapsed = now.saturating_duration_since(self.started);
                let ratio = elapsed.as_secs_f64() / expected.as_secs_f64();
                (ratio * 100.0).min(f64::from(TIMED_CAP)) as u8
            }
            None => self.percent.saturating_add(self.increment).min(UNTIMED_CAP),
        };
        self.percent = self.percent.max(candidate);
        self.percent
    }

    /// Report completion and reset the estimate for reuse.
    pub fn finish(&mut self) -> u8 {
        self.percent = 0;
        self.started = Instant::now();
        100
    }
}
