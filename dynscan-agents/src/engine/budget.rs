//! Error budget for the exploration loop.

use serde::Serialize;

/// Failure counters with the thresholds that stop exploration.
///
/// `total_errors` never resets. A fully successful iteration resets
/// `consecutive_errors`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorBudget {
    pub total_errors: u32,
    pub consecutive_errors: u32,
    pub max_total: u32,
    pub max_consecutive: u32,
}

impl ErrorBudget {
    pub fn new(max_total: u32, max_consecutive: u32) -> Self {
        Self {
            total_errors: 0,
            consecutive_errors: 0,
            max_total,
            max_consecutive,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    pub fn record_failure(&mut self) {
        self.total_errors = self.total_errors.saturating_add(1);
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
    }

    /// Record an iteration outcome and report whether the budget is now exceeded.
    pub fn record(&mut self, succeeded: bool) -> bool {
        if succeeded {
            self.record_success();
        } else {
            self.record_failure();
        }
        self.exceeded()
    }

    /// True once either counter is strictly above its threshold.
    pub fn exceeded(&self) -> bool {
        self.total_errors > self.max_total || self.consecutive_errors > self.max_consecutive
    }
}
