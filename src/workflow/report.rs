// src/workflow/report.rs

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::history::IterationOutcome;
use crate::types::WorkflowId;

use super::session::SessionState;

/// How many of the most recent iterations a report keeps in full.
pub const RECENT_ITERATIONS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationReport {
    pub iteration: u32,
    pub outcome: IterationOutcome,
    /// Cut short by cancellation; such iterations are not written to
    /// history.
    pub interrupted: bool,
}

/// Running totals over a run's iterations plus the last few in full.
///
/// Long duration-bound runs can loop for days; history already holds every
/// recorded outcome, so only a bounded tail is kept here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IterationLog {
    completed: u32,
    with_failures: u32,
    recent: VecDeque<IterationReport>,
}

impl IterationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, report: IterationReport) {
        if !report.interrupted {
            self.completed += 1;
            if !report.outcome.failed_devices.is_empty() {
                self.with_failures += 1;
            }
        }
        if self.recent.len() == RECENT_ITERATIONS {
            self.recent.pop_front();
        }
        self.recent.push_back(report);
    }

    /// Iterations that ran to completion and were recorded.
    pub fn completed(&self) -> u32 {
        self.completed
    }

    /// Completed iterations in which at least one device failed.
    pub fn with_failures(&self) -> u32 {
        self.with_failures
    }

    /// The most recent iterations, oldest first.
    pub fn recent(&self) -> impl ExactSizeIterator<Item = &IterationReport> {
        self.recent.iter()
    }

    pub fn last(&self) -> Option<&IterationReport> {
        self.recent.back()
    }
}

/// Final account of one workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowReport {
    pub workflow_id: WorkflowId,
    pub state: SessionState,
    pub iterations: IterationLog,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Set when the run itself broke down (`Failed`).
    pub error: Option<String>,
}

impl WorkflowReport {
    pub fn completed_iterations(&self) -> u32 {
        self.iterations.completed()
    }

    pub fn last_outcome(&self) -> Option<&IterationOutcome> {
        self.iterations.last().map(|it| &it.outcome)
    }

    pub fn summary(&self) -> String {
        let head = match self.state {
            SessionState::Completed => format!(
                "workflow '{}' completed {} iteration(s), {} with failures",
                self.workflow_id,
                self.iterations.completed(),
                self.iterations.with_failures()
            ),
            SessionState::Cancelled => format!(
                "workflow '{}' cancelled after {} iteration(s)",
                self.workflow_id,
                self.iterations.completed()
            ),
            SessionState::Failed => format!(
                "workflow '{}' failed: {}",
                self.workflow_id,
                self.error.as_deref().unwrap_or("runner aborted")
            ),
            other => format!("workflow '{}' is {:?}", self.workflow_id, other),
        };

        match self.last_outcome() {
            Some(outcome) => format!("{head}; last iteration {}", summarize(outcome)),
            None => head,
        }
    }
}

/// One-line, user-facing summary of an iteration or single-module outcome.
pub fn summarize(outcome: &IterationOutcome) -> String {
    let succeeded = outcome.success_device_ids.len();
    if outcome.device_count() == 0 {
        return "targeted no devices".to_string();
    }
    if outcome.failed_devices.is_empty() {
        let noun = if succeeded == 1 { "device" } else { "devices" };
        return format!("succeeded on {succeeded} {noun}");
    }
    if succeeded == 0 {
        let details: Vec<String> = outcome
            .failed_devices
            .iter()
            .map(|f| format!("{} ({})", f.device_id, f.reason))
            .collect();
        return format!("failed on all devices: {}", details.join(", "));
    }
    let failed: Vec<&str> = outcome
        .failed_devices
        .iter()
        .map(|f| f.device_id.as_str())
        .collect();
    format!("succeeded with failures on devices: {}", failed.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::FailedDevice;

    fn outcome(ok: &[&str], failed: &[(&str, &str)]) -> IterationOutcome {
        IterationOutcome {
            success_device_ids: ok.iter().map(|s| s.to_string()).collect(),
            failed_devices: failed
                .iter()
                .map(|(id, reason)| FailedDevice {
                    device_id: id.to_string(),
                    reason: reason.to_string(),
                })
                .collect(),
        }
    }

    fn iteration(n: u32, failed: &[(&str, &str)], interrupted: bool) -> IterationReport {
        IterationReport {
            iteration: n,
            outcome: outcome(&["a"], failed),
            interrupted,
        }
    }

    #[test]
    fn log_counts_everything_but_keeps_a_bounded_tail() {
        let mut log = IterationLog::new();
        for n in 1..=100 {
            let failed: &[(&str, &str)] = if n % 10 == 0 { &[("b", "offline")] } else { &[] };
            log.push(iteration(n, failed, false));
        }
        log.push(iteration(101, &[], true));

        assert_eq!(log.completed(), 100);
        assert_eq!(log.with_failures(), 10);
        assert_eq!(log.recent().len(), RECENT_ITERATIONS);
        let tail: Vec<u32> = log.recent().map(|it| it.iteration).collect();
        assert_eq!(tail, (94..=101).collect::<Vec<_>>());
        assert!(log.last().is_some_and(|it| it.interrupted));
    }

    #[test]
    fn summary_distinguishes_the_three_outcomes() {
        assert_eq!(summarize(&outcome(&["a", "b"], &[])), "succeeded on 2 devices");
        assert_eq!(
            summarize(&outcome(&["a"], &[("b", "timeout"), ("c", "busy")])),
            "succeeded with failures on devices: b, c"
        );
        assert_eq!(
            summarize(&outcome(&[], &[("b", "timeout")])),
            "failed on all devices: b (timeout)"
        );
    }
}
