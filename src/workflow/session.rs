// src/workflow/session.rs

//! Pure run-session state machine.
//!
//! `RunSession` holds everything one workflow run mutates: iteration
//! counter, pause/cancel flags, active and completed step indices, and
//! per-device outcomes for the current iteration. It has no channels, no
//! Tokio types and does no IO; the runner task is its only writer and
//! publishes [`SessionSnapshot`]s for everyone else.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::dispatch::DispatchOutcome;
use crate::history::{FailedDevice, IterationOutcome};
use crate::types::{DeviceId, WorkflowId};

use super::model::WorkflowStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed
        )
    }
}

/// Per-device result for the current iteration. Failure is sticky: once a
/// step fails for a device, the device stays failed until the next
/// iteration starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceOutcome {
    pub success: bool,
    pub reasons: Vec<String>,
}

impl Default for DeviceOutcome {
    fn default() -> Self {
        Self {
            success: true,
            reasons: Vec::new(),
        }
    }
}

/// Read-only copy of a session handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub workflow_id: WorkflowId,
    pub state: SessionState,
    pub run_iteration: u32,
    pub paused: bool,
    pub cancelled: bool,
    pub active_step_index: Option<usize>,
    pub completed_step_indices: Vec<usize>,
    pub per_device_outcome: BTreeMap<DeviceId, DeviceOutcome>,
}

#[derive(Debug, Clone)]
pub struct RunSession {
    workflow_id: WorkflowId,
    devices: Vec<DeviceId>,
    state: SessionState,
    run_iteration: u32,
    paused: bool,
    cancelled: bool,
    active_step_index: Option<usize>,
    completed_step_indices: BTreeSet<usize>,
    per_device_outcome: BTreeMap<DeviceId, DeviceOutcome>,
}

impl RunSession {
    pub fn new(workflow_id: impl Into<WorkflowId>, devices: Vec<DeviceId>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            devices,
            state: SessionState::Idle,
            run_iteration: 0,
            paused: false,
            cancelled: false,
            active_step_index: None,
            completed_step_indices: BTreeSet::new(),
            per_device_outcome: BTreeMap::new(),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn run_iteration(&self) -> u32 {
        self.run_iteration
    }

    pub fn active_step_index(&self) -> Option<usize> {
        self.active_step_index
    }

    pub fn completed_step_indices(&self) -> &BTreeSet<usize> {
        &self.completed_step_indices
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// `Idle -> Running`. No-op in any other state.
    pub fn start(&mut self) {
        if self.state == SessionState::Idle {
            self.state = SessionState::Running;
        }
    }

    /// Start the next iteration: bump the counter and reset per-iteration
    /// state. Returns the new (1-based) iteration number.
    pub fn begin_iteration(&mut self) -> u32 {
        self.run_iteration += 1;
        self.active_step_index = None;
        self.completed_step_indices.clear();
        self.per_device_outcome = self
            .devices
            .iter()
            .map(|id| (id.clone(), DeviceOutcome::default()))
            .collect();
        self.run_iteration
    }

    pub fn begin_step(&mut self, index: usize) {
        self.active_step_index = Some(index);
    }

    /// Merge one step's dispatch outcome. Successes never clear an earlier
    /// failure in the same iteration.
    pub fn apply_step(&mut self, index: usize, module_id: &str, outcome: &DispatchOutcome) {
        for failure in &outcome.failures {
            self.mark_failed(&failure.device_id, format!("{module_id}: {}", failure.reason));
        }
        self.completed_step_indices.insert(index);
    }

    /// Record a step that could not run at all as a failure on every
    /// device of the session.
    pub fn fail_step(&mut self, index: usize, module_id: &str, reason: &str) {
        let devices = self.devices.clone();
        for id in &devices {
            self.mark_failed(id, format!("{module_id}: {reason}"));
        }
        self.completed_step_indices.insert(index);
    }

    fn mark_failed(&mut self, device_id: &str, reason: String) {
        if let Some(entry) = self.per_device_outcome.get_mut(device_id) {
            entry.success = false;
            entry.reasons.push(reason);
        }
    }

    /// Pause or resume. Ignored once the session is terminal.
    pub fn set_paused(&mut self, paused: bool) {
        if self.state.is_terminal() {
            return;
        }
        self.paused = paused;
        self.state = if paused {
            SessionState::Paused
        } else {
            SessionState::Running
        };
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Move to a terminal state. The first terminal state wins.
    pub fn finish(&mut self, state: SessionState) {
        if self.state.is_terminal() || !state.is_terminal() {
            return;
        }
        self.state = state;
        self.paused = false;
        self.active_step_index = None;
    }

    /// Outcome of the current iteration, in device order.
    pub fn iteration_outcome(&self) -> IterationOutcome {
        let mut outcome = IterationOutcome::default();
        for id in &self.devices {
            match self.per_device_outcome.get(id) {
                Some(device) if !device.success => outcome.failed_devices.push(FailedDevice {
                    device_id: id.clone(),
                    reason: device.reasons.join("; "),
                }),
                _ => outcome.success_device_ids.push(id.clone()),
            }
        }
        outcome
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            workflow_id: self.workflow_id.clone(),
            state: self.state,
            run_iteration: self.run_iteration,
            paused: self.paused,
            cancelled: self.cancelled,
            active_step_index: self.active_step_index,
            completed_step_indices: self.completed_step_indices.iter().copied().collect(),
            per_device_outcome: self.per_device_outcome.clone(),
        }
    }
}

/// Whether a fixed delay goes between `current` and `next`.
///
/// Wait steps already encode their own delay, so no extra delay is added
/// on either side of one, and none after the last step.
pub fn needs_inter_step_delay(current: &WorkflowStep, next: Option<&WorkflowStep>) -> bool {
    match next {
        Some(next) => !current.is_wait() && !next.is_wait(),
        None => false,
    }
}
