// src/workflow/mod.rs

//! Workflow Runner.
//!
//! This module ties together:
//! - the workflow model (ordered steps plus repeat settings)
//! - the pure run-session state machine
//! - the session registry (at most one active run per workflow)
//! - the async runner that drives the Module Dispatcher step by step
//!
//! The pure state lives in [`session`]; the async/IO shell is implemented
//! in [`runner`]. Callers only ever hold a [`RunControl`], which requests
//! transitions and reads snapshots but never writes session state.

use std::time::Duration;

use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::history::IterationOutcome;
use crate::types::{DeviceId, WorkflowId};

pub mod control;
pub mod model;
pub mod registry;
pub mod report;
pub mod runner;
pub mod session;

pub use control::RunControl;
pub use model::{RepeatSettings, Workflow, WorkflowBuilder, WorkflowStep};
pub use registry::{SessionClaim, SessionRegistry};
pub use report::{summarize, IterationLog, IterationReport, WorkflowReport, RECENT_ITERATIONS};
pub use runner::{RunnerConfig, WorkflowRunner};
pub use session::{needs_inter_step_delay, DeviceOutcome, RunSession, SessionSnapshot, SessionState};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("workflow '{0}' already has an active run")]
    AlreadyRunning(WorkflowId),

    #[error("no eligible devices for '{0}'")]
    NoEligibleDevices(String),

    #[error("workflow '{0}' has no steps")]
    EmptyWorkflow(WorkflowId),

    #[error("run of '{0}' ended without a report")]
    RunLost(WorkflowId),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Observer notifications from the runner. Best-effort; nothing in the run
/// depends on these being received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerEvent {
    StateChanged {
        workflow_id: WorkflowId,
        state: SessionState,
    },
    IterationStarted {
        workflow_id: WorkflowId,
        iteration: u32,
    },
    StepStarted {
        workflow_id: WorkflowId,
        iteration: u32,
        step: usize,
        module_id: String,
    },
    StepFinished {
        workflow_id: WorkflowId,
        iteration: u32,
        step: usize,
        module_id: String,
        succeeded: Vec<DeviceId>,
        failed: Vec<DeviceId>,
    },
    InterStepDelay {
        workflow_id: WorkflowId,
        iteration: u32,
        after_step: usize,
        delay: Duration,
    },
    Progress {
        workflow_id: WorkflowId,
        step: usize,
        module_id: String,
        percent: u8,
    },
    IterationRecorded {
        workflow_id: WorkflowId,
        iteration: u32,
        outcome: IterationOutcome,
    },
}
