// src/dispatch/mod.rs

//! Module Dispatcher: run one module across a device set.
//!
//! - [`batch`] splits devices into bounded batches and groups identical
//!   parameter sets into shared requests.
//! - [`retry`] wraps each request in bounded exponential backoff.
//! - [`status`] tracks the run status handles the service hands out, which
//!   is what best-effort cancellation targets.
//! - [`dispatcher`] ties it together and reconciles one result per device.
//!
//! The dispatcher never returns an error for expected failure modes
//! (timeouts, 4xx, partial failure, cancellation); those all come back as
//! per-device failures in a [`DispatchOutcome`]. Only a step that cannot be
//! built at all yields a [`DispatchError`].

pub mod batch;
pub mod dispatcher;
pub mod retry;
pub mod status;

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::catalog::ParamError;
use crate::service::DeviceNotification;
use crate::types::DeviceId;

pub use dispatcher::{DispatchJob, DispatcherConfig, ModuleDispatcher};
pub use retry::RetryPolicy;
pub use status::{RunStatusHandle, StatusRegistry};

/// Reason synthesized when the service answered without a per-device
/// breakdown.
pub const NO_BREAKDOWN_REASON: &str = "device command service returned no per-device results";

/// Reason synthesized when a device is missing from an otherwise
/// well-formed response.
pub const MISSING_RESULT_REASON: &str = "no result reported for device";

/// Reason synthesized when a submission task died before reporting.
pub const ABORTED_REASON: &str = "dispatch aborted before a result was reported";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The device's batch was never submitted because the run was cancelled.
    Cancelled,
    Error(String),
}

impl FailureReason {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FailureReason::Cancelled)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Cancelled => f.write_str("cancelled"),
            FailureReason::Error(msg) => f.write_str(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceFailure {
    pub device_id: DeviceId,
    pub reason: FailureReason,
}

impl DeviceFailure {
    pub fn error(device_id: impl Into<DeviceId>, reason: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            reason: FailureReason::Error(reason.into()),
        }
    }

    pub fn cancelled(device_id: impl Into<DeviceId>) -> Self {
        Self {
            device_id: device_id.into(),
            reason: FailureReason::Cancelled,
        }
    }
}

/// Per-device result of one module dispatch. Every requested device
/// appears exactly once across `successes` and `failures`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub successes: Vec<DeviceId>,
    pub failures: Vec<DeviceFailure>,
}

impl DispatchOutcome {
    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn failure_for(&self, device_id: &str) -> Option<&DeviceFailure> {
        self.failures.iter().find(|f| f.device_id == device_id)
    }

    pub fn cancelled_devices(&self) -> impl Iterator<Item = &DeviceId> {
        self.failures
            .iter()
            .filter(|f| f.reason.is_cancelled())
            .map(|f| &f.device_id)
    }
}

/// Defects that prevent a module from being dispatched at all.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("could not build module parameters: {0}")]
    Params(#[from] ParamError),
}

/// Best-effort notifications for observers (UI, logs). Nothing in dispatch
/// or reconciliation depends on these being received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    BatchSubmitted {
        module_id: String,
        batch: usize,
        devices: usize,
        requests: usize,
    },
    StatusObserved {
        module_id: String,
        status_id: String,
    },
    DeviceSettled {
        module_id: String,
        device_id: DeviceId,
        success: bool,
        message: String,
    },
    CancelRequested {
        module_id: String,
        status_id: String,
    },
    ModuleStatus {
        module_id: String,
        status: String,
        notifications: Vec<DeviceNotification>,
    },
}
