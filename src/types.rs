use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Device identifiers are opaque strings handed out by the inventory.
pub type DeviceId = String;

/// Workflow identifiers are the `[workflow.<name>]` keys of the config.
pub type WorkflowId = String;

/// Unit of the duration bound in a workflow's repeat settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    Minutes,
    Hours,
    Days,
}

impl DurationUnit {
    /// Convert `value` units into a wall-clock duration.
    pub fn to_duration(self, value: u64) -> Duration {
        let secs_per_unit = match self {
            DurationUnit::Minutes => 60,
            DurationUnit::Hours => 60 * 60,
            DurationUnit::Days => 24 * 60 * 60,
        };
        Duration::from_secs(value.saturating_mul(secs_per_unit))
    }
}

impl Default for DurationUnit {
    fn default() -> Self {
        DurationUnit::Minutes
    }
}

/// What to do when a workflow is started while it already has an active run.
///
/// - `Reject`: refuse the new run with a user-visible error (default).
/// - `Supersede`: cancel the active run, wait for it to reach a terminal
///   state, then start the new one. The two never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    Reject,
    Supersede,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        ConflictPolicy::Reject
    }
}
