// src/targets/inventory.rs

use std::fmt::Debug;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::types::DeviceId;

/// One attached device and whether it can take work right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTarget {
    pub id: DeviceId,
    #[serde(default = "default_eligible")]
    pub eligible: bool,
}

fn default_eligible() -> bool {
    true
}

impl DeviceTarget {
    pub fn eligible(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            eligible: true,
        }
    }

    pub fn unavailable(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            eligible: false,
        }
    }
}

/// Source of current device eligibility. Read before every run; the engine
/// never mutates what it returns.
pub trait DeviceInventory: Send + Sync + Debug {
    fn targets(&self) -> Vec<DeviceTarget>;
}

/// Inventory backed by a fixed list (the config's `[[device]]` entries).
///
/// Clones share the list, so a caller can flip eligibility between runs.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    targets: Arc<RwLock<Vec<DeviceTarget>>>,
}

impl StaticInventory {
    pub fn new(targets: Vec<DeviceTarget>) -> Self {
        Self {
            targets: Arc::new(RwLock::new(targets)),
        }
    }

    /// Replace the eligibility flag of a known device; unknown ids are ignored.
    pub fn set_eligible(&self, id: &str, eligible: bool) {
        let mut guard = self
            .targets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(target) = guard.iter_mut().find(|t| t.id == id) {
            target.eligible = eligible;
        }
    }
}

impl DeviceInventory for StaticInventory {
    fn targets(&self) -> Vec<DeviceTarget> {
        self.targets
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
