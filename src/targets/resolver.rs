// src/targets/resolver.rs

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::inventory::DeviceInventory;
use super::selection::SelectionStore;
use crate::types::DeviceId;

/// Result of resolving targets for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Devices to dispatch to, in request order, without duplicates.
    pub eligible: Vec<DeviceId>,
    /// Requested ids that were unknown or not currently eligible.
    pub dropped: Vec<DeviceId>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.eligible.is_empty()
    }
}

/// Produces the eligible device list for a run.
#[derive(Debug, Clone)]
pub struct TargetResolver {
    inventory: Arc<dyn DeviceInventory>,
    selection: Arc<dyn SelectionStore>,
}

impl TargetResolver {
    pub fn new(inventory: Arc<dyn DeviceInventory>, selection: Arc<dyn SelectionStore>) -> Self {
        Self {
            inventory,
            selection,
        }
    }

    /// Intersect `requested` (or, if `None`/empty, the persisted selection)
    /// with the currently eligible devices.
    ///
    /// Never fails. An empty `eligible` list is a precondition failure for
    /// the caller to report; dropped ids are returned for diagnostics.
    pub fn resolve(&self, requested: Option<&[DeviceId]>) -> Resolution {
        let candidates: Vec<DeviceId> = match requested {
            Some(ids) if !ids.is_empty() => ids.to_vec(),
            _ => match self.selection.read_selected_device_ids() {
                Ok(ids) => {
                    debug!(count = ids.len(), "using persisted device selection");
                    ids
                }
                Err(err) => {
                    warn!(error = %err, "failed to read persisted device selection; treating as empty");
                    Vec::new()
                }
            },
        };

        let eligible_now: HashSet<DeviceId> = self
            .inventory
            .targets()
            .into_iter()
            .filter(|t| t.eligible)
            .map(|t| t.id)
            .collect();

        let mut seen = HashSet::new();
        let mut resolution = Resolution::default();

        for id in candidates {
            if !seen.insert(id.clone()) {
                continue;
            }
            if eligible_now.contains(&id) {
                resolution.eligible.push(id);
            } else {
                resolution.dropped.push(id);
            }
        }

        if !resolution.dropped.is_empty() {
            info!(
                dropped = ?resolution.dropped,
                "skipping devices that are unknown or currently unavailable"
            );
        }

        resolution
    }
}
