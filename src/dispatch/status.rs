// src/dispatch/status.rs

//! Run status handles issued by the device command service.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::service::RemoteRunState;
use crate::types::DeviceId;

/// Correlates one acknowledged dispatch with its eventual completion.
///
/// Invariant: `pending_device_ids ⊆ device_ids`, and the pending set only
/// ever shrinks. Once it is empty the handle is `Completed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatusHandle {
    status_id: String,
    module_id: String,
    device_ids: BTreeSet<DeviceId>,
    pending_device_ids: BTreeSet<DeviceId>,
    state: RemoteRunState,
}

impl RunStatusHandle {
    pub fn new(
        status_id: impl Into<String>,
        module_id: impl Into<String>,
        device_ids: impl IntoIterator<Item = DeviceId>,
    ) -> Self {
        let device_ids: BTreeSet<DeviceId> = device_ids.into_iter().collect();
        let state = if device_ids.is_empty() {
            RemoteRunState::Completed
        } else {
            RemoteRunState::Running
        };
        Self {
            status_id: status_id.into(),
            module_id: module_id.into(),
            pending_device_ids: device_ids.clone(),
            device_ids,
            state,
        }
    }

    pub fn status_id(&self) -> &str {
        &self.status_id
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn device_ids(&self) -> &BTreeSet<DeviceId> {
        &self.device_ids
    }

    pub fn pending_device_ids(&self) -> &BTreeSet<DeviceId> {
        &self.pending_device_ids
    }

    pub fn state(&self) -> RemoteRunState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == RemoteRunState::Running
    }

    /// Remove settled devices from the pending set. Ids outside the handle
    /// are ignored.
    pub fn settle<'a>(&mut self, devices: impl IntoIterator<Item = &'a DeviceId>) {
        for id in devices {
            self.pending_device_ids.remove(id);
        }
        if self.pending_device_ids.is_empty() {
            self.state = RemoteRunState::Completed;
        }
    }

    pub fn complete(&mut self) {
        self.pending_device_ids.clear();
        self.state = RemoteRunState::Completed;
    }
}

/// Shared registry of observed status handles.
///
/// Clones share the same table. Every access goes through one mutex, so the
/// dispatcher, the push forwarder and a cancelling runner never race on a
/// handle.
#[derive(Debug, Clone, Default)]
pub struct StatusRegistry {
    handles: Arc<Mutex<HashMap<String, RunStatusHandle>>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RunStatusHandle>> {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn observe(&self, handle: RunStatusHandle) {
        debug!(
            status_id = %handle.status_id,
            module = %handle.module_id,
            devices = handle.device_ids.len(),
            "observed run status handle"
        );
        self.lock().insert(handle.status_id.clone(), handle);
    }

    pub fn settle(&self, status_id: &str, devices: &[DeviceId]) {
        if let Some(handle) = self.lock().get_mut(status_id) {
            handle.settle(devices);
        }
    }

    /// Settle devices on every running handle of a module (push messages
    /// carry a module id, not a status id).
    pub fn settle_module(&self, module_id: &str, devices: &[DeviceId]) {
        for handle in self.lock().values_mut() {
            if handle.module_id == module_id && handle.is_running() {
                handle.settle(devices);
            }
        }
    }

    pub fn complete(&self, status_id: &str) {
        if let Some(handle) = self.lock().get_mut(status_id) {
            handle.complete();
        }
    }

    pub fn get(&self, status_id: &str) -> Option<RunStatusHandle> {
        self.lock().get(status_id).cloned()
    }

    /// Handles of `module_id` that are still running.
    pub fn active_for(&self, module_id: &str) -> Vec<RunStatusHandle> {
        let mut active: Vec<RunStatusHandle> = self
            .lock()
            .values()
            .filter(|h| h.module_id == module_id && h.is_running())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.status_id.cmp(&b.status_id));
        active
    }

    /// Forget handles whose dispatch has settled, running or not.
    pub fn retire<'a>(&self, status_ids: impl IntoIterator<Item = &'a String>) {
        let mut handles = self.lock();
        for id in status_ids {
            if handles.remove(id).is_some() {
                debug!(status_id = %id, "retired run status handle");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
