// src/workflow/registry.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::types::WorkflowId;

use super::control::RunControl;

#[derive(Debug)]
struct ActiveRun {
    generation: u64,
    control: RunControl,
}

#[derive(Debug, Default)]
struct Sessions {
    next_generation: u64,
    active: HashMap<WorkflowId, ActiveRun>,
}

/// At most one active run per workflow id.
///
/// Claims are handed out under a single mutex; a [`SessionClaim`] releases
/// its slot when dropped, and only if the slot still belongs to it.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<Sessions>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the slot for `workflow_id`, or return the control of the run
    /// that already holds it.
    pub fn try_claim(&self, workflow_id: &str, control: RunControl) -> Result<SessionClaim, RunControl> {
        let mut sessions = self.lock();
        if let Some(existing) = sessions.active.get(workflow_id) {
            return Err(existing.control.clone());
        }

        sessions.next_generation += 1;
        let generation = sessions.next_generation;
        sessions.active.insert(
            workflow_id.to_string(),
            ActiveRun {
                generation,
                control,
            },
        );
        debug!(workflow = %workflow_id, generation, "claimed run session");

        Ok(SessionClaim {
            workflow_id: workflow_id.to_string(),
            generation,
            registry: self.clone(),
        })
    }

    pub fn active(&self, workflow_id: &str) -> Option<RunControl> {
        self.lock().active.get(workflow_id).map(|run| run.control.clone())
    }

    pub fn active_workflows(&self) -> Vec<WorkflowId> {
        let mut ids: Vec<WorkflowId> = self.lock().active.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn release(&self, workflow_id: &str, generation: u64) {
        let mut sessions = self.lock();
        if sessions
            .active
            .get(workflow_id)
            .is_some_and(|run| run.generation == generation)
        {
            sessions.active.remove(workflow_id);
            debug!(workflow = %workflow_id, generation, "released run session");
        }
    }
}

/// Ownership of a workflow's run slot.
#[derive(Debug)]
pub struct SessionClaim {
    workflow_id: WorkflowId,
    generation: u64,
    registry: SessionRegistry,
}

impl SessionClaim {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        self.registry.release(&self.workflow_id, self.generation);
    }
}
