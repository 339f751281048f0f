use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, Semaphore};
use tracing::debug;

use fleetrun::service::{
    BoxFuture, DeviceCommandService, DeviceResult, ExecuteRequest, ExecuteResponse,
    RemoteRunState, RunStatus, ServiceError,
};
use fleetrun::types::DeviceId;

#[derive(Default)]
struct State {
    calls: Vec<ExecuteRequest>,
    cancels: Vec<(String, String)>,
    /// device -> reason, for every module
    failing: HashMap<DeviceId, String>,
    /// (module, device) -> reason
    failing_on: HashMap<(String, DeviceId), String>,
    scripted: VecDeque<ServiceError>,
    always: Option<ServiceError>,
    reject_combined: bool,
    omit_results: bool,
    next_status: u64,
}

/// A fake device command service that:
/// - records every execute and cancel call
/// - answers with scripted per-device outcomes (success unless told otherwise)
/// - can fail whole calls, refuse the combined shape, or drop the
///   per-device breakdown
/// - can hold responses behind a gate until the test releases them
///
/// Clones share state, so a test keeps one clone to inspect while the
/// engine owns another.
#[derive(Clone, Default)]
pub struct FakeCommandService {
    state: Arc<Mutex<State>>,
    gate: Option<Arc<Semaphore>>,
    calls_changed: Arc<Notify>,
}

impl FakeCommandService {
    pub fn new() -> Self {
        Self::default()
    }

    /// `device_id` fails every module with `reason`.
    pub fn fail_device(self, device_id: &str, reason: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(device_id.to_string(), reason.to_string());
        self
    }

    /// `device_id` fails `module_id` only.
    pub fn fail_device_on(self, module_id: &str, device_id: &str, reason: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_on
            .insert((module_id.to_string(), device_id.to_string()), reason.to_string());
        self
    }

    /// The next execute call fails with `err` (queue several for several calls).
    pub fn fail_next(self, err: ServiceError) -> Self {
        self.state.lock().unwrap().scripted.push_back(err);
        self
    }

    pub fn always_fail(self, err: ServiceError) -> Self {
        self.state.lock().unwrap().always = Some(err);
        self
    }

    /// Refuse combined per-device requests with the explicit shape code.
    pub fn reject_combined_shape(self) -> Self {
        self.state.lock().unwrap().reject_combined = true;
        self
    }

    /// Acknowledge calls with a status id but no per-device results.
    pub fn without_device_results(self) -> Self {
        self.state.lock().unwrap().omit_results = true;
        self
    }

    /// Hold every execute response until [`release`](Self::release) is called.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Let `n` gated responses through.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn calls(&self) -> Vec<ExecuteRequest> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    pub fn calls_for(&self, module_id: &str) -> Vec<ExecuteRequest> {
        self.calls()
            .into_iter()
            .filter(|c| c.module_id == module_id)
            .collect()
    }

    /// `(module_id, status_id)` of every cancel request, in order.
    pub fn cancels(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().cancels.clone()
    }

    /// Wait until at least `n` execute calls were made.
    pub async fn wait_for_calls(&self, n: usize) {
        loop {
            let notified = self.calls_changed.notified();
            if self.call_count() >= n {
                return;
            }
            notified.await;
        }
    }

    fn respond(&self, request: &ExecuteRequest) -> Result<ExecuteResponse, ServiceError> {
        let mut state = self.state.lock().unwrap();

        if let Some(err) = state.scripted.pop_front() {
            return Err(err);
        }
        if let Some(err) = &state.always {
            return Err(err.clone());
        }
        if state.reject_combined && request.is_combined() {
            return Err(ServiceError::unsupported_shape());
        }

        state.next_status += 1;
        let status_id = format!("st-{}", state.next_status);

        if state.omit_results {
            return Ok(ExecuteResponse {
                status_id: Some(status_id),
                device_results: Vec::new(),
            });
        }

        let device_results = request
            .device_ids
            .iter()
            .map(|id| {
                let reason = state
                    .failing_on
                    .get(&(request.module_id.clone(), id.clone()))
                    .or_else(|| state.failing.get(id));
                match reason {
                    Some(reason) => DeviceResult {
                        device_id: id.clone(),
                        success: false,
                        result: None,
                        error: Some(reason.clone()),
                    },
                    None => DeviceResult {
                        device_id: id.clone(),
                        success: true,
                        result: Some("ok".to_string()),
                        error: None,
                    },
                }
            })
            .collect();

        Ok(ExecuteResponse {
            status_id: Some(status_id),
            device_results,
        })
    }
}

impl DeviceCommandService for FakeCommandService {
    fn execute(&self, request: ExecuteRequest) -> BoxFuture<'_, Result<ExecuteResponse, ServiceError>> {
        Box::pin(async move {
            debug!(module = %request.module_id, devices = request.device_ids.len(), "fake execute");
            self.state.lock().unwrap().calls.push(request.clone());
            self.calls_changed.notify_waiters();

            if let Some(gate) = &self.gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }

            self.respond(&request)
        })
    }

    fn cancel(&self, module_id: String, status_id: String) -> BoxFuture<'_, Result<(), ServiceError>> {
        Box::pin(async move {
            debug!(%module_id, %status_id, "fake cancel");
            self.state.lock().unwrap().cancels.push((module_id, status_id));
            Ok(())
        })
    }

    fn status(
        &self,
        module_id: Option<String>,
        status_id: Option<String>,
    ) -> BoxFuture<'_, Result<RunStatus, ServiceError>> {
        Box::pin(async move {
            Ok(RunStatus {
                status_id: status_id.unwrap_or_else(|| "st-0".to_string()),
                module_id: module_id.unwrap_or_default(),
                state: RemoteRunState::Completed,
                device_ids: Vec::new(),
                pending_device_ids: Vec::new(),
                success_count: None,
                failure_count: None,
            })
        })
    }
}
