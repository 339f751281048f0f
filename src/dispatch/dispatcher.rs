// src/dispatch/dispatcher.rs

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::batch::{plan_batch, BatchPlan};
use super::retry::{execute_with_retry, RetryPolicy};
use super::status::{RunStatusHandle, StatusRegistry};
use super::{
    DeviceFailure, DispatchError, DispatchEvent, DispatchOutcome, ABORTED_REASON,
    MISSING_RESULT_REASON, NO_BREAKDOWN_REASON,
};
use crate::catalog::{ModuleDescriptor, ParamError, ParamOverrides, ParameterBuilder, PreferenceStore};
use crate::config::EngineSection;
use crate::service::{DeviceCommandService, ExecuteRequest, ExecuteResponse, ServiceError};
use crate::types::DeviceId;

pub const DEFAULT_BATCH_SIZE: usize = 50;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub batch_size: usize,
    /// How many batches may be in flight at once. `1` means strictly
    /// sequential batches.
    pub max_in_flight_batches: usize,
    /// Send mixed-parameter batches as one combined per-device request.
    pub combine_mixed_batches: bool,
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_in_flight_batches: 1,
            combine_mixed_batches: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&EngineSection> for DispatcherConfig {
    fn from(engine: &EngineSection) -> Self {
        Self {
            batch_size: engine.batch_size,
            max_in_flight_batches: engine.max_in_flight_batches,
            combine_mixed_batches: engine.combine_mixed_batches,
            retry: RetryPolicy {
                max_attempts: engine.max_attempts,
                base_delay: Duration::from_millis(engine.base_delay_ms),
            },
        }
    }
}

/// One module to run on a set of devices.
#[derive(Debug, Clone, Copy)]
pub struct DispatchJob<'a> {
    pub module: &'a ModuleDescriptor,
    pub overrides: &'a ParamOverrides,
    pub preferences: &'a dyn PreferenceStore,
    pub devices: &'a [DeviceId],
}

/// Final word on one device from one request.
#[derive(Debug, Clone)]
struct Settlement {
    device_id: DeviceId,
    success: bool,
    message: String,
}

/// What one spawned submission brings back: its settlements and the status
/// ids the service acknowledged along the way.
#[derive(Debug, Default)]
struct Submission {
    settlements: Vec<Settlement>,
    status_ids: Vec<String>,
}

/// Per-dispatch bookkeeping shared by every window.
#[derive(Debug, Default)]
struct DispatchState {
    settled: HashMap<DeviceId, Settlement>,
    skipped: HashSet<DeviceId>,
    /// Status ids acknowledged during this dispatch. Only these are ever
    /// cancelled, and all of them are retired when the dispatch settles.
    observed: BTreeSet<String>,
    /// Status ids a cancellation was already forwarded for.
    cancel_sent: HashSet<String>,
}

/// Runs one module across a device set: batching, grouping, retry,
/// shape fallback, cancellation and per-device reconciliation.
///
/// Cheap to clone; clones share the service, the status registry and the
/// event channel.
#[derive(Clone)]
pub struct ModuleDispatcher {
    service: Arc<dyn DeviceCommandService>,
    config: DispatcherConfig,
    registry: StatusRegistry,
    events: broadcast::Sender<DispatchEvent>,
}

impl std::fmt::Debug for ModuleDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDispatcher")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ModuleDispatcher {
    pub fn new(service: Arc<dyn DeviceCommandService>, config: DispatcherConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            service,
            config,
            registry: StatusRegistry::new(),
            events,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn registry(&self) -> &StatusRegistry {
        &self.registry
    }

    pub fn service(&self) -> Arc<dyn DeviceCommandService> {
        Arc::clone(&self.service)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    /// Sender half of the event channel, for producers outside the
    /// dispatcher such as the push forwarder.
    pub fn event_sender(&self) -> broadcast::Sender<DispatchEvent> {
        self.events.clone()
    }

    /// Run `job.module` on every device in `job.devices`.
    ///
    /// Every distinct requested device appears exactly once in the outcome,
    /// in request order. Transport errors, rejected requests and partial
    /// failures are reported per device, never as an `Err`.
    pub async fn dispatch(
        &self,
        job: DispatchJob<'_>,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, DispatchError> {
        let devices = dedupe(job.devices);
        if devices.is_empty() {
            return Ok(DispatchOutcome::default());
        }

        let module_id = job.module.id.clone();
        let plans = self.plan(job, &devices)?;

        info!(
            module = %module_id,
            devices = devices.len(),
            batches = plans.len(),
            "dispatching module"
        );

        let mut state = DispatchState::default();
        let window = self.config.max_in_flight_batches.max(1);

        for window_plans in plans.chunks(window) {
            let mut in_flight: JoinSet<Submission> = JoinSet::new();

            for plan in window_plans {
                if cancel.is_cancelled() {
                    info!(
                        module = %module_id,
                        batch = plan.index,
                        devices = plan.device_ids.len(),
                        "run cancelled; batch not submitted"
                    );
                    state.skipped.extend(plan.device_ids.iter().cloned());
                    continue;
                }

                let _ = self.events.send(DispatchEvent::BatchSubmitted {
                    module_id: module_id.clone(),
                    batch: plan.index,
                    devices: plan.device_ids.len(),
                    requests: plan.requests.len(),
                });

                for request in plan.requests.iter().cloned() {
                    let submitter = self.submitter();
                    in_flight.spawn(async move { submitter.submit(request).await });
                }
            }

            self.drain(&module_id, &mut in_flight, cancel, &mut state).await;
        }

        if cancel.is_cancelled() {
            self.cancel_observed(&module_id, &mut state).await;
        }
        // Every device has its final word; nothing of this dispatch is left
        // to cancel or settle.
        self.registry.retire(&state.observed);

        let outcome = collect_outcome(&devices, state.settled, &state.skipped);
        info!(
            module = %module_id,
            succeeded = outcome.successes.len(),
            failed = outcome.failures.len(),
            "module dispatch settled"
        );
        Ok(outcome)
    }

    /// Build every device's parameters and split them into batch plans.
    /// A step that cannot be built fails before any request is sent.
    fn plan(&self, job: DispatchJob<'_>, devices: &[DeviceId]) -> Result<Vec<BatchPlan>, DispatchError> {
        let builder = ParameterBuilder::new(job.preferences);
        let batch_size = self.config.batch_size.max(1);

        devices
            .chunks(batch_size)
            .enumerate()
            .map(|(index, chunk)| {
                let entries = chunk
                    .iter()
                    .map(|id| Ok((id.clone(), builder.build(job.module, job.overrides, Some(id))?)))
                    .collect::<Result<Vec<_>, ParamError>>()?;
                Ok(plan_batch(
                    index,
                    &job.module.id,
                    entries,
                    self.config.combine_mixed_batches,
                ))
            })
            .collect()
    }

    /// Wait for every in-flight request of the current window. Once the run
    /// is cancelled, every running handle this dispatch has acknowledged is
    /// cancelled on the service, including ones acknowledged later by
    /// requests that were already in flight. Requests are still awaited: the
    /// service may still report results.
    async fn drain(
        &self,
        module_id: &str,
        in_flight: &mut JoinSet<Submission>,
        cancel: &CancellationToken,
        state: &mut DispatchState,
    ) {
        let mut cancel_seen = false;
        loop {
            tokio::select! {
                joined = in_flight.join_next() => match joined {
                    None => break,
                    Some(Ok(submission)) => {
                        state.observed.extend(submission.status_ids);
                        for settlement in submission.settlements {
                            state.settled.entry(settlement.device_id.clone()).or_insert(settlement);
                        }
                        if cancel_seen {
                            self.cancel_observed(module_id, state).await;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(module = %module_id, error = %err, "dispatch task ended without reporting");
                    }
                },
                _ = cancel.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    if state.observed.is_empty() {
                        debug!(module = %module_id, "cancel requested; no acknowledged runs to cancel yet");
                    }
                    self.cancel_observed(module_id, state).await;
                }
            }
        }
    }

    /// Ask the service to stop every still-running handle acknowledged by
    /// this dispatch that was not asked already. Failures are logged;
    /// cancellation is advisory.
    async fn cancel_observed(&self, module_id: &str, state: &mut DispatchState) {
        let targets: Vec<String> = state
            .observed
            .iter()
            .filter(|id| !state.cancel_sent.contains(*id))
            .filter(|id| self.registry.get(id).is_some_and(|h| h.is_running()))
            .cloned()
            .collect();

        for status_id in targets {
            state.cancel_sent.insert(status_id.clone());
            let _ = self.events.send(DispatchEvent::CancelRequested {
                module_id: module_id.to_string(),
                status_id: status_id.clone(),
            });
            match self.service.cancel(module_id.to_string(), status_id.clone()).await {
                Ok(()) => {
                    info!(module = %module_id, %status_id, "forwarded cancellation");
                    self.registry.complete(&status_id);
                }
                Err(err) => warn!(
                    module = %module_id,
                    %status_id,
                    error = %err,
                    "service did not accept cancellation"
                ),
            }
        }
    }

    fn submitter(&self) -> Submitter {
        Submitter {
            service: Arc::clone(&self.service),
            registry: self.registry.clone(),
            events: self.events.clone(),
            retry: self.config.retry,
        }
    }
}

/// Owned state a spawned submission task needs.
#[derive(Clone)]
struct Submitter {
    service: Arc<dyn DeviceCommandService>,
    registry: StatusRegistry,
    events: broadcast::Sender<DispatchEvent>,
    retry: RetryPolicy,
}

impl Submitter {
    /// Send `request`. A combined request the service explicitly refuses is
    /// resent as one single-device request per device.
    async fn submit(self, request: ExecuteRequest) -> Submission {
        match execute_with_retry(self.service.as_ref(), &request, self.retry).await {
            Err(err) if err.is_unsupported_shape() && request.is_combined() => {
                info!(
                    module = %request.module_id,
                    devices = request.device_ids.len(),
                    "combined parameter shape refused; falling back to per-device requests"
                );
                self.submit_singles(request.split_per_device()).await
            }
            result => self.reconcile(&request, result),
        }
    }

    async fn submit_singles(&self, requests: Vec<ExecuteRequest>) -> Submission {
        let mut singles = JoinSet::new();
        for single in requests {
            let submitter = self.clone();
            singles.spawn(async move {
                let result =
                    execute_with_retry(submitter.service.as_ref(), &single, submitter.retry).await;
                submitter.reconcile(&single, result)
            });
        }

        let mut merged = Submission::default();
        while let Some(joined) = singles.join_next().await {
            match joined {
                Ok(submission) => {
                    merged.settlements.extend(submission.settlements);
                    merged.status_ids.extend(submission.status_ids);
                }
                Err(err) => warn!(error = %err, "single-device fallback task ended without reporting"),
            }
        }
        merged
    }

    /// Map one request's result onto exactly one settlement per device.
    fn reconcile(
        &self,
        request: &ExecuteRequest,
        result: Result<ExecuteResponse, ServiceError>,
    ) -> Submission {
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                let reason = err.to_string();
                return Submission {
                    settlements: self.emit_all(
                        request,
                        request
                            .device_ids
                            .iter()
                            .map(|id| Settlement::failed(id, reason.clone()))
                            .collect(),
                    ),
                    status_ids: Vec::new(),
                };
            }
        };

        if let Some(status_id) = &response.status_id {
            self.registry.observe(RunStatusHandle::new(
                status_id.clone(),
                request.module_id.clone(),
                request.device_ids.iter().cloned(),
            ));
            let _ = self.events.send(DispatchEvent::StatusObserved {
                module_id: request.module_id.clone(),
                status_id: status_id.clone(),
            });
        }
        let status_ids: Vec<String> = response.status_id.iter().cloned().collect();

        if response.device_results.is_empty() {
            warn!(
                module = %request.module_id,
                devices = request.device_ids.len(),
                "service returned no per-device results"
            );
            return Submission {
                settlements: self.emit_all(
                    request,
                    request
                        .device_ids
                        .iter()
                        .map(|id| Settlement::failed(id, NO_BREAKDOWN_REASON))
                        .collect(),
                ),
                status_ids,
            };
        }

        // First result per device wins; ids we did not ask for are ignored.
        let mut by_device = HashMap::new();
        for result in &response.device_results {
            if !request.device_ids.contains(&result.device_id) {
                debug!(
                    module = %request.module_id,
                    device = %result.device_id,
                    "ignoring result for a device outside the request"
                );
                continue;
            }
            by_device.entry(result.device_id.as_str()).or_insert(result);
        }

        let settlements: Vec<Settlement> = request
            .device_ids
            .iter()
            .map(|id| match by_device.get(id.as_str()) {
                Some(r) if r.success => Settlement {
                    device_id: id.clone(),
                    success: true,
                    message: r.result.clone().unwrap_or_default(),
                },
                Some(r) => Settlement::failed(
                    id,
                    r.error
                        .clone()
                        .or_else(|| r.result.clone())
                        .unwrap_or_else(|| "device reported failure".to_string()),
                ),
                None => Settlement::failed(id, MISSING_RESULT_REASON),
            })
            .collect();

        if let Some(status_id) = &response.status_id {
            let reported: Vec<DeviceId> = by_device.keys().map(|id| id.to_string()).collect();
            self.registry.settle(status_id, &reported);
        }

        Submission {
            settlements: self.emit_all(request, settlements),
            status_ids,
        }
    }

    fn emit_all(&self, request: &ExecuteRequest, settlements: Vec<Settlement>) -> Vec<Settlement> {
        for s in &settlements {
            let _ = self.events.send(DispatchEvent::DeviceSettled {
                module_id: request.module_id.clone(),
                device_id: s.device_id.clone(),
                success: s.success,
                message: s.message.clone(),
            });
        }
        settlements
    }
}

impl Settlement {
    fn failed(device_id: &str, message: impl Into<String>) -> Self {
        Self {
            device_id: device_id.to_string(),
            success: false,
            message: message.into(),
        }
    }
}

fn dedupe(devices: &[DeviceId]) -> Vec<DeviceId> {
    let mut seen = HashSet::new();
    devices
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

fn collect_outcome(
    devices: &[DeviceId],
    mut settled: HashMap<DeviceId, Settlement>,
    skipped: &HashSet<DeviceId>,
) -> DispatchOutcome {
    let mut outcome = DispatchOutcome::default();
    for id in devices {
        match settled.remove(id) {
            Some(s) if s.success => outcome.successes.push(id.clone()),
            Some(s) => outcome.failures.push(DeviceFailure::error(id.clone(), s.message)),
            None if skipped.contains(id) => outcome.failures.push(DeviceFailure::cancelled(id.clone())),
            None => outcome.failures.push(DeviceFailure::error(id.clone(), ABORTED_REASON)),
        }
    }
    outcome
}
