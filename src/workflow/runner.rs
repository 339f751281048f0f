// src/workflow/runner.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::{ModuleDescriptor, ParamOverrides, ParameterBuilder, PreferenceStore};
use crate::config::EngineSection;
use crate::dispatch::{DispatchError, DispatchJob, DispatchOutcome, ModuleDispatcher};
use crate::history::{HistoryRecorder, IterationOutcome};
use crate::progress::ProgressEstimator;
use crate::targets::TargetResolver;
use crate::types::{ConflictPolicy, DeviceId};

use super::control::{RunChannels, RunControl};
use super::model::{Workflow, WorkflowStep};
use super::registry::{SessionClaim, SessionRegistry};
use super::report::{summarize, IterationLog, IterationReport, WorkflowReport};
use super::session::{needs_inter_step_delay, RunSession, SessionSnapshot, SessionState};
use super::{RunnerError, RunnerEvent};

const EVENT_CAPACITY: usize = 256;
const MIN_TICK: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    pub inter_step_delay: Duration,
    pub inter_iteration_delay: Duration,
    /// How often a paused run re-checks the pause flag.
    pub pause_poll: Duration,
    pub progress_tick: Duration,
    pub progress_increment: u8,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            inter_step_delay: Duration::from_millis(2000),
            inter_iteration_delay: Duration::from_millis(1200),
            pause_poll: Duration::from_millis(250),
            progress_tick: Duration::from_millis(1000),
            progress_increment: 5,
        }
    }
}

impl From<&EngineSection> for RunnerConfig {
    fn from(engine: &EngineSection) -> Self {
        Self {
            inter_step_delay: Duration::from_millis(engine.inter_step_delay_ms),
            inter_iteration_delay: Duration::from_millis(engine.inter_iteration_delay_ms),
            pause_poll: Duration::from_millis(engine.pause_poll_ms),
            progress_tick: Duration::from_millis(engine.progress_tick_ms),
            progress_increment: engine.progress_increment,
        }
    }
}

/// Drives workflows step by step through the [`ModuleDispatcher`].
///
/// Each started run gets its own task that owns the [`RunSession`]; a
/// second task supervises it, so a runner task that dies still ends the
/// run in `Failed` and frees the workflow's session slot.
#[derive(Clone)]
pub struct WorkflowRunner {
    dispatcher: ModuleDispatcher,
    resolver: TargetResolver,
    history: Arc<dyn HistoryRecorder>,
    sessions: SessionRegistry,
    config: RunnerConfig,
    progress: ProgressEstimator,
    events: broadcast::Sender<RunnerEvent>,
}

impl fmt::Debug for WorkflowRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowRunner")
            .field("dispatcher", &self.dispatcher)
            .field("config", &self.config)
            .field("active", &self.sessions.active_workflows())
            .finish_non_exhaustive()
    }
}

impl WorkflowRunner {
    pub fn new(
        dispatcher: ModuleDispatcher,
        resolver: TargetResolver,
        history: Arc<dyn HistoryRecorder>,
        config: RunnerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            dispatcher,
            resolver,
            history,
            sessions: SessionRegistry::new(),
            progress: ProgressEstimator::new(config.progress_increment),
            config,
            events,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn dispatcher(&self) -> &ModuleDispatcher {
        &self.dispatcher
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunnerEvent> {
        self.events.subscribe()
    }

    /// Start a run of `workflow` and return its control handle.
    ///
    /// Targets are `requested` if non-empty, else the workflow's own device
    /// list, else the persisted selection; all intersected with current
    /// eligibility. If the workflow already has an active run, `policy`
    /// decides between refusing and cancelling the old run first.
    pub async fn start(
        &self,
        workflow: Arc<Workflow>,
        requested: Option<Vec<DeviceId>>,
        policy: ConflictPolicy,
    ) -> Result<RunControl, RunnerError> {
        if workflow.steps.is_empty() {
            return Err(RunnerError::EmptyWorkflow(workflow.id.clone()));
        }

        let requested = requested
            .filter(|ids| !ids.is_empty())
            .or_else(|| workflow.devices.clone());
        let resolution = self.resolver.resolve(requested.as_deref());
        if resolution.is_empty() {
            warn!(workflow = %workflow.id, dropped = ?resolution.dropped, "no eligible devices; run not started");
            return Err(RunnerError::NoEligibleDevices(workflow.id.clone()));
        }

        let session = RunSession::new(workflow.id.clone(), resolution.eligible);
        let (control, channels) = RunControl::new(session.snapshot());
        let claim = self.claim(&workflow.id, &control, policy).await?;

        let RunChannels {
            pause,
            cancel,
            snapshot,
            report,
        } = channels;
        let started_at = Utc::now();

        let worker = tokio::spawn(self.clone().drive(
            workflow.clone(),
            session,
            pause,
            cancel,
            snapshot.clone(),
            started_at,
        ));
        tokio::spawn(supervise(
            worker,
            claim,
            snapshot,
            report,
            self.events.clone(),
            workflow.id.clone(),
            started_at,
        ));

        Ok(control)
    }

    /// Run one module outside any workflow, against live preferences.
    pub async fn run_module(
        &self,
        module: &ModuleDescriptor,
        overrides: &ParamOverrides,
        preferences: &dyn PreferenceStore,
        requested: Option<&[DeviceId]>,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, RunnerError> {
        let resolution = self.resolver.resolve(requested);
        if resolution.is_empty() {
            return Err(RunnerError::NoEligibleDevices(module.id.clone()));
        }
        let outcome = self
            .dispatch_with_progress(
                &module.id,
                0,
                module,
                overrides,
                preferences,
                &resolution.eligible,
                cancel,
            )
            .await?;
        Ok(outcome)
    }

    async fn claim(
        &self,
        workflow_id: &str,
        control: &RunControl,
        policy: ConflictPolicy,
    ) -> Result<SessionClaim, RunnerError> {
        loop {
            let existing = match self.sessions.try_claim(workflow_id, control.clone()) {
                Ok(claim) => return Ok(claim),
                Err(existing) => existing,
            };

            match policy {
                ConflictPolicy::Reject => {
                    warn!(workflow = %workflow_id, "workflow already running; new run rejected");
                    return Err(RunnerError::AlreadyRunning(workflow_id.to_string()));
                }
                ConflictPolicy::Supersede => {
                    info!(workflow = %workflow_id, "superseding active run; cancelling it first");
                    existing.cancel();
                    if let Err(err) = existing.wait().await {
                        warn!(workflow = %workflow_id, error = %err, "superseded run ended without a report");
                    }
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    /// Body of the runner task: the only writer of `session`.
    async fn drive(
        self,
        workflow: Arc<Workflow>,
        mut session: RunSession,
        pause: watch::Receiver<bool>,
        cancel: CancellationToken,
        snapshot: Arc<watch::Sender<SessionSnapshot>>,
        started_at: DateTime<Utc>,
    ) -> WorkflowReport {
        let workflow_id = workflow.id.clone();
        let clock = Instant::now();
        let mut iterations = IterationLog::new();

        session.start();
        self.publish(&session, &snapshot);
        info!(
            workflow = %workflow_id,
            devices = session.devices().len(),
            steps = workflow.steps.len(),
            "workflow run started"
        );

        let terminal = loop {
            if cancel.is_cancelled() {
                break SessionState::Cancelled;
            }
            // A pause that lands during the last step holds the run here,
            // before the next iteration is counted.
            if !self.wait_while_paused(&mut session, &pause, &cancel, &snapshot).await {
                break SessionState::Cancelled;
            }

            let iteration = session.begin_iteration();
            self.publish(&session, &snapshot);
            self.emit(RunnerEvent::IterationStarted {
                workflow_id: workflow_id.clone(),
                iteration,
            });

            let finished = self
                .run_iteration(&workflow, &mut session, iteration, &pause, &cancel, &snapshot)
                .await;
            let outcome = session.iteration_outcome();

            if !finished {
                if !session.completed_step_indices().is_empty() {
                    iterations.push(IterationReport {
                        iteration,
                        outcome,
                        interrupted: true,
                    });
                }
                break SessionState::Cancelled;
            }

            self.record_iteration(&workflow_id, iteration, &outcome).await;
            iterations.push(IterationReport {
                iteration,
                outcome,
                interrupted: false,
            });

            if !workflow.repeat.should_continue(iteration, clock.elapsed()) {
                break SessionState::Completed;
            }
            if !sleep_unless_cancelled(self.config.inter_iteration_delay, &cancel).await {
                break SessionState::Cancelled;
            }
        };

        if terminal == SessionState::Cancelled {
            session.mark_cancelled();
        }
        session.finish(terminal);
        self.publish(&session, &snapshot);
        info!(
            workflow = %workflow_id,
            state = ?terminal,
            iterations = session.run_iteration(),
            "workflow run finished"
        );

        WorkflowReport {
            workflow_id,
            state: terminal,
            iterations,
            started_at,
            finished_at: Utc::now(),
            error: None,
        }
    }

    /// Run every step once. Returns `false` if cancellation cut the
    /// iteration short.
    async fn run_iteration(
        &self,
        workflow: &Workflow,
        session: &mut RunSession,
        iteration: u32,
        pause: &watch::Receiver<bool>,
        cancel: &CancellationToken,
        snapshot: &watch::Sender<SessionSnapshot>,
    ) -> bool {
        let devices = session.devices().to_vec();

        for (index, step) in workflow.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                return false;
            }
            if !self.wait_while_paused(session, pause, cancel, snapshot).await {
                return false;
            }

            session.begin_step(index);
            self.publish(session, snapshot);
            self.emit(RunnerEvent::StepStarted {
                workflow_id: workflow.id.clone(),
                iteration,
                step: index,
                module_id: step.module.id.clone(),
            });
            debug!(workflow = %workflow.id, iteration, step = index, module = %step.module.id, "step started");

            let (succeeded, failed) = match self.run_step(workflow, index, step, &devices, cancel).await {
                Ok(outcome) => {
                    session.apply_step(index, &step.module.id, &outcome);
                    let failed = outcome.failures.iter().map(|f| f.device_id.clone()).collect();
                    (outcome.successes, failed)
                }
                Err(err) => {
                    warn!(
                        workflow = %workflow.id,
                        iteration,
                        step = index,
                        module = %step.module.id,
                        error = %err,
                        "step could not be dispatched; counting it as failed on every device"
                    );
                    session.fail_step(index, &step.module.id, &err.to_string());
                    (Vec::new(), devices.clone())
                }
            };
            self.publish(session, snapshot);
            self.emit(RunnerEvent::StepFinished {
                workflow_id: workflow.id.clone(),
                iteration,
                step: index,
                module_id: step.module.id.clone(),
                succeeded,
                failed,
            });

            if cancel.is_cancelled() {
                return false;
            }

            if needs_inter_step_delay(step, workflow.steps.get(index + 1)) {
                self.emit(RunnerEvent::InterStepDelay {
                    workflow_id: workflow.id.clone(),
                    iteration,
                    after_step: index,
                    delay: self.config.inter_step_delay,
                });
                if !sleep_unless_cancelled(self.config.inter_step_delay, cancel).await {
                    return false;
                }
            }
        }

        true
    }

    async fn run_step(
        &self,
        workflow: &Workflow,
        index: usize,
        step: &WorkflowStep,
        devices: &[DeviceId],
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.dispatch_with_progress(
            &workflow.id,
            index,
            &step.module,
            &step.overrides,
            workflow.preferences(),
            devices,
            cancel,
        )
        .await
    }

    /// Dispatch while a timer drives the progress estimate alongside.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_with_progress(
        &self,
        workflow_id: &str,
        step: usize,
        module: &ModuleDescriptor,
        overrides: &ParamOverrides,
        preferences: &dyn PreferenceStore,
        devices: &[DeviceId],
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, DispatchError> {
        let expected = devices
            .first()
            .and_then(|id| ParameterBuilder::new(preferences).build(module, overrides, Some(id)).ok())
            .and_then(|params| module.expected_duration_for(&params));
        let mut progress = self.progress.start(expected);

        let period = self.config.progress_tick.max(MIN_TICK);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

        let job = DispatchJob {
            module,
            overrides,
            preferences,
            devices,
        };
        let dispatch = self.dispatcher.dispatch(job, cancel);
        tokio::pin!(dispatch);

        let result = loop {
            tokio::select! {
                biased;
                result = &mut dispatch => break result,
                _ = ticker.tick() => {
                    let percent = progress.tick();
                    self.emit(RunnerEvent::Progress {
                        workflow_id: workflow_id.to_string(),
                        step,
                        module_id: module.id.clone(),
                        percent,
                    });
                }
            }
        };

        self.emit(RunnerEvent::Progress {
            workflow_id: workflow_id.to_string(),
            step,
            module_id: module.id.clone(),
            percent: progress.finish(),
        });
        result
    }

    /// Block while paused, re-checking on an interval. Returns `false` if
    /// the run was cancelled while paused.
    async fn wait_while_paused(
        &self,
        session: &mut RunSession,
        pause: &watch::Receiver<bool>,
        cancel: &CancellationToken,
        snapshot: &watch::Sender<SessionSnapshot>,
    ) -> bool {
        if !*pause.borrow() {
            return true;
        }

        session.set_paused(true);
        self.publish(session, snapshot);
        info!(workflow = %session.workflow_id(), step = ?session.active_step_index(), "run paused");

        let mut poll = tokio::time::interval(self.config.pause_poll.max(MIN_TICK));
        let resumed = loop {
            tokio::select! {
                _ = cancel.cancelled() => break false,
                _ = poll.tick() => {
                    if !*pause.borrow() {
                        break true;
                    }
                }
            }
        };

        if resumed {
            session.set_paused(false);
            self.publish(session, snapshot);
            info!(workflow = %session.workflow_id(), "run resumed");
        }
        resumed
    }

    /// Hand the outcome to the history recorder on the blocking pool; file
    /// recorders do synchronous IO. A recorder that panics takes the runner
    /// task down with it.
    async fn record_iteration(&self, workflow_id: &str, iteration: u32, outcome: &IterationOutcome) {
        let history = Arc::clone(&self.history);
        let record = {
            let workflow_id = workflow_id.to_string();
            let outcome = outcome.clone();
            let at = Utc::now();
            move || history.record(&workflow_id, at, &outcome)
        };
        let recorded = match tokio::task::spawn_blocking(record).await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => {
                error!(workflow = %workflow_id, iteration, error = %err, "history task did not run");
                return;
            }
        };

        match recorded {
            Ok(()) => info!(
                workflow = %workflow_id,
                iteration,
                summary = %summarize(outcome),
                "iteration recorded"
            ),
            Err(err) => error!(
                workflow = %workflow_id,
                iteration,
                error = %err,
                "failed to record iteration outcome"
            ),
        }
        self.emit(RunnerEvent::IterationRecorded {
            workflow_id: workflow_id.to_string(),
            iteration,
            outcome: outcome.clone(),
        });
    }

    /// Publish a snapshot, emitting a state-change event when the state
    /// moved.
    fn publish(&self, session: &RunSession, snapshot: &watch::Sender<SessionSnapshot>) {
        let next = session.snapshot();
        let state = next.state;
        let previous = snapshot.send_replace(next);
        if previous.state != state {
            self.emit(RunnerEvent::StateChanged {
                workflow_id: session.workflow_id().to_string(),
                state,
            });
        }
    }

    fn emit(&self, event: RunnerEvent) {
        let _ = self.events.send(event);
    }
}

/// Wait for the runner task, then free the session slot and publish the
/// final report. A runner task that died ends the run as `Failed`.
async fn supervise(
    worker: JoinHandle<WorkflowReport>,
    claim: SessionClaim,
    snapshot: Arc<watch::Sender<SessionSnapshot>>,
    report: watch::Sender<Option<Arc<WorkflowReport>>>,
    events: broadcast::Sender<RunnerEvent>,
    workflow_id: String,
    started_at: DateTime<Utc>,
) {
    let final_report = match worker.await {
        Ok(report) => report,
        Err(err) => {
            error!(workflow = %workflow_id, error = %err, "workflow runner task aborted");
            snapshot.send_modify(|s| {
                s.state = SessionState::Failed;
                s.paused = false;
                s.active_step_index = None;
            });
            let _ = events.send(RunnerEvent::StateChanged {
                workflow_id: workflow_id.clone(),
                state: SessionState::Failed,
            });
            WorkflowReport {
                workflow_id,
                state: SessionState::Failed,
                iterations: IterationLog::new(),
                started_at,
                finished_at: Utc::now(),
                error: Some(err.to_string()),
            }
        }
    };

    drop(claim);
    report.send_replace(Some(Arc::new(final_report)));
}

async fn sleep_unless_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
