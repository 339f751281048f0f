// src/workflow/control.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::types::WorkflowId;

use super::report::WorkflowReport;
use super::session::SessionSnapshot;
use super::RunnerError;

/// Caller-side handle to one run.
///
/// Clones refer to the same run. The handle can only request transitions
/// (pause, resume, cancel) and read state; the runner task owns the
/// session and is the only writer.
#[derive(Clone)]
pub struct RunControl {
    workflow_id: WorkflowId,
    pause: Arc<watch::Sender<bool>>,
    cancel: CancellationToken,
    snapshot: watch::Receiver<SessionSnapshot>,
    report: watch::Receiver<Option<Arc<WorkflowReport>>>,
}

/// Runner-side ends of the control channels.
#[derive(Debug)]
pub(crate) struct RunChannels {
    pub pause: watch::Receiver<bool>,
    pub cancel: CancellationToken,
    pub snapshot: Arc<watch::Sender<SessionSnapshot>>,
    pub report: watch::Sender<Option<Arc<WorkflowReport>>>,
}

impl fmt::Debug for RunControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunControl")
            .field("workflow_id", &self.workflow_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RunControl {
    pub(crate) fn new(initial: SessionSnapshot) -> (Self, RunChannels) {
        let workflow_id = initial.workflow_id.clone();
        let (pause_tx, pause_rx) = watch::channel(false);
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);
        let (report_tx, report_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let control = Self {
            workflow_id,
            pause: Arc::new(pause_tx),
            cancel: cancel.clone(),
            snapshot: snapshot_rx,
            report: report_rx,
        };
        let channels = RunChannels {
            pause: pause_rx,
            cancel,
            snapshot: Arc::new(snapshot_tx),
            report: report_tx,
        };
        (control, channels)
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Stop before the next step. An in-flight step is not interrupted.
    pub fn pause(&self) {
        self.pause.send_replace(true);
    }

    pub fn resume(&self) {
        self.pause.send_replace(false);
    }

    pub fn is_pause_requested(&self) -> bool {
        *self.pause.borrow()
    }

    /// Level-triggered: safe to call at any time, any number of times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that yields every published snapshot.
    pub fn watch_snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.report.borrow().is_some()
    }

    /// Wait for the run to reach a terminal state.
    pub async fn wait(&self) -> Result<Arc<WorkflowReport>, RunnerError> {
        let mut report = self.report.clone();
        let ready = report
            .wait_for(|r| r.is_some())
            .await
            .map_err(|_| RunnerError::RunLost(self.workflow_id.clone()))?;
        ready
            .as_ref()
            .cloned()
            .ok_or_else(|| RunnerError::RunLost(self.workflow_id.clone()))
    }
}
