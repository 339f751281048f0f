// src/history.rs

//! Run History Recorder: one record per completed workflow iteration.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fs::FileSystem;
use crate::types::DeviceId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDevice {
    pub device_id: DeviceId,
    pub reason: String,
}

/// Outcome of one iteration. A device is in exactly one of the two lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationOutcome {
    pub success_device_ids: Vec<DeviceId>,
    pub failed_devices: Vec<FailedDevice>,
}

impl IterationOutcome {
    pub fn device_count(&self) -> usize {
        self.success_device_ids.len() + self.failed_devices.len()
    }

    pub fn all_failed(&self) -> bool {
        self.success_device_ids.is_empty() && !self.failed_devices.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub workflow_id: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: IterationOutcome,
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("could not serialize history record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("could not persist history record: {0}")]
    Persist(#[from] anyhow::Error),
}

/// Write-only sink for iteration outcomes.
pub trait HistoryRecorder: Send + Sync + Debug {
    fn record(
        &self,
        workflow_id: &str,
        timestamp: DateTime<Utc>,
        outcome: &IterationOutcome,
    ) -> Result<(), HistoryError>;
}

/// Appends one JSON line per record to a file.
#[derive(Debug, Clone)]
pub struct JsonlHistoryRecorder {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
}

impl JsonlHistoryRecorder {
    pub fn new(fs: Arc<dyn FileSystem>, path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            path: path.into(),
        }
    }

    /// Read every record back, skipping blank lines.
    pub fn load(&self) -> Result<Vec<HistoryRecord>, HistoryError> {
        if !self.fs.exists(&self.path) {
            return Ok(Vec::new());
        }
        let raw = self.fs.read_to_string(&self.path)?;
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(HistoryError::from))
            .collect()
    }
}

impl HistoryRecorder for JsonlHistoryRecorder {
    fn record(
        &self,
        workflow_id: &str,
        timestamp: DateTime<Utc>,
        outcome: &IterationOutcome,
    ) -> Result<(), HistoryError> {
        let record = HistoryRecord {
            workflow_id: workflow_id.to_string(),
            timestamp,
            outcome: outcome.clone(),
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        self.fs.append(&self.path, &line)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryHistoryInner {
    records: Vec<HistoryRecord>,
    run_counts: BTreeMap<String, u64>,
    last_run: BTreeMap<String, DateTime<Utc>>,
}

/// In-memory recorder keeping records plus per-workflow run count and
/// last-run timestamp.
#[derive(Debug, Clone, Default)]
pub struct MemoryHistory {
    inner: Arc<Mutex<MemoryHistoryInner>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryHistoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn records(&self) -> Vec<HistoryRecord> {
        self.lock().records.clone()
    }

    pub fn records_for(&self, workflow_id: &str) -> Vec<HistoryRecord> {
        self.lock()
            .records
            .iter()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect()
    }

    pub fn run_count(&self, workflow_id: &str) -> u64 {
        self.lock().run_counts.get(workflow_id).copied().unwrap_or(0)
    }

    pub fn last_run(&self, workflow_id: &str) -> Option<DateTime<Utc>> {
        self.lock().last_run.get(workflow_id).copied()
    }
}

impl HistoryRecorder for MemoryHistory {
    fn record(
        &self,
        workflow_id: &str,
        timestamp: DateTime<Utc>,
        outcome: &IterationOutcome,
    ) -> Result<(), HistoryError> {
        let mut inner = self.lock();
        inner.records.push(HistoryRecord {
            workflow_id: workflow_id.to_string(),
            timestamp,
            outcome: outcome.clone(),
        });
        *inner.run_counts.entry(workflow_id.to_string()).or_default() += 1;
        inner.last_run.insert(workflow_id.to_string(), timestamp);
        Ok(())
    }
}
