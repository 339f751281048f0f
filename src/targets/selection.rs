// src/targets/selection.rs

//! Persisted device selection.
//!
//! The store is a plain key-value read: a JSON array of device id strings.

use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::fs::FileSystem;
use crate::types::DeviceId;

pub trait SelectionStore: Send + Sync + Debug {
    fn read_selected_device_ids(&self) -> Result<Vec<DeviceId>>;
}

/// Selection stored as a JSON array in a file. A missing file is an empty
/// selection, not an error.
#[derive(Debug, Clone)]
pub struct FileSelectionStore {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
}

impl FileSelectionStore {
    pub fn new(fs: Arc<dyn FileSystem>, path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            path: path.into(),
        }
    }
}

impl SelectionStore for FileSelectionStore {
    fn read_selected_device_ids(&self) -> Result<Vec<DeviceId>> {
        if !self.fs.exists(&self.path) {
            return Ok(Vec::new());
        }
        let raw = self.fs.read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<DeviceId> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing device selection {:?}", self.path))?;
        Ok(ids)
    }
}

/// Fixed in-memory selection.
#[derive(Debug, Clone, Default)]
pub struct MemorySelection(pub Vec<DeviceId>);

impl SelectionStore for MemorySelection {
    fn read_selected_device_ids(&self) -> Result<Vec<DeviceId>> {
        Ok(self.0.clone())
    }
}
