// src/catalog/preferences.rs

//! Stored preference port.
//!
//! All preference reads go through [`PreferenceStore`]; nothing else in the
//! engine touches persisted settings. Keys are flat strings: global keys
//! look like `ping.host`, per-device keys like `device.<id>.ping.host`.

use std::collections::BTreeMap;
use std::fmt::Debug;

pub trait PreferenceStore: Send + Sync + Debug {
    fn get(&self, key: &str) -> Option<String>;

    /// Every stored entry; used to freeze a snapshot when a workflow is built.
    fn entries(&self) -> BTreeMap<String, String>;
}

/// Key used for a per-device preference.
pub fn device_key(device_id: &str, key: &str) -> String {
    format!("device.{device_id}.{key}")
}

/// Plain in-memory preference map (also the frozen snapshot type).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryPreferences {
    values: BTreeMap<String, String>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Freeze the current contents of any store.
    pub fn snapshot_of(store: &dyn PreferenceStore) -> Self {
        Self {
            values: store.entries(),
        }
    }
}

impl From<BTreeMap<String, String>> for MemoryPreferences {
    fn from(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn entries(&self) -> BTreeMap<String, String> {
        self.values.clone()
    }
}
