// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::catalog::ParamOverrides;
use crate::targets::DeviceTarget;
use crate::types::{DeviceId, DurationUnit};

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [engine]
/// batch_size = 50
///
/// [service]
/// base_url = "http://127.0.0.1:8420"
///
/// [preferences]
/// "ping.host" = "10.0.0.1"
///
/// [[device]]
/// id = "pixel-7a"
///
/// [workflow.airplane]
/// steps = [
///   { module = "enable_airplane_mode" },
///   { module = "wait", seconds = 5 },
///   { module = "disable_airplane_mode" },
/// ]
/// repeat_count = 2
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub service: ServiceSection,

    #[serde(default)]
    pub storage: StorageSection,

    /// Global and per-device (`device.<id>.<key>`) preferences.
    #[serde(default)]
    pub preferences: BTreeMap<String, String>,

    /// Known devices from `[[device]]`.
    #[serde(default)]
    pub device: Vec<DeviceTarget>,

    /// Keys are the workflow ids.
    #[serde(default)]
    pub workflow: BTreeMap<String, WorkflowConfig>,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub engine: EngineSection,
    pub service: ServiceSection,
    pub storage: StorageSection,
    pub preferences: BTreeMap<String, String>,
    pub device: Vec<DeviceTarget>,
    pub workflow: BTreeMap<String, WorkflowConfig>,
}

impl ConfigFile {
    /// Only for use after validation.
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            engine: raw.engine,
            service: raw.service,
            storage: raw.storage,
            preferences: raw.preferences,
            device: raw.device,
            workflow: raw.workflow,
        }
    }
}

/// `[engine]` section: dispatch and runner tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EngineSection {
    /// Maximum devices per outbound batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Total execute attempts per request, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_in_flight_batches")]
    pub max_in_flight_batches: usize,

    /// Send mixed-parameter batches as one per-device request.
    #[serde(default = "default_true")]
    pub combine_mixed_batches: bool,

    #[serde(default = "default_inter_step_delay_ms")]
    pub inter_step_delay_ms: u64,

    #[serde(default = "default_inter_iteration_delay_ms")]
    pub inter_iteration_delay_ms: u64,

    #[serde(default = "default_pause_poll_ms")]
    pub pause_poll_ms: u64,

    #[serde(default = "default_progress_tick_ms")]
    pub progress_tick_ms: u64,

    #[serde(default = "default_progress_increment")]
    pub progress_increment: u8,
}

fn default_batch_size() -> usize {
    50
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    600
}

fn default_max_in_flight_batches() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_inter_step_delay_ms() -> u64 {
    2000
}

fn default_inter_iteration_delay_ms() -> u64 {
    1200
}

fn default_pause_poll_ms() -> u64 {
    250
}

fn default_progress_tick_ms() -> u64 {
    1000
}

fn default_progress_increment() -> u8 {
    5
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_in_flight_batches: default_max_in_flight_batches(),
            combine_mixed_batches: true,
            inter_step_delay_ms: default_inter_step_delay_ms(),
            inter_iteration_delay_ms: default_inter_iteration_delay_ms(),
            pause_poll_ms: default_pause_poll_ms(),
            progress_tick_ms: default_progress_tick_ms(),
            progress_increment: default_progress_increment(),
        }
    }
}

/// `[service]` section: where the device command service lives.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServiceSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8420".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// `[storage]` section. Relative paths resolve against the config file's
/// directory.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StorageSection {
    #[serde(default = "default_selection_path")]
    pub selection_path: PathBuf,

    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,
}

fn default_selection_path() -> PathBuf {
    PathBuf::from(".fleetrun/selection.json")
}

fn default_history_path() -> PathBuf {
    PathBuf::from(".fleetrun/history.jsonl")
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            selection_path: default_selection_path(),
            history_path: default_history_path(),
        }
    }
}

/// `[workflow.<name>]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub steps: Vec<StepConfig>,

    #[serde(default = "default_repeat_count")]
    pub repeat_count: u32,

    /// `0` disables the duration bound.
    #[serde(default)]
    pub duration_value: u64,

    #[serde(default)]
    pub duration_unit: DurationUnit,

    /// Default targets; the persisted selection is used when absent.
    #[serde(default)]
    pub devices: Option<Vec<DeviceId>>,
}

fn default_repeat_count() -> u32 {
    1
}

/// One step: a module id plus inline parameter overrides.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StepConfig {
    pub module: String,

    #[serde(flatten)]
    pub overrides: ParamOverrides,
}
