// src/workflow/model.rs

use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{MemoryPreferences, ModuleDescriptor, ModuleKind, ParamOverrides, PreferenceStore};
use crate::config::model::WorkflowConfig;
use crate::errors::Result;
use crate::types::{DeviceId, DurationUnit, WorkflowId};

use super::RunnerError;

/// Repeat/duration bounds of a workflow.
///
/// The loop keeps going while *either* bound is still unmet: fewer than
/// `repeat_count` iterations done, or (when `duration_value > 0`) less than
/// the duration elapsed since the session started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatSettings {
    pub repeat_count: u32,
    pub duration_value: u64,
    pub duration_unit: DurationUnit,
}

impl Default for RepeatSettings {
    fn default() -> Self {
        Self {
            repeat_count: 1,
            duration_value: 0,
            duration_unit: DurationUnit::Minutes,
        }
    }
}

impl RepeatSettings {
    pub fn times(repeat_count: u32) -> Self {
        Self {
            repeat_count: repeat_count.max(1),
            ..Self::default()
        }
    }

    pub fn for_duration(duration_value: u64, duration_unit: DurationUnit) -> Self {
        Self {
            duration_value,
            duration_unit,
            ..Self::default()
        }
    }

    /// `None` when the duration bound is disabled.
    pub fn duration_bound(&self) -> Option<Duration> {
        (self.duration_value > 0).then(|| self.duration_unit.to_duration(self.duration_value))
    }

    /// Whether another iteration should start after `completed_iteration`
    /// (1-based) finished, `elapsed` after the session started.
    pub fn should_continue(&self, completed_iteration: u32, elapsed: Duration) -> bool {
        completed_iteration < self.repeat_count
            || self.duration_bound().is_some_and(|bound| elapsed < bound)
    }
}

/// A module plus its frozen parameter overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowStep {
    pub module: ModuleDescriptor,
    pub overrides: ParamOverrides,
}

impl WorkflowStep {
    pub fn new(kind: ModuleKind) -> Self {
        Self {
            module: ModuleDescriptor::for_kind(kind),
            overrides: ParamOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: ParamOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Pure wait steps encode their own delay.
    pub fn is_wait(&self) -> bool {
        self.module.is_wait()
    }
}

/// An ordered list of steps with repeat settings, ready to run.
///
/// `preferences` is the snapshot taken when the workflow was built; runs
/// never consult the live preference store, so repeated runs of the same
/// workflow submit the same parameters.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub id: WorkflowId,
    pub steps: Vec<WorkflowStep>,
    pub repeat: RepeatSettings,
    /// Default targets when a run does not request any.
    pub devices: Option<Vec<DeviceId>>,
    preferences: Arc<MemoryPreferences>,
}

impl Workflow {
    pub fn builder(id: impl Into<WorkflowId>) -> WorkflowBuilder {
        WorkflowBuilder::new(id)
    }

    pub fn preferences(&self) -> &MemoryPreferences {
        &self.preferences
    }

    /// Build a workflow from its `[workflow.<name>]` section.
    pub fn from_config(
        id: &str,
        cfg: &WorkflowConfig,
        preferences: &dyn PreferenceStore,
    ) -> Result<Self> {
        let mut builder = WorkflowBuilder::new(id).repeat(RepeatSettings {
            repeat_count: cfg.repeat_count,
            duration_value: cfg.duration_value,
            duration_unit: cfg.duration_unit,
        });
        for step in &cfg.steps {
            let module = ModuleDescriptor::lookup(&step.module)?;
            builder = builder.step(WorkflowStep {
                module,
                overrides: step.overrides.clone(),
            });
        }
        if let Some(devices) = &cfg.devices {
            builder = builder.devices(devices.clone());
        }
        Ok(builder.build(preferences)?)
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowBuilder {
    id: WorkflowId,
    steps: Vec<WorkflowStep>,
    repeat: RepeatSettings,
    devices: Option<Vec<DeviceId>>,
}

impl WorkflowBuilder {
    pub fn new(id: impl Into<WorkflowId>) -> Self {
        Self {
            id: id.into(),
            steps: Vec::new(),
            repeat: RepeatSettings::default(),
            devices: None,
        }
    }

    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn module(self, kind: ModuleKind) -> Self {
        self.step(WorkflowStep::new(kind))
    }

    pub fn module_with(self, kind: ModuleKind, overrides: ParamOverrides) -> Self {
        self.step(WorkflowStep::new(kind).with_overrides(overrides))
    }

    pub fn repeat(mut self, repeat: RepeatSettings) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn devices(mut self, devices: Vec<DeviceId>) -> Self {
        self.devices = Some(devices);
        self
    }

    /// Freeze `preferences` into the workflow.
    pub fn build(self, preferences: &dyn PreferenceStore) -> std::result::Result<Workflow, RunnerError> {
        if self.steps.is_empty() {
            return Err(RunnerError::EmptyWorkflow(self.id));
        }
        Ok(Workflow {
            id: self.id,
            steps: self.steps,
            repeat: self.repeat,
            devices: self.devices,
            preferences: Arc::new(MemoryPreferences::snapshot_of(preferences)),
        })
    }
}
