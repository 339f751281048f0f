// src/lib.rs

pub mod catalog;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod fs;
pub mod history;
pub mod logging;
pub mod progress;
pub mod service;
pub mod targets;
pub mod types;
pub mod workflow;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{MemoryPreferences, ModuleDescriptor, ParamOverrides, ParameterBuilder};
use crate::cli::{CliArgs, Command};
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dispatch::{DispatcherConfig, ModuleDispatcher};
use crate::errors::FleetrunError;
use crate::fs::{FileSystem, RealFileSystem};
use crate::history::{FailedDevice, IterationOutcome, JsonlHistoryRecorder};
use crate::service::{DeviceCommandService, HttpCommandService};
use crate::targets::{FileSelectionStore, StaticInventory, TargetResolver};
use crate::types::ConflictPolicy;
use crate::workflow::{summarize, RunnerConfig, RunnerEvent, Workflow, WorkflowRunner};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - device command service client
/// - target resolver / dispatcher / workflow runner
/// - run history
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    let preferences = MemoryPreferences::from(cfg.preferences.clone());

    if args.dry_run {
        print_dry_run(&cfg, &preferences);
        return Ok(());
    }

    let root_dir = config_root_dir(&config_path);
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let service: Arc<dyn DeviceCommandService> = Arc::new(HttpCommandService::new(&cfg.service)?);

    let Some(command) = args.command else {
        print_workflows(&cfg);
        return Ok(());
    };

    let runner = build_runner(&cfg, &root_dir, fs, Arc::clone(&service));
    let _printer = spawn_event_printer(runner.subscribe());

    match command {
        Command::Status { module, status_id } => {
            let status = service.status(module, status_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Run {
            workflow,
            devices,
            supersede,
        } => {
            let workflow_cfg = cfg
                .workflow
                .get(&workflow)
                .ok_or_else(|| FleetrunError::WorkflowNotFound(workflow.clone()))?;
            let workflow = Arc::new(Workflow::from_config(&workflow, workflow_cfg, &preferences)?);
            let policy = if supersede {
                ConflictPolicy::Supersede
            } else {
                ConflictPolicy::Reject
            };

            let control = runner.start(workflow, Some(devices), policy).await?;

            // Ctrl-C → graceful cancel.
            {
                let control = control.clone();
                tokio::spawn(async move {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        eprintln!("failed to listen for Ctrl+C: {e}");
                        return;
                    }
                    info!("Ctrl+C received; cancelling run");
                    control.cancel();
                });
            }

            let report = control.wait().await?;
            println!("{}", report.summary());
        }
        Command::Module { module, devices } => {
            let descriptor = ModuleDescriptor::lookup(&module)?;
            let cancel = CancellationToken::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        eprintln!("failed to listen for Ctrl+C: {e}");
                        return;
                    }
                    info!("Ctrl+C received; cancelling module run");
                    cancel.cancel();
                });
            }

            let requested = (!devices.is_empty()).then_some(devices.as_slice());
            let outcome = runner
                .run_module(&descriptor, &ParamOverrides::default(), &preferences, requested, &cancel)
                .await?;
            let outcome = IterationOutcome {
                success_device_ids: outcome.successes,
                failed_devices: outcome
                    .failures
                    .into_iter()
                    .map(|f| FailedDevice {
                        device_id: f.device_id,
                        reason: f.reason.to_string(),
                    })
                    .collect(),
            };
            println!("{}: {}", descriptor.name, summarize(&outcome));
        }
    }

    Ok(())
}

/// Assemble the production runner from a validated config.
pub fn build_runner(
    cfg: &ConfigFile,
    root_dir: &Path,
    fs: Arc<dyn FileSystem>,
    service: Arc<dyn DeviceCommandService>,
) -> WorkflowRunner {
    let inventory = Arc::new(StaticInventory::new(cfg.device.clone()));
    let selection = Arc::new(FileSelectionStore::new(
        Arc::clone(&fs),
        root_dir.join(&cfg.storage.selection_path),
    ));
    let history = Arc::new(JsonlHistoryRecorder::new(
        fs,
        root_dir.join(&cfg.storage.history_path),
    ));

    let dispatcher = ModuleDispatcher::new(service, DispatcherConfig::from(&cfg.engine));
    WorkflowRunner::new(
        dispatcher,
        TargetResolver::new(inventory, selection),
        history,
        RunnerConfig::from(&cfg.engine),
    )
}

/// Print step and iteration results as they happen.
fn spawn_event_printer(mut events: broadcast::Receiver<RunnerEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RunnerEvent::StepFinished {
                    iteration,
                    step,
                    module_id,
                    succeeded,
                    failed,
                    ..
                }) => {
                    println!(
                        "[iteration {iteration}] step {} {module_id}: {} ok, {} failed",
                        step + 1,
                        succeeded.len(),
                        failed.len()
                    );
                }
                Ok(RunnerEvent::IterationRecorded { iteration, outcome, .. }) => {
                    println!("[iteration {iteration}] {}", summarize(&outcome));
                }
                Ok(other) => debug!(?other, "runner event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event printer lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Figure out the directory relative storage paths resolve against.
///
/// - If the config path has a non-empty parent (e.g. "lab/Fleetrun.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Fleetrun.toml" (parent = ""),
///   we fall back to the current working directory "."
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn print_workflows(cfg: &ConfigFile) {
    println!("workflows ({}):", cfg.workflow.len());
    for (name, workflow) in cfg.workflow.iter() {
        let modules: Vec<&str> = workflow.steps.iter().map(|s| s.module.as_str()).collect();
        println!("  - {name}: {}", modules.join(" -> "));
    }
}

/// Dry-run output: engine settings, devices, and every workflow step with
/// the parameters it would submit to each configured device.
fn print_dry_run(cfg: &ConfigFile, preferences: &MemoryPreferences) {
    println!("fleetrun dry-run");
    println!("  service.base_url = {}", cfg.service.base_url);
    println!("  engine.batch_size = {}", cfg.engine.batch_size);
    println!("  engine.max_attempts = {}", cfg.engine.max_attempts);
    println!();

    println!("devices ({}):", cfg.device.len());
    for device in &cfg.device {
        let state = if device.eligible { "eligible" } else { "unavailable" };
        println!("  - {} ({state})", device.id);
    }
    println!();

    println!("workflows ({}):", cfg.workflow.len());
    let builder = ParameterBuilder::new(preferences);
    for (name, workflow) in cfg.workflow.iter() {
        println!(
            "  - {name} (repeat_count = {}, duration = {} {:?})",
            workflow.repeat_count, workflow.duration_value, workflow.duration_unit
        );
        for (index, step) in workflow.steps.iter().enumerate() {
            println!("      {}. {}", index + 1, step.module);
            let Ok(descriptor) = ModuleDescriptor::lookup(&step.module) else {
                continue;
            };
            for device in &cfg.device {
                match builder.build(&descriptor, &step.overrides, Some(&device.id)) {
                    Ok(params) => match serde_json::to_string(&params) {
                        Ok(json) => println!("           {}: {json}", device.id),
                        Err(err) => println!("           {}: <unprintable: {err}>", device.id),
                    },
                    Err(err) => println!("           {}: error: {err}", device.id),
                }
            }
        }
    }

    debug!("dry-run complete (no execution)");
}
