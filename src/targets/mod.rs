// src/targets/mod.rs

//! Device targeting.
//!
//! - [`inventory`] exposes current device eligibility (discovery itself is
//!   external; the engine only reads a refreshed list before each run).
//! - [`selection`] reads the persisted device selection.
//! - [`resolver`] intersects a requested or persisted selection with the
//!   eligible set.

pub mod inventory;
pub mod resolver;
pub mod selection;

pub use inventory::{DeviceInventory, DeviceTarget, StaticInventory};
pub use resolver::{Resolution, TargetResolver};
pub use selection::{FileSelectionStore, MemorySelection, SelectionStore};
