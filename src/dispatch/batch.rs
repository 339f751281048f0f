// src/dispatch/batch.rs

//! Batch planning: split targets into bounded batches and decide the
//! outbound request shape for each batch.

use std::collections::BTreeMap;

use crate::catalog::ModuleParams;
use crate::service::ExecuteRequest;
use crate::types::DeviceId;

/// Requests to submit for one batch of devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub index: usize,
    pub device_ids: Vec<DeviceId>,
    pub requests: Vec<ExecuteRequest>,
}

/// Group devices whose parameters are structurally identical.
///
/// Groups keep first-seen order, and devices keep their order within a
/// group, so the plan is deterministic for identical inputs.
pub fn group_identical(entries: Vec<(DeviceId, ModuleParams)>) -> Vec<(ModuleParams, Vec<DeviceId>)> {
    let mut groups: Vec<(ModuleParams, Vec<DeviceId>)> = Vec::new();
    for (device_id, params) in entries {
        match groups.iter_mut().find(|(p, _)| *p == params) {
            Some((_, devices)) => devices.push(device_id),
            None => groups.push((params, vec![device_id])),
        }
    }
    groups
}

/// Plan the requests for one batch.
///
/// - Uniform parameters: one shared-shape request for the whole batch.
/// - Mixed parameters with `combine_mixed = true`: one combined
///   per-device request for the whole batch.
/// - Mixed parameters with `combine_mixed = false`: one shared-shape
///   request per parameter group.
pub fn plan_batch(
    index: usize,
    module_id: &str,
    entries: Vec<(DeviceId, ModuleParams)>,
    combine_mixed: bool,
) -> BatchPlan {
    let device_ids: Vec<DeviceId> = entries.iter().map(|(id, _)| id.clone()).collect();

    let mut groups = group_identical(entries.clone());
    let requests = if groups.is_empty() {
        Vec::new()
    } else if groups.len() == 1 {
        let (params, devices) = groups.remove(0);
        vec![ExecuteRequest::shared(module_id, devices, params)]
    } else if combine_mixed {
        let by_device: BTreeMap<DeviceId, ModuleParams> = entries.into_iter().collect();
        vec![ExecuteRequest::per_device(module_id, by_device)]
    } else {
        groups
            .into_iter()
            .map(|(params, devices)| ExecuteRequest::shared(module_id, devices, params))
            .collect()
    };

    BatchPlan {
        index,
        device_ids,
        requests,
    }
}
