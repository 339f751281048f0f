// tests/dispatch_properties.rs

mod common;
use crate::common::{FakeCommandService, JobParts};

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use fleetrun::catalog::{MemoryPreferences, ModuleKind};
use fleetrun::dispatch::{DispatcherConfig, ModuleDispatcher};
use fleetrun_test_utils::builders::fast_dispatcher_config;

#[derive(Debug, Clone)]
struct Scenario {
    devices: Vec<String>,
    failing: Vec<usize>,
    custom_host: Vec<usize>,
    batch_size: usize,
    in_flight: usize,
    combine: bool,
}

// Device ids are drawn from a small pool so duplicates show up.
fn scenario_strategy() -> impl Strategy<Value = Scenario> {
    (
        proptest::collection::vec(0..12usize, 0..20),
        proptest::collection::vec(0..12usize, 0..4),
        proptest::collection::vec(0..12usize, 0..4),
        1..6usize,
        1..3usize,
        any::<bool>(),
    )
        .prop_map(|(devices, failing, custom_host, batch_size, in_flight, combine)| Scenario {
            devices: devices.into_iter().map(|i| format!("dev-{i}")).collect(),
            failing,
            custom_host,
            batch_size,
            in_flight,
            combine,
        })
}

fn run(scenario: &Scenario) -> fleetrun::dispatch::DispatchOutcome {
    let mut service = FakeCommandService::new();
    for i in &scenario.failing {
        service = service.fail_device(&format!("dev-{i}"), "unreachable");
    }
    let mut preferences = MemoryPreferences::new();
    for i in &scenario.custom_host {
        preferences.set(format!("device.dev-{i}.ping.host"), format!("10.0.0.{i}"));
    }

    let config = DispatcherConfig {
        batch_size: scenario.batch_size,
        max_in_flight_batches: scenario.in_flight,
        combine_mixed_batches: scenario.combine,
        ..fast_dispatcher_config()
    };
    let dispatcher = ModuleDispatcher::new(Arc::new(service), config);
    let device_refs: Vec<&str> = scenario.devices.iter().map(String::as_str).collect();
    let parts = JobParts::new(ModuleKind::Ping, &device_refs).with_preferences(preferences);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("runtime");
    rt.block_on(async { dispatcher.dispatch(parts.job(), &CancellationToken::new()).await })
        .expect("ping parameters always build")
}

proptest! {
    #[test]
    fn every_requested_device_is_accounted_for_exactly_once(scenario in scenario_strategy()) {
        let outcome = run(&scenario);

        let mut seen = HashSet::new();
        for id in outcome.successes.iter().chain(outcome.failures.iter().map(|f| &f.device_id)) {
            prop_assert!(seen.insert(id.clone()), "device {} reported twice", id);
        }
        let requested: HashSet<String> = scenario.devices.iter().cloned().collect();
        prop_assert_eq!(seen, requested);

        for failure in &outcome.failures {
            let index: usize = failure.device_id.trim_start_matches("dev-").parse().unwrap();
            prop_assert!(scenario.failing.contains(&index));
        }
    }

    #[test]
    fn identical_inputs_give_identical_outcomes(scenario in scenario_strategy()) {
        prop_assert_eq!(run(&scenario), run(&scenario));
    }
}
