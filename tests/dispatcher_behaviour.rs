// tests/dispatcher_behaviour.rs

mod common;
use crate::common::{init_tracing, FakeCommandService, JobParts};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use fleetrun::catalog::{MemoryPreferences, ModuleKind, ModuleParams};
use fleetrun::dispatch::{
    DispatchError, DispatchEvent, DispatcherConfig, FailureReason, ModuleDispatcher,
    RunStatusHandle, NO_BREAKDOWN_REASON,
};
use fleetrun::service::{ParameterPayload, ServiceError};
use fleetrun_test_utils::builders::fast_dispatcher_config;
use fleetrun_test_utils::with_timeout;

type TestResult = Result<(), Box<dyn Error>>;

fn dispatcher(service: &FakeCommandService, config: DispatcherConfig) -> ModuleDispatcher {
    ModuleDispatcher::new(Arc::new(service.clone()), config)
}

fn mixed_ping_prefs() -> MemoryPreferences {
    MemoryPreferences::new().with("device.b.ping.host", "10.0.0.2")
}

#[tokio::test]
async fn identical_parameters_share_one_request() -> TestResult {
    init_tracing();
    let service = FakeCommandService::new();
    let parts = JobParts::new(ModuleKind::Ping, &["a", "b", "c"]);

    let outcome = dispatcher(&service, fast_dispatcher_config())
        .dispatch(parts.job(), &CancellationToken::new())
        .await?;

    assert_eq!(outcome.successes, vec!["a", "b", "c"]);
    assert!(outcome.failures.is_empty());

    let calls = service.calls();
    assert_eq!(calls.len(), 1, "uniform parameters must be grouped");
    assert_eq!(calls[0].device_ids, vec!["a", "b", "c"]);
    assert!(matches!(
        &calls[0].payload,
        ParameterPayload::Shared(ModuleParams::Ping { host, count: 4 }) if host == "8.8.8.8"
    ));
    Ok(())
}

#[tokio::test]
async fn mixed_parameters_go_out_as_one_combined_request() -> TestResult {
    init_tracing();
    let service = FakeCommandService::new();
    let parts = JobParts::new(ModuleKind::Ping, &["a", "b", "c"]).with_preferences(mixed_ping_prefs());

    let outcome = dispatcher(&service, fast_dispatcher_config())
        .dispatch(parts.job(), &CancellationToken::new())
        .await?;

    assert_eq!(outcome.successes.len(), 3);
    let calls = service.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].is_combined());
    Ok(())
}

#[tokio::test]
async fn mixed_parameters_without_combining_send_one_request_per_group() -> TestResult {
    init_tracing();
    let service = FakeCommandService::new();
    let parts = JobParts::new(ModuleKind::Ping, &["a", "b", "c"]).with_preferences(mixed_ping_prefs());
    let config = DispatcherConfig {
        combine_mixed_batches: false,
        ..fast_dispatcher_config()
    };

    let outcome = dispatcher(&service, config)
        .dispatch(parts.job(), &CancellationToken::new())
        .await?;

    assert_eq!(outcome.successes, vec!["a", "b", "c"]);
    let mut groups: Vec<Vec<String>> = service.calls().into_iter().map(|c| c.device_ids).collect();
    groups.sort();
    assert_eq!(groups, vec![vec!["a".to_string(), "c".to_string()], vec!["b".to_string()]]);
    Ok(())
}

#[tokio::test]
async fn devices_are_split_into_bounded_batches() -> TestResult {
    init_tracing();
    let service = FakeCommandService::new();
    let parts = JobParts::new(ModuleKind::Reboot, &["a", "b", "c", "d", "e"]);
    let config = DispatcherConfig {
        batch_size: 2,
        ..fast_dispatcher_config()
    };

    let outcome = dispatcher(&service, config)
        .dispatch(parts.job(), &CancellationToken::new())
        .await?;

    assert_eq!(outcome.successes.len(), 5);
    let sizes: Vec<usize> = service.calls().iter().map(|c| c.device_ids.len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    Ok(())
}

#[tokio::test]
async fn duplicate_device_ids_are_dispatched_once() -> TestResult {
    init_tracing();
    let service = FakeCommandService::new();
    let parts = JobParts::new(ModuleKind::EnableWifi, &["a", "a", "b"]);

    let outcome = dispatcher(&service, fast_dispatcher_config())
        .dispatch(parts.job(), &CancellationToken::new())
        .await?;

    assert_eq!(outcome.total(), 2);
    assert_eq!(service.calls()[0].device_ids, vec!["a", "b"]);
    Ok(())
}

#[tokio::test]
async fn partial_failure_reports_both_sets() -> TestResult {
    init_tracing();
    let service = FakeCommandService::new().fail_device("b", "radio off");
    let parts = JobParts::new(ModuleKind::EnableAirplaneMode, &["a", "b", "c"]);

    let outcome = dispatcher(&service, fast_dispatcher_config())
        .dispatch(parts.job(), &CancellationToken::new())
        .await?;

    assert_eq!(outcome.successes, vec!["a", "c"]);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(
        outcome.failure_for("b").map(|f| f.reason.clone()),
        Some(FailureReason::Error("radio off".to_string()))
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn always_unavailable_service_is_tried_exactly_max_attempts_times() -> TestResult {
    init_tracing();
    let service = FakeCommandService::new().always_fail(ServiceError::status(503, "unavailable"));
    let parts = JobParts::new(ModuleKind::Ping, &["a", "b"]);

    let outcome = dispatcher(&service, fast_dispatcher_config())
        .dispatch(parts.job(), &CancellationToken::new())
        .await?;

    assert_eq!(service.call_count(), 3);
    assert!(outcome.successes.is_empty());
    assert_eq!(outcome.failures.len(), 2);
    assert!(outcome.failures.iter().all(|f| f.reason.to_string().contains("503")));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn transient_failure_then_success_is_retried() -> TestResult {
    init_tracing();
    let service = FakeCommandService::new().fail_next(ServiceError::status(429, "slow down"));
    let parts = JobParts::new(ModuleKind::Ping, &["a"]);

    let outcome = dispatcher(&service, fast_dispatcher_config())
        .dispatch(parts.job(), &CancellationToken::new())
        .await?;

    assert_eq!(service.call_count(), 2);
    assert_eq!(outcome.successes, vec!["a"]);
    Ok(())
}

#[tokio::test]
async fn validation_error_is_not_retried() -> TestResult {
    init_tracing();
    let service = FakeCommandService::new().always_fail(ServiceError::status(400, "bad request"));
    let parts = JobParts::new(ModuleKind::Ping, &["a", "b"]);

    let outcome = dispatcher(&service, fast_dispatcher_config())
        .dispatch(parts.job(), &CancellationToken::new())
        .await?;

    assert_eq!(service.call_count(), 1);
    assert_eq!(outcome.failures.len(), 2);
    Ok(())
}

#[tokio::test]
async fn refused_combined_shape_falls_back_to_single_device_requests() -> TestResult {
    init_tracing();
    let service = FakeCommandService::new().reject_combined_shape();
    let parts = JobParts::new(ModuleKind::Ping, &["a", "b", "c"]).with_preferences(mixed_ping_prefs());

    let outcome = dispatcher(&service, fast_dispatcher_config())
        .dispatch(parts.job(), &CancellationToken::new())
        .await?;

    assert_eq!(outcome.successes, vec!["a", "b", "c"]);
    let calls = service.calls();
    assert_eq!(calls.len(), 4, "one refused combined call, then one per device");
    assert!(calls[0].is_combined());
    assert!(calls[1..].iter().all(|c| c.device_ids.len() == 1 && !c.is_combined()));
    Ok(())
}

#[tokio::test]
async fn missing_per_device_breakdown_fails_every_device_in_the_batch() -> TestResult {
    init_tracing();
    let service = FakeCommandService::new().without_device_results();
    let d = dispatcher(&service, fast_dispatcher_config());
    let parts = JobParts::new(ModuleKind::Reboot, &["a", "b"]);

    let outcome = d.dispatch(parts.job(), &CancellationToken::new()).await?;

    assert!(outcome.successes.is_empty());
    assert_eq!(outcome.failures.len(), 2);
    assert!(outcome
        .failures
        .iter()
        .all(|f| f.reason == FailureReason::Error(NO_BREAKDOWN_REASON.to_string())));

    // The dispatch is over, so its acknowledged run is no longer tracked.
    assert!(d.registry().get("st-1").is_none());
    Ok(())
}

#[tokio::test]
async fn settled_dispatches_leave_no_status_handles_behind() -> TestResult {
    init_tracing();
    let service = FakeCommandService::new().without_device_results();
    let d = dispatcher(&service, fast_dispatcher_config());

    for _ in 0..20 {
        let parts = JobParts::new(ModuleKind::Ping, &["a", "b"]);
        let outcome = d.dispatch(parts.job(), &CancellationToken::new()).await?;
        assert_eq!(outcome.failures.len(), 2);
    }

    assert_eq!(service.call_count(), 20);
    assert!(d.registry().active_for("ping").is_empty());
    assert!(d.registry().is_empty());
    Ok(())
}

#[tokio::test]
async fn unbuildable_parameters_are_a_dispatch_error() -> TestResult {
    init_tracing();
    let service = FakeCommandService::new();
    let parts = JobParts::new(ModuleKind::PlaceCall, &["a"]);

    let result = dispatcher(&service, fast_dispatcher_config())
        .dispatch(parts.job(), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(DispatchError::Params(_))));
    assert_eq!(service.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn cancelled_before_submission_sends_nothing() -> TestResult {
    init_tracing();
    let service = FakeCommandService::new();
    let parts = JobParts::new(ModuleKind::Ping, &["a", "b"]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = dispatcher(&service, fast_dispatcher_config())
        .dispatch(parts.job(), &cancel)
        .await?;

    assert_eq!(service.call_count(), 0);
    assert_eq!(outcome.cancelled_devices().count(), 2);
    assert!(outcome.failures.iter().all(|f| f.reason.to_string() == "cancelled"));
    Ok(())
}

#[tokio::test]
async fn cancel_between_batches_skips_the_rest_but_awaits_in_flight() -> TestResult {
    init_tracing();
    let service = FakeCommandService::new().gated();
    let config = DispatcherConfig {
        batch_size: 1,
        ..fast_dispatcher_config()
    };
    let d = dispatcher(&service, config);
    let cancel = CancellationToken::new();

    let task = {
        let d = d.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let parts = JobParts::new(ModuleKind::Ping, &["a", "b", "c"]);
            d.dispatch(parts.job(), &cancel).await
        })
    };

    with_timeout(async {
        service.release(1);
        service.wait_for_calls(2).await;
        cancel.cancel();
        service.release(1);
    })
    .await;

    let outcome = with_timeout(task).await??;
    assert_eq!(service.call_count(), 2);
    assert_eq!(outcome.successes, vec!["a", "b"]);
    assert_eq!(outcome.cancelled_devices().cloned().collect::<Vec<_>>(), vec!["c"]);
    Ok(())
}

#[tokio::test]
async fn cancel_is_forwarded_to_acknowledged_runs() -> TestResult {
    init_tracing();
    let service = FakeCommandService::new().without_device_results().gated();
    let config = DispatcherConfig {
        batch_size: 1,
        ..fast_dispatcher_config()
    };
    let d = dispatcher(&service, config);
    let cancel = CancellationToken::new();

    let task = {
        let d = d.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let parts = JobParts::new(ModuleKind::Reboot, &["a", "b"]);
            d.dispatch(parts.job(), &cancel).await
        })
    };

    with_timeout(async {
        // First batch acknowledged (status st-1, nothing settled yet).
        service.release(1);
        service.wait_for_calls(2).await;
        cancel.cancel();
        while service.cancels().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        service.release(1);
    })
    .await;

    let outcome = with_timeout(task).await??;
    // st-2 was acknowledged after the cancel and is cancelled as it arrives.
    assert_eq!(
        service.cancels(),
        vec![
            ("reboot".to_string(), "st-1".to_string()),
            ("reboot".to_string(), "st-2".to_string()),
        ]
    );
    assert_eq!(outcome.total(), 2);
    assert!(d.registry().is_empty());
    Ok(())
}

#[tokio::test]
async fn cancel_leaves_runs_of_other_dispatches_alone() -> TestResult {
    init_tracing();
    let service = FakeCommandService::new().without_device_results().gated();
    let config = DispatcherConfig {
        batch_size: 1,
        ..fast_dispatcher_config()
    };
    let d = dispatcher(&service, config);
    // Another workflow's reboot still running on the service.
    d.registry()
        .observe(RunStatusHandle::new("st-other", "reboot", ["x".to_string()]));
    let cancel = CancellationToken::new();

    let task = {
        let d = d.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let parts = JobParts::new(ModuleKind::Reboot, &["y", "z"]);
            d.dispatch(parts.job(), &cancel).await
        })
    };

    with_timeout(async {
        service.release(1);
        service.wait_for_calls(2).await;
        cancel.cancel();
        while service.cancels().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        service.release(1);
    })
    .await;

    let outcome = with_timeout(task).await??;
    assert_eq!(outcome.total(), 2);
    let cancelled: Vec<String> = service.cancels().into_iter().map(|(_, id)| id).collect();
    assert_eq!(cancelled, vec!["st-1", "st-2"]);
    assert!(d.registry().get("st-other").is_some_and(|h| h.is_running()));
    assert_eq!(d.registry().len(), 1);
    Ok(())
}

#[tokio::test]
async fn observers_see_batches_and_every_settled_device() -> TestResult {
    init_tracing();
    let service = FakeCommandService::new().fail_device("b", "offline");
    let d = dispatcher(&service, fast_dispatcher_config());
    let mut events = d.subscribe();
    let parts = JobParts::new(ModuleKind::DisableWifi, &["a", "b"]);

    d.dispatch(parts.job(), &CancellationToken::new()).await?;

    let mut batches = 0;
    let mut settled = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            DispatchEvent::BatchSubmitted { .. } => batches += 1,
            DispatchEvent::DeviceSettled { device_id, success, .. } => settled.push((device_id, success)),
            _ => {}
        }
    }
    assert_eq!(batches, 1);
    settled.sort();
    assert_eq!(settled, vec![("a".to_string(), true), ("b".to_string(), false)]);
    Ok(())
}
