// tests/session_core.rs

use fleetrun::catalog::{ModuleKind, ParamOverrides};
use fleetrun::dispatch::{DeviceFailure, DispatchOutcome};
use fleetrun::workflow::{needs_inter_step_delay, RunSession, SessionState, WorkflowStep};

fn session(devices: &[&str]) -> RunSession {
    RunSession::new("wf", devices.iter().map(|d| d.to_string()).collect())
}

fn outcome(ok: &[&str], failed: &[(&str, &str)]) -> DispatchOutcome {
    DispatchOutcome {
        successes: ok.iter().map(|d| d.to_string()).collect(),
        failures: failed.iter().map(|(d, r)| DeviceFailure::error(*d, *r)).collect(),
    }
}

#[test]
fn new_session_is_idle_until_started() {
    let mut s = session(&["a"]);
    assert_eq!(s.state(), SessionState::Idle);
    s.start();
    assert_eq!(s.state(), SessionState::Running);
    assert_eq!(s.run_iteration(), 0);
}

#[test]
fn failure_is_sticky_within_an_iteration_and_reset_by_the_next() {
    let mut s = session(&["a", "b"]);
    s.start();
    assert_eq!(s.begin_iteration(), 1);

    s.begin_step(0);
    s.apply_step(0, "enable_wifi", &outcome(&["a"], &[("b", "timeout")]));
    s.begin_step(1);
    s.apply_step(1, "disable_wifi", &outcome(&["a", "b"], &[]));

    let first = s.iteration_outcome();
    assert_eq!(first.success_device_ids, vec!["a"]);
    assert_eq!(first.failed_devices[0].device_id, "b");
    assert_eq!(first.failed_devices[0].reason, "enable_wifi: timeout");

    assert_eq!(s.begin_iteration(), 2);
    assert!(s.completed_step_indices().is_empty());
    assert_eq!(s.active_step_index(), None);
    assert_eq!(s.iteration_outcome().success_device_ids, vec!["a", "b"]);
}

#[test]
fn reasons_from_several_steps_are_joined() {
    let mut s = session(&["a"]);
    s.start();
    s.begin_iteration();
    s.apply_step(0, "ping", &outcome(&[], &[("a", "unreachable")]));
    s.fail_step(1, "place_call", "no number");

    let outcome = s.iteration_outcome();
    assert_eq!(
        outcome.failed_devices[0].reason,
        "ping: unreachable; place_call: no number"
    );
    let snapshot = s.snapshot();
    assert_eq!(snapshot.completed_step_indices, vec![0, 1]);
}

#[test]
fn results_for_devices_outside_the_session_are_ignored() {
    let mut s = session(&["a"]);
    s.start();
    s.begin_iteration();
    s.apply_step(0, "reboot", &outcome(&[], &[("zz", "boom")]));

    let outcome = s.iteration_outcome();
    assert_eq!(outcome.device_count(), 1);
    assert!(outcome.failed_devices.is_empty());
}

#[test]
fn pause_and_resume_toggle_between_running_and_paused() {
    let mut s = session(&["a"]);
    s.start();
    s.set_paused(true);
    assert_eq!(s.state(), SessionState::Paused);
    assert!(s.snapshot().paused);
    s.set_paused(false);
    assert_eq!(s.state(), SessionState::Running);
}

#[test]
fn first_terminal_state_wins() {
    let mut s = session(&["a"]);
    s.start();
    s.begin_step(0);
    s.mark_cancelled();
    s.finish(SessionState::Cancelled);
    s.finish(SessionState::Completed);
    s.set_paused(true);

    let snapshot = s.snapshot();
    assert_eq!(snapshot.state, SessionState::Cancelled);
    assert!(snapshot.cancelled);
    assert!(!snapshot.paused);
    assert_eq!(snapshot.active_step_index, None);
}

#[test]
fn finish_ignores_non_terminal_states() {
    let mut s = session(&["a"]);
    s.start();
    s.finish(SessionState::Paused);
    assert_eq!(s.state(), SessionState::Running);
}

#[test]
fn fixed_delay_only_between_two_non_wait_steps() {
    let toggle = WorkflowStep::new(ModuleKind::EnableAirplaneMode);
    let ping = WorkflowStep::new(ModuleKind::Ping);
    let wait = WorkflowStep::new(ModuleKind::Wait).with_overrides(ParamOverrides::default().with_seconds(3));

    assert!(needs_inter_step_delay(&toggle, Some(&ping)));
    assert!(!needs_inter_step_delay(&toggle, Some(&wait)));
    assert!(!needs_inter_step_delay(&wait, Some(&ping)));
    assert!(!needs_inter_step_delay(&ping, None));
}
