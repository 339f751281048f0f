// tests/history_recorder.rs

use std::error::Error;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use fleetrun::fs::{MockFileSystem, RealFileSystem};
use fleetrun::history::{FailedDevice, HistoryRecorder, IterationOutcome, JsonlHistoryRecorder, MemoryHistory};

type TestResult = Result<(), Box<dyn Error>>;

fn outcome() -> IterationOutcome {
    IterationOutcome {
        success_device_ids: vec!["A".to_string()],
        failed_devices: vec![FailedDevice {
            device_id: "B".to_string(),
            reason: "enable_airplane_mode: radio stuck".to_string(),
        }],
    }
}

#[test]
fn jsonl_recorder_appends_one_line_per_iteration() -> TestResult {
    let fs = MockFileSystem::new();
    let recorder = JsonlHistoryRecorder::new(Arc::new(fs.clone()), "history.jsonl");
    let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let t2 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 5, 0).unwrap();

    recorder.record("airplane", t1, &outcome())?;
    recorder.record("airplane", t2, &IterationOutcome::default())?;

    let raw = fs.contents("history.jsonl").unwrap_or_default();
    assert_eq!(raw.lines().count(), 2);
    assert!(raw.lines().next().unwrap_or_default().contains("\"workflow_id\":\"airplane\""));

    let records = recorder.load()?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].timestamp, t1);
    assert_eq!(records[0].outcome, outcome());
    assert_eq!(records[1].outcome.device_count(), 0);
    Ok(())
}

#[test]
fn missing_history_file_loads_as_empty() -> TestResult {
    let recorder = JsonlHistoryRecorder::new(Arc::new(MockFileSystem::new()), "nope.jsonl");
    assert!(recorder.load()?.is_empty());
    Ok(())
}

#[test]
fn jsonl_recorder_creates_parent_directories_on_disk() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join(".fleetrun").join("history.jsonl");
    let recorder = JsonlHistoryRecorder::new(Arc::new(RealFileSystem), &path);

    recorder.record("wf", Utc::now(), &outcome())?;
    recorder.record("wf", Utc::now(), &outcome())?;

    assert!(path.exists());
    assert_eq!(recorder.load()?.len(), 2);
    Ok(())
}

#[test]
fn memory_history_tracks_run_count_and_last_run() -> TestResult {
    let history = MemoryHistory::new();
    let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
    let t2 = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();

    history.record("a", t1, &outcome())?;
    history.record("a", t2, &outcome())?;
    history.record("b", t1, &outcome())?;

    assert_eq!(history.run_count("a"), 2);
    assert_eq!(history.run_count("b"), 1);
    assert_eq!(history.run_count("c"), 0);
    assert_eq!(history.last_run("a"), Some(t2));
    assert_eq!(history.records_for("a").len(), 2);
    assert_eq!(history.records().len(), 3);
    Ok(())
}
