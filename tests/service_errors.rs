// tests/service_errors.rs

use std::collections::BTreeMap;
use std::error::Error;

use fleetrun::catalog::ModuleParams;
use fleetrun::service::http::error_from_response;
use fleetrun::service::{
    ExecuteRequest, ExecuteResponse, ParameterPayload, RemoteRunState, RunStatus, ServiceError,
    UNSUPPORTED_SHAPE_CODE,
};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn transient_statuses_are_retryable_and_client_errors_are_not() {
    for status in [408, 429, 500, 502, 503, 504] {
        assert!(ServiceError::status(status, "x").is_transient(), "{status}");
    }
    for status in [400, 401, 404, 409, 422] {
        assert!(!ServiceError::status(status, "x").is_transient(), "{status}");
    }
    assert!(ServiceError::Transport("connection reset".into()).is_transient());
    assert!(!ServiceError::Decode("bad json".into()).is_transient());
}

#[test]
fn error_body_code_is_kept() {
    let body = format!(r#"{{"code":"{UNSUPPORTED_SHAPE_CODE}","message":"one parameter set only"}}"#);
    let err = error_from_response(422, &body);

    assert!(err.is_unsupported_shape());
    assert!(!err.is_transient());
    assert_eq!(
        err,
        ServiceError::Status {
            status: 422,
            code: Some(UNSUPPORTED_SHAPE_CODE.to_string()),
            message: "one parameter set only".to_string(),
        }
    );
}

#[test]
fn plain_text_error_body_becomes_the_message() {
    let err = error_from_response(503, "  upstream unavailable\n");
    assert!(err.is_transient());
    assert!(!err.is_unsupported_shape());
    assert!(err.to_string().contains("upstream unavailable"));
}

#[test]
fn a_400_without_the_shape_code_is_not_a_shape_refusal() {
    let err = error_from_response(400, r#"{"error":"bad parameters"}"#);
    assert!(!err.is_unsupported_shape());
    assert!(err.to_string().contains("bad parameters"));
}

#[test]
fn combined_request_splits_into_single_device_requests() {
    let mut by_device = BTreeMap::new();
    by_device.insert("a".to_string(), ModuleParams::Wait { seconds: 1 });
    by_device.insert("b".to_string(), ModuleParams::Wait { seconds: 2 });
    let request = ExecuteRequest::per_device("wait", by_device);

    assert!(request.is_combined());
    let singles = request.split_per_device();
    assert_eq!(singles.len(), 2);
    assert_eq!(singles[1].device_ids, vec!["b"]);
    assert_eq!(
        singles[1].payload,
        ParameterPayload::Shared(ModuleParams::Wait { seconds: 2 })
    );
    assert!(singles.iter().all(|s| !s.is_combined()));
}

#[test]
fn responses_decode_in_either_field_spelling() -> TestResult {
    let camel: ExecuteResponse = serde_json::from_str(
        r#"{"statusId":"st-9","deviceResults":[{"deviceId":"a","success":true,"result":"ok"}]}"#,
    )?;
    let snake: ExecuteResponse = serde_json::from_str(
        r#"{"status_id":"st-9","device_results":[{"device_id":"a","success":true,"result":"ok"}]}"#,
    )?;
    assert_eq!(camel, snake);
    assert_eq!(camel.status_id.as_deref(), Some("st-9"));

    let bare: ExecuteResponse = serde_json::from_str("{}")?;
    assert!(bare.device_results.is_empty());
    Ok(())
}

#[test]
fn status_answer_decodes() -> TestResult {
    let status: RunStatus = serde_json::from_str(
        r#"{"statusId":"st-1","moduleId":"reboot","state":"running","deviceIds":["a","b"],"pendingDeviceIds":["b"]}"#,
    )?;
    assert_eq!(status.state, RemoteRunState::Running);
    assert_eq!(status.pending_device_ids, vec!["b"]);
    assert_eq!(status.success_count, None);
    Ok(())
}
