// src/service/mod.rs

//! Device Command Service port.
//!
//! The engine talks to a [`DeviceCommandService`] instead of a concrete
//! HTTP client, so tests can swap in a fake service while production uses
//! [`HttpCommandService`].
//!
//! - [`http`] is the `reqwest`-backed production client.
//! - [`push`] decodes out-of-band status messages from the push channel.

pub mod http;
pub mod push;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::ModuleParams;
use crate::types::DeviceId;

pub use http::HttpCommandService;
pub use push::{DeviceNotification, ModuleStatusMessage, PushForwarder, PushMessage};

/// Explicit error code the service uses to refuse a combined
/// per-device-parameter request. Only this code triggers the per-device
/// fallback in the dispatcher.
pub const UNSUPPORTED_SHAPE_CODE: &str = "unsupported_parameter_shape";

/// HTTP statuses treated as transient and retried.
pub const TRANSIENT_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How parameters travel with an execute request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterPayload {
    /// One parameter object shared by every listed device.
    Shared(ModuleParams),
    /// One parameter object per device (the combined shape).
    PerDevice(BTreeMap<DeviceId, ModuleParams>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteRequest {
    pub module_id: String,
    pub device_ids: Vec<DeviceId>,
    pub payload: ParameterPayload,
}

impl ExecuteRequest {
    pub fn shared(module_id: impl Into<String>, device_ids: Vec<DeviceId>, params: ModuleParams) -> Self {
        Self {
            module_id: module_id.into(),
            device_ids,
            payload: ParameterPayload::Shared(params),
        }
    }

    pub fn per_device(module_id: impl Into<String>, by_device: BTreeMap<DeviceId, ModuleParams>) -> Self {
        Self {
            module_id: module_id.into(),
            device_ids: by_device.keys().cloned().collect(),
            payload: ParameterPayload::PerDevice(by_device),
        }
    }

    pub fn is_combined(&self) -> bool {
        matches!(self.payload, ParameterPayload::PerDevice(_)) && self.device_ids.len() > 1
    }

    /// Split into one shared-shape request per device.
    pub fn split_per_device(&self) -> Vec<ExecuteRequest> {
        self.device_ids
            .iter()
            .filter_map(|id| {
                let params = match &self.payload {
                    ParameterPayload::Shared(p) => Some(p.clone()),
                    ParameterPayload::PerDevice(map) => map.get(id).cloned(),
                }?;
                Some(ExecuteRequest::shared(self.module_id.clone(), vec![id.clone()], params))
            })
            .collect()
    }
}

/// Per-device result as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceResult {
    #[serde(alias = "deviceId")]
    pub device_id: DeviceId,
    pub success: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    #[serde(default, alias = "statusId")]
    pub status_id: Option<String>,
    #[serde(default, alias = "deviceResults")]
    pub device_results: Vec<DeviceResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteRunState {
    Running,
    Completed,
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    #[serde(alias = "status_id")]
    pub status_id: String,
    #[serde(alias = "module_id")]
    pub module_id: String,
    pub state: RemoteRunState,
    #[serde(default, alias = "device_ids")]
    pub device_ids: Vec<DeviceId>,
    #[serde(default, alias = "pending_device_ids")]
    pub pending_device_ids: Vec<DeviceId>,
    #[serde(default, alias = "success_count")]
    pub success_count: Option<u32>,
    #[serde(default, alias = "failure_count")]
    pub failure_count: Option<u32>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Non-2xx answer. `code` is the service's explicit error code, if any.
    #[error("device command service returned HTTP {status}: {message}")]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Connection, DNS, timeout and similar request-layer failures.
    #[error("device command service request failed: {0}")]
    Transport(String),

    #[error("could not decode device command service response: {0}")]
    Decode(String),
}

impl ServiceError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        ServiceError::Status {
            status,
            code: None,
            message: message.into(),
        }
    }

    pub fn unsupported_shape() -> Self {
        ServiceError::Status {
            status: 422,
            code: Some(UNSUPPORTED_SHAPE_CODE.to_string()),
            message: "combined per-device parameters are not supported".to_string(),
        }
    }

    /// Retryable: transient HTTP statuses and transport failures.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Status { status, .. } => TRANSIENT_STATUSES.contains(status),
            ServiceError::Transport(_) => true,
            ServiceError::Decode(_) => false,
        }
    }

    pub fn is_unsupported_shape(&self) -> bool {
        matches!(
            self,
            ServiceError::Status { code: Some(code), .. } if code == UNSUPPORTED_SHAPE_CODE
        )
    }
}

/// Trait abstracting the external system that runs modules on devices.
///
/// Production code uses [`HttpCommandService`]; tests provide their own
/// implementation that never touches the network.
pub trait DeviceCommandService: Send + Sync {
    /// Run a module on the listed devices and report per-device results.
    fn execute(&self, request: ExecuteRequest) -> BoxFuture<'_, Result<ExecuteResponse, ServiceError>>;

    /// Best-effort cancellation. An unknown `status_id` is a no-op.
    fn cancel(&self, module_id: String, status_id: String) -> BoxFuture<'_, Result<(), ServiceError>>;

    fn status(
        &self,
        module_id: Option<String>,
        status_id: Option<String>,
    ) -> BoxFuture<'_, Result<RunStatus, ServiceError>>;
}
