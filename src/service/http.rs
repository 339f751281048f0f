// src/service/http.rs

//! `reqwest`-backed Device Command Service client.
//!
//! Endpoints:
//! - `POST {base}/modules/{module}/execute`
//! - `POST {base}/modules/{module}/cancel`
//! - `GET  {base}/modules/status?module_id=..&status_id=..`

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    BoxFuture, DeviceCommandService, ExecuteRequest, ExecuteResponse, ParameterPayload, RunStatus,
    ServiceError,
};
use crate::catalog::ModuleParams;
use crate::config::ServiceSection;
use crate::types::DeviceId;

#[derive(Debug, Serialize)]
struct ExecuteBody<'a> {
    device_ids: &'a [DeviceId],
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<&'a ModuleParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters_by_device: Option<&'a BTreeMap<DeviceId, ModuleParams>>,
}

#[derive(Debug, Serialize)]
struct CancelBody<'a> {
    status_id: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Map a non-2xx answer onto [`ServiceError::Status`], keeping the
/// service's explicit error code when the body carries one.
pub fn error_from_response(status: u16, body: &str) -> ServiceError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .or(parsed.error)
        .unwrap_or_else(|| body.trim().to_string());

    ServiceError::Status {
        status,
        code: parsed.code,
        message,
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ServiceError::Decode(err.to_string())
        } else {
            ServiceError::Transport(err.to_string())
        }
    }
}

/// Production client for the device command service.
#[derive(Debug, Clone)]
pub struct HttpCommandService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCommandService {
    pub fn new(config: &ServiceSection) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn module_url(&self, module_id: &str, action: &str) -> String {
        format!("{}/modules/{}/{}", self.base_url, module_id, action)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(error_from_response(status.as_u16(), &body))
    }
}

impl DeviceCommandService for HttpCommandService {
    fn execute(&self, request: ExecuteRequest) -> BoxFuture<'_, Result<ExecuteResponse, ServiceError>> {
        Box::pin(async move {
            let body = match &request.payload {
                ParameterPayload::Shared(params) => ExecuteBody {
                    device_ids: &request.device_ids,
                    parameters: Some(params),
                    parameters_by_device: None,
                },
                ParameterPayload::PerDevice(map) => ExecuteBody {
                    device_ids: &request.device_ids,
                    parameters: None,
                    parameters_by_device: Some(map),
                },
            };

            debug!(
                module = %request.module_id,
                devices = request.device_ids.len(),
                combined = request.is_combined(),
                "POST execute"
            );

            let response = self
                .client
                .post(self.module_url(&request.module_id, "execute"))
                .json(&body)
                .send()
                .await?;
            let response = Self::check(response).await?;
            Ok(response.json::<ExecuteResponse>().await?)
        })
    }

    fn cancel(&self, module_id: String, status_id: String) -> BoxFuture<'_, Result<(), ServiceError>> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.module_url(&module_id, "cancel"))
                .json(&CancelBody {
                    status_id: &status_id,
                })
                .send()
                .await?;

            if response.status() == reqwest::StatusCode::NOT_FOUND {
                debug!(module = %module_id, status_id = %status_id, "cancel for unknown status id; nothing to do");
                return Ok(());
            }
            Self::check(response).await?;
            Ok(())
        })
    }

    fn status(
        &self,
        module_id: Option<String>,
        status_id: Option<String>,
    ) -> BoxFuture<'_, Result<RunStatus, ServiceError>> {
        Box::pin(async move {
            let mut query: Vec<(&str, String)> = Vec::new();
            if let Some(module_id) = module_id {
                query.push(("module_id", module_id));
            }
            if let Some(status_id) = status_id {
                query.push(("status_id", status_id));
            }

            let response = self
                .client
                .get(format!("{}/modules/status", self.base_url))
                .query(&query)
                .send()
                .await?;
            let response = Self::check(response).await?;
            Ok(response.json::<RunStatus>().await?)
        })
    }
}
