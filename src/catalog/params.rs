// src/catalog/params.rs

//! Concrete module parameters and the override layer carried by steps.

use serde::{Deserialize, Serialize};

/// Fully resolved parameters for one module on one device.
///
/// Equality is structural: the dispatcher groups devices whose resolved
/// parameters compare equal into a single outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModuleParams {
    AirplaneMode { enabled: bool },
    Wifi { enabled: bool },
    MobileData { enabled: bool },
    Reboot,
    Ping { host: String, count: u32 },
    PlaceCall { number: String, duration_secs: u32 },
    SendSms { number: String, message: String },
    Wait { seconds: u32 },
}

/// Per-step parameter overrides.
///
/// Every field is optional; a `None` falls through to stored preferences and
/// then to the module default. In a workflow config these sit inline with
/// the module id:
///
/// ```toml
/// steps = [{ module = "ping", host = "10.0.0.1", count = 3 }]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u32>,
}

impl ParamOverrides {
    pub fn is_empty(&self) -> bool {
        *self == ParamOverrides::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.number = Some(number.into());
        self
    }

    pub fn with_duration_secs(mut self, secs: u32) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_seconds(mut self, seconds: u32) -> Self {
        self.seconds = Some(seconds);
        self
    }
}
