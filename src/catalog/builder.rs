// src/catalog/builder.rs

//! Parameter resolution for a module on one device.
//!
//! Resolution order for every field:
//! 1. explicit step override
//! 2. per-device preference (`device.<id>.<key>`)
//! 3. global preference (`<key>`)
//! 4. built-in module default (clamped to the module's valid range)
//!
//! The builder is a pure function of its inputs. Identical inputs always
//! produce identical [`ModuleParams`], which is what lets the dispatcher
//! group devices into shared requests.

use thiserror::Error;
use tracing::warn;

use super::preferences::{device_key, PreferenceStore};
use super::{ModuleDescriptor, ModuleKind, ModuleParams, ParamOverrides};

pub const DEFAULT_PING_HOST: &str = "8.8.8.8";
pub const DEFAULT_PING_COUNT: u32 = 4;
pub const PING_COUNT_RANGE: (u32, u32) = (1, 100);
pub const DEFAULT_CALL_DURATION_SECS: u32 = 30;
pub const CALL_DURATION_RANGE: (u32, u32) = (1, 3600);
pub const DEFAULT_SMS_MESSAGE: &str = "fleetrun test message";
pub const DEFAULT_WAIT_SECS: u32 = 5;
pub const WAIT_SECS_RANGE: (u32, u32) = (1, 600);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("module '{module}' requires '{key}' but no value was configured")]
    Missing { module: String, key: &'static str },
}

/// Builds concrete parameters from a descriptor, step overrides and a
/// preference store.
#[derive(Debug, Clone, Copy)]
pub struct ParameterBuilder<'a> {
    prefs: &'a dyn PreferenceStore,
}

impl<'a> ParameterBuilder<'a> {
    pub fn new(prefs: &'a dyn PreferenceStore) -> Self {
        Self { prefs }
    }

    pub fn build(
        &self,
        module: &ModuleDescriptor,
        overrides: &ParamOverrides,
        device_id: Option<&str>,
    ) -> Result<ModuleParams, ParamError> {
        let lookup = Lookup {
            prefs: self.prefs,
            module: &module.id,
            device_id,
        };

        let params = match module.kind {
            ModuleKind::EnableAirplaneMode => ModuleParams::AirplaneMode { enabled: true },
            ModuleKind::DisableAirplaneMode => ModuleParams::AirplaneMode { enabled: false },
            ModuleKind::EnableWifi => ModuleParams::Wifi { enabled: true },
            ModuleKind::DisableWifi => ModuleParams::Wifi { enabled: false },
            ModuleKind::EnableMobileData => ModuleParams::MobileData { enabled: true },
            ModuleKind::DisableMobileData => ModuleParams::MobileData { enabled: false },
            ModuleKind::Reboot => ModuleParams::Reboot,
            ModuleKind::Ping => ModuleParams::Ping {
                host: lookup
                    .string(overrides.host.as_deref(), "ping.host")
                    .unwrap_or_else(|| DEFAULT_PING_HOST.to_string()),
                count: lookup
                    .number(overrides.count, "ping.count")
                    .map_or(DEFAULT_PING_COUNT, |n| clamp(n, PING_COUNT_RANGE)),
            },
            ModuleKind::PlaceCall => ModuleParams::PlaceCall {
                number: lookup.required(overrides.number.as_deref(), "call.number")?,
                duration_secs: lookup
                    .number(overrides.duration_secs, "call.duration_secs")
                    .map_or(DEFAULT_CALL_DURATION_SECS, |n| clamp(n, CALL_DURATION_RANGE)),
            },
            ModuleKind::SendSms => ModuleParams::SendSms {
                number: lookup.required(overrides.number.as_deref(), "sms.number")?,
                message: lookup
                    .string(overrides.message.as_deref(), "sms.message")
                    .unwrap_or_else(|| DEFAULT_SMS_MESSAGE.to_string()),
            },
            ModuleKind::Wait => ModuleParams::Wait {
                seconds: lookup
                    .number(overrides.seconds, "wait.seconds")
                    .map_or(DEFAULT_WAIT_SECS, |n| clamp(n, WAIT_SECS_RANGE)),
            },
        };

        Ok(params)
    }
}

fn clamp(value: u32, (min, max): (u32, u32)) -> u32 {
    value.clamp(min, max)
}

struct Lookup<'a> {
    prefs: &'a dyn PreferenceStore,
    module: &'a str,
    device_id: Option<&'a str>,
}

impl Lookup<'_> {
    fn stored(&self, key: &str) -> Option<String> {
        self.device_id
            .and_then(|id| self.prefs.get(&device_key(id, key)))
            .or_else(|| self.prefs.get(key))
    }

    fn string(&self, explicit: Option<&str>, key: &str) -> Option<String> {
        explicit
            .map(str::to_string)
            .or_else(|| self.stored(key))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn required(&self, explicit: Option<&str>, key: &'static str) -> Result<String, ParamError> {
        self.string(explicit, key).ok_or_else(|| ParamError::Missing {
            module: self.module.to_string(),
            key,
        })
    }

    /// Unparsable stored values fall back to the module default.
    fn number(&self, explicit: Option<u32>, key: &str) -> Option<u32> {
        if explicit.is_some() {
            return explicit;
        }
        let raw = self.stored(key)?;
        match raw.trim().parse::<u32>() {
            Ok(n) => Some(n),
            Err(_) => {
                warn!(
                    module = %self.module,
                    key,
                    value = %raw,
                    "ignoring unparsable numeric preference; using module default"
                );
                None
            }
        }
    }
}
