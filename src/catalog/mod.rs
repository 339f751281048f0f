// src/catalog/mod.rs

//! Module catalog: which device operations exist and how their parameters
//! are resolved.
//!
//! - [`ModuleKind`] is the closed set of supported operations.
//! - [`ModuleDescriptor`] is the immutable catalog entry for one module.
//! - [`params`] holds the tagged per-module parameter variants and the
//!   override layer carried by workflow steps.
//! - [`preferences`] is the key-value port for stored preferences.
//! - [`builder`] turns a descriptor + overrides + preferences into the
//!   concrete parameters for one device.

pub mod builder;
pub mod params;
pub mod preferences;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{FleetrunError, Result};

pub use builder::{ParamError, ParameterBuilder};
pub use params::{ModuleParams, ParamOverrides};
pub use preferences::{MemoryPreferences, PreferenceStore};

/// Every module the engine knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    EnableAirplaneMode,
    DisableAirplaneMode,
    EnableWifi,
    DisableWifi,
    EnableMobileData,
    DisableMobileData,
    Reboot,
    Ping,
    PlaceCall,
    SendSms,
    Wait,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 11] = [
        ModuleKind::EnableAirplaneMode,
        ModuleKind::DisableAirplaneMode,
        ModuleKind::EnableWifi,
        ModuleKind::DisableWifi,
        ModuleKind::EnableMobileData,
        ModuleKind::DisableMobileData,
        ModuleKind::Reboot,
        ModuleKind::Ping,
        ModuleKind::PlaceCall,
        ModuleKind::SendSms,
        ModuleKind::Wait,
    ];

    /// Wire identifier used by the device command service.
    pub fn id(self) -> &'static str {
        match self {
            ModuleKind::EnableAirplaneMode => "enable_airplane_mode",
            ModuleKind::DisableAirplaneMode => "disable_airplane_mode",
            ModuleKind::EnableWifi => "enable_wifi",
            ModuleKind::DisableWifi => "disable_wifi",
            ModuleKind::EnableMobileData => "enable_mobile_data",
            ModuleKind::DisableMobileData => "disable_mobile_data",
            ModuleKind::Reboot => "reboot",
            ModuleKind::Ping => "ping",
            ModuleKind::PlaceCall => "place_call",
            ModuleKind::SendSms => "send_sms",
            ModuleKind::Wait => "wait",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ModuleKind::EnableAirplaneMode => "Enable airplane mode",
            ModuleKind::DisableAirplaneMode => "Disable airplane mode",
            ModuleKind::EnableWifi => "Enable Wi-Fi",
            ModuleKind::DisableWifi => "Disable Wi-Fi",
            ModuleKind::EnableMobileData => "Enable mobile data",
            ModuleKind::DisableMobileData => "Disable mobile data",
            ModuleKind::Reboot => "Reboot device",
            ModuleKind::Ping => "Ping host",
            ModuleKind::PlaceCall => "Place call",
            ModuleKind::SendSms => "Send SMS",
            ModuleKind::Wait => "Wait",
        }
    }

    /// Preference keys this module reads; doubles as its parameter schema hint.
    pub fn parameter_keys(self) -> &'static [&'static str] {
        match self {
            ModuleKind::Ping => &["ping.host", "ping.count"],
            ModuleKind::PlaceCall => &["call.number", "call.duration_secs"],
            ModuleKind::SendSms => &["sms.number", "sms.message"],
            ModuleKind::Wait => &["wait.seconds"],
            _ => &[],
        }
    }

    /// Fixed duration hint for modules whose run time does not depend on
    /// their parameters. `None` means "unknown" or "derived from params".
    fn fixed_duration_hint(self) -> Option<Duration> {
        match self {
            ModuleKind::EnableAirplaneMode | ModuleKind::DisableAirplaneMode => {
                Some(Duration::from_secs(8))
            }
            ModuleKind::EnableWifi
            | ModuleKind::DisableWifi
            | ModuleKind::EnableMobileData
            | ModuleKind::DisableMobileData => Some(Duration::from_secs(6)),
            ModuleKind::Reboot => Some(Duration::from_secs(90)),
            ModuleKind::SendSms | ModuleKind::Ping | ModuleKind::PlaceCall | ModuleKind::Wait => {
                None
            }
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ModuleKind {
    type Err = FleetrunError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim();
        ModuleKind::ALL
            .into_iter()
            .find(|kind| kind.id() == wanted)
            .ok_or_else(|| FleetrunError::UnknownModule(wanted.to_string()))
    }
}

/// Immutable catalog entry for one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub id: String,
    pub name: String,
    pub kind: ModuleKind,
    pub parameter_hint: &'static [&'static str],
    pub expected_duration: Option<Duration>,
}

impl ModuleDescriptor {
    pub fn for_kind(kind: ModuleKind) -> Self {
        Self {
            id: kind.id().to_string(),
            name: kind.display_name().to_string(),
            kind,
            parameter_hint: kind.parameter_keys(),
            expected_duration: kind.fixed_duration_hint(),
        }
    }

    /// Look a module up by its wire id.
    pub fn lookup(id: &str) -> Result<Self> {
        Ok(Self::for_kind(id.parse()?))
    }

    pub fn is_wait(&self) -> bool {
        self.kind == ModuleKind::Wait
    }

    /// Expected run time once parameters are known.
    pub fn expected_duration_for(&self, params: &ModuleParams) -> Option<Duration> {
        match params {
            ModuleParams::Ping { count, .. } => Some(Duration::from_secs(u64::from(*count) + 2)),
            ModuleParams::PlaceCall { duration_secs, .. } => {
                Some(Duration::from_secs(u64::from(*duration_secs) + 10))
            }
            ModuleParams::Wait { seconds } => Some(Duration::from_secs(u64::from(*seconds))),
            _ => self.expected_duration,
        }
    }
}
