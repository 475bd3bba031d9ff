// ── Device types and configs ──
//
// A device is one measurement source hanging off an interface: a
// transmitter, a meter input, or a gas-composition record. As with
// interfaces, the config is a sum type keyed by the device type.

use serde::{Deserialize, Serialize};

/// What a device measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Temperature,
    Pressure,
    Volume,
    FlowRate,
    GasComponents,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Temperature => "temperature",
            Self::Pressure => "pressure",
            Self::Volume => "volume",
            Self::FlowRate => "flow-rate",
            Self::GasComponents => "gas-components",
        };
        f.write_str(name)
    }
}

/// HART process variable selector. The code letter is part of derived
/// device ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HartVariableType {
    Pressure,
    Temperature,
    FlowRate,
    Level,
}

impl HartVariableType {
    pub fn code(self) -> char {
        match self {
            Self::Pressure => 'P',
            Self::Temperature => 'T',
            Self::FlowRate => 'F',
            Self::Level => 'L',
        }
    }
}

/// Protocol addressing for a device on a HART interface. Both fields are
/// required before a device id can be derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HartAddressing {
    pub polling_address: u8,
    pub variable_type: HartVariableType,
}

/// Type-specific device configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "device_type", rename_all = "snake_case")]
pub enum DeviceConfig {
    Temperature {
        /// Operator-facing tag name.
        tag: String,
        low_limit: f64,
        high_limit: f64,
        substitute_value: Option<f64>,
    },
    Pressure {
        tag: String,
        low_limit: f64,
        high_limit: f64,
        substitute_value: Option<f64>,
    },
    Volume {
        tag: String,
        /// Volume per input pulse, m³.
        pulse_value: f64,
        meter_factor: f64,
    },
    FlowRate {
        tag: String,
        low_flow_cutoff: f64,
        damping_seconds: u32,
    },
    GasComponents {
        tag: String,
        /// Mole percentages keyed by component name (`methane`, `ethane`, ...).
        components: std::collections::BTreeMap<String, f64>,
    },
}

impl DeviceConfig {
    pub fn device_type(&self) -> DeviceType {
        match self {
            Self::Temperature { .. } => DeviceType::Temperature,
            Self::Pressure { .. } => DeviceType::Pressure,
            Self::Volume { .. } => DeviceType::Volume,
            Self::FlowRate { .. } => DeviceType::FlowRate,
            Self::GasComponents { .. } => DeviceType::GasComponents,
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::Temperature { tag, .. }
            | Self::Pressure { tag, .. }
            | Self::Volume { tag, .. }
            | Self::FlowRate { tag, .. }
            | Self::GasComponents { tag, .. } => tag,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
