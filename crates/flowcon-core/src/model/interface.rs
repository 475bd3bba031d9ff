// ── Interface types and configs ──
//
// An interface is a physical channel group on an I/O card. The
// `InterfaceType` discriminant decides which config fields exist and which
// device-adding rules apply, so the config is a tagged union rather than
// one record of optional fields.

use serde::{Deserialize, Serialize};

/// The kind of physical channel group an interface exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceType {
    Modbus,
    Hart,
    /// RTD temperature input (Pt100 and friends).
    TemperatureInput,
    DigitalInput,
    AnalogInput,
}

impl InterfaceType {
    /// Interface ids start with this prefix; device-type eligibility and id
    /// derivation key off it.
    pub fn id_prefix(self) -> &'static str {
        match self {
            Self::Modbus => "MB",
            Self::Hart => "HI",
            Self::TemperatureInput => "TI",
            Self::DigitalInput => "DI",
            Self::AnalogInput => "AI",
        }
    }

    /// Recover the interface type from an interface id.
    pub fn from_interface_id(id: &str) -> Option<Self> {
        [
            Self::Modbus,
            Self::Hart,
            Self::TemperatureInput,
            Self::DigitalInput,
            Self::AnalogInput,
        ]
        .into_iter()
        .find(|t| id.starts_with(t.id_prefix()))
    }

    /// Interfaces that host at most one device, whose id equals the
    /// interface id.
    pub fn is_single_device(self) -> bool {
        matches!(self, Self::TemperatureInput | Self::DigitalInput)
    }
}

impl std::fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Modbus => "Modbus",
            Self::Hart => "HART",
            Self::TemperatureInput => "temperature input",
            Self::DigitalInput => "digital input",
            Self::AnalogInput => "analog input",
        };
        f.write_str(name)
    }
}

/// Serial parity for Modbus links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// RTD sensor element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RtdSensorType {
    #[default]
    Pt100,
    Pt500,
    Pt1000,
}

/// Type-specific interface configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "interface_type", rename_all = "snake_case")]
pub enum InterfaceConfig {
    Modbus {
        baud_rate: u32,
        parity: Parity,
        data_bits: u8,
        stop_bits: u8,
    },
    Hart {
        /// How often connected transmitters are polled.
        scan_interval_ms: u32,
        retries: u8,
    },
    TemperatureInput {
        sensor_type: RtdSensorType,
        wire_count: u8,
    },
    DigitalInput {
        /// Volume per pulse, m³.
        pulse_weight: f64,
        debounce_ms: u32,
    },
    AnalogInput {
        range_low_ma: f64,
        range_high_ma: f64,
    },
}

impl InterfaceConfig {
    pub fn interface_type(&self) -> InterfaceType {
        match self {
            Self::Modbus { .. } => InterfaceType::Modbus,
            Self::Hart { .. } => InterfaceType::Hart,
            Self::TemperatureInput { .. } => InterfaceType::TemperatureInput,
            Self::DigitalInput { .. } => InterfaceType::DigitalInput,
            Self::AnalogInput { .. } => InterfaceType::AnalogInput,
        }
    }

    /// A reasonable starting config for a freshly added interface.
    pub fn default_for(interface_type: InterfaceType) -> Self {
        match interface_type {
            InterfaceType::Modbus => Self::Modbus {
                baud_rate: 9600,
                parity: Parity::None,
                data_bits: 8,
                stop_bits: 1,
            },
            InterfaceType::Hart => Self::Hart {
                scan_interval_ms: 1000,
                retries: 3,
            },
            InterfaceType::TemperatureInput => Self::TemperatureInput {
                sensor_type: RtdSensorType::Pt100,
                wire_count: 4,
            },
            InterfaceType::DigitalInput => Self::DigitalInput {
                pulse_weight: 0.1,
                debounce_ms: 5,
            },
            InterfaceType::AnalogInput => Self::AnalogInput {
                range_low_ma: 4.0,
                range_high_ma: 20.0,
            },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
