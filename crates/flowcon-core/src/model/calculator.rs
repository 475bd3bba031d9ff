// ── Calculator configuration ──
//
// The per-stream calculation setup: which corrections run and with which
// base conditions. The numeric formulas themselves live in the device
// firmware; the console only edits their parameters.

use serde::{Deserialize, Serialize};

/// Temperature unit for display and entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
    Kelvin,
}

/// Compressibility calculation method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressibilityMethod {
    #[default]
    Aga8Detailed,
    Gerg2008,
    Sgerg88,
    /// Fixed compressibility factor; requires `constant_value`.
    Constant,
}

/// The full calculator setup of one stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalculatorConfig {
    pub temperature: TemperatureConfig,
    pub pressure: PressureConfig,
    pub flow_rate: FlowRateConfig,
    pub volume: VolumeConfig,
    pub compressibility: CompressibilityConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureConfig {
    pub unit: TemperatureUnit,
    /// Base (reference) temperature for volume conversion.
    pub base_temperature: f64,
    /// Value used when the live measurement fails.
    pub substitute_value: Option<f64>,
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            unit: TemperatureUnit::Celsius,
            base_temperature: 15.0,
            substitute_value: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressureConfig {
    /// Base (reference) pressure in bar absolute.
    pub base_pressure: f64,
    /// Local atmospheric pressure in bar.
    pub atmospheric_pressure: f64,
    pub substitute_value: Option<f64>,
}

impl Default for PressureConfig {
    fn default() -> Self {
        Self {
            base_pressure: 1.01325,
            atmospheric_pressure: 1.01325,
            substitute_value: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRateConfig {
    /// Flow below this rate (m³/h) is treated as zero.
    pub low_flow_cutoff: f64,
    /// Exponential damping applied to the displayed rate.
    pub damping_seconds: u32,
}

impl Default for FlowRateConfig {
    fn default() -> Self {
        Self {
            low_flow_cutoff: 0.0,
            damping_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Volume represented by one meter pulse, in m³.
    pub pulse_value: f64,
    /// Number of decimals shown on totalizers.
    pub totalizer_decimals: u8,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            pulse_value: 0.1,
            totalizer_decimals: 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressibilityConfig {
    pub method: CompressibilityMethod,
    /// Fixed factor, only meaningful for [`CompressibilityMethod::Constant`].
    pub constant_value: Option<f64>,
}
