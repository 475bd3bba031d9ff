// ── Client-side validation ──
//
// Required-field and numeric-format checks that gate a commit. Runs before
// any network call; failures surface per field and never touch the tree.

use crate::error::CoreError;
use crate::model::{CalculatorConfig, CompressibilityMethod, DeviceConfig, InterfaceConfig};

fn require_finite(field: &str, value: f64) -> Result<(), CoreError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(CoreError::validation(field, "must be a finite number"))
    }
}

fn require_positive(field: &str, value: f64) -> Result<(), CoreError> {
    require_finite(field, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(CoreError::validation(field, "must be greater than zero"))
    }
}

/// Validate a stream's calculator setup.
pub fn validate_calculator(config: &CalculatorConfig) -> Result<(), CoreError> {
    require_finite("base_temperature", config.temperature.base_temperature)?;
    require_positive("base_pressure", config.pressure.base_pressure)?;
    require_positive("atmospheric_pressure", config.pressure.atmospheric_pressure)?;
    require_finite("low_flow_cutoff", config.flow_rate.low_flow_cutoff)?;
    if config.flow_rate.low_flow_cutoff < 0.0 {
        return Err(CoreError::validation("low_flow_cutoff", "must not be negative"));
    }
    require_positive("pulse_value", config.volume.pulse_value)?;

    if config.compressibility.method == CompressibilityMethod::Constant {
        let value = config
            .compressibility
            .constant_value
            .ok_or_else(|| CoreError::validation("constant_value", "required for constant method"))?;
        require_positive("constant_value", value)?;
    }
    Ok(())
}

/// Validate an interface config.
pub fn validate_interface(config: &InterfaceConfig) -> Result<(), CoreError> {
    match config {
        InterfaceConfig::Modbus {
            baud_rate,
            data_bits,
            stop_bits,
            ..
        } => {
            if *baud_rate == 0 {
                return Err(CoreError::validation("baud_rate", "must be greater than zero"));
            }
            if !matches!(data_bits, 7 | 8) {
                return Err(CoreError::validation("data_bits", "must be 7 or 8"));
            }
            if !matches!(stop_bits, 1 | 2) {
                return Err(CoreError::validation("stop_bits", "must be 1 or 2"));
            }
        }
        InterfaceConfig::Hart { scan_interval_ms, .. } => {
            if *scan_interval_ms < 100 {
                return Err(CoreError::validation("scan_interval_ms", "must be at least 100"));
            }
        }
        InterfaceConfig::TemperatureInput { wire_count, .. } => {
            if !matches!(wire_count, 2..=4) {
                return Err(CoreError::validation("wire_count", "must be 2, 3, or 4"));
            }
        }
        InterfaceConfig::DigitalInput { pulse_weight, .. } => {
            require_positive("pulse_weight", *pulse_weight)?;
        }
        InterfaceConfig::AnalogInput {
            range_low_ma,
            range_high_ma,
        } => {
            require_finite("range_low_ma", *range_low_ma)?;
            require_finite("range_high_ma", *range_high_ma)?;
            if range_high_ma <= range_low_ma {
                return Err(CoreError::validation(
                    "range_high_ma",
                    "must be greater than range_low_ma",
                ));
            }
        }
    }
    Ok(())
}

/// Validate a device config.
pub fn validate_device(config: &DeviceConfig) -> Result<(), CoreError> {
    if config.tag().trim().is_empty() {
        return Err(CoreError::validation("tag", "must not be empty"));
    }

    match config {
        DeviceConfig::Temperature {
            low_limit,
            high_limit,
            substitute_value,
            ..
        }
        | DeviceConfig::Pressure {
            low_limit,
            high_limit,
            substitute_value,
            ..
        } => {
            require_finite("low_limit", *low_limit)?;
            require_finite("high_limit", *high_limit)?;
            if high_limit <= low_limit {
                return Err(CoreError::validation(
                    "high_limit",
                    "must be greater than low_limit",
                ));
            }
            if let Some(substitute) = substitute_value {
                require_finite("substitute_value", *substitute)?;
                if substitute < low_limit || substitute > high_limit {
                    return Err(CoreError::validation(
                        "substitute_value",
                        "must lie within the measurement limits",
                    ));
                }
            }
        }
        DeviceConfig::Volume {
            pulse_value,
            meter_factor,
            ..
        } => {
            require_positive("pulse_value", *pulse_value)?;
            require_positive("meter_factor", *meter_factor)?;
        }
        DeviceConfig::FlowRate { low_flow_cutoff, .. } => {
            require_finite("low_flow_cutoff", *low_flow_cutoff)?;
            if *low_flow_cutoff < 0.0 {
                return Err(CoreError::validation("low_flow_cutoff", "must not be negative"));
            }
        }
        DeviceConfig::GasComponents { components, .. } => {
            if components.is_empty() {
                return Err(CoreError::validation("components", "must not be empty"));
            }
            let mut total = 0.0;
            for (name, share) in components {
                require_finite(name, *share)?;
                if *share < 0.0 {
                    return Err(CoreError::validation(name, "must not be negative"));
                }
                total += share;
            }
            // Mole percentages have to add up, within entry tolerance.
            if (total - 100.0).abs() > 0.5 {
                return Err(CoreError::validation(
                    "components",
                    format!("mole percentages sum to {total:.2}, expected 100"),
                ));
            }
        }
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────
