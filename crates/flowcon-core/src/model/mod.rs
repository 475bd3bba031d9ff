// ── Domain model ──
//
// Plain value types for everything the console edits: the per-stream
// calculator configuration, interface configs keyed by interface type,
// device configs keyed by device type, and the entity hierarchy itself.
// All of it is `Clone + PartialEq + Serialize` -- edit sessions rely on
// deep copies and structural equality.

mod calculator;
mod device;
mod entity;
mod interface;

pub use calculator::{
    CalculatorConfig, CompressibilityConfig, CompressibilityMethod, FlowRateConfig,
    PressureConfig, TemperatureConfig, TemperatureUnit, VolumeConfig,
};
pub use device::{DeviceConfig, DeviceType, HartAddressing, HartVariableType};
pub use entity::{Device, Interface, IoCard, Stream};
pub use interface::{InterfaceConfig, InterfaceType, Parity, RtdSensorType};
