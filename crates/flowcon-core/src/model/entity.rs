// ── Entity hierarchy ──
//
// Stream → IoCard → Interface → Device, as plain nested values. The
// `EntityTree` in `tree.rs` owns the authoritative copy; everything here
// is freely cloneable for snapshots and edit sessions.

use serde::{Deserialize, Serialize};

use super::calculator::CalculatorConfig;
use super::device::{DeviceConfig, HartAddressing};
use super::interface::InterfaceConfig;

/// Top-level unit of device configuration. Streams are created at startup
/// from the device's fixed stream list and never destroyed in-session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub id: String,
    pub name: String,
    pub calculator: CalculatorConfig,
    #[serde(default)]
    pub io_cards: Vec<IoCard>,
}

impl Stream {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            calculator: CalculatorConfig::default(),
            io_cards: Vec::new(),
        }
    }
}

/// One physical I/O card in a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoCard {
    pub id: String,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
}

impl IoCard {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            interfaces: Vec::new(),
        }
    }
}

/// A physical channel group on an I/O card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    pub id: String,
    pub config: InterfaceConfig,
    #[serde(default)]
    pub devices: Vec<Device>,
}

/// One measurement source on an interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub config: DeviceConfig,
    /// Present only for devices on HART interfaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hart: Option<HartAddressing>,
}
