// flowcon-core: configuration entity tree, edit-session protocol, and the
// console facade between the presentation layer and the device link.

pub mod console;
pub mod error;
pub mod model;
pub mod session;
pub mod tree;
pub mod validate;

// ── Primary re-exports ──────────────────────────────────────────────
pub use console::Console;
pub use error::CoreError;
pub use session::{CommitError, EditSession, SessionState};
pub use tree::{derive_device_id, eligible_device_types, EntityTree, NewDeviceParams};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    CalculatorConfig, CompressibilityConfig, CompressibilityMethod, Device, DeviceConfig,
    DeviceType, FlowRateConfig, HartAddressing, HartVariableType, Interface, InterfaceConfig,
    InterfaceType, IoCard, PressureConfig, Stream, TemperatureConfig, TemperatureUnit,
    VolumeConfig,
};
