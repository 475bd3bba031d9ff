// flowcon-link: persistent WebSocket transport + request/response correlation
// for a flow computer device.

pub mod connection;
pub mod correlator;
pub mod envelope;
pub mod error;

pub use connection::{DeviceLink, LinkConfig, LinkState, Transport};
pub use correlator::{Correlator, Matcher, DEFAULT_REQUEST_TIMEOUT};
pub use envelope::{Envelope, Scope};
pub use error::LinkError;
