// ── Core error types ──
//
// User-facing errors from flowcon-core. Consumers never see raw socket or
// serde failures -- the `From<LinkError>` impl translates transport-layer
// errors into domain-appropriate variants.

use thiserror::Error;

use flowcon_link::LinkError;

use crate::model::DeviceType;
use crate::session::{CommitError, SessionState};

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Link errors ──────────────────────────────────────────────────
    #[error("Device link error: {0}")]
    Link(#[from] LinkError),

    /// The device answered but refused the command.
    #[error("Device rejected command: {message}")]
    Rejected { message: String },

    // ── Lookup errors ────────────────────────────────────────────────
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("I/O card not found: {0}")]
    IoCardNotFound(String),

    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    // ── Structural errors ────────────────────────────────────────────
    #[error("Interface {interface_id} cannot host a {device_type} device")]
    IneligibleDevice {
        interface_id: String,
        device_type: DeviceType,
    },

    #[error("Interface {0} already has its device")]
    InterfaceOccupied(String),

    #[error("Device id already in use: {0}")]
    DuplicateDevice(String),

    // ── Session errors ───────────────────────────────────────────────
    /// A commit was attempted on a session that is not open for editing.
    #[error("Edit session already spent (state: {0})")]
    SessionSpent(SessionState),

    // ── Validation errors ────────────────────────────────────────────
    /// A field failed client-side validation. Blocked before any network
    /// call; the entity tree is untouched.
    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Malformed device state: {0}")]
    MalformedState(String),
}

impl From<CommitError<CoreError>> for CoreError {
    fn from(err: CommitError<CoreError>) -> Self {
        match err {
            CommitError::Persist(e) => e,
            CommitError::NotEditing(state) => Self::SessionSpent(state),
        }
    }
}

impl CoreError {
    pub(crate) fn validation(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Link(e) => e.is_transient(),
            _ => false,
        }
    }
}
