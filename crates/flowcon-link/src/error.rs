// ── Link error types ──
//
// Every failure mode of the device link: socket lifecycle, envelope
// validation, and request correlation. `flowcon-core` maps these into
// user-facing diagnostics.

use thiserror::Error;

/// Top-level error type for the `flowcon-link` crate.
#[derive(Debug, Error)]
pub enum LinkError {
    // ── Socket lifecycle ────────────────────────────────────────────
    /// The connection attempt failed (refused, DNS, handshake).
    #[error("Connection to device failed: {0}")]
    ConnectFailed(String),

    /// The link was shut down while the operation was in flight.
    #[error("Device link closed: {reason}")]
    Closed { reason: String },

    // ── Correlation ─────────────────────────────────────────────────
    /// No matching response arrived within the deadline.
    #[error("No response from device within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── Envelope ────────────────────────────────────────────────────
    /// An inbound frame was not a parseable command envelope.
    #[error("Unparseable device message: {message}")]
    Parse { message: String },

    /// An envelope is missing an identifier its scope requires.
    #[error("Envelope scope '{scope}' requires identifier '{field}'")]
    MissingIdentifier {
        scope: &'static str,
        field: &'static str,
    },
}

impl LinkError {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectFailed(_) | Self::Timeout { .. })
    }
}
