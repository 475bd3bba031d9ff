// ── Command envelope ──
//
// The JSON frame exchanged with the flow computer. Every outbound command
// carries a `command` verb, a `scope` addressing one node of the
// configuration tree, and the identifiers that scope requires. Responses
// echo enough of the same fields for correlation; newer firmware also
// echoes `correlation_id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::LinkError;

// ── Scope ────────────────────────────────────────────────────────────

/// Which node of the configuration tree a command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// The whole device state. No identifiers.
    Full,
    /// One metering stream. Requires `stream_id`.
    Stream,
    /// One I/O card. Requires `stream_id` + `io_card_id`.
    IoCard,
    /// One physical interface. Requires `stream_id` + `interface_id`.
    Interface,
    /// One connected device. Requires `stream_id` + `interface_id` + `device_id`.
    Device,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Stream => "stream",
            Self::IoCard => "io_card",
            Self::Interface => "interface",
            Self::Device => "device",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Envelope ─────────────────────────────────────────────────────────

/// A single command or response frame.
///
/// Identifier fields are optional at the type level because inbound frames
/// may omit them; [`validate`](Self::validate) enforces the per-scope
/// requirements before anything goes on the wire. Payload fields beyond
/// the addressing set (config bodies, snapshot data) live in `body`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub command: String,
    pub scope: Scope,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_card_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// Correlation id stamped by the correlator and echoed by newer
    /// firmware. Absent on legacy responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,

    /// Everything else the frame carries.
    #[serde(flatten)]
    pub body: serde_json::Map<String, Value>,
}

impl Envelope {
    /// A device-wide command (`scope: full`).
    pub fn full(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            scope: Scope::Full,
            stream_id: None,
            io_card_id: None,
            interface_id: None,
            device_id: None,
            correlation_id: None,
            body: serde_json::Map::new(),
        }
    }

    /// A command addressing one stream.
    pub fn stream(command: impl Into<String>, stream_id: impl Into<String>) -> Self {
        let mut env = Self::full(command);
        env.scope = Scope::Stream;
        env.stream_id = Some(stream_id.into());
        env
    }

    /// A command addressing one I/O card.
    pub fn io_card(
        command: impl Into<String>,
        stream_id: impl Into<String>,
        io_card_id: impl Into<String>,
    ) -> Self {
        let mut env = Self::stream(command, stream_id);
        env.scope = Scope::IoCard;
        env.io_card_id = Some(io_card_id.into());
        env
    }

    /// A command addressing one interface.
    pub fn interface(
        command: impl Into<String>,
        stream_id: impl Into<String>,
        interface_id: impl Into<String>,
    ) -> Self {
        let mut env = Self::stream(command, stream_id);
        env.scope = Scope::Interface;
        env.interface_id = Some(interface_id.into());
        env
    }

    /// A command addressing one device.
    pub fn device(
        command: impl Into<String>,
        stream_id: impl Into<String>,
        interface_id: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        let mut env = Self::interface(command, stream_id, interface_id);
        env.scope = Scope::Device;
        env.device_id = Some(device_id.into());
        env
    }

    /// Attach a payload field, builder-style.
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.body.insert(name.into(), value);
        self
    }

    /// Look up a payload field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }

    /// Structural fingerprint check — some responses carry no identifiers
    /// and are recognized purely by the presence of a field (e.g. `streams`
    /// on a full snapshot).
    pub fn has_field(&self, name: &str) -> bool {
        self.body.contains_key(name)
    }

    /// Check that every identifier this envelope's scope requires is set.
    pub fn validate(&self) -> Result<(), LinkError> {
        let missing = |field| LinkError::MissingIdentifier {
            scope: self.scope.as_str(),
            field,
        };

        match self.scope {
            Scope::Full => {}
            Scope::Stream => {
                if self.stream_id.is_none() {
                    return Err(missing("stream_id"));
                }
            }
            Scope::IoCard => {
                if self.stream_id.is_none() {
                    return Err(missing("stream_id"));
                }
                if self.io_card_id.is_none() {
                    return Err(missing("io_card_id"));
                }
            }
            Scope::Interface => {
                if self.stream_id.is_none() {
                    return Err(missing("stream_id"));
                }
                if self.interface_id.is_none() {
                    return Err(missing("interface_id"));
                }
            }
            Scope::Device => {
                if self.stream_id.is_none() {
                    return Err(missing("stream_id"));
                }
                if self.interface_id.is_none() {
                    return Err(missing("interface_id"));
                }
                if self.device_id.is_none() {
                    return Err(missing("device_id"));
                }
            }
        }
        Ok(())
    }

    /// Parse an inbound text frame.
    pub fn parse(text: &str) -> Result<Self, LinkError> {
        serde_json::from_str(text).map_err(|e| LinkError::Parse {
            message: e.to_string(),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────
