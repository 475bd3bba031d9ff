// ── Console facade ──
//
// The entry point for consumers (forms, diagrams). Owns the device link,
// the correlator, and the entity tree, and drives every edit-session commit
// end to end: validate → serialize → send → await acknowledgement → apply
// to the tree. Failures leave both the tree and the session intact.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use flowcon_link::{
    Correlator, DeviceLink, Envelope, LinkConfig, LinkState, Matcher, Scope, Transport,
};

use crate::error::CoreError;
use crate::model::{CalculatorConfig, Device, DeviceConfig, InterfaceConfig, Stream};
use crate::session::EditSession;
use crate::tree::{self, EntityTree, NewDeviceParams};
use crate::validate;

// Command verbs understood by the flow computer.
const CMD_READ_STATE: &str = "read_state";
const CMD_WRITE_CONFIG: &str = "write_config";
const CMD_CREATE_DEVICE: &str = "create_device";
const CMD_DELETE_DEVICE: &str = "delete_device";

// ── Console ──────────────────────────────────────────────────────────

/// Cheaply cloneable handle over the shared link + tree. Construct once at
/// application start and hand clones to every component that sends
/// commands.
#[derive(Clone)]
pub struct Console {
    inner: Arc<ConsoleInner>,
}

struct ConsoleInner {
    link: Option<DeviceLink>,
    correlator: Correlator,
    tree: EntityTree,
    request_timeout: Duration,
}

impl Console {
    /// Build a console over a real device link.
    pub fn new(config: LinkConfig, streams: Vec<Stream>) -> Self {
        let request_timeout = config.request_timeout;
        let link = DeviceLink::new(config);
        let correlator = Correlator::new(Arc::new(link.clone()));
        Self {
            inner: Arc::new(ConsoleInner {
                link: Some(link),
                correlator,
                tree: EntityTree::new(streams),
                request_timeout,
            }),
        }
    }

    /// Build a console over an arbitrary transport. Used by tests and by
    /// embedders that manage the socket lifecycle themselves.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        streams: Vec<Stream>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ConsoleInner {
                link: None,
                correlator: Correlator::new(transport),
                tree: EntityTree::new(streams),
                request_timeout,
            }),
        }
    }

    /// Open (or join the in-flight attempt to open) the device link.
    pub async fn connect(&self) -> Result<(), CoreError> {
        if let Some(link) = &self.inner.link {
            link.connect().await?;
        }
        Ok(())
    }

    /// Tear down the link and stop reconnecting.
    pub fn shutdown(&self) {
        if let Some(link) = &self.inner.link {
            link.shutdown();
        }
    }

    /// Observe socket lifecycle transitions, when a real link is attached.
    pub fn link_state(&self) -> Option<watch::Receiver<LinkState>> {
        self.inner.link.as_ref().map(DeviceLink::state)
    }

    /// The authoritative configuration hierarchy.
    pub fn tree(&self) -> &EntityTree {
        &self.inner.tree
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Fetch the device's full configuration state and replace the tree
    /// with it. The response carries no identifiers, so it is matched by
    /// the structural fingerprint of its `streams` field.
    pub async fn load_full_state(&self) -> Result<(), CoreError> {
        let matcher: Matcher = Arc::new(|env: &Envelope| {
            env.command == CMD_READ_STATE && env.has_field("streams")
        });

        let reply = self
            .inner
            .correlator
            .send_and_wait(
                Envelope::full(CMD_READ_STATE),
                matcher,
                self.inner.request_timeout,
            )
            .await?;

        let streams_value = reply
            .field("streams")
            .cloned()
            .ok_or_else(|| CoreError::MalformedState("response missing 'streams'".into()))?;
        let streams: Vec<Stream> = serde_json::from_value(streams_value)
            .map_err(|e| CoreError::MalformedState(e.to_string()))?;

        debug!(streams = streams.len(), "loaded full device state");
        self.inner.tree.replace_all(streams);
        Ok(())
    }

    // ── Commits ──────────────────────────────────────────────────────

    /// Persist an edited calculator config for one stream.
    pub async fn save_calculator(
        &self,
        stream_id: &str,
        session: &mut EditSession<CalculatorConfig>,
    ) -> Result<(), CoreError> {
        validate::validate_calculator(session.get())?;
        // Fail on unknown streams before going to the device.
        self.inner.tree.stream(stream_id)?;

        let inner = Arc::clone(&self.inner);
        let sid = stream_id.to_owned();
        let committed = session
            .commit(move |config| async move {
                let envelope = Envelope::stream(CMD_WRITE_CONFIG, &sid)
                    .with_field("section", serde_json::Value::from("calculator"))
                    .with_field("config", to_body(&config)?);
                let matcher = reply_matcher(CMD_WRITE_CONFIG, Scope::Stream, &sid, None, None);
                inner.request(envelope, matcher).await
            })
            .await?;

        self.inner.tree.replace_calculator(stream_id, committed)
    }

    /// Persist an edited interface config.
    pub async fn save_interface(
        &self,
        stream_id: &str,
        interface_id: &str,
        session: &mut EditSession<InterfaceConfig>,
    ) -> Result<(), CoreError> {
        validate::validate_interface(session.get())?;
        self.inner.tree.interface(stream_id, interface_id)?;

        let inner = Arc::clone(&self.inner);
        let sid = stream_id.to_owned();
        let iid = interface_id.to_owned();
        let committed = session
            .commit(move |config| async move {
                let envelope = Envelope::interface(CMD_WRITE_CONFIG, &sid, &iid)
                    .with_field("config", to_body(&config)?);
                let matcher =
                    reply_matcher(CMD_WRITE_CONFIG, Scope::Interface, &sid, Some(&iid), None);
                inner.request(envelope, matcher).await
            })
            .await?;

        self.inner
            .tree
            .replace_interface_config(stream_id, interface_id, committed)
    }

    /// Persist an edited config of an existing device.
    pub async fn save_device(
        &self,
        stream_id: &str,
        interface_id: &str,
        device_id: &str,
        session: &mut EditSession<DeviceConfig>,
    ) -> Result<(), CoreError> {
        validate::validate_device(session.get())?;
        self.inner.tree.device(stream_id, interface_id, device_id)?;

        let inner = Arc::clone(&self.inner);
        let sid = stream_id.to_owned();
        let iid = interface_id.to_owned();
        let did = device_id.to_owned();
        let committed = session
            .commit(move |config| async move {
                let envelope = Envelope::device(CMD_WRITE_CONFIG, &sid, &iid, &did)
                    .with_field("config", to_body(&config)?);
                let matcher =
                    reply_matcher(CMD_WRITE_CONFIG, Scope::Device, &sid, Some(&iid), Some(&did));
                inner.request(envelope, matcher).await
            })
            .await?;

        self.inner
            .tree
            .replace_device_config(stream_id, interface_id, device_id, committed)
    }

    /// Persist a brand-new device. The id is derived up front so the
    /// command can carry it; the device enters the tree only after the
    /// acknowledgement.
    pub async fn save_new_device(
        &self,
        stream_id: &str,
        interface_id: &str,
        session: &mut EditSession<DeviceConfig>,
        params: NewDeviceParams,
    ) -> Result<Device, CoreError> {
        validate::validate_device(session.get())?;
        let interface = self.inner.tree.interface(stream_id, interface_id)?;
        // Hosting rules + id derivation run before anything hits the wire.
        let template = tree::build_device(&interface, session.get().clone(), params)?;

        let inner = Arc::clone(&self.inner);
        let sid = stream_id.to_owned();
        let iid = interface_id.to_owned();
        let did = template.id.clone();
        let committed = session
            .commit(move |config| async move {
                let envelope = Envelope::device(CMD_CREATE_DEVICE, &sid, &iid, &did)
                    .with_field("config", to_body(&config)?);
                let matcher =
                    reply_matcher(CMD_CREATE_DEVICE, Scope::Device, &sid, Some(&iid), Some(&did));
                inner.request(envelope, matcher).await
            })
            .await?;

        let device = Device {
            id: template.id,
            config: committed,
            hart: template.hart,
        };
        self.inner
            .tree
            .add_device(stream_id, interface_id, device.clone())?;
        Ok(device)
    }

    /// Delete a device on the flow computer, then drop it from the tree.
    pub async fn delete_device(
        &self,
        stream_id: &str,
        interface_id: &str,
        device_id: &str,
    ) -> Result<(), CoreError> {
        self.inner.tree.device(stream_id, interface_id, device_id)?;

        let envelope = Envelope::device(CMD_DELETE_DEVICE, stream_id, interface_id, device_id);
        let matcher = reply_matcher(
            CMD_DELETE_DEVICE,
            Scope::Device,
            stream_id,
            Some(interface_id),
            Some(device_id),
        );
        self.inner.request(envelope, matcher).await?;

        self.inner.tree.remove_device(stream_id, interface_id, device_id)
    }
}

impl ConsoleInner {
    /// Send a command, await the acknowledgement, and surface device-side
    /// rejections.
    async fn request(&self, envelope: Envelope, matcher: Matcher) -> Result<(), CoreError> {
        let reply = self
            .correlator
            .send_and_wait(envelope, matcher, self.request_timeout)
            .await?;
        ack_status(&reply)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Serialize a config value into a command payload.
fn to_body<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, CoreError> {
    serde_json::to_value(value).map_err(|e| CoreError::MalformedState(e.to_string()))
}

/// Predicate fallback for firmware that does not echo correlation ids:
/// match on command verb, scope, and the identifiers that scope carries.
fn reply_matcher(
    command: &str,
    scope: Scope,
    stream_id: &str,
    interface_id: Option<&str>,
    device_id: Option<&str>,
) -> Matcher {
    let command = command.to_owned();
    let stream_id = stream_id.to_owned();
    let interface_id = interface_id.map(str::to_owned);
    let device_id = device_id.map(str::to_owned);

    Arc::new(move |env: &Envelope| {
        env.command == command
            && env.scope == scope
            && env.stream_id.as_deref() == Some(stream_id.as_str())
            && (interface_id.is_none() || env.interface_id == interface_id)
            && (device_id.is_none() || env.device_id == device_id)
    })
}

/// Interpret a reply's `status` field. Replies without one are treated as
/// acknowledgements (legacy firmware sends none on success).
fn ack_status(reply: &Envelope) -> Result<(), CoreError> {
    match reply.field("status").and_then(serde_json::Value::as_str) {
        Some("error") => Err(CoreError::Rejected {
            message: reply
                .field("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unspecified")
                .to_owned(),
        }),
        _ => Ok(()),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
