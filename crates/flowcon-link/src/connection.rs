// ── Device link ──
//
// Exactly one persistent WebSocket to the flow computer. The link owns the
// socket behind a background task: `send` feeds an outbound channel, inbound
// frames fan out through a broadcast channel, and the task reconnects after
// a fixed delay whenever the socket drops. Subscribers survive reconnects
// without re-registering.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::envelope::Envelope;
use crate::error::LinkError;

const FRAME_CHANNEL_CAPACITY: usize = 1024;
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

// ── LinkConfig ───────────────────────────────────────────────────────

/// Connection tuning for the device link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// WebSocket endpoint of the flow computer (e.g. `ws://192.168.0.50:8080`).
    pub endpoint: Url,

    /// Delay between reconnection attempts.
    ///
    /// The retry policy is deliberately a fixed delay with no backoff growth
    /// and no attempt cap: the link targets a LAN-local device that is either
    /// reachable or about to be, and an operator console should keep trying
    /// for as long as it is open.
    pub reconnect_delay: Duration,

    /// Default deadline for correlated requests.
    pub request_timeout: Duration,
}

impl LinkConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            reconnect_delay: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
        }
    }
}

// ── LinkState ────────────────────────────────────────────────────────

/// Socket lifecycle state, observable via [`DeviceLink::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Outcome of a single connection attempt, broadcast to coalesced
/// `connect()` callers.
#[derive(Debug, Clone)]
enum ConnectOutcome {
    Opened,
    Failed(String),
}

// ── Transport seam ───────────────────────────────────────────────────

/// What the correlator needs from a link: fire-and-forget send plus a
/// broadcast subscription to inbound frames. [`DeviceLink`] is the real
/// implementation; tests substitute an in-memory one.
pub trait Transport: Send + Sync {
    /// Send an envelope if the link is open; drop it with a warning if not.
    fn send(&self, envelope: &Envelope);

    /// Subscribe to inbound frames. Every subscriber sees every frame.
    fn subscribe(&self) -> broadcast::Receiver<Arc<Envelope>>;
}

// ── DeviceLink ───────────────────────────────────────────────────────

/// Handle to the single socket connecting the console to the device.
///
/// Cheaply cloneable; all clones share the one underlying connection.
/// Construct once at application start and pass by reference.
#[derive(Clone)]
pub struct DeviceLink {
    inner: Arc<LinkInner>,
}

struct LinkInner {
    config: LinkConfig,
    // Published with send_replace: the value must stick even with no
    // receiver, since `send()` gates on the stored state.
    state: watch::Sender<LinkState>,
    frame_tx: broadcast::Sender<Arc<Envelope>>,
    outbound_tx: mpsc::Sender<String>,
    outbound_rx: Mutex<Option<mpsc::Receiver<String>>>,
    attempt_tx: broadcast::Sender<ConnectOutcome>,
    started: StdMutex<bool>,
    cancel: CancellationToken,
}

impl DeviceLink {
    /// Create a link. Does not open a socket — call
    /// [`connect()`](Self::connect) or just [`send`](Self::send) after a
    /// connect elsewhere; the reconnect loop starts on first `connect()`.
    pub fn new(config: LinkConfig) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        let (frame_tx, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let (attempt_tx, _) = broadcast::channel(16);

        Self {
            inner: Arc::new(LinkInner {
                config,
                state,
                frame_tx,
                outbound_tx,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                attempt_tx,
                started: StdMutex::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }

    /// Wait until the link is open.
    ///
    /// If the socket is already open this returns immediately. Otherwise it
    /// joins the single in-flight connection attempt — overlapping callers
    /// never open a second socket — and resolves with that attempt's
    /// outcome. A failed attempt rejects every joined caller while the
    /// background loop keeps retrying.
    pub async fn connect(&self) -> Result<(), LinkError> {
        if *self.inner.state.borrow() == LinkState::Open {
            return Ok(());
        }

        let mut outcome_rx = self.inner.attempt_tx.subscribe();
        self.ensure_started();

        // The attempt may have completed between the check and the subscribe.
        if *self.inner.state.borrow() == LinkState::Open {
            return Ok(());
        }

        loop {
            tokio::select! {
                biased;
                // The run loop exits on shutdown without announcing an
                // outcome, so waiters have to watch the token themselves.
                () = self.inner.cancel.cancelled() => {
                    return Err(LinkError::Closed {
                        reason: "link shut down".into(),
                    });
                }
                outcome = outcome_rx.recv() => match outcome {
                    Ok(ConnectOutcome::Opened) => return Ok(()),
                    Ok(ConnectOutcome::Failed(reason)) => {
                        return Err(LinkError::ConnectFailed(reason));
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(LinkError::Closed {
                            reason: "link shut down".into(),
                        });
                    }
                }
            }
        }
    }

    /// Serialize and write an envelope to the open socket.
    ///
    /// There is no implicit queueing: with no open socket the frame is
    /// dropped and a warning logged. Callers that need delivery guarantees
    /// await [`connect()`](Self::connect) before sending.
    pub fn send(&self, envelope: &Envelope) {
        if *self.inner.state.borrow() != LinkState::Open {
            warn!(command = %envelope.command, "dropping outbound command: link not open");
            return;
        }

        match serde_json::to_string(envelope) {
            Ok(text) => {
                if self.inner.outbound_tx.try_send(text).is_err() {
                    warn!(command = %envelope.command, "dropping outbound command: queue full");
                }
            }
            Err(e) => warn!(error = %e, "dropping unserializable envelope"),
        }
    }

    /// Subscribe to inbound frames. Subscriptions persist across
    /// reconnects; frames are delivered in transport order.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Envelope>> {
        self.inner.frame_tx.subscribe()
    }

    /// Observe socket lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<LinkState> {
        self.inner.state.subscribe()
    }

    /// Tear the link down. Pending reconnects stop; the socket closes.
    pub fn shutdown(&self) {
        self.inner.state.send_replace(LinkState::Closing);
        self.inner.cancel.cancel();
    }

    /// Spawn the reconnect loop exactly once.
    fn ensure_started(&self) {
        let mut started = self
            .inner
            .started
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *started {
            return;
        }
        *started = true;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_loop(inner).await;
        });
    }
}

impl Transport for DeviceLink {
    fn send(&self, envelope: &Envelope) {
        DeviceLink::send(self, envelope);
    }

    fn subscribe(&self) -> broadcast::Receiver<Arc<Envelope>> {
        DeviceLink::subscribe(self)
    }
}

// ── Background reconnect loop ────────────────────────────────────────

/// Main loop: connect → pump frames → on drop, wait the fixed delay →
/// reconnect. Runs until the link is shut down.
async fn run_loop(inner: Arc<LinkInner>) {
    let Some(mut outbound_rx) = inner.outbound_rx.lock().await.take() else {
        return; // second spawn guard; cannot happen via ensure_started
    };

    loop {
        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break,
            result = run_connection(&inner, &mut outbound_rx) => {
                inner.state.send_replace(LinkState::Disconnected);
                match result {
                    Ok(()) => info!("device link closed, reconnecting"),
                    Err(e) => warn!(error = %e, "device link error, reconnecting"),
                }

                tokio::select! {
                    biased;
                    _ = inner.cancel.cancelled() => break,
                    _ = tokio::time::sleep(inner.config.reconnect_delay) => {}
                }
            }
        }
    }

    inner.state.send_replace(LinkState::Disconnected);
    debug!("device link loop exiting");
}

/// One socket lifetime: dial, announce the outcome, then pump frames in
/// both directions until the socket drops.
async fn run_connection(
    inner: &LinkInner,
    outbound_rx: &mut mpsc::Receiver<String>,
) -> Result<(), LinkError> {
    // Frames accepted in the window where the previous socket was dying
    // must not ride over to this one.
    drain_stale_outbound(outbound_rx);

    inner.state.send_replace(LinkState::Connecting);
    info!(endpoint = %inner.config.endpoint, "connecting to device");

    let (ws_stream, _response) =
        match tokio_tungstenite::connect_async(inner.config.endpoint.as_str()).await {
            Ok(ok) => ok,
            Err(e) => {
                let _ = inner.attempt_tx.send(ConnectOutcome::Failed(e.to_string()));
                return Err(LinkError::ConnectFailed(e.to_string()));
            }
        };

    inner.state.send_replace(LinkState::Open);
    let _ = inner.attempt_tx.send(ConnectOutcome::Opened);
    info!("device link open");

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => {
                let _ = write.send(tungstenite::Message::Close(None)).await;
                return Ok(());
            }
            outbound = outbound_rx.recv() => {
                let Some(text) = outbound else { return Ok(()) };
                if let Err(e) = write.send(tungstenite::Message::Text(text.into())).await {
                    return Err(LinkError::Closed { reason: e.to_string() });
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        dispatch_frame(text.as_str(), &inner.frame_tx);
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite answers pongs automatically
                        trace!("device ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            info!(code = %cf.code, reason = %cf.reason, "device sent close frame");
                        } else {
                            info!("device sent close frame");
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(LinkError::Closed { reason: e.to_string() });
                    }
                    None => {
                        info!("device socket stream ended");
                        return Ok(());
                    }
                    _ => {
                        // Binary, Pong, Frame -- the device never sends these
                    }
                }
            }
        }
    }
}

/// Discard anything queued for a socket that no longer exists.
fn drain_stale_outbound(rx: &mut mpsc::Receiver<String>) {
    let mut dropped = 0_usize;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        warn!(dropped, "discarding outbound frames queued for a dead socket");
    }
}

/// Parse one inbound text frame and broadcast it. Unparseable frames are
/// logged and skipped; they never reach a matcher.
fn dispatch_frame(text: &str, frame_tx: &broadcast::Sender<Arc<Envelope>>) {
    match Envelope::parse(text) {
        Ok(envelope) => {
            // Send errors just mean no subscriber is listening right now.
            let _ = frame_tx.send(Arc::new(envelope));
        }
        Err(e) => {
            debug!(error = %e, "skipping unparseable device frame");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LinkConfig {
        LinkConfig::new("ws://127.0.0.1:9".parse().expect("static url"))
    }

    #[test]
    fn config_defaults() {
        let config = test_config();
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn link_starts_disconnected() {
        let link = DeviceLink::new(test_config());
        assert_eq!(*link.state().borrow(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn send_without_socket_is_dropped_not_queued() {
        let link = DeviceLink::new(test_config());
        link.send(&Envelope::full("read_state"));

        // Nothing may sit in the outbound queue waiting for a reconnect.
        let mut rx = link
            .inner
            .outbound_rx
            .lock()
            .await
            .take()
            .expect("receiver still in place");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispatch_skips_unparseable_frames() {
        let (tx, mut rx) = broadcast::channel::<Arc<Envelope>>(16);

        dispatch_frame("not an envelope", &tx);
        assert!(rx.try_recv().is_err());

        dispatch_frame(r#"{ "command": "ack", "scope": "full" }"#, &tx);
        let frame = rx.try_recv().expect("parseable frame broadcast");
        assert_eq!(frame.command, "ack");
    }

    #[tokio::test]
    async fn shutdown_moves_through_closing() {
        let link = DeviceLink::new(test_config());
        let mut state = link.state();
        link.shutdown();
        assert_eq!(*state.borrow_and_update(), LinkState::Closing);
    }

    #[tokio::test]
    async fn state_updates_stick_without_subscribers() {
        let link = DeviceLink::new(test_config());

        // No receiver existed when the state changed; a later subscriber
        // must still observe it.
        link.shutdown();
        assert_eq!(*link.state().borrow(), LinkState::Closing);
    }

    #[tokio::test]
    async fn connect_after_shutdown_returns_closed() {
        let link = DeviceLink::new(test_config());
        link.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(1), link.connect())
            .await
            .expect("connect() must not hang after shutdown");
        assert!(matches!(result, Err(LinkError::Closed { .. })));
    }

    #[tokio::test]
    async fn stale_outbound_frames_are_discarded() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.try_send("left over".to_owned()).expect("queue frame");
        tx.try_send("also left over".to_owned()).expect("queue frame");

        drain_stale_outbound(&mut rx);
        assert!(rx.try_recv().is_err());
    }
}
