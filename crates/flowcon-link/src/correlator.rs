// ── Request correlator ──
//
// Turns "send a command and wait for its reply" into an awaitable call over
// the shared device link. Outbound commands are stamped with a correlation
// id; firmware that echoes the id resolves exactly one pending request.
// Legacy firmware echoes nothing, so id-less responses fall back to
// caller-supplied predicates over semantic fields -- in which case every
// pending matcher that accepts the frame resolves from it.
//
// A connection drop does not reject pending requests: each one waits out
// its own deadline. The only cancellation mechanism is the timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::Transport;
use crate::envelope::Envelope;
use crate::error::LinkError;

/// Default deadline for a correlated request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Predicate deciding whether an inbound frame answers a given request.
pub type Matcher = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;

// ── Pending request ──────────────────────────────────────────────────

/// One outbound command awaiting its reply. Removed from the active set
/// exactly once: by a matching frame or by its timeout.
struct PendingRequest {
    token: u64,
    correlation_id: Uuid,
    matcher: Matcher,
    reply_tx: oneshot::Sender<Arc<Envelope>>,
}

type PendingSet = Arc<Mutex<Vec<PendingRequest>>>;

// ── Correlator ───────────────────────────────────────────────────────

/// Request/response matching over a shared [`Transport`].
///
/// Any number of requests may be in flight at once; there is no queueing or
/// ordering between them. Each owns an independent timeout.
pub struct Correlator {
    transport: Arc<dyn Transport>,
    pending: PendingSet,
    next_token: AtomicU64,
    cancel: CancellationToken,
}

impl Correlator {
    /// Create a correlator and spawn its dispatch task. The subscription
    /// taken here outlives individual sockets, so reconnects do not
    /// interrupt dispatch.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let pending: PendingSet = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let rx = transport.subscribe();
        let task_pending = Arc::clone(&pending);
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            dispatch_task(rx, task_pending, task_cancel).await;
        });

        Self {
            transport,
            pending,
            next_token: AtomicU64::new(0),
            cancel,
        }
    }

    /// Send a command and await the frame that answers it.
    ///
    /// The envelope is validated, stamped with a fresh correlation id, and
    /// written to the link. Resolution happens on the first inbound frame
    /// that echoes the id, or -- for id-less responses -- the first one the
    /// `matcher` accepts. On timeout the pending entry is deregistered, so
    /// a late-arriving match has no observable effect.
    pub async fn send_and_wait(
        &self,
        mut envelope: Envelope,
        matcher: Matcher,
        timeout: Duration,
    ) -> Result<Arc<Envelope>, LinkError> {
        envelope.validate()?;

        let correlation_id = Uuid::new_v4();
        envelope.correlation_id = Some(correlation_id);

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();

        self.lock_pending().push(PendingRequest {
            token,
            correlation_id,
            matcher,
            reply_tx,
        });

        self.transport.send(&envelope);

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // The dispatch task dropped the sender: the correlator was shut
            // down underneath us.
            Ok(Err(_)) => Err(LinkError::Closed {
                reason: "correlator shut down".into(),
            }),
            Err(_) => {
                self.lock_pending().retain(|p| p.token != token);
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                debug!(command = %envelope.command, timeout_ms, "request timed out");
                Err(LinkError::Timeout { timeout_ms })
            }
        }
    }

    /// Number of requests currently awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Vec<PendingRequest>> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for Correlator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Dispatch task ────────────────────────────────────────────────────

/// Drain the inbound broadcast and resolve pending requests, in transport
/// order, until the correlator is dropped or the link goes away.
async fn dispatch_task(
    mut rx: broadcast::Receiver<Arc<Envelope>>,
    pending: PendingSet,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = rx.recv() => {
                match frame {
                    Ok(envelope) => resolve(&pending, &envelope),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "correlator lagged behind inbound traffic");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    // Dropping the entries drops their reply senders; awaiting callers
    // observe a closed channel instead of hanging past shutdown.
    pending
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clear();
}

/// Match one inbound frame against the pending set.
fn resolve(pending: &PendingSet, envelope: &Arc<Envelope>) {
    let mut guard = pending
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);

    // Echoed correlation id: resolve exactly the request that stamped it.
    // An id-bearing frame is never offered to other requests' predicates.
    if let Some(cid) = envelope.correlation_id {
        if let Some(idx) = guard.iter().position(|p| p.correlation_id == cid) {
            let entry = guard.swap_remove(idx);
            let _ = entry.reply_tx.send(Arc::clone(envelope));
        } else {
            debug!(correlation_id = %cid, command = %envelope.command,
                "unmatched correlated frame (late or unsolicited)");
        }
        return;
    }

    // Legacy path: every matcher that accepts the frame resolves from it.
    let mut idx = 0;
    while idx < guard.len() {
        if (guard[idx].matcher)(envelope) {
            let entry = guard.swap_remove(idx);
            let _ = entry.reply_tx.send(Arc::clone(envelope));
        } else {
            idx += 1;
        }
    }
}
