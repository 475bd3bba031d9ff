// ── Edit sessions ──
//
// The snapshot → mutate → commit-or-revert discipline every configuration
// modal follows. A session owns a deep copy of one config value; the
// authoritative tree entity is untouched until a commit's acknowledgement
// arrives, and a cancel discards the copy without any network interaction.

use std::future::Future;

use thiserror::Error;

/// Lifecycle of one editing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The copy is live and may be mutated.
    Editing,
    /// A commit is in flight; the copy is frozen from the session's point
    /// of view while the device acknowledgement is awaited.
    Saving,
    /// Committed or cancelled. The session is spent.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Editing => "editing",
            Self::Saving => "saving",
            Self::Closed => "closed",
        })
    }
}

/// Why a commit did not go through.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum CommitError<E> {
    /// The session was not open for editing (already committed, or a
    /// commit is in flight).
    #[error("session is {0}, not editing")]
    NotEditing(SessionState),

    /// The persist operation failed; the session stays open.
    #[error("{0}")]
    Persist(E),
}

/// A transient deep copy of a config value `T`, opened when a modal opens
/// and discarded when it closes -- whichever way it closes.
///
/// The session never aliases into the authoritative tree: callers apply the
/// value returned by [`commit`](Self::commit) themselves, after the device
/// has acknowledged it.
#[derive(Debug)]
pub struct EditSession<T: Clone> {
    snapshot: T,
    working: T,
    state: SessionState,
}

impl<T: Clone + PartialEq> EditSession<T> {
    /// Capture a structurally independent copy of `current` and start
    /// editing it.
    pub fn open(current: &T) -> Self {
        Self {
            snapshot: current.clone(),
            working: current.clone(),
            state: SessionState::Editing,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The working copy.
    pub fn get(&self) -> &T {
        &self.working
    }

    /// Mutable access to the working copy. All edits land here; nothing is
    /// visible outside the session until a commit succeeds.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.working
    }

    /// Whether the working copy differs from the opening snapshot.
    pub fn is_dirty(&self) -> bool {
        self.working != self.snapshot
    }

    /// Persist the working copy through `persist` (typically: serialize,
    /// send, await the acknowledgement).
    ///
    /// Only an `Editing` session can commit; a spent session is refused
    /// without invoking `persist`. On success the session closes and the
    /// committed value is returned for the caller to apply to the
    /// authoritative entity. On failure the session returns to `Editing`
    /// with the copy retained, so the user can retry or cancel; the
    /// authoritative entity is never touched here.
    pub async fn commit<F, Fut, E>(&mut self, persist: F) -> Result<T, CommitError<E>>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        if self.state != SessionState::Editing {
            return Err(CommitError::NotEditing(self.state));
        }

        self.state = SessionState::Saving;
        match persist(self.working.clone()).await {
            Ok(()) => {
                self.state = SessionState::Closed;
                Ok(self.working.clone())
            }
            Err(e) => {
                self.state = SessionState::Editing;
                Err(CommitError::Persist(e))
            }
        }
    }

    /// Discard the working copy. Returns the opening snapshot so sessions
    /// opened on a field of a larger still-live object can restore exactly
    /// the pre-edit value.
    pub fn cancel(mut self) -> T {
        self.state = SessionState::Closed;
        self.snapshot
    }
}

// ── Tests ────────────────────────────────────────────────────────────
