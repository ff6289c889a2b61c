//! The load-state gate.
//!
//! A process-wide binary signal with a single writer (the log tailer) and
//! any number of readers. Readers block on [`LoadGate::wait_until_idle`];
//! one flip back to Idle releases all of them at once. The writer never
//! blocks on the gate itself, so writer and readers cannot deadlock.
//!
//! One gate per monitored client instance is sufficient: only one load can
//! be in flight per client, so the signal is not scoped per artifact.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Whether the client is currently loading content.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    /// Safe to mutate artifact bytes.
    Idle,
    /// The client may be reading artifact files; hold all World patches.
    Loading,
}

/// Shared Idle/Loading signal. Cheap to clone; all clones observe the same
/// state.
#[derive(Clone)]
pub struct LoadGate {
    tx: Arc<watch::Sender<LoadState>>,
}

impl LoadGate {
    /// A new gate in the initial Idle state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tx: Arc::new(watch::channel(LoadState::Idle).0),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LoadState {
        *self.tx.borrow()
    }

    /// Flip the gate. No-op (and no wakeups) when the state is unchanged.
    pub fn set(&self, state: LoadState) {
        self.tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            info!("load gate: {:?} -> {:?}", *current, state);
            *current = state;
            true
        });
    }

    /// Force Idle, used when a new client session begins (a fresh session
    /// is assumed not to be mid-load).
    pub fn force_idle(&self) {
        self.set(LoadState::Idle);
    }

    /// Block until the gate reads Idle. Returns immediately when it
    /// already does.
    pub async fn wait_until_idle(&self) {
        let mut rx = self.tx.subscribe();
        // Cannot fail: this handle keeps the sender alive.
        let _ = rx.wait_for(|state| *state == LoadState::Idle).await;
        debug!("load gate released a waiter");
    }
}

impl Default for LoadGate {
    fn default() -> Self {
        Self::new()
    }
}
