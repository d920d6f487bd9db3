//! Single-flight control over token refreshes.
//!
//! A scheduled timer, a request that just got a 401, and a "refresh now"
//! button can all decide to refresh at the same moment. The
//! [`RefreshGate`] makes sure only one of them actually talks to the
//! identity provider; the others wait for that attempt and get its
//! result.
//!
//! # How it works
//!
//! ```text
//! run(op) ──→ slot empty? ──yes──→ spawn op, store Shared handle ──┐
//!                 │                                                 ├──→ await handle
//!                 └──no───→ clone the stored Shared handle ────────┘
//!
//! op ends ──→ task clears the slot (only if it's still its own),
//!             whether it returned, panicked or was aborted
//! ```
//!
//! The operation runs on its own task, so it finishes (and frees the
//! slot) even if every caller stops waiting. The stored handle is a
//! [`Shared`] future, which is what lets any number of callers await one
//! result.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokenward_token::Token;

use crate::RefreshError;

type PendingRefresh = Shared<BoxFuture<'static, Result<Token, RefreshError>>>;

/// At-most-one in-flight refresh, shared by every caller.
///
/// Cheap to clone; clones share the slot. Each coordinator owns its own
/// gate, so two coordinators (or two tests) never block each other.
#[derive(Debug, Clone, Default)]
pub struct RefreshGate {
    slot: Arc<Mutex<Slot>>,
}

#[derive(Default)]
struct Slot {
    next_id: u64,
    in_flight: Option<(u64, PendingRefresh)>,
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("next_id", &self.next_id)
            .field("in_flight", &self.in_flight.as_ref().map(|(id, _)| id))
            .finish()
    }
}

impl RefreshGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `operation` unless a refresh is already in flight, in which
    /// case joins that one instead. Either way, returns the result of the
    /// attempt that was running.
    ///
    /// `operation` is only called when a new attempt starts. It is called
    /// while the gate is locked, so it must not call back into the gate;
    /// the future it returns runs unlocked on a spawned task.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn run<F, Fut>(&self, operation: F) -> Result<Token, RefreshError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Token, RefreshError>> + Send + 'static,
    {
        let pending = {
            let mut slot = lock(&self.slot);
            match &slot.in_flight {
                Some((id, pending)) => {
                    tracing::debug!(attempt = id, "refresh already in flight, joining it");
                    pending.clone()
                }
                None => {
                    slot.next_id += 1;
                    let id = slot.next_id;
                    let pending = self.start(id, operation());
                    slot.in_flight = Some((id, pending.clone()));
                    pending
                }
            }
        };
        pending.await
    }

    /// Whether a refresh is currently in flight.
    pub fn in_progress(&self) -> bool {
        lock(&self.slot).in_flight.is_some()
    }

    fn start<Fut>(&self, id: u64, refresh: Fut) -> PendingRefresh
    where
        Fut: Future<Output = Result<Token, RefreshError>> + Send + 'static,
    {
        tracing::debug!(attempt = id, "starting refresh");
        let release = Release {
            slot: Arc::clone(&self.slot),
            id,
        };
        let task = tokio::spawn(async move {
            // Dropped on completion, panic or abort alike.
            let _release = release;
            refresh.await
        });

        async move { task.await.unwrap_or(Err(RefreshError::Aborted)) }
            .boxed()
            .shared()
    }
}

/// Frees the slot for attempt `id` when dropped, unless a newer attempt
/// already owns it.
struct Release {
    slot: Arc<Mutex<Slot>>,
    id: u64,
}

impl Drop for Release {
    fn drop(&mut self) {
        let mut slot = lock(&self.slot);
        if slot.in_flight.as_ref().is_some_and(|(current, _)| *current == self.id) {
            slot.in_flight = None;
        }
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
