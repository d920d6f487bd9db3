//! The session store: who is signed in right now.
//!
//! Holds at most one [`Session`]. Readers get cheap snapshots through a
//! `tokio::sync::watch` channel; every mutation is also announced as a
//! [`SessionEvent`] on a broadcast channel.
//!
//! # Mutation entry points
//!
//! | Method            | Caller                    | Effect                               |
//! |-------------------|---------------------------|--------------------------------------|
//! | [`set`]           | identity-state bridge     | install / rebuild the session        |
//! | [`set_unless_cleared`] | identity-state bridge | same, unless a clear happened since  |
//! | [`apply_refresh`] | token refresher           | swap token + expiry, if tag matches  |
//! | [`clear`]         | bridge, logout            | empty the store                      |
//! | [`clear_tagged`]  | refresh-failure policy    | empty the store, if tag matches      |
//!
//! [`set`]: SessionStore::set
//! [`set_unless_cleared`]: SessionStore::set_unless_cleared
//! [`apply_refresh`]: SessionStore::apply_refresh
//! [`clear`]: SessionStore::clear
//! [`clear_tagged`]: SessionStore::clear_tagged

use std::sync::Arc;
use std::time::SystemTime;

use tokenward_token::{SubjectId, Token};
use tokio::sync::{broadcast, watch};

use crate::{Session, SessionEvent, SessionTag, SignOutReason};

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// The store's contents at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    /// The current session, if any.
    pub session: Option<Session>,
    /// Sign-in counter. Survives a clear so the next sign-in gets a new
    /// number.
    pub generation: u64,
    /// Number of clears so far, counting clears of an already empty store.
    pub clears: u64,
}

impl StoreSnapshot {
    /// The tag of the current session, if any.
    pub fn tag(&self) -> Option<SessionTag> {
        self.session.as_ref().map(|session| SessionTag {
            subject_id: session.subject_id().clone(),
            generation: self.generation,
        })
    }
}

/// Shared handle to the session store. Clones refer to the same store.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    state: watch::Sender<StoreSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl SessionStore {
    /// Creates an empty store whose event channel buffers up to
    /// `event_capacity` events per subscriber (minimum 1).
    pub fn new(event_capacity: usize) -> Self {
        let (state, _) = watch::channel(StoreSnapshot::default());
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            inner: Arc::new(StoreInner { state, events }),
        }
    }

    // -- Reads ----------------------------------------------------------

    /// The current session, if any.
    pub fn current(&self) -> Option<Session> {
        self.inner.state.borrow().session.clone()
    }

    /// The tag of the current session, if any.
    pub fn tag(&self) -> Option<SessionTag> {
        self.inner.state.borrow().tag()
    }

    /// The current session together with the store's counters.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.state.borrow().clone()
    }

    /// How many times the store has been cleared. Pass it to
    /// [`set_unless_cleared`](Self::set_unless_cleared) after an await.
    pub fn clears(&self) -> u64 {
        self.inner.state.borrow().clears
    }

    /// Whether `tag` still names the current session.
    pub fn is_current(&self, tag: &SessionTag) -> bool {
        self.tag().as_ref() == Some(tag)
    }

    /// A receiver that always sees the latest snapshot.
    pub fn watch(&self) -> watch::Receiver<StoreSnapshot> {
        self.inner.state.subscribe()
    }

    /// Subscribes to session events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    // -- Mutations ------------------------------------------------------

    /// Installs `session` and returns its tag.
    ///
    /// - Empty store → new generation, [`SessionEvent::SignedIn`].
    /// - Same subject already stored → same generation,
    ///   [`SessionEvent::SessionUpdated`].
    /// - Different subject stored → that session is signed out with
    ///   [`SignOutReason::IdentityChanged`], then as for an empty store.
    pub fn set(&self, session: Session) -> SessionTag {
        let mut change = Install::default();
        self.inner.state.send_modify(|snapshot| {
            change = install(snapshot, &session);
        });
        self.announce(session, change)
    }

    /// Like [`set`](Self::set), but does nothing and returns `None` if the
    /// store was cleared after [`clears`](Self::clears) returned
    /// `clears_seen`.
    ///
    /// A sign-in that had to wait for its token uses this, so a logout
    /// during the wait isn't undone when the token arrives.
    pub fn set_unless_cleared(&self, session: Session, clears_seen: u64) -> Option<SessionTag> {
        let mut change = None;
        self.inner.state.send_if_modified(|snapshot| {
            if snapshot.clears != clears_seen {
                return false;
            }
            change = Some(install(snapshot, &session));
            true
        });

        match change {
            Some(change) => Some(self.announce(session, change)),
            None => {
                tracing::debug!(subject_id = %session.subject_id(), "store cleared while sign-in was pending, dropping it");
                None
            }
        }
    }

    fn announce(&self, session: Session, change: Install) -> SessionTag {
        if let Some(subject_id) = change.replaced {
            tracing::info!(%subject_id, "session replaced by a different identity");
            self.notify(SessionEvent::SignedOut {
                subject_id,
                reason: SignOutReason::IdentityChanged,
            });
        }

        let tag = SessionTag {
            subject_id: session.subject_id().clone(),
            generation: change.generation,
        };
        if change.fresh {
            tracing::info!(subject_id = %tag.subject_id, generation = tag.generation, "session established");
            self.notify(SessionEvent::SignedIn(session));
        } else {
            tracing::debug!(subject_id = %tag.subject_id, "session updated");
            self.notify(SessionEvent::SessionUpdated(session));
        }
        tag
    }

    /// Replaces the token of the session named by `tag`.
    ///
    /// Returns `false` (and changes nothing) if `tag` is no longer current,
    /// which is how a refresh that raced a logout gets dropped.
    pub fn apply_refresh(&self, tag: &SessionTag, token: Token, expires_at: SystemTime) -> bool {
        let applied = self.inner.state.send_if_modified(|snapshot| {
            if snapshot.tag().as_ref() != Some(tag) {
                return false;
            }
            match snapshot.session.as_mut() {
                Some(session) => {
                    session.replace_token(token, expires_at);
                    true
                }
                None => false,
            }
        });

        if applied {
            tracing::debug!(subject_id = %tag.subject_id, "token refreshed");
            self.notify(SessionEvent::TokenRefreshed {
                subject_id: tag.subject_id.clone(),
                expires_at,
            });
        }
        applied
    }

    /// Empties the store. Returns the session that was removed, if any.
    ///
    /// Clearing an empty store does nothing and emits nothing, so a
    /// session is signed out exactly once however many paths race to
    /// end it.
    pub fn clear(&self, reason: SignOutReason) -> Option<Session> {
        let mut removed = None;
        self.inner.state.send_if_modified(|snapshot| {
            snapshot.clears += 1;
            removed = snapshot.session.take();
            removed.is_some()
        });

        if let Some(session) = &removed {
            tracing::info!(subject_id = %session.subject_id(), ?reason, "session cleared");
            self.notify(SessionEvent::SignedOut {
                subject_id: session.subject_id().clone(),
                reason,
            });
        }
        removed
    }

    /// Like [`clear`](Self::clear), but only if `tag` is still current.
    pub fn clear_tagged(&self, tag: &SessionTag, reason: SignOutReason) -> bool {
        let mut removed = None;
        self.inner.state.send_if_modified(|snapshot| {
            if snapshot.tag().as_ref() != Some(tag) {
                return false;
            }
            snapshot.clears += 1;
            removed = snapshot.session.take();
            removed.is_some()
        });

        match removed {
            Some(session) => {
                tracing::info!(subject_id = %session.subject_id(), ?reason, "session cleared");
                self.notify(SessionEvent::SignedOut {
                    subject_id: session.subject_id().clone(),
                    reason,
                });
                true
            }
            None => false,
        }
    }

    /// Publishes an event that isn't tied to a store mutation.
    pub fn notify(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

/// What [`install`] did to the snapshot.
#[derive(Default)]
struct Install {
    fresh: bool,
    replaced: Option<SubjectId>,
    generation: u64,
}

fn install(snapshot: &mut StoreSnapshot, session: &Session) -> Install {
    let mut change = Install::default();
    match &snapshot.session {
        Some(current) if current.subject_id() == session.subject_id() => {}
        Some(current) => {
            change.replaced = Some(current.subject_id().clone());
            change.fresh = true;
        }
        None => change.fresh = true,
    }
    if change.fresh {
        snapshot.generation += 1;
    }
    snapshot.session = Some(session.clone());
    change.generation = snapshot.generation;
    change
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokenward_provider::Identity;
    use tokenward_token::{SubjectId, encode_unsigned};
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;

    fn session(subject: &str) -> Session {
        let identity = Identity::new(subject).with_email(format!("{subject}@example.com"), true);
        let token = encode_unsigned(&json!({ "sub": subject, "exp": 4_000_000_000u64 }));
        Session::establish(&identity, token).unwrap()
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(secs)
    }

    // =====================================================================
    // set()
    // =====================================================================

    #[test]
    fn test_set_on_empty_store_starts_new_generation() {
        let store = SessionStore::default();
        let mut events = store.subscribe();

        let tag = store.set(session("alice"));

        assert_eq!(tag.generation, 1);
        assert_eq!(store.current().unwrap().subject_id().as_str(), "alice");
        assert!(matches!(events.try_recv(), Ok(SessionEvent::SignedIn(_))));
    }

    #[test]
    fn test_set_same_subject_keeps_generation() {
        let store = SessionStore::default();
        let first = store.set(session("alice"));
        let mut events = store.subscribe();

        let second = store.set(session("alice"));

        assert_eq!(first, second);
        assert!(matches!(events.try_recv(), Ok(SessionEvent::SessionUpdated(_))));
    }

    #[test]
    fn test_set_different_subject_signs_previous_out() {
        let store = SessionStore::default();
        store.set(session("alice"));
        let mut events = store.subscribe();

        let tag = store.set(session("bob"));

        assert_eq!(tag.generation, 2);
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::SignedOut {
                subject_id: SubjectId::new("alice"),
                reason: SignOutReason::IdentityChanged,
            }
        );
        assert!(matches!(events.try_recv(), Ok(SessionEvent::SignedIn(_))));
    }

    #[test]
    fn test_sign_in_after_clear_gets_new_tag() {
        let store = SessionStore::default();
        let first = store.set(session("alice"));
        store.clear(SignOutReason::Logout);

        let second = store.set(session("alice"));

        assert_ne!(first, second);
        assert!(!store.is_current(&first));
    }

    #[test]
    fn test_set_unless_cleared_installs_when_nothing_cleared() {
        let store = SessionStore::default();
        let seen = store.clears();

        let tag = store.set_unless_cleared(session("alice"), seen);

        assert_eq!(tag.map(|t| t.generation), Some(1));
        assert!(store.current().is_some());
    }

    #[test]
    fn test_set_unless_cleared_after_clear_of_empty_store_is_dropped() {
        let store = SessionStore::default();
        let seen = store.clears();
        let mut events = store.subscribe();

        store.clear(SignOutReason::Logout);
        let tag = store.set_unless_cleared(session("alice"), seen);

        assert_eq!(tag, None);
        assert!(store.current().is_none());
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_set_unless_cleared_after_tagged_clear_is_dropped() {
        let store = SessionStore::default();
        let first = store.set(session("alice"));
        let seen = store.clears();

        assert!(store.clear_tagged(&first, SignOutReason::RefreshRejected));

        assert_eq!(store.set_unless_cleared(session("alice"), seen), None);
        assert!(store.current().is_none());
    }

    // =====================================================================
    // apply_refresh()
    // =====================================================================

    #[test]
    fn test_apply_refresh_with_current_tag_swaps_token() {
        let store = SessionStore::default();
        let tag = store.set(session("alice"));

        let applied = store.apply_refresh(&tag, Token::new("fresh"), at(99));

        assert!(applied);
        let current = store.current().unwrap();
        assert_eq!(current.token().as_str(), "fresh");
        assert_eq!(current.token_expires_at(), Some(at(99)));
    }

    #[test]
    fn test_apply_refresh_with_stale_tag_is_discarded() {
        let store = SessionStore::default();
        let stale = store.set(session("alice"));
        store.clear(SignOutReason::Logout);
        store.set(session("alice"));
        let before = store.current();
        let mut events = store.subscribe();

        let applied = store.apply_refresh(&stale, Token::new("late"), at(99));

        assert!(!applied);
        assert_eq!(store.current(), before);
        assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_apply_refresh_on_empty_store_is_discarded() {
        let store = SessionStore::default();
        let tag = store.set(session("alice"));
        store.clear(SignOutReason::Logout);

        assert!(!store.apply_refresh(&tag, Token::new("late"), at(99)));
        assert!(store.current().is_none());
    }

    // =====================================================================
    // clear() / clear_tagged()
    // =====================================================================

    #[test]
    fn test_clear_emits_signed_out_exactly_once() {
        let store = SessionStore::default();
        store.set(session("alice"));
        let mut events = store.subscribe();

        assert!(store.clear(SignOutReason::ProviderSignedOut).is_some());
        assert!(store.clear(SignOutReason::ProviderSignedOut).is_none());

        assert!(matches!(
            events.try_recv(),
            Ok(SessionEvent::SignedOut {
                reason: SignOutReason::ProviderSignedOut,
                ..
            })
        ));
        assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_clear_tagged_ignores_stale_tag() {
        let store = SessionStore::default();
        let stale = store.set(session("alice"));
        store.set(session("bob"));

        assert!(!store.clear_tagged(&stale, SignOutReason::RefreshRejected));
        assert_eq!(store.current().unwrap().subject_id().as_str(), "bob");
    }

    #[test]
    fn test_clear_tagged_with_current_tag_clears() {
        let store = SessionStore::default();
        let tag = store.set(session("alice"));

        assert!(store.clear_tagged(&tag, SignOutReason::RefreshRejected));
        assert!(store.current().is_none());
    }

    // =====================================================================
    // watch()
    // =====================================================================

    #[tokio::test]
    async fn test_watch_sees_transitions() {
        let store = SessionStore::default();
        let mut rx = store.watch();

        store.set(session("alice"));
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().session.is_some());

        store.clear(SignOutReason::Logout);
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().session.is_none());
    }

    #[test]
    fn test_zero_capacity_is_bumped_to_one() {
        let store = SessionStore::new(0);
        let mut events = store.subscribe();

        store.notify(SessionEvent::Initialized);

        assert_eq!(events.try_recv(), Ok(SessionEvent::Initialized));
    }
}
