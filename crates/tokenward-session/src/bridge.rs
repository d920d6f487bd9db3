//! Reconciles the identity provider's auth-state stream into the store.
//!
//! # Policy
//!
//! ```text
//! provider event           store / route              action
//! ──────────────────────── ────────────────────────── ─────────────────────────────────
//! identity, eligible       any                        fetch token, set session
//! identity, ineligible     any                        clear store, report ineligible
//! nobody                   empty, or public route     clear immediately
//! nobody                   session + protected route  open grace window, re-check after
//! ```
//!
//! The grace window absorbs the brief "nobody signed in" flips identity
//! SDKs emit around token refreshes. When it closes the bridge asks the
//! provider again (a live read, not the last event) and only clears the
//! store if the identity is still gone. An identity event arriving while
//! the window is open closes it early.
//!
//! Events are handled one at a time in arrival order, on one task.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokenward_provider::{
    AuthStateChange, AuthStateSubscription, Identity, IdentityProvider, LoginRequest,
    SessionBackend,
};
use tokenward_token::{SubjectId, Token};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::{
    BridgeConfig, Session, SessionEvent, SessionStore, SessionTag, SignInError, SignOutReason,
    is_eligible,
};

// ---------------------------------------------------------------------------
// Public state types
// ---------------------------------------------------------------------------

/// What a UI should render.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    /// The provider hasn't reported yet. Show a spinner, not a login page.
    Initializing,
    /// Definitely nobody signed in.
    SignedOut,
    /// Someone signed in but must verify their email first.
    Ineligible(SubjectId),
    /// Signed in.
    SignedIn(Session),
}

/// How an interactive sign-in flow ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SignInOutcome {
    SignedIn(Session),
    Ineligible(SubjectId),
    Cancelled,
}

impl SignInOutcome {
    /// The session, or the user-facing reason there isn't one.
    pub fn into_result(self) -> Result<Session, SignInError> {
        match self {
            Self::SignedIn(session) => Ok(session),
            Self::Ineligible(subject_id) => Err(SignInError::IneligibleIdentity(subject_id)),
            Self::Cancelled => Err(SignInError::SignInCancelled),
        }
    }
}

/// Bridge-owned state that isn't part of the session itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeStatus {
    /// At least one auth-state event has been handled.
    pub initialized: bool,
    /// The provider's current identity, if it is signed in but ineligible.
    pub ineligible: Option<SubjectId>,
}

// ---------------------------------------------------------------------------
// IdentityStateBridge
// ---------------------------------------------------------------------------

/// Subscribes to an [`IdentityProvider`] and keeps a [`SessionStore`] in
/// line with it.
///
/// Nothing happens until [`start`](Self::start). Dropping the bridge
/// stops it.
pub struct IdentityStateBridge<P, B> {
    inner: Arc<BridgeInner<P, B>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct BridgeInner<P, B> {
    provider: Arc<P>,
    backend: Arc<B>,
    store: SessionStore,
    config: BridgeConfig,
    /// `None` until a route is reported. An unknown route is protected.
    route: Mutex<Option<String>>,
    grace: Mutex<Option<JoinHandle<()>>>,
    status: watch::Sender<BridgeStatus>,
}

impl<P: IdentityProvider, B: SessionBackend> IdentityStateBridge<P, B> {
    pub fn new(provider: Arc<P>, backend: Arc<B>, store: SessionStore, config: BridgeConfig) -> Self {
        let (status, _) = watch::channel(BridgeStatus::default());
        Self {
            inner: Arc::new(BridgeInner {
                provider,
                backend,
                store,
                config: config.validated(),
                route: Mutex::new(None),
                grace: Mutex::new(None),
                status,
            }),
            task: Mutex::new(None),
        }
    }

    /// Subscribes to the provider and starts handling events. Calling it
    /// again while running does nothing.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let subscription = self.inner.provider.subscribe();
        *task = Some(tokio::spawn(run(Arc::clone(&self.inner), subscription)));
        debug!("identity-state bridge started");
    }

    /// Unsubscribes and cancels any open grace window.
    pub fn stop(&self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        self.inner.cancel_grace();
    }

    /// Closes an open grace window without acting on it. Returns whether
    /// one was open.
    pub fn cancel_grace(&self) -> bool {
        self.inner.cancel_grace()
    }

    /// Whether a grace window is currently open.
    pub fn grace_pending(&self) -> bool {
        lock(&self.inner.grace)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Records the route the application is showing.
    pub fn set_route(&self, path: impl Into<String>) {
        let path = path.into();
        debug!(route = %path, "route changed");
        *lock(&self.inner.route) = Some(path);
    }

    /// The last route reported through [`set_route`](Self::set_route).
    pub fn route(&self) -> Option<String> {
        lock(&self.inner.route).clone()
    }

    /// `true` until the provider's first auth-state event was handled.
    pub fn is_initializing(&self) -> bool {
        !self.inner.status.borrow().initialized
    }

    /// Initialization and eligibility state.
    pub fn status(&self) -> BridgeStatus {
        self.inner.status.borrow().clone()
    }

    /// A receiver that sees every change to [`BridgeStatus`].
    pub fn watch_status(&self) -> watch::Receiver<BridgeStatus> {
        self.inner.status.subscribe()
    }

    /// The validated configuration in use.
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// The combined view of the store and the bridge.
    pub fn auth_state(&self) -> AuthState {
        let status = self.status();
        if !status.initialized {
            return AuthState::Initializing;
        }
        match (self.inner.store.current(), status.ineligible) {
            (Some(session), _) => AuthState::SignedIn(session),
            (None, Some(subject_id)) => AuthState::Ineligible(subject_id),
            (None, None) => AuthState::SignedOut,
        }
    }

    /// Reports that an interactive sign-in flow (popup, redirect) ended.
    ///
    /// Waits up to `sign_in_cancel_timeout` for the flow's identity to
    /// reach the store. If nothing arrives the flow counts as cancelled:
    /// a [`SessionEvent::SignInCancelled`] is published and
    /// [`SignInOutcome::Cancelled`] returned.
    pub async fn interactive_flow_ended(&self) -> SignInOutcome {
        let mut snapshots = self.inner.store.watch();
        let mut status = self.inner.status.subscribe();
        let deadline = time::sleep(self.inner.config.sign_in_cancel_timeout);
        tokio::pin!(deadline);

        loop {
            let session = snapshots.borrow_and_update().session.clone();
            if let Some(session) = session {
                return SignInOutcome::SignedIn(session);
            }
            let ineligible = status.borrow_and_update().ineligible.clone();
            if let Some(subject_id) = ineligible {
                return SignInOutcome::Ineligible(subject_id);
            }

            tokio::select! {
                () = &mut deadline => break,
                changed = snapshots.changed() => if changed.is_err() { break },
                changed = status.changed() => if changed.is_err() { break },
            }
        }

        info!("interactive sign-in ended without an identity");
        self.inner.store.notify(SessionEvent::SignInCancelled);
        SignInOutcome::Cancelled
    }
}

impl<P, B> Drop for IdentityStateBridge<P, B> {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        if let Some(grace) = lock(&self.inner.grace).take() {
            grace.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Event handling
// ---------------------------------------------------------------------------

async fn run<P: IdentityProvider, B: SessionBackend>(
    inner: Arc<BridgeInner<P, B>>,
    mut subscription: AuthStateSubscription,
) {
    while let Some(change) = subscription.next().await {
        match change {
            AuthStateChange::SignedIn(identity) => inner.identity_present(identity).await,
            AuthStateChange::SignedOut => inner.identity_absent(),
        }
        inner.mark_initialized();
    }
    debug!("auth-state subscription closed");
}

impl<P: IdentityProvider, B: SessionBackend> BridgeInner<P, B> {
    async fn identity_present(self: &Arc<Self>, identity: Identity) {
        if self.cancel_grace() {
            info!(subject_id = %identity.subject_id, "identity back within grace window, keeping session");
        }

        if !is_eligible(&identity) {
            info!(
                subject_id = %identity.subject_id,
                "identity not eligible: email unverified and no federated sign-in method"
            );
            self.store.clear(SignOutReason::Ineligible);
            self.set_ineligible(Some(identity.subject_id.clone()));
            self.store
                .notify(SessionEvent::IneligibleIdentity(identity.subject_id));
            return;
        }
        self.set_ineligible(None);

        // A logout while the token is on its way must win.
        let clears_seen = self.store.clears();
        let token = match self.provider.get_token(&identity, false).await {
            Ok(token) => token,
            Err(error) => {
                warn!(subject_id = %identity.subject_id, %error, "could not obtain token for signed-in identity");
                return;
            }
        };
        let session = match Session::establish(&identity, token) {
            Ok(session) => session,
            Err(error) => {
                warn!(%error, "identity rejected while establishing session");
                return;
            }
        };

        let previous = self.store.tag();
        let token = session.token().clone();
        let Some(tag) = self.store.set_unless_cleared(session, clears_seen) else {
            return;
        };
        if previous.as_ref() != Some(&tag) {
            self.sync_backend(tag, token);
        }
    }

    fn identity_absent(self: &Arc<Self>) {
        self.set_ineligible(None);

        let Some(tag) = self.store.tag() else {
            debug!("provider reports nobody signed in, store already empty");
            return;
        };

        let route = lock(&self.route).clone();
        let public = route
            .as_deref()
            .is_some_and(|path| self.config.is_public_route(path));
        if public || self.config.grace_window.is_zero() {
            self.cancel_grace();
            self.store.clear(SignOutReason::ProviderSignedOut);
            return;
        }

        let mut grace = lock(&self.grace);
        if grace.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!(subject_id = %tag.subject_id, "identity still absent, grace window already open");
            return;
        }
        info!(
            subject_id = %tag.subject_id,
            grace_ms = self.config.grace_window.as_millis() as u64,
            route = route.as_deref().unwrap_or("<unknown>"),
            "identity absent on protected route, waiting out grace window"
        );
        *grace = Some(tokio::spawn(confirm_sign_out(Arc::clone(self), tag)));
    }

    /// Posts the new sign-in to the backend on its own task. Failures are
    /// logged and otherwise ignored.
    fn sync_backend(self: &Arc<Self>, tag: SessionTag, token: Token) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let request = LoginRequest {
                token,
                subject_id: tag.subject_id.clone(),
            };
            match inner.backend.login(&request).await {
                Ok(profile) if inner.store.is_current(&tag) => {
                    debug!(subject_id = %tag.subject_id, "backend session confirmed");
                    inner.store.notify(SessionEvent::BackendSynced {
                        subject_id: tag.subject_id,
                        profile,
                    });
                }
                Ok(_) => {
                    debug!(subject_id = %tag.subject_id, "sign-in ended before backend confirmed it");
                }
                Err(error) => {
                    warn!(subject_id = %tag.subject_id, %error, "backend session sync failed, keeping local session");
                }
            }
        });
    }
}

impl<P, B> BridgeInner<P, B> {
    fn cancel_grace(&self) -> bool {
        match lock(&self.grace).take() {
            Some(task) if !task.is_finished() => {
                task.abort();
                true
            }
            _ => false,
        }
    }

    fn set_ineligible(&self, subject_id: Option<SubjectId>) {
        self.status.send_if_modified(|status| {
            if status.ineligible == subject_id {
                return false;
            }
            status.ineligible = subject_id;
            true
        });
    }

    fn mark_initialized(&self) {
        let first = self.status.send_if_modified(|status| {
            let first = !status.initialized;
            status.initialized = true;
            first
        });
        if first {
            info!("identity provider reported initial auth state");
            self.store.notify(SessionEvent::Initialized);
        }
    }
}

/// Body of the grace-window task.
async fn confirm_sign_out<P: IdentityProvider, B>(inner: Arc<BridgeInner<P, B>>, tag: SessionTag) {
    time::sleep(inner.config.grace_window).await;

    if inner.provider.current_identity().is_some() {
        info!(subject_id = %tag.subject_id, "identity reappeared within grace window, keeping session");
        return;
    }
    info!(subject_id = %tag.subject_id, "identity still absent after grace window, signing out");
    inner.store.clear_tagged(&tag, SignOutReason::ProviderSignedOut);
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_result_maps_outcomes_to_sign_in_errors() {
        assert_eq!(
            SignInOutcome::Ineligible(SubjectId::new("bob")).into_result(),
            Err(SignInError::IneligibleIdentity(SubjectId::new("bob")))
        );
        assert_eq!(
            SignInOutcome::Cancelled.into_result(),
            Err(SignInError::SignInCancelled)
        );
    }
}
