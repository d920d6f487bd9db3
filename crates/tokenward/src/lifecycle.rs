//! `SessionLifecycle` builder and supervisor.
//!
//! This is the entry point applications use. It ties the layers
//! together: provider → bridge → store → scheduler → gate → refresher →
//! store.
//!
//! # Lifecycle
//!
//! ```text
//! build() ──→ start() ──→ … ──→ logout() ──→ … ──→ shutdown() / drop
//!                │                  │
//!                │                  └─ disarm, close grace window, clear store,
//!                │                     then tell the provider
//!                └─ bridge subscribes, supervisor arms the scheduler whenever
//!                   a new sign-in lands and disarms it when the store empties
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use tokenward_provider::{IdentityProvider, NoopBackend, SessionBackend};
use tokenward_schedule::{RefreshScheduler, ScheduleConfig, ScheduleMetrics, SchedulerState};
use tokenward_session::{
    AuthState, BridgeConfig, IdentityStateBridge, RefreshError, Session, SessionEvent,
    SessionStore, SessionTag, SignInOutcome, SignOutReason, StoreSnapshot,
};
use tokenward_token::Token;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::TokenwardError;
use crate::config::LifecycleConfig;
use crate::target::RefreshPath;

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a [`SessionLifecycle`].
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tokenward::prelude::*;
///
/// # async fn demo() {
/// let provider = Arc::new(MemoryIdentityProvider::default());
/// let lifecycle = SessionLifecycle::builder(provider)
///     .bridge_config(BridgeConfig::default())
///     .build();
/// lifecycle.start();
/// # }
/// ```
pub struct SessionLifecycleBuilder<P, B> {
    provider: Arc<P>,
    backend: Arc<B>,
    config: LifecycleConfig,
}

impl<P: IdentityProvider, B: SessionBackend> SessionLifecycleBuilder<P, B> {
    /// Sets the backend the bridge reports new sign-ins to. Defaults to
    /// [`NoopBackend`].
    pub fn backend<B2: SessionBackend>(self, backend: Arc<B2>) -> SessionLifecycleBuilder<P, B2> {
        SessionLifecycleBuilder {
            provider: self.provider,
            backend,
            config: self.config,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: LifecycleConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the refresh scheduler's configuration.
    pub fn schedule_config(mut self, config: ScheduleConfig) -> Self {
        self.config.schedule = config;
        self
    }

    /// Replaces the identity-state bridge's configuration.
    pub fn bridge_config(mut self, config: BridgeConfig) -> Self {
        self.config.bridge = config;
        self
    }

    /// Wires everything up. Nothing runs until
    /// [`start`](SessionLifecycle::start).
    pub fn build(self) -> SessionLifecycle<P, B> {
        let config = self.config.validated();
        let store = SessionStore::new(config.event_capacity);
        let path = Arc::new(RefreshPath::new(Arc::clone(&self.provider), store.clone()));
        let scheduler = Arc::new(RefreshScheduler::new(
            Arc::clone(&path),
            config.schedule.clone(),
        ));
        let bridge = IdentityStateBridge::new(
            Arc::clone(&self.provider),
            self.backend,
            store.clone(),
            config.bridge.clone(),
        );

        SessionLifecycle {
            provider: self.provider,
            store,
            path,
            scheduler,
            bridge,
            config,
            supervisor: Mutex::new(None),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionLifecycle
// ---------------------------------------------------------------------------

/// Keeps one identity token valid and in sync with application state.
///
/// Owns the session store, the refresh gate, the scheduler and the
/// identity-state bridge. Every refresh entry point
/// ([`force_refresh`](Self::force_refresh),
/// [`refresh_after_failure`](Self::refresh_after_failure),
/// [`access_token`](Self::access_token) and the scheduler) goes through
/// the same gate.
pub struct SessionLifecycle<P: IdentityProvider, B: SessionBackend> {
    provider: Arc<P>,
    store: SessionStore,
    path: Arc<RefreshPath<P>>,
    scheduler: Arc<RefreshScheduler<RefreshPath<P>>>,
    bridge: IdentityStateBridge<P, B>,
    config: LifecycleConfig,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl<P: IdentityProvider> SessionLifecycle<P, NoopBackend> {
    /// Starts building a lifecycle around `provider`.
    pub fn builder(provider: Arc<P>) -> SessionLifecycleBuilder<P, NoopBackend> {
        SessionLifecycleBuilder {
            provider,
            backend: Arc::new(NoopBackend),
            config: LifecycleConfig::default(),
        }
    }
}

impl<P: IdentityProvider, B: SessionBackend> SessionLifecycle<P, B> {
    /// Subscribes to the provider and starts supervising the scheduler.
    /// Calling it again while running does nothing.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut supervisor = lock(&self.supervisor);
        if supervisor.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        self.bridge.start();
        *supervisor = Some(tokio::spawn(supervise(
            self.store.watch(),
            Arc::clone(&self.scheduler),
        )));
        tracing::info!("session lifecycle started");
    }

    /// Stops every task and timer. The store keeps its contents.
    pub fn shutdown(&self) {
        if let Some(task) = lock(&self.supervisor).take() {
            task.abort();
        }
        self.bridge.stop();
        self.scheduler.disarm();
        tracing::info!("session lifecycle stopped");
    }

    // -- Reads ----------------------------------------------------------

    /// The signed-in session, or `None`.
    pub fn current_session(&self) -> Option<Session> {
        self.store.current()
    }

    /// `true` until the identity provider's first auth-state callback has
    /// been handled.
    pub fn is_initializing(&self) -> bool {
        self.bridge.is_initializing()
    }

    /// What the UI should render right now.
    pub fn auth_state(&self) -> AuthState {
        self.bridge.auth_state()
    }

    /// Session-changed notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.store.subscribe()
    }

    /// Latest-value view of the store.
    pub fn watch(&self) -> watch::Receiver<StoreSnapshot> {
        self.store.watch()
    }

    /// What the refresh scheduler is doing.
    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Refresh attempt counters since the lifecycle was built.
    pub fn schedule_metrics(&self) -> ScheduleMetrics {
        self.scheduler.metrics()
    }

    /// Whether a refresh is in flight right now.
    pub fn refresh_in_progress(&self) -> bool {
        self.path.gate().in_progress()
    }

    /// The validated configuration in use.
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    // -- Refreshing -----------------------------------------------------

    /// Refreshes now, joining a refresh that is already in flight.
    ///
    /// # Errors
    /// Any [`RefreshError`]. A [`RefreshError::RefreshFailed`] also ends
    /// the session; a [`RefreshError::ProviderUnavailable`] does not.
    pub async fn force_refresh(&self) -> Result<Token, RefreshError> {
        self.path.gated_refresh().await
    }

    /// For a caller whose request was just rejected as unauthenticated.
    ///
    /// Like [`force_refresh`](Self::force_refresh), except that having
    /// nobody to refresh for is `Ok(None)` rather than an error: that
    /// happens routinely while a sign-out is in progress.
    pub async fn refresh_after_failure(&self) -> Result<Option<Token>, RefreshError> {
        match self.path.gated_refresh().await {
            Ok(token) => Ok(Some(token)),
            Err(RefreshError::NoActiveIdentity) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// A token to put on the next request, or `None` if nobody is signed
    /// in.
    ///
    /// Refreshes first if the current token expires within the
    /// immediate-refresh threshold.
    pub async fn access_token(&self) -> Result<Option<Token>, RefreshError> {
        let Some(session) = self.store.current() else {
            return Ok(None);
        };
        let threshold = self.scheduler.config().immediate_threshold;
        if !session.is_expiring_within(threshold, SystemTime::now()) {
            return Ok(Some(session.token().clone()));
        }

        tracing::debug!(subject_id = %session.subject_id(), "token about to expire, refreshing before use");
        self.refresh_after_failure().await
    }

    // -- Sign-in / sign-out ---------------------------------------------

    /// Logs the user out.
    ///
    /// The scheduler is disarmed, any grace window closed and the store
    /// cleared before this first yields, so a refresh that resolves
    /// afterwards finds its session gone and is discarded.
    ///
    /// # Errors
    /// [`TokenwardError::Provider`] if the provider's sign-out fails. The
    /// local session is gone either way.
    pub async fn logout(&self) -> Result<(), TokenwardError> {
        self.scheduler.disarm();
        self.bridge.cancel_grace();
        self.store.clear(SignOutReason::Logout);

        self.provider.sign_out().await?;
        Ok(())
    }

    /// Reports the route the application is showing. Decides whether an
    /// absent identity is a sign-out right away or gets a grace window.
    pub fn set_route(&self, path: impl Into<String>) {
        self.bridge.set_route(path);
    }

    /// Reports that an interactive sign-in flow ended. See
    /// [`IdentityStateBridge::interactive_flow_ended`].
    pub async fn interactive_flow_ended(&self) -> SignInOutcome {
        self.bridge.interactive_flow_ended().await
    }
}

impl<P: IdentityProvider, B: SessionBackend> Drop for SessionLifecycle<P, B> {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.supervisor).take() {
            task.abort();
        }
        self.scheduler.disarm();
    }
}

/// Arms the scheduler for every new sign-in and disarms it when the store
/// empties. Token refreshes keep the tag, so they don't re-arm: the
/// scheduler re-plans on its own after each attempt.
async fn supervise<P: IdentityProvider>(
    mut snapshots: watch::Receiver<StoreSnapshot>,
    scheduler: Arc<RefreshScheduler<RefreshPath<P>>>,
) {
    let mut armed_for: Option<SessionTag> = None;
    loop {
        let tag = snapshots.borrow_and_update().tag();
        if tag != armed_for {
            match &tag {
                Some(tag) => {
                    tracing::debug!(subject_id = %tag.subject_id, generation = tag.generation, "arming refresh scheduler");
                    scheduler.arm();
                }
                None => scheduler.disarm(),
            }
            armed_for = tag;
        }
        if snapshots.changed().await.is_err() {
            break;
        }
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
