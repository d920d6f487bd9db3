//! The one path every refresh takes.
//!
//! Scheduled, reactive and manual refreshes all come through
//! [`RefreshPath::gated_refresh`]: through the coordinator's
//! [`RefreshGate`], into the [`TokenRefresher`], and past the
//! rejected-refresh policy on the way out. The scheduler reaches it
//! through the [`RefreshTarget`] impl.

use std::sync::Arc;

use tokenward_provider::IdentityProvider;
use tokenward_schedule::{AttemptOutcome, Expiry, RefreshTarget};
use tokenward_session::{
    RefreshError, RefreshGate, SessionStore, SessionTag, SignOutReason, TokenRefresher,
};
use tokenward_token::Token;

pub(crate) struct RefreshPath<P> {
    store: SessionStore,
    gate: RefreshGate,
    refresher: TokenRefresher<P>,
    provider: Arc<P>,
}

impl<P: IdentityProvider> RefreshPath<P> {
    pub(crate) fn new(provider: Arc<P>, store: SessionStore) -> Self {
        Self {
            refresher: TokenRefresher::new(Arc::clone(&provider), store.clone()),
            gate: RefreshGate::new(),
            store,
            provider,
        }
    }

    pub(crate) fn gate(&self) -> &RefreshGate {
        &self.gate
    }

    /// Refreshes through the gate.
    ///
    /// A [`RefreshError::RefreshFailed`] for a session that is still
    /// current ends it: the provider no longer honours the credential.
    /// Every other failure, [`RefreshError::ProviderUnavailable`]
    /// included, leaves the session alone for the scheduler to retry.
    pub(crate) async fn gated_refresh(&self) -> Result<Token, RefreshError> {
        let tag = self.store.tag();
        let result = self.gate.run(|| self.refresher.refresh()).await;

        if let (Err(RefreshError::RefreshFailed(reason)), Some(tag)) = (&result, tag) {
            self.reject(&tag, reason);
        }
        result
    }

    fn reject(&self, tag: &SessionTag, reason: &str) {
        // Every caller that joined the failed attempt lands here; only the
        // first one finds the tag current.
        if !self.store.clear_tagged(tag, SignOutReason::RefreshRejected) {
            return;
        }
        tracing::warn!(subject_id = %tag.subject_id, %reason, "refresh rejected, signing out");

        let provider = Arc::clone(&self.provider);
        tokio::spawn(async move {
            if let Err(error) = provider.sign_out().await {
                tracing::warn!(%error, "identity provider sign-out failed");
            }
        });
    }
}

impl<P: IdentityProvider> RefreshTarget for RefreshPath<P> {
    fn expiry(&self) -> Expiry {
        match self.store.current() {
            None => Expiry::NoSession,
            Some(session) => session.token_expires_at().map_or(Expiry::Unknown, Expiry::At),
        }
    }

    async fn refresh(&self) -> AttemptOutcome {
        match self.gated_refresh().await {
            Ok(_) => AttemptOutcome::Refreshed,
            Err(error) => {
                tracing::debug!(%error, "scheduled refresh did not produce a token");
                AttemptOutcome::Failed
            }
        }
    }
}
