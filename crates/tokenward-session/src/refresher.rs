//! One token refresh, start to finish.
//!
//! [`TokenRefresher::refresh`] asks the provider for a new token, decodes
//! its expiry and writes both into the store. It contains no concurrency
//! control; callers run it through a [`RefreshGate`](crate::RefreshGate).

use std::future::Future;
use std::sync::Arc;

use tokenward_provider::IdentityProvider;
use tokenward_token::{Token, decode_expiration};

use crate::{RefreshError, SessionStore};

/// Refreshes the token of whatever session is current.
#[derive(Debug)]
pub struct TokenRefresher<P> {
    provider: Arc<P>,
    store: SessionStore,
}

impl<P> Clone for TokenRefresher<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            store: self.store.clone(),
        }
    }
}

impl<P: IdentityProvider> TokenRefresher<P> {
    pub fn new(provider: Arc<P>, store: SessionStore) -> Self {
        Self { provider, store }
    }

    /// Performs one refresh.
    ///
    /// The returned future owns everything it needs, so it can be handed
    /// to [`RefreshGate::run`](crate::RefreshGate::run) and outlive the
    /// caller.
    ///
    /// # Errors
    /// - [`RefreshError::NoActiveIdentity`]: the store is empty, or the
    ///   provider no longer has the stored identity signed in.
    /// - [`RefreshError::RefreshFailed`]: the provider refused.
    /// - [`RefreshError::ProviderUnavailable`]: the provider couldn't be
    ///   reached.
    /// - [`RefreshError::UndecodableToken`]: the new token has no
    ///   readable expiry; nothing is stored.
    /// - [`RefreshError::Superseded`]: the session changed while the
    ///   provider was working; the new token is discarded.
    pub fn refresh(&self) -> impl Future<Output = Result<Token, RefreshError>> + Send + use<P> {
        let this = self.clone();
        async move { this.refresh_current().await }
    }

    async fn refresh_current(&self) -> Result<Token, RefreshError> {
        // The tag pins the refresh to the session it started for.
        let tag = self.store.tag().ok_or(RefreshError::NoActiveIdentity)?;
        let identity = self
            .provider
            .current_identity()
            .filter(|identity| identity.subject_id == tag.subject_id)
            .ok_or(RefreshError::NoActiveIdentity)?;

        let token = self.provider.get_token(&identity, true).await.inspect_err(|error| {
            tracing::warn!(subject_id = %tag.subject_id, %error, "identity provider refresh failed");
        })?;

        let expires_at = decode_expiration(token.as_str()).map_err(|error| {
            tracing::warn!(subject_id = %tag.subject_id, %error, "refreshed token has no readable expiry");
            RefreshError::UndecodableToken(error)
        })?;

        if !self.store.apply_refresh(&tag, token.clone(), expires_at) {
            tracing::debug!(
                subject_id = %tag.subject_id,
                generation = tag.generation,
                "session changed during refresh, discarding token"
            );
            return Err(RefreshError::Superseded);
        }
        Ok(token)
    }
}
