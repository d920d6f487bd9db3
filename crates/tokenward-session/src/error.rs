//! Error types for the session layer.

use tokenward_provider::ProviderError;
use tokenward_token::{SubjectId, TokenError};

/// Why a refresh didn't produce a token.
///
/// `Clone` because one refresh result is handed to every caller that
/// joined the same in-flight attempt through the
/// [`RefreshGate`](crate::RefreshGate).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    /// Nothing to refresh: the store is empty, or the identity provider no
    /// longer considers the stored identity signed in.
    ///
    /// Expected while a sign-out is in progress. Callers treat it as
    /// "no token", never as a reason to log the user out.
    #[error("no active identity to refresh")]
    NoActiveIdentity,

    /// The identity provider refused to issue a new token. For a session
    /// that is still current this ends the session.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// The identity provider couldn't be reached. The session is kept and
    /// the scheduler tries again on its next cycle.
    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider returned a token whose expiration can't be read. The
    /// token is not stored, so the session keeps its previous expiry.
    #[error("refreshed token is undecodable: {0}")]
    UndecodableToken(#[source] TokenError),

    /// The session the refresh was started for ended (or was replaced)
    /// before the new token arrived. The token was discarded.
    #[error("session changed while the refresh was in flight")]
    Superseded,

    /// The refresh task was cancelled or panicked before it finished.
    #[error("refresh was aborted")]
    Aborted,
}

impl From<ProviderError> for RefreshError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NoActiveIdentity => Self::NoActiveIdentity,
            ProviderError::Rejected(reason) => Self::RefreshFailed(reason),
            ProviderError::Unavailable(reason) => Self::ProviderUnavailable(reason),
        }
    }
}

/// User-facing outcomes of an interactive sign-in that didn't produce a
/// session. These are states to render, not failures to retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignInError {
    /// Email unverified and no federated sign-in method linked.
    #[error("identity {0} is not eligible: email unverified and no federated sign-in method")]
    IneligibleIdentity(SubjectId),

    /// The user abandoned the interactive flow.
    #[error("sign-in was cancelled")]
    SignInCancelled,
}
