//! Unified error type for Tokenward.

use tokenward_provider::{BackendError, ProviderError};
use tokenward_session::{RefreshError, SignInError};
use tokenward_token::TokenError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically, so application code can use this one type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenwardError {
    /// The token couldn't be decoded.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// A refresh didn't produce a token.
    #[error(transparent)]
    Refresh(#[from] RefreshError),

    /// The identity provider failed outside a refresh (e.g. sign-out).
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The backend session endpoint failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// An interactive sign-in produced no session.
    #[error(transparent)]
    SignIn(#[from] SignInError),
}
