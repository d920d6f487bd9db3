/// Errors reported by an [`IdentityProvider`](crate::IdentityProvider).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Nobody is signed in, or the identity asked about no longer is.
    #[error("no active identity")]
    NoActiveIdentity,

    /// The provider refused to issue a token (revoked session, disabled
    /// account, …). Retrying won't help.
    #[error("identity provider rejected the request: {0}")]
    Rejected(String),

    /// The provider couldn't be reached or failed internally.
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the backend session endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The request never got a response.
    #[error("backend request failed: {0}")]
    Request(String),

    /// The backend answered with a non-success status.
    #[error("backend returned status {0}")]
    Status(u16),

    /// The response body wasn't what the endpoint promises.
    #[error("backend response could not be decoded: {0}")]
    Decode(String),
}
