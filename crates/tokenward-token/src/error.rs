//! Error types for the token layer.
//!
//! Decoding never panics and never returns a bare string: callers branch
//! on the variant to decide whether to fall back (scheduler) or reject
//! the token outright (refresher).

/// Errors that can occur while reading a token's payload.
///
/// `Clone` + `PartialEq` because these errors end up inside refresh
/// results that are shared between several waiters and compared in
/// tests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// The token doesn't have the `header.payload.signature` shape, or
    /// its payload segment isn't base64url-encoded JSON.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The payload decoded fine but has no usable numeric `exp` claim.
    #[error("token payload has no numeric expiration claim")]
    MissingExpirationClaim,
}
