//! External interfaces consumed by Tokenward.
//!
//! Tokenward doesn't authenticate anyone itself. It sits between two
//! collaborators and keeps them in sync:
//!
//! - the **identity provider** ([`IdentityProvider`]): the SDK that owns
//!   sign-in, pushes auth-state changes, and mints tokens;
//! - the **backend** ([`SessionBackend`]): the application server that
//!   wants to hear about every new sign-in.
//!
//! Both are traits so production code, development fakes
//! ([`MemoryIdentityProvider`]) and test mocks plug in the same way.
//!
//! # Feature Flags
//!
//! - `http` (default): [`HttpSessionBackend`] via `reqwest`

#![allow(async_fn_in_trait)]

mod backend;
mod error;
#[cfg(feature = "http")]
mod http;
mod identity;
mod memory;

pub use backend::{LoginRequest, NoopBackend, SessionBackend, UserProfile};
pub use error::{BackendError, ProviderError};
#[cfg(feature = "http")]
pub use http::HttpSessionBackend;
pub use identity::{AuthStateChange, AuthStateSubscription, Identity, SignInMethod};
pub use memory::MemoryIdentityProvider;

use std::future::Future;

use tokenward_token::Token;

/// The identity provider SDK, as seen from Tokenward.
///
/// # Trait bounds
///
/// `Send + Sync + 'static` because one provider instance is shared
/// (behind an `Arc`) by the auth-state bridge task, the refresh
/// scheduler task and whatever UI code calls the coordinator.
///
/// The async methods spell out `impl Future + Send` instead of using
/// `async fn` so that generic callers can move those futures into
/// spawned tasks. Implementations are still free to write `async fn`.
pub trait IdentityProvider: Send + Sync + 'static {
    /// Starts listening for auth-state changes.
    ///
    /// The provider must deliver the *current* state as the first item,
    /// which is how the coordinator learns it has finished initializing.
    /// Dropping the returned subscription unsubscribes.
    fn subscribe(&self) -> AuthStateSubscription;

    /// The identity the provider considers signed in right now, if any.
    ///
    /// This is a live read, not a cached copy of the last event: the
    /// sign-out grace window relies on it to re-check the provider after
    /// waiting.
    fn current_identity(&self) -> Option<Identity>;

    /// Returns a token for `identity`.
    ///
    /// With `force_refresh = false` the provider may hand back a cached
    /// token that is still valid; with `true` it must mint a new one.
    ///
    /// # Errors
    /// - [`ProviderError::NoActiveIdentity`]: `identity` is no longer
    ///   signed in (common while a sign-out is in progress).
    /// - [`ProviderError::Rejected`]: the provider refused, e.g. because
    ///   the session was revoked.
    /// - [`ProviderError::Unavailable`]: transport trouble.
    fn get_token(
        &self,
        identity: &Identity,
        force_refresh: bool,
    ) -> impl Future<Output = Result<Token, ProviderError>> + Send;

    /// Signs the current identity out of the provider.
    fn sign_out(&self) -> impl Future<Output = Result<(), ProviderError>> + Send;
}
