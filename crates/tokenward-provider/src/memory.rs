//! An in-process identity provider for development and tests.
//!
//! [`MemoryIdentityProvider`] behaves like a real identity SDK from the
//! outside (push subscription, live identity, token minting) but is
//! scripted from the inside: tests and demos decide when someone signs
//! in, when the provider "blinks" and briefly reports nobody, and when
//! token requests fail or stall.
//!
//! Tokens are unsigned (`alg: none`) and carry `sub`, `iat` and `exp`
//! claims, so the expiration codec works on them unchanged.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::json;
use tokenward_token::{Token, encode_unsigned};
use tokio::sync::mpsc;

use crate::{AuthStateChange, AuthStateSubscription, Identity, IdentityProvider, ProviderError};

/// Token lifetime used by [`MemoryIdentityProvider::default`].
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Scripted identity provider. See the module docs.
#[derive(Debug)]
pub struct MemoryIdentityProvider {
    state: Mutex<MemoryState>,
    token_lifetime: Duration,
    token_requests: AtomicUsize,
    sign_out_calls: AtomicUsize,
}

#[derive(Debug, Default)]
struct MemoryState {
    identity: Option<Identity>,
    subscribers: Vec<mpsc::UnboundedSender<AuthStateChange>>,
    /// Returned by every token request while set.
    failure: Option<ProviderError>,
    /// How long a token request takes to resolve.
    delay: Duration,
    malformed: bool,
    cached: Option<Token>,
    minted: u64,
}

impl MemoryIdentityProvider {
    /// Creates a provider with nobody signed in, minting tokens valid
    /// for `token_lifetime`.
    pub fn new(token_lifetime: Duration) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            token_lifetime,
            token_requests: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
        }
    }

    /// Signs `identity` in and notifies subscribers.
    pub fn sign_in(&self, identity: Identity) {
        let mut state = self.lock();
        state.cached = None;
        state.identity = Some(identity.clone());
        emit(&mut state, AuthStateChange::SignedIn(identity));
    }

    /// Drops the current identity and notifies subscribers, the way an
    /// SDK does when its background session lapses for a moment.
    ///
    /// Unlike [`sign_out`](IdentityProvider::sign_out), this isn't counted
    /// as an explicit sign-out.
    pub fn lapse(&self) {
        let mut state = self.lock();
        state.identity = None;
        emit(&mut state, AuthStateChange::SignedOut);
    }

    /// Changes the live identity without notifying anyone.
    pub fn set_identity_quietly(&self, identity: Option<Identity>) {
        self.lock().identity = identity;
    }

    /// Makes every token request fail with `failure` (or succeed again
    /// with `None`).
    pub fn fail_token_requests(&self, failure: Option<ProviderError>) {
        self.lock().failure = failure;
    }

    /// Makes every token request take `delay` before resolving.
    pub fn set_token_delay(&self, delay: Duration) {
        self.lock().delay = delay;
    }

    /// Mint tokens that aren't `header.payload.signature` shaped.
    pub fn issue_malformed_tokens(&self, malformed: bool) {
        self.lock().malformed = malformed;
    }

    /// Number of [`get_token`](IdentityProvider::get_token) calls so far.
    pub fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }

    /// Number of explicit [`sign_out`](IdentityProvider::sign_out) calls.
    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mint(&self, state: &mut MemoryState, identity: &Identity) -> Token {
        state.minted += 1;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        if state.malformed {
            return Token::new(format!("opaque-{}", state.minted));
        }

        encode_unsigned(&json!({
            "sub": identity.subject_id.as_str(),
            "iat": now,
            "exp": now + self.token_lifetime.as_secs(),
            "n": state.minted,
        }))
    }
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_LIFETIME)
    }
}

impl IdentityProvider for MemoryIdentityProvider {
    fn subscribe(&self) -> AuthStateSubscription {
        let (tx, subscription) = AuthStateSubscription::channel();
        let mut state = self.lock();
        let current = AuthStateChange::from_identity(state.identity.clone());
        if tx.send(current).is_ok() {
            state.subscribers.push(tx);
        }
        subscription
    }

    fn current_identity(&self) -> Option<Identity> {
        self.lock().identity.clone()
    }

    async fn get_token(
        &self,
        identity: &Identity,
        force_refresh: bool,
    ) -> Result<Token, ProviderError> {
        self.token_requests.fetch_add(1, Ordering::SeqCst);

        let (delay, failure) = {
            let state = self.lock();
            let signed_in = state
                .identity
                .as_ref()
                .is_some_and(|current| current.subject_id == identity.subject_id);
            if !signed_in {
                return Err(ProviderError::NoActiveIdentity);
            }
            if !force_refresh {
                if let Some(cached) = &state.cached {
                    return Ok(cached.clone());
                }
            }
            (state.delay, state.failure.clone())
        };

        if let Some(failure) = failure {
            return Err(failure);
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        let token = self.mint(&mut state, identity);
        state.cached = Some(token.clone());
        Ok(token)
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        state.identity = None;
        state.cached = None;
        emit(&mut state, AuthStateChange::SignedOut);
        Ok(())
    }
}

/// Delivers `change` to every subscriber, forgetting the ones that left.
fn emit(state: &mut MemoryState, change: AuthStateChange) {
    state
        .subscribers
        .retain(|tx| tx.send(change.clone()).is_ok());
}
