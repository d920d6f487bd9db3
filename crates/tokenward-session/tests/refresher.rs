//! Integration tests for the token refresher and the refresh gate,
//! driven by the in-memory identity provider.

use std::sync::Arc;
use std::time::Duration;

use tokenward_provider::{Identity, IdentityProvider, MemoryIdentityProvider, ProviderError};
use tokenward_session::{
    RefreshError, RefreshGate, Session, SessionEvent, SessionStore, SignOutReason, TokenRefresher,
};
use tokenward_token::decode_expiration;

// =========================================================================
// Helpers
// =========================================================================

fn alice() -> Identity {
    Identity::new("alice").with_email("alice@example.com", true)
}

/// Provider with alice signed in and a store holding her session.
async fn signed_in() -> (Arc<MemoryIdentityProvider>, SessionStore) {
    let provider = Arc::new(MemoryIdentityProvider::default());
    provider.sign_in(alice());
    let token = provider.get_token(&alice(), false).await.unwrap();

    let store = SessionStore::default();
    store.set(Session::establish(&alice(), token).unwrap());
    (provider, store)
}

// =========================================================================
// TokenRefresher
// =========================================================================

#[tokio::test]
async fn test_refresh_updates_token_and_expiry_together() {
    let (provider, store) = signed_in().await;
    let before = store.current().unwrap();
    let mut events = store.subscribe();
    let refresher = TokenRefresher::new(Arc::clone(&provider), store.clone());

    let token = refresher.refresh().await.expect("refresh should succeed");

    let after = store.current().unwrap();
    assert_ne!(after.token(), before.token());
    assert_eq!(after.token(), &token);
    assert_eq!(
        after.token_expires_at(),
        Some(decode_expiration(token.as_str()).unwrap())
    );
    assert!(matches!(
        events.try_recv(),
        Ok(SessionEvent::TokenRefreshed { .. })
    ));
}

#[tokio::test]
async fn test_refresh_with_empty_store_is_no_active_identity() {
    let provider = Arc::new(MemoryIdentityProvider::default());
    provider.sign_in(alice());
    let refresher = TokenRefresher::new(Arc::clone(&provider), SessionStore::default());

    assert_eq!(refresher.refresh().await, Err(RefreshError::NoActiveIdentity));
    assert_eq!(provider.token_requests(), 0);
}

#[tokio::test]
async fn test_refresh_after_provider_lapse_is_no_active_identity() {
    let (provider, store) = signed_in().await;
    provider.set_identity_quietly(None);
    let refresher = TokenRefresher::new(provider, store.clone());

    assert_eq!(refresher.refresh().await, Err(RefreshError::NoActiveIdentity));
    assert!(store.current().is_some(), "a lapse alone must not end the session");
}

#[tokio::test]
async fn test_refresh_rejected_by_provider_is_refresh_failed() {
    let (provider, store) = signed_in().await;
    let before = store.current();
    provider.fail_token_requests(Some(ProviderError::Rejected("revoked".into())));
    let refresher = TokenRefresher::new(provider, store.clone());

    let result = refresher.refresh().await;

    assert!(matches!(result, Err(RefreshError::RefreshFailed(_))), "got {result:?}");
    assert_eq!(store.current(), before);
}

#[tokio::test]
async fn test_refresh_unreachable_provider_is_transient() {
    let (provider, store) = signed_in().await;
    let before = store.current();
    provider.fail_token_requests(Some(ProviderError::Unavailable("timeout".into())));
    let refresher = TokenRefresher::new(provider, store.clone());

    let result = refresher.refresh().await;

    assert_eq!(result, Err(RefreshError::ProviderUnavailable("timeout".into())));
    assert_eq!(store.current(), before);
}

#[tokio::test]
async fn test_refresh_undecodable_token_keeps_previous_expiry() {
    let (provider, store) = signed_in().await;
    let before = store.current();
    provider.issue_malformed_tokens(true);
    let refresher = TokenRefresher::new(provider, store.clone());

    let result = refresher.refresh().await;

    assert!(matches!(result, Err(RefreshError::UndecodableToken(_))), "got {result:?}");
    assert_eq!(store.current(), before);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_resolving_after_sign_out_is_superseded() {
    let (provider, store) = signed_in().await;
    provider.set_token_delay(Duration::from_secs(5));
    let refresher = TokenRefresher::new(provider, store.clone());

    let in_flight = tokio::spawn(refresher.refresh());
    tokio::time::sleep(Duration::from_secs(1)).await;
    store.clear(SignOutReason::Logout);

    assert_eq!(in_flight.await.unwrap(), Err(RefreshError::Superseded));
    assert!(store.current().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_resolving_after_re_sign_in_is_superseded() {
    let (provider, store) = signed_in().await;
    provider.set_token_delay(Duration::from_secs(5));
    let refresher = TokenRefresher::new(Arc::clone(&provider), store.clone());

    let in_flight = tokio::spawn(refresher.refresh());
    tokio::time::sleep(Duration::from_secs(1)).await;
    let replacement = store.current().unwrap();
    store.clear(SignOutReason::Logout);
    store.set(replacement.clone());

    assert_eq!(in_flight.await.unwrap(), Err(RefreshError::Superseded));
    assert_eq!(store.current(), Some(replacement));
}

// =========================================================================
// RefreshGate + TokenRefresher
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_gated_refreshes_hit_provider_once() {
    let (provider, store) = signed_in().await;
    provider.set_token_delay(Duration::from_secs(2));
    let requests_before = provider.token_requests();
    let refresher = TokenRefresher::new(Arc::clone(&provider), store.clone());
    let gate = RefreshGate::new();

    let (a, b, c) = tokio::join!(
        gate.run(|| refresher.refresh()),
        gate.run(|| refresher.refresh()),
        gate.run(|| refresher.refresh()),
    );

    assert_eq!(provider.token_requests() - requests_before, 1);
    assert!(a.is_ok());
    assert_eq!(a, b);
    assert_eq!(b, c);
    assert_eq!(store.current().unwrap().token(), &a.unwrap());
}
