//! Integration tests for the in-memory identity provider.
//!
//! The rest of the workspace leans on this provider as its fake SDK, so
//! these tests pin down the behaviour the other crates' tests assume:
//! the subscription replays the current state first, lapses are not
//! counted as sign-outs, and token requests honour injected delays and
//! failures.

use std::time::{Duration, SystemTime};

use tokenward_provider::{
    AuthStateChange, Identity, IdentityProvider, MemoryIdentityProvider, ProviderError,
    SignInMethod,
};
use tokenward_token::decode_expiration;

fn alice() -> Identity {
    Identity::new("alice")
        .with_email("alice@example.com", true)
        .with_method(SignInMethod::Password)
}

// =========================================================================
// Subscription
// =========================================================================

#[tokio::test]
async fn test_subscribe_delivers_current_state_first() {
    let provider = MemoryIdentityProvider::default();
    provider.sign_in(alice());

    let mut sub = provider.subscribe();

    assert_eq!(sub.next().await, Some(AuthStateChange::SignedIn(alice())));
}

#[tokio::test]
async fn test_subscribe_with_nobody_signed_in_delivers_signed_out() {
    let provider = MemoryIdentityProvider::default();

    let mut sub = provider.subscribe();

    assert_eq!(sub.next().await, Some(AuthStateChange::SignedOut));
}

#[tokio::test]
async fn test_lapse_emits_signed_out_without_counting_sign_out() {
    let provider = MemoryIdentityProvider::default();
    provider.sign_in(alice());
    let mut sub = provider.subscribe();
    let _ = sub.next().await;

    provider.lapse();

    assert_eq!(sub.next().await, Some(AuthStateChange::SignedOut));
    assert!(provider.current_identity().is_none());
    assert_eq!(provider.sign_out_calls(), 0);
}

#[tokio::test]
async fn test_dropped_subscription_is_forgotten() {
    let provider = MemoryIdentityProvider::default();
    let sub = provider.subscribe();
    assert_eq!(provider.subscriber_count(), 1);

    drop(sub);

    assert_eq!(provider.subscriber_count(), 0);
}

// =========================================================================
// Tokens
// =========================================================================

#[tokio::test]
async fn test_get_token_mints_decodable_token_with_configured_lifetime() {
    let provider = MemoryIdentityProvider::new(Duration::from_secs(600));
    provider.sign_in(alice());
    let before = SystemTime::now();

    let token = provider.get_token(&alice(), true).await.unwrap();

    let exp = decode_expiration(token.as_str()).expect("minted token should decode");
    let lifetime = exp.duration_since(before).unwrap();
    assert!(
        lifetime > Duration::from_secs(590) && lifetime <= Duration::from_secs(601),
        "unexpected lifetime {lifetime:?}"
    );
}

#[tokio::test]
async fn test_get_token_without_force_reuses_cached_token() {
    let provider = MemoryIdentityProvider::default();
    provider.sign_in(alice());

    let first = provider.get_token(&alice(), false).await.unwrap();
    let second = provider.get_token(&alice(), false).await.unwrap();
    let forced = provider.get_token(&alice(), true).await.unwrap();

    assert_eq!(first, second);
    assert_ne!(first, forced);
    assert_eq!(provider.token_requests(), 3);
}

#[tokio::test]
async fn test_get_token_for_signed_out_identity_is_no_active_identity() {
    let provider = MemoryIdentityProvider::default();

    let result = provider.get_token(&alice(), true).await;

    assert_eq!(result, Err(ProviderError::NoActiveIdentity));
}

#[tokio::test]
async fn test_get_token_injected_failure_is_returned() {
    let provider = MemoryIdentityProvider::default();
    provider.sign_in(alice());
    provider.fail_token_requests(Some(ProviderError::Rejected("revoked".into())));

    let result = provider.get_token(&alice(), true).await;

    assert_eq!(result, Err(ProviderError::Rejected("revoked".into())));
}

#[tokio::test(start_paused = true)]
async fn test_get_token_injected_delay_is_honoured() {
    let provider = MemoryIdentityProvider::default();
    provider.sign_in(alice());
    provider.set_token_delay(Duration::from_secs(5));
    let start = tokio::time::Instant::now();

    provider.get_token(&alice(), true).await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(5));
}

#[tokio::test]
async fn test_malformed_tokens_do_not_decode() {
    let provider = MemoryIdentityProvider::default();
    provider.sign_in(alice());
    provider.issue_malformed_tokens(true);

    let token = provider.get_token(&alice(), true).await.unwrap();

    assert!(decode_expiration(token.as_str()).is_err());
}

#[tokio::test]
async fn test_sign_out_clears_identity_and_notifies() {
    let provider = MemoryIdentityProvider::default();
    provider.sign_in(alice());
    let mut sub = provider.subscribe();
    let _ = sub.next().await;

    provider.sign_out().await.unwrap();

    assert_eq!(sub.next().await, Some(AuthStateChange::SignedOut));
    assert_eq!(provider.sign_out_calls(), 1);
    assert!(provider.current_identity().is_none());
}
