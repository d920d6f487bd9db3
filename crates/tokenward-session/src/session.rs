//! Session types: what the client knows about whoever is signed in.
//!
//! A [`Session`] is built once per eligible sign-in and afterwards only
//! its token changes. The expiry is always derived from the token it sits
//! next to, so the two are only ever replaced together.

use std::time::{Duration, SystemTime};

use tokenward_provider::Identity;
use tokenward_token::{SubjectId, Token, decode_expiration};

use crate::SignInError;

// ---------------------------------------------------------------------------
// Eligibility
// ---------------------------------------------------------------------------

/// Whether `identity` may populate the session store.
///
/// Eligible iff the email is verified **or** at least one linked sign-in
/// method is federated. Federated providers prove email ownership as part
/// of signing in, a bare password doesn't.
pub fn is_eligible(identity: &Identity) -> bool {
    identity.email_verified || identity.has_federated_method()
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The authenticated identity as known to Tokenward.
///
/// Fields are private: a session can only be created through
/// [`Session::establish`], which applies the eligibility rule, and its
/// token can only be swapped by the store together with a fresh expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    subject_id: SubjectId,
    email: Option<String>,
    token: Token,
    /// `None` when the sign-in token's expiry couldn't be decoded. The
    /// scheduler then falls back to a fixed interval.
    token_expires_at: Option<SystemTime>,
    email_verified: bool,
    created_at: Option<SystemTime>,
    last_sign_in_at: Option<SystemTime>,
}

impl Session {
    /// Builds the session for a freshly signed-in identity.
    ///
    /// An undecodable token doesn't prevent the session; it just leaves
    /// the expiry unknown.
    ///
    /// # Errors
    /// [`SignInError::IneligibleIdentity`] if `identity` fails
    /// [`is_eligible`].
    pub fn establish(identity: &Identity, token: Token) -> Result<Self, SignInError> {
        if !is_eligible(identity) {
            return Err(SignInError::IneligibleIdentity(identity.subject_id.clone()));
        }

        let token_expires_at = match decode_expiration(token.as_str()) {
            Ok(at) => Some(at),
            Err(error) => {
                tracing::warn!(
                    subject_id = %identity.subject_id,
                    %error,
                    "sign-in token expiry unreadable, refresh will use the fallback interval"
                );
                None
            }
        };

        Ok(Self {
            subject_id: identity.subject_id.clone(),
            email: identity.email.clone(),
            token,
            token_expires_at,
            email_verified: identity.email_verified,
            created_at: identity.created_at,
            last_sign_in_at: identity.last_sign_in_at,
        })
    }

    /// The identity provider's stable ID for this user.
    pub fn subject_id(&self) -> &SubjectId {
        &self.subject_id
    }

    /// Email address, if the identity has one.
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// The current credential. Refreshes replace it in place.
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// When [`token`](Self::token) expires. `None` if its payload had no
    /// readable expiry.
    pub fn token_expires_at(&self) -> Option<SystemTime> {
        self.token_expires_at
    }

    /// Whether the provider has verified the email address.
    pub fn email_verified(&self) -> bool {
        self.email_verified
    }

    /// When the identity was created, as reported by the provider.
    pub fn created_at(&self) -> Option<SystemTime> {
        self.created_at
    }

    /// The identity's last sign-in, as reported by the provider.
    pub fn last_sign_in_at(&self) -> Option<SystemTime> {
        self.last_sign_in_at
    }

    /// Time left on the token as of `now`. `None` if the expiry is
    /// unknown, zero if it has already passed.
    pub fn expires_in(&self, now: SystemTime) -> Option<Duration> {
        self.token_expires_at
            .map(|at| at.duration_since(now).unwrap_or_default())
    }

    /// `true` if the token is known to expire within `window` of `now`.
    /// An unknown expiry counts as not expiring.
    pub fn is_expiring_within(&self, window: Duration, now: SystemTime) -> bool {
        self.expires_in(now).is_some_and(|left| left <= window)
    }

    /// Swaps in a refreshed token and the expiry decoded from it.
    pub(crate) fn replace_token(&mut self, token: Token, expires_at: SystemTime) {
        self.token = token;
        self.token_expires_at = Some(expires_at);
    }
}

// ---------------------------------------------------------------------------
// SessionTag
// ---------------------------------------------------------------------------

/// Identifies one continuous sign-in.
///
/// The generation increases every time the store goes from empty (or a
/// different subject) to a session, so signing the same person out and
/// back in yields a new tag. Refreshes carry the tag they started with
/// and are discarded if it is no longer current when they finish.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionTag {
    pub subject_id: SubjectId,
    pub generation: u64,
}
