//! Identities and the auth-state stream.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokenward_token::SubjectId;
use tokio::sync::mpsc;

/// Provider id the password (email + password) method reports.
const PASSWORD_PROVIDER_ID: &str = "password";

/// How an identity can sign in.
///
/// Federated methods (Google, GitHub, …) prove ownership of the email
/// address as part of signing in; a password does not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignInMethod {
    /// Email and password.
    Password,
    /// Anything else, keyed by the provider's id (`"google.com"`, …).
    Federated(String),
}

impl SignInMethod {
    /// Maps a provider id as reported by the identity SDK.
    pub fn from_provider_id(id: &str) -> Self {
        if id == PASSWORD_PROVIDER_ID {
            Self::Password
        } else {
            Self::Federated(id.to_string())
        }
    }

    /// `true` for every method except [`SignInMethod::Password`].
    pub fn is_federated(&self) -> bool {
        matches!(self, Self::Federated(_))
    }
}

/// An identity as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable provider-issued identifier.
    pub subject_id: SubjectId,
    /// Email address, when the identity kind has one.
    pub email: Option<String>,
    /// Whether the provider has confirmed the email address.
    pub email_verified: bool,
    /// Sign-in methods linked to this identity.
    pub sign_in_methods: Vec<SignInMethod>,
    /// When the identity was created (informational).
    pub created_at: Option<SystemTime>,
    /// When the identity last signed in (informational).
    pub last_sign_in_at: Option<SystemTime>,
}

impl Identity {
    /// A bare identity with no email and no linked methods.
    pub fn new(subject_id: impl Into<SubjectId>) -> Self {
        Self {
            subject_id: subject_id.into(),
            email: None,
            email_verified: false,
            sign_in_methods: Vec::new(),
            created_at: None,
            last_sign_in_at: None,
        }
    }

    /// Sets the email address and its verification flag.
    pub fn with_email(mut self, email: impl Into<String>, verified: bool) -> Self {
        self.email = Some(email.into());
        self.email_verified = verified;
        self
    }

    /// Links another sign-in method.
    pub fn with_method(mut self, method: SignInMethod) -> Self {
        self.sign_in_methods.push(method);
        self
    }

    /// Whether at least one linked method is not a password.
    pub fn has_federated_method(&self) -> bool {
        self.sign_in_methods.iter().any(SignInMethod::is_federated)
    }
}

/// One item of the auth-state stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStateChange {
    /// The provider reports this identity as signed in.
    SignedIn(Identity),
    /// The provider reports nobody signed in. May be transient.
    SignedOut,
}

impl AuthStateChange {
    /// Builds the change that describes `identity`.
    pub fn from_identity(identity: Option<Identity>) -> Self {
        match identity {
            Some(identity) => Self::SignedIn(identity),
            None => Self::SignedOut,
        }
    }
}

/// Receiving end of an [`IdentityProvider::subscribe`](crate::IdentityProvider::subscribe) call.
///
/// Events arrive one at a time in the order the provider emitted them.
/// Dropping the subscription unsubscribes.
#[derive(Debug)]
pub struct AuthStateSubscription {
    receiver: mpsc::UnboundedReceiver<AuthStateChange>,
}

impl AuthStateSubscription {
    /// Creates a connected sender/subscription pair.
    ///
    /// Provider implementations keep the sender and push changes into it.
    pub fn channel() -> (mpsc::UnboundedSender<AuthStateChange>, Self) {
        let (tx, receiver) = mpsc::unbounded_channel();
        (tx, Self { receiver })
    }

    /// Waits for the next change. `None` once the provider has gone away.
    pub async fn next(&mut self) -> Option<AuthStateChange> {
        self.receiver.recv().await
    }
}
