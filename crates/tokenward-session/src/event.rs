//! Session-changed notifications.

use std::time::SystemTime;

use tokenward_provider::UserProfile;
use tokenward_token::SubjectId;

use crate::Session;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    /// The user asked to log out.
    Logout,
    /// The identity provider reported nobody signed in (after the grace
    /// window, or immediately on a public route).
    ProviderSignedOut,
    /// The provider refused to refresh a current session's token.
    RefreshRejected,
    /// The signed-in identity turned out not to be eligible.
    Ineligible,
    /// A different identity signed in over the top of this one.
    IdentityChanged,
}

/// Everything the session layer announces.
///
/// Delivered over a `tokio::sync::broadcast` channel, so a slow
/// subscriber may observe `Lagged` and should re-read the store.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The store went from empty (or another identity) to this session.
    SignedIn(Session),
    /// The same identity signed in again and its session was rebuilt.
    SessionUpdated(Session),
    /// A refresh replaced the token.
    TokenRefreshed {
        subject_id: SubjectId,
        expires_at: SystemTime,
    },
    /// The store was cleared.
    SignedOut {
        subject_id: SubjectId,
        reason: SignOutReason,
    },
    /// An identity signed in but may not populate the store.
    IneligibleIdentity(SubjectId),
    /// An interactive sign-in ended without producing an identity.
    SignInCancelled,
    /// The backend confirmed the sign-in and returned its profile.
    BackendSynced {
        subject_id: SubjectId,
        profile: UserProfile,
    },
    /// The identity provider's first auth-state callback was processed.
    Initialized,
}
