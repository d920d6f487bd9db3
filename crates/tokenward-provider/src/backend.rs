//! The backend session endpoint.
//!
//! After every new sign-in the client tells the application backend who
//! just arrived, so the backend can mint or confirm its own user record.
//! The exchange is `POST /session/login { token, subjectId } → { userProfile }`.
//!
//! Backend sync is best-effort: Tokenward logs failures and keeps the
//! local session regardless.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokenward_token::{SubjectId, Token};

use crate::BackendError;

/// Whatever the backend returns about the user. Its shape belongs to the
/// application, so it stays untyped here.
pub type UserProfile = serde_json::Value;

/// Body of the login request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// The freshly issued identity token.
    pub token: Token,
    /// Who signed in.
    pub subject_id: SubjectId,
}

/// Response of the login request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginResponse {
    pub(crate) user_profile: UserProfile,
}

/// The application backend's session endpoint.
pub trait SessionBackend: Send + Sync + 'static {
    /// Registers a sign-in with the backend and returns the user profile.
    ///
    /// # Errors
    /// Any [`BackendError`]; callers log it and carry on.
    fn login(
        &self,
        request: &LoginRequest,
    ) -> impl Future<Output = Result<UserProfile, BackendError>> + Send;
}

/// A backend that accepts every sign-in and returns an empty profile.
///
/// For applications without a session endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBackend;

impl SessionBackend for NoopBackend {
    async fn login(&self, request: &LoginRequest) -> Result<UserProfile, BackendError> {
        tracing::trace!(subject_id = %request.subject_id, "no backend configured, skipping login sync");
        Ok(UserProfile::Null)
    }
}
