//! HTTP session backend using `reqwest`.

use crate::backend::LoginResponse;
use crate::{BackendError, LoginRequest, SessionBackend, UserProfile};

/// Path of the login endpoint, relative to the backend base URL.
const LOGIN_PATH: &str = "/session/login";

/// A [`SessionBackend`] that talks to the application server over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSessionBackend {
    client: reqwest::Client,
    login_url: String,
}

impl HttpSessionBackend {
    /// Creates a backend rooted at `base_url` (e.g. `https://api.example.com`).
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Same as [`new`](Self::new) but reuses an existing client (connection
    /// pool, proxy settings, timeouts).
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        let login_url = format!("{}{LOGIN_PATH}", base_url.trim_end_matches('/'));
        Self { client, login_url }
    }

    /// The full URL login requests are sent to.
    pub fn login_url(&self) -> &str {
        &self.login_url
    }
}

impl SessionBackend for HttpSessionBackend {
    async fn login(&self, request: &LoginRequest) -> Result<UserProfile, BackendError> {
        let resp = self
            .client
            .post(&self.login_url)
            .json(request)
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            tracing::debug!(%status, url = %self.login_url, "backend login rejected");
            return Err(BackendError::Status(status.as_u16()));
        }

        let body: LoginResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(body.user_profile)
    }
}
