//! Configuration for the identity-state bridge.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long an absent identity on a protected route is tolerated before
/// the session is cleared.
pub const SIGN_OUT_GRACE_WINDOW: Duration = Duration::from_secs(5);

/// How long after an interactive sign-in flow ends an identity may still
/// show up before the flow counts as cancelled.
pub const SIGN_IN_CANCEL_TIMEOUT: Duration = Duration::from_secs(1);

/// Routes reachable without signing in, used when none are configured.
pub const DEFAULT_PUBLIC_ROUTES: [&str; 4] = ["/", "/login", "/signup", "/forgot-password"];

/// Knobs for [`IdentityStateBridge`](crate::IdentityStateBridge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Grace window for transient identity loss on protected routes.
    /// Zero disables it (every absence signs out immediately).
    pub grace_window: Duration,

    /// See [`SIGN_IN_CANCEL_TIMEOUT`].
    pub sign_in_cancel_timeout: Duration,

    /// Route patterns reachable without authentication. A pattern matches
    /// a path exactly, or, if it ends in `/*`, that path and everything
    /// under it (`/docs/*` matches `/docs` and `/docs/intro`).
    pub public_routes: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            grace_window: SIGN_OUT_GRACE_WINDOW,
            sign_in_cancel_timeout: SIGN_IN_CANCEL_TIMEOUT,
            public_routes: DEFAULT_PUBLIC_ROUTES.iter().map(|r| r.to_string()).collect(),
        }
    }
}

impl BridgeConfig {
    /// Normalises route patterns.
    ///
    /// - Blank patterns are dropped.
    /// - Patterns are trimmed and missing leading `/` added.
    pub fn validated(mut self) -> Self {
        self.public_routes = self
            .public_routes
            .into_iter()
            .filter_map(|pattern| {
                let pattern = pattern.trim();
                if pattern.is_empty() {
                    tracing::warn!("ignoring blank public route pattern");
                    return None;
                }
                Some(if pattern.starts_with('/') {
                    pattern.to_string()
                } else {
                    format!("/{pattern}")
                })
            })
            .collect();
        self
    }

    /// Whether `path` is reachable without authentication. Query strings
    /// and fragments are ignored.
    pub fn is_public_route(&self, path: &str) -> bool {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        self.public_routes
            .iter()
            .any(|pattern| route_matches(pattern, path))
    }
}

fn route_matches(pattern: &str, path: &str) -> bool {
    match pattern.strip_suffix("/*") {
        Some(prefix) => {
            path == prefix
                || path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'))
        }
        None => pattern == path,
    }
}
