//! # Tokenward
//!
//! Client-side session token lifecycle manager.
//!
//! Tokenward keeps one short-lived identity token valid for as long as a
//! user's visit lasts, without the user ever noticing an authentication
//! gap:
//!
//! - refreshes proactively, a lead time before the token expires;
//! - lets only one refresh run at a time, sharing its result;
//! - tells a real sign-out from a transient blip in the identity
//!   provider's state;
//! - keeps unverified identities out of the session.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokenward::prelude::*;
//!
//! # async fn demo() -> Result<(), TokenwardError> {
//! let provider = Arc::new(MemoryIdentityProvider::default());
//! let lifecycle = SessionLifecycle::builder(provider).build();
//! lifecycle.start();
//! lifecycle.set_route("/dashboard");
//!
//! // Before each API request:
//! if let Some(token) = lifecycle.access_token().await? {
//!     let _bearer = format!("Bearer {}", token.as_str());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Crates
//!
//! | Crate                | Provides                                         |
//! |----------------------|--------------------------------------------------|
//! | `tokenward-token`    | token types, expiry decoding                     |
//! | `tokenward-provider` | identity provider + backend interfaces           |
//! | `tokenward-session`  | store, refresh gate, refresher, identity bridge  |
//! | `tokenward-schedule` | expiry-driven refresh scheduler                  |
//! | `tokenward`          | [`SessionLifecycle`], which ties them together   |

mod config;
mod error;
mod lifecycle;
mod target;

pub use config::LifecycleConfig;
pub use error::TokenwardError;
pub use lifecycle::{SessionLifecycle, SessionLifecycleBuilder};

pub use tokenward_provider as provider;
pub use tokenward_schedule as schedule;
pub use tokenward_session as session;
pub use tokenward_token as token;

pub mod prelude {
    //! Everything an application usually needs.

    pub use crate::{LifecycleConfig, SessionLifecycle, TokenwardError};

    #[cfg(feature = "http")]
    pub use tokenward_provider::HttpSessionBackend;
    pub use tokenward_provider::{
        Identity, IdentityProvider, MemoryIdentityProvider, NoopBackend, SessionBackend,
        SignInMethod,
    };
    pub use tokenward_schedule::{ScheduleConfig, SchedulerState};
    pub use tokenward_session::{
        AuthState, BridgeConfig, RefreshError, Session, SessionEvent, SignInError,
        SignInOutcome, SignOutReason,
    };
    pub use tokenward_token::{SubjectId, Token};
}
