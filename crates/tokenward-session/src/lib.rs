//! Session state for Tokenward.
//!
//! This crate owns "who is signed in" and every way that can change:
//!
//! 1. **Storage**: [`SessionStore`] holds at most one [`Session`] and
//!    announces every change as a [`SessionEvent`].
//! 2. **Refreshing**: [`TokenRefresher`] performs one refresh;
//!    [`RefreshGate`] makes sure only one runs at a time.
//! 3. **Reconciliation**: [`IdentityStateBridge`] turns the identity
//!    provider's auth-state stream into store updates, including the
//!    grace window that tells a real sign-out from a transient blip.
//!
//! # How it fits in the stack
//!
//! ```text
//! tokenward (above)           ← wires these together, drives the scheduler
//!     ↕
//! Session Layer (this crate)  ← store, gate, refresher, bridge
//!     ↕
//! tokenward-provider (below)  ← identity provider + backend interfaces
//! ```

mod bridge;
mod config;
mod error;
mod event;
mod gate;
mod refresher;
mod session;
mod store;

pub use bridge::{AuthState, BridgeStatus, IdentityStateBridge, SignInOutcome};
pub use config::{BridgeConfig, DEFAULT_PUBLIC_ROUTES, SIGN_IN_CANCEL_TIMEOUT, SIGN_OUT_GRACE_WINDOW};
pub use error::{RefreshError, SignInError};
pub use event::{SessionEvent, SignOutReason};
pub use gate::RefreshGate;
pub use refresher::TokenRefresher;
pub use session::{Session, SessionTag, is_eligible};
pub use store::{DEFAULT_EVENT_CAPACITY, SessionStore, StoreSnapshot};
