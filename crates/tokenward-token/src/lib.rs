//! Identity tokens for Tokenward.
//!
//! This crate defines what the rest of the workspace knows about the
//! credential issued by the identity provider:
//!
//! - **Types** ([`Token`], [`SubjectId`]): the opaque credential string
//!   and the stable identifier of whoever it was issued to.
//! - **Codec** ([`decode_expiration`], [`decode_payload`]): reading the
//!   expiration claim out of the token payload.
//! - **Errors** ([`TokenError`]): what can go wrong while decoding.
//!
//! # What this crate does NOT do
//!
//! Signature verification. The identity provider issued the token and
//! the backend verifies it; a client only needs to know *when* the token
//! stops being useful so it can fetch a new one in time.
//!
//! ```text
//! header.payload.signature
//!          │
//!          └─ base64url(JSON { "exp": 1700000000, ... })  ← we read this
//! ```

mod codec;
mod error;
mod types;

pub use codec::{decode_expiration, decode_payload, encode_unsigned};
pub use error::TokenError;
pub use types::{SubjectId, Token};
