//! Unverified decoding of the token payload.
//!
//! A token is three base64url segments joined by dots. Only the middle
//! one matters here: it is a JSON object whose `exp` field holds the
//! expiration as seconds since the Unix epoch.
//!
//! Nothing in this module checks the signature; see the crate docs.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;

use crate::{Token, TokenError};

/// Number of dot-separated segments in a well-formed token.
const SEGMENT_COUNT: usize = 3;

/// Decodes the payload segment of `token` into JSON.
///
/// The payload is returned as a [`Value`] rather than a map so that a
/// token carrying, say, a JSON array decodes successfully and is only
/// rejected by whoever looks for a specific claim.
///
/// # Errors
/// [`TokenError::MalformedToken`] when the token doesn't have exactly
/// three segments, the payload isn't base64url, or it isn't JSON.
pub fn decode_payload(token: &str) -> Result<Value, TokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != SEGMENT_COUNT {
        return Err(TokenError::MalformedToken(format!(
            "expected {SEGMENT_COUNT} segments, found {}",
            segments.len()
        )));
    }

    // Some issuers pad their segments even though JWTs shouldn't be.
    let payload = segments[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| TokenError::MalformedToken(format!("payload is not base64url: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| TokenError::MalformedToken(format!("payload is not JSON: {e}")))
}

/// Reads the expiration instant out of `token` without verifying it.
///
/// # Errors
/// - [`TokenError::MalformedToken`]: see [`decode_payload`].
/// - [`TokenError::MissingExpirationClaim`]: the payload has no `exp`,
///   or it is not a non-negative number that fits in a [`SystemTime`].
pub fn decode_expiration(token: &str) -> Result<SystemTime, TokenError> {
    let payload = decode_payload(token)?;
    let exp = payload
        .get("exp")
        .ok_or(TokenError::MissingExpirationClaim)?;

    let offset = match exp.as_u64() {
        Some(secs) => Duration::from_secs(secs),
        None => exp
            .as_f64()
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .ok_or(TokenError::MissingExpirationClaim)?,
    };

    UNIX_EPOCH
        .checked_add(offset)
        .ok_or(TokenError::MissingExpirationClaim)
}

/// Builds an unsigned token (`alg: none`) carrying `claims` as payload.
///
/// Development identity providers and tests use this to mint tokens
/// with a known expiration. Nothing that verifies signatures will ever
/// accept the result.
pub fn encode_unsigned(claims: &Value) -> Token {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    Token::new(format!("{header}.{payload}."))
}

#[cfg(test)]
mod tests {
    //! Tests follow `test_{function}_{scenario}_{expected}`.

    use serde_json::json;

    use super::*;

    /// Builds `header.<payload>.sig` from a raw payload string.
    fn token_with_payload(payload: &str) -> String {
        format!("eyJhbGciOiJIUzI1NiJ9.{}.c2ln", URL_SAFE_NO_PAD.encode(payload))
    }

    // =====================================================================
    // decode_expiration()
    // =====================================================================

    #[test]
    fn test_decode_expiration_integer_exp_returns_exact_instant() {
        let token = token_with_payload(r#"{"sub":"u1","exp":1700000000}"#);

        let exp = decode_expiration(&token).expect("should decode");

        assert_eq!(exp, UNIX_EPOCH + Duration::from_secs(1_700_000_000));
    }

    #[test]
    fn test_decode_expiration_many_values_round_trip_exactly() {
        for secs in [0_u64, 1, 59, 1_234_567_890, 4_102_444_800] {
            let token = encode_unsigned(&json!({ "exp": secs }));
            assert_eq!(
                decode_expiration(token.as_str()),
                Ok(UNIX_EPOCH + Duration::from_secs(secs)),
                "exp = {secs}"
            );
        }
    }

    #[test]
    fn test_decode_expiration_fractional_exp_is_accepted() {
        let token = token_with_payload(r#"{"exp":10.5}"#);

        let exp = decode_expiration(&token).unwrap();

        assert_eq!(exp, UNIX_EPOCH + Duration::from_millis(10_500));
    }

    #[test]
    fn test_decode_expiration_padded_payload_is_accepted() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"exp":10}"#);
        assert!(payload.ends_with('='), "fixture should be padded");
        let token = format!("h.{payload}.s");

        assert_eq!(
            decode_expiration(&token),
            Ok(UNIX_EPOCH + Duration::from_secs(10))
        );
    }

    #[test]
    fn test_decode_expiration_two_segments_is_malformed() {
        let result = decode_expiration("header.payload");
        assert!(matches!(result, Err(TokenError::MalformedToken(_))));
    }

    #[test]
    fn test_decode_expiration_four_segments_is_malformed() {
        let result = decode_expiration("a.b.c.d");
        assert!(matches!(result, Err(TokenError::MalformedToken(_))));
    }

    #[test]
    fn test_decode_expiration_empty_string_is_malformed() {
        assert!(matches!(
            decode_expiration(""),
            Err(TokenError::MalformedToken(_))
        ));
    }

    #[test]
    fn test_decode_expiration_non_base64_payload_is_malformed() {
        let result = decode_expiration("h.!!!not-base64!!!.s");
        assert!(matches!(result, Err(TokenError::MalformedToken(_))));
    }

    #[test]
    fn test_decode_expiration_non_json_payload_is_malformed() {
        let token = token_with_payload("definitely not json");
        assert!(matches!(
            decode_expiration(&token),
            Err(TokenError::MalformedToken(_))
        ));
    }

    #[test]
    fn test_decode_expiration_missing_exp_is_missing_claim() {
        let token = token_with_payload(r#"{"sub":"u1"}"#);
        assert_eq!(
            decode_expiration(&token),
            Err(TokenError::MissingExpirationClaim)
        );
    }

    #[test]
    fn test_decode_expiration_string_exp_is_missing_claim() {
        let token = token_with_payload(r#"{"exp":"1700000000"}"#);
        assert_eq!(
            decode_expiration(&token),
            Err(TokenError::MissingExpirationClaim)
        );
    }

    #[test]
    fn test_decode_expiration_negative_exp_is_missing_claim() {
        let token = token_with_payload(r#"{"exp":-5}"#);
        assert_eq!(
            decode_expiration(&token),
            Err(TokenError::MissingExpirationClaim)
        );
    }

    #[test]
    fn test_decode_expiration_array_payload_is_missing_claim() {
        // Well-formed JSON of the wrong shape is not a structural error.
        let token = token_with_payload("[1,2,3]");
        assert_eq!(
            decode_expiration(&token),
            Err(TokenError::MissingExpirationClaim)
        );
    }

    // =====================================================================
    // decode_payload() / encode_unsigned()
    // =====================================================================

    #[test]
    fn test_decode_payload_returns_all_claims() {
        let token = encode_unsigned(&json!({ "sub": "u1", "exp": 5, "admin": false }));

        let payload = decode_payload(token.as_str()).unwrap();

        assert_eq!(payload["sub"], "u1");
        assert_eq!(payload["admin"], false);
    }

    #[test]
    fn test_encode_unsigned_has_three_segments_and_empty_signature() {
        let token = encode_unsigned(&json!({ "exp": 1 }));
        let segments: Vec<&str> = token.as_str().split('.').collect();

        assert_eq!(segments.len(), 3);
        assert!(segments[2].is_empty());
    }
}
