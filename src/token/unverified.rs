//! Decode a token's payload segment **without** checking its signature.
//!
//! This is only sound for tokens that already passed full verification in
//! a previous request (an accepted-cache hit).  The module is crate-private
//! and its single caller is the engine's accepted-hit transition; nothing
//! else may reach it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::token::{Claims, VerifyError};

/// Base64url-decode and parse the payload segment of a compact JWS.
pub(crate) fn decode_claims(token: &str) -> Result<Claims, VerifyError> {
    let mut segments = token.split('.');
    let _header = segments
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| VerifyError::Malformed("empty token".into()))?;
    let payload = segments
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| VerifyError::Malformed("missing payload segment".into()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| VerifyError::Malformed(format!("payload is not base64url: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| VerifyError::Malformed(format!("payload is not a claim set: {e}")))
}
