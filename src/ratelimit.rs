//! Rate-limiting key derivation.
//!
//! The gateway does not rate-limit; it derives the per-user bucket key
//! (`{audience}.{user id}`) from the identity headers injected after a
//! successful classification, for the external limiter to consume.

use axum::http::HeaderMap;

use crate::http::headers::{AUDIENCE_HEADER, USER_ID_HEADER};

/// Build the rate-limit bucket key from injected identity headers.
/// Returns `None` when no user id is present (anonymous and allowlisted
/// traffic is not per-user limited).
pub fn resolve_key(headers: &HeaderMap) -> Option<String> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())?;
    let audience = headers
        .get(AUDIENCE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    Some(format!("{audience}.{user_id}"))
}
