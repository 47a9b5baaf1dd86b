//! Downstream identity header contract.
//!
//! On an accepted credential the gateway attaches derived identity headers
//! to the forwarded request: user id, URL-encoded display name, first
//! audience value, and the optional tenant/role fields.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use crate::token::Claims;

pub const AUTH_HEADER: &str = "authorization";
pub const TRACE_ID_HEADER: &str = "traceid";
pub const USER_ID_HEADER: &str = "userid";
pub const USER_NAME_HEADER: &str = "username";
pub const AUDIENCE_HEADER: &str = "aud";
pub const MERCHANT_ID_HEADER: &str = "wd-merchantid";
pub const SHOP_ID_HEADER: &str = "wd-shopid";
pub const ADMIN_HEADER: &str = "admin";

/// Attach the identity headers derived from `claims`.
///
/// The display name is URL-encoded so arbitrary UTF-8 subjects survive the
/// ASCII-only header value rules.  A claim whose rendering is not a valid
/// header value is skipped rather than failing the request.
pub fn inject_identity_headers(headers: &mut HeaderMap, claims: &Claims) {
    if let Some(uid) = &claims.uid {
        set_header(headers, USER_ID_HEADER, &uid.to_string());
    }

    let encoded_name = urlencoding::encode(claims.subject()).into_owned();
    set_header(headers, USER_NAME_HEADER, &encoded_name);

    if let Some(audience) = claims.audience() {
        set_header(headers, AUDIENCE_HEADER, audience);
    }
    if let Some(mid) = &claims.mid {
        set_header(headers, MERCHANT_ID_HEADER, &mid.to_string());
    }
    if let Some(sid) = &claims.sid {
        set_header(headers, SHOP_ID_HEADER, &sid.to_string());
    }
    if let Some(admin) = &claims.admin {
        set_header(headers, ADMIN_HEADER, &admin.to_string());
    }
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(HeaderName::from_static(name), v);
        }
        Err(_) => {
            warn!(header = name, "claim value is not a valid header value, skipping");
        }
    }
}
