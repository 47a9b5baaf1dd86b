use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Claim value helpers
// ---------------------------------------------------------------------------

/// RFC 7519 allows `aud` to be a single string or an array of strings.
/// Downstream consumers only ever see the first value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn first(&self) -> Option<&str> {
        match self {
            Audience::One(s) => Some(s.as_str()),
            Audience::Many(v) => v.first().map(String::as_str),
        }
    }
}

/// Custom claims arrive as JSON strings, numbers, or booleans depending on
/// the issuer.  Rendered without quoting when forwarded as header values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for ClaimValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimValue::String(s) => f.write_str(s),
            ClaimValue::Integer(n) => write!(f, "{n}"),
            ClaimValue::Float(n) => write!(f, "{n}"),
            ClaimValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// Identity payload recovered from a verified credential.
///
/// `sub`, `aud`, `iss`, `exp`, `iat`, `jti` are the registered JWT claims
/// the gateway cares about; `uid`, `mid`, `sid`, `admin` are the custom
/// fields propagated downstream as identity headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub aud: Option<Audience>,
    #[serde(default)]
    pub iss: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub jti: Option<String>,
    /// User id.
    #[serde(default)]
    pub uid: Option<ClaimValue>,
    /// Merchant id.
    #[serde(default)]
    pub mid: Option<ClaimValue>,
    /// Shop id.
    #[serde(default)]
    pub sid: Option<ClaimValue>,
    /// Admin role marker.
    #[serde(default)]
    pub admin: Option<ClaimValue>,
}

impl Claims {
    /// Subject, defaulting to the empty string like the downstream header
    /// contract expects.
    pub fn subject(&self) -> &str {
        self.sub.as_deref().unwrap_or("")
    }

    /// First audience value, if any.
    pub fn audience(&self) -> Option<&str> {
        self.aud.as_ref().and_then(Audience::first)
    }
}
