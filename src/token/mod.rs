//! Token handling: claim types, the signature-verification boundary, and
//! the decode-without-verify shortcut used for accepted-cache hits.

pub mod claims;
pub(crate) mod unverified;
pub mod verifier;

pub use claims::{Audience, ClaimValue, Claims};
pub use verifier::{Es256Verifier, TokenVerifier, VerifyError};
