//! Signature-verification boundary.
//!
//! The decision engine depends only on the [`TokenVerifier`] trait; the
//! production implementation validates ES256 signatures against a PEM
//! public key loaded once at startup.  Verification is CPU-bound, so it is
//! dispatched to the blocking thread pool rather than running on the I/O
//! workers.

use std::sync::Arc;

use anyhow::{Context, Result};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use thiserror::Error;

use crate::token::Claims;

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Why a credential failed verification.  `Malformed` and
/// `SignatureInvalid` both end up classified as rejected; the distinction
/// exists only for logging.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("invalid signature")]
    SignatureInvalid,
    #[error("token expired")]
    Expired,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// External capability performing real cryptographic validation.  The
/// engine treats it as a pure function whose only side effect is CPU time.
#[async_trait::async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Claims, VerifyError>;
}

// ---------------------------------------------------------------------------
// ES256 implementation
// ---------------------------------------------------------------------------

pub struct Es256Verifier {
    key: Arc<DecodingKey>,
    validation: Arc<Validation>,
}

impl Es256Verifier {
    /// Build a verifier from a PEM-encoded EC public key.
    ///
    /// An unparsable key is a startup-fatal misconfiguration; the gateway
    /// must not serve traffic without a trusted key.
    pub fn new(public_key_pem: &str) -> Result<Self> {
        let key = DecodingKey::from_ec_pem(public_key_pem.as_bytes())
            .context("failed to parse ES256 public key PEM")?;

        let mut validation = Validation::new(Algorithm::ES256);
        // Audience routing is the upstream's concern; the gateway only
        // propagates the claim.
        validation.validate_aud = false;

        Ok(Self {
            key: Arc::new(key),
            validation: Arc::new(validation),
        })
    }
}

#[async_trait::async_trait]
impl TokenVerifier for Es256Verifier {
    async fn verify(&self, token: &str) -> Result<Claims, VerifyError> {
        let key = Arc::clone(&self.key);
        let validation = Arc::clone(&self.validation);
        let token = token.to_owned();

        let decoded = tokio::task::spawn_blocking(move || {
            jsonwebtoken::decode::<Claims>(&token, &key, &validation)
        })
        .await
        .map_err(|e| VerifyError::Malformed(format!("verification task failed: {e}")))?;

        match decoded {
            Ok(data) => Ok(data.claims),
            Err(e) => Err(classify_jwt_error(e)),
        }
    }
}

fn classify_jwt_error(err: jsonwebtoken::errors::Error) -> VerifyError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => VerifyError::Expired,
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => VerifyError::SignatureInvalid,
        _ => VerifyError::Malformed(err.to_string()),
    }
}
