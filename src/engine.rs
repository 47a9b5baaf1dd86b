//! Credential decision engine.
//!
//! Classifies each presented credential against three rotating membership
//! caches (rejected, expired, accepted — checked in that order), calling
//! the real verifier only on a miss and memoizing the outcome.  Rejected
//! and expired run before accepted on purpose: a token that was once valid
//! but has since been blacklisted must never be short-circuited as
//! accepted.
//!
//! The caches are unauthoritative: every request is classified afresh, and
//! two concurrent requests for the same unseen token may both reach the
//! verifier.  That duplicate work is a benign, bounded race; there is no
//! cross-cache atomicity.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::bloom::{BloomConfig, RotatingBloom, RotationHandle};
use crate::metrics::{Metrics, Outcome, OutcomeLabels};
use crate::token::{unverified, Claims, TokenVerifier, VerifyError};

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Terminal classification of one presented credential.
#[derive(Debug)]
pub enum Decision {
    Accepted(Claims),
    Expired,
    Rejected,
}

impl Decision {
    pub fn outcome(&self) -> Outcome {
        match self {
            Decision::Accepted(_) => Outcome::Accepted,
            Decision::Expired => Outcome::Expired,
            Decision::Rejected => Outcome::Rejected,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct DecisionEngine {
    accepted: Arc<RotatingBloom>,
    expired: Arc<RotatingBloom>,
    rejected: Arc<RotatingBloom>,
    verifier: Arc<dyn TokenVerifier>,
    metrics: Arc<Metrics>,
}

/// Owns the three per-cache rotation tasks.  Dropping it stops rotation.
pub struct RotationTasks {
    handles: Vec<RotationHandle>,
}

impl RotationTasks {
    pub fn stop(&self) {
        for handle in &self.handles {
            handle.stop();
        }
    }
}

impl DecisionEngine {
    pub fn new(
        cache_config: BloomConfig,
        verifier: Arc<dyn TokenVerifier>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            accepted: Arc::new(RotatingBloom::new(cache_config.clone())),
            expired: Arc::new(RotatingBloom::new(cache_config.clone())),
            rejected: Arc::new(RotatingBloom::new(cache_config)),
            verifier,
            metrics,
        }
    }

    /// Spawn the three independent rotation clocks.  They are deliberately
    /// unsynchronized with each other and with request handling.
    pub fn start_rotation(&self) -> RotationTasks {
        RotationTasks {
            handles: vec![
                self.accepted.start_rotation("accepted"),
                self.expired.start_rotation("expired"),
                self.rejected.start_rotation("rejected"),
            ],
        }
    }

    /// Classify `token`, consulting the caches in precedence order and
    /// invoking the verifier only on a full miss.
    pub async fn classify(&self, token: &str) -> Decision {
        if self.rejected.might_contain(token) {
            self.record_hit(Outcome::Rejected);
            self.record_decision(Outcome::Rejected);
            return Decision::Rejected;
        }

        if self.expired.might_contain(token) {
            self.record_hit(Outcome::Expired);
            self.record_decision(Outcome::Expired);
            return Decision::Expired;
        }

        if self.accepted.might_contain(token) {
            // A prior request already verified this token's signature, so
            // decoding the payload without re-verifying is sound here (and
            // only here).
            match unverified::decode_claims(token) {
                Ok(claims) => {
                    self.record_hit(Outcome::Accepted);
                    self.record_decision(Outcome::Accepted);
                    return Decision::Accepted(claims);
                }
                Err(e) => {
                    // A Bloom false positive on a key that is not even a
                    // JWT.  Fall through to full verification.
                    debug!(error = %e, "accepted-cache hit failed to decode, re-verifying");
                }
            }
        }

        let decision = self.verify_and_memoize(token).await;
        self.record_decision(decision.outcome());
        decision
    }

    async fn verify_and_memoize(&self, token: &str) -> Decision {
        self.metrics.verifier_calls_total.inc();
        let start = Instant::now();
        let result = self.verifier.verify(token).await;
        self.metrics
            .verify_duration_seconds
            .observe(start.elapsed().as_secs_f64());

        match result {
            Ok(claims) => {
                self.accepted.insert(token);
                Decision::Accepted(claims)
            }
            Err(VerifyError::Expired) => {
                self.expired.insert(token);
                Decision::Expired
            }
            Err(e) => {
                debug!(error = %e, "credential rejected");
                self.rejected.insert(token);
                Decision::Rejected
            }
        }
    }

    fn record_hit(&self, outcome: Outcome) {
        self.metrics
            .cache_hits_total
            .get_or_create(&OutcomeLabels { outcome })
            .inc();
    }

    fn record_decision(&self, outcome: Outcome) {
        self.metrics
            .decisions_total
            .get_or_create(&OutcomeLabels { outcome })
            .inc();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
