use std::sync::Arc;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: Outcome,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    Accepted,
    Expired,
    Rejected,
    Missing,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Central container for every Prometheus metric exposed by the gateway.
pub struct Metrics {
    // -- decisions --
    pub decisions_total: Family<OutcomeLabels, Counter>,
    pub cache_hits_total: Family<OutcomeLabels, Counter>,

    // -- verifier --
    pub verifier_calls_total: Counter,
    pub verify_duration_seconds: Histogram,

    // -- routing --
    pub allowlist_passthrough_total: Counter,
    pub upstream_requests_total: Counter,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let decisions_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "tokengate_decisions_total",
            "Credential classification outcomes",
            decisions_total.clone(),
        );

        let cache_hits_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "tokengate_cache_hits_total",
            "Membership cache hits by outcome class",
            cache_hits_total.clone(),
        );

        let verifier_calls_total = Counter::default();
        registry.register(
            "tokengate_verifier_calls_total",
            "Full signature verifications performed",
            verifier_calls_total.clone(),
        );

        let verify_duration_seconds = Histogram::new(exponential_buckets(0.0001, 2.0, 14));
        registry.register(
            "tokengate_verify_duration_seconds",
            "Signature verification latency in seconds",
            verify_duration_seconds.clone(),
        );

        let allowlist_passthrough_total = Counter::default();
        registry.register(
            "tokengate_allowlist_passthrough_total",
            "Requests exempted from credential enforcement by path",
            allowlist_passthrough_total.clone(),
        );

        let upstream_requests_total = Counter::default();
        registry.register(
            "tokengate_upstream_requests_total",
            "Requests forwarded to the upstream",
            upstream_requests_total.clone(),
        );

        Self {
            decisions_total,
            cache_hits_total,
            verifier_calls_total,
            verify_duration_seconds,
            allowlist_passthrough_total,
            upstream_requests_total,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper for the metrics registry, used in `AppState`.
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all gateway metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
