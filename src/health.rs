use std::time::Duration;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub upstream: CheckResult,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    fn healthy() -> Self {
        Self {
            ok: true,
            detail: None,
        }
    }

    fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// Probe the upstream base URL.  Any HTTP response counts as reachable;
/// only a connection-level failure marks the gateway unhealthy, because
/// without the upstream it cannot forward anything.
pub async fn check_upstream(client: &reqwest::Client, upstream_url: &str) -> CheckResult {
    match client
        .get(upstream_url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(_) => CheckResult::healthy(),
        Err(e) => CheckResult::unhealthy(format!("upstream unreachable: {e}")),
    }
}

/// Aggregate the individual checks into the health document.
pub fn summarize(upstream: CheckResult) -> HealthResponse {
    let status = if upstream.ok {
        HealthStatus::Ok
    } else {
        HealthStatus::Unhealthy
    };
    HealthResponse {
        status,
        checks: HealthChecks { upstream },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_upstream_summarizes_ok() {
        let response = summarize(CheckResult::healthy());
        assert_eq!(response.status, HealthStatus::Ok);
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""status":"ok""#));
        assert!(!json.contains("detail"));
    }

    #[test]
    fn unreachable_upstream_summarizes_unhealthy() {
        let response = summarize(CheckResult::unhealthy("connection refused"));
        assert_eq!(response.status, HealthStatus::Unhealthy);
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""status":"unhealthy""#));
        assert!(json.contains("connection refused"));
    }
}
