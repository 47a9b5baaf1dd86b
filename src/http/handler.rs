//! Main axum router and the credential filter.
//!
//! Routes:
//! - `GET /healthz`  - health check (upstream reachability)
//! - `GET /metrics`  - Prometheus metrics
//! - everything else - credential filter + forward to the upstream API
//!
//! Filter order, first match wins: CORS preflight passes through; a
//! missing credential is denied (401) unless the path is allowlisted; a
//! cached-rejected token is denied (401); a cached-expired token is denied
//! (403); a cached-accepted token has its claims decoded and forwarded;
//! anything else goes through full signature verification, and the outcome
//! is memoized.  Allowlist exemption applies uniformly to missing,
//! rejected, and expired credentials.

use std::sync::Arc;

use anyhow::Context as _;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use tracing::{debug, error, instrument, warn};

use crate::config::{AuthConfig, CredentialSource};
use crate::engine::Decision;
use crate::http::headers::{
    inject_identity_headers, AUTH_HEADER, TRACE_ID_HEADER,
};
use crate::metrics::{Outcome, OutcomeLabels};
use crate::{health, ratelimit, AppState};

/// Fixed response bodies, byte-for-byte part of the gateway's contract.
const BODY_401: &str = r#"{"code":401,"message":"Unauthorized"}"#;
const BODY_403: &str = r#"{"code":403,"message":"token expired"}"#;

/// Upper bound on a buffered request body forwarded upstream.
const MAX_FORWARD_BODY: usize = 256 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all HTTP routes and shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .fallback(handle_gateway)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Gateway filter
// ---------------------------------------------------------------------------

#[instrument(skip(state, req), fields(method = %req.method(), path = %req.uri().path()))]
async fn handle_gateway(
    State(state): State<Arc<AppState>>,
    req: Request,
) -> Result<Response, AppError> {
    let (mut parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, MAX_FORWARD_BODY)
        .await
        .context("failed to buffer request body")?;

    // CORS preflight carries no credential.
    if parts.method == Method::OPTIONS {
        return forward(&state, parts.method, &parts.uri, parts.headers, body).await;
    }

    ensure_trace_id(&mut parts.headers);

    let exempt = state.allowlist.is_exempt(parts.uri.path());

    let Some(token) = extract_credential(&parts.headers, &state.config.auth) else {
        state
            .metrics
            .metrics
            .decisions_total
            .get_or_create(&OutcomeLabels {
                outcome: Outcome::Missing,
            })
            .inc();
        if exempt {
            return pass_through(&state, parts, body).await;
        }
        return Ok(denied(StatusCode::UNAUTHORIZED, BODY_401));
    };

    match state.engine.classify(&token).await {
        Decision::Accepted(claims) => {
            inject_identity_headers(&mut parts.headers, &claims);
            if let Some(key) = ratelimit::resolve_key(&parts.headers) {
                debug!(rate_limit_key = %key, "resolved rate-limit key");
            }
            forward(&state, parts.method, &parts.uri, parts.headers, body).await
        }
        Decision::Expired => {
            if exempt {
                return pass_through(&state, parts, body).await;
            }
            Ok(denied(StatusCode::FORBIDDEN, BODY_403))
        }
        Decision::Rejected => {
            if exempt {
                return pass_through(&state, parts, body).await;
            }
            Ok(denied(StatusCode::UNAUTHORIZED, BODY_401))
        }
    }
}

async fn pass_through(
    state: &AppState,
    parts: axum::http::request::Parts,
    body: Bytes,
) -> Result<Response, AppError> {
    state.metrics.metrics.allowlist_passthrough_total.inc();
    forward(state, parts.method, &parts.uri, parts.headers, body).await
}

/// Fixed-body denial response.
fn denied(status: StatusCode, body: &'static str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json;charset=UTF-8")],
        body,
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Credential extraction
// ---------------------------------------------------------------------------

/// Pull the raw token out of the request per the configured source.
/// A `Bearer ` prefix on the header value is tolerated and stripped.
fn extract_credential(headers: &HeaderMap, auth: &AuthConfig) -> Option<String> {
    let from_header = || {
        headers
            .get(AUTH_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.strip_prefix("Bearer ").unwrap_or(v))
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    };
    let from_cookie = || extract_cookie(headers, &auth.cookie_name);

    match auth.credential_source {
        CredentialSource::Header => from_header(),
        CredentialSource::Cookie => from_cookie(),
        CredentialSource::HeaderThenCookie => from_header().or_else(from_cookie),
    }
}

fn extract_cookie(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for cookie in cookie_header.split(';') {
        if let Some((name, value)) = cookie.trim().split_once('=') {
            if name.trim() == cookie_name {
                let value = value.trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

fn ensure_trace_id(headers: &mut HeaderMap) {
    if !headers.contains_key(TRACE_ID_HEADER) {
        let id = uuid::Uuid::new_v4().to_string();
        if let Ok(value) = HeaderValue::from_str(&id) {
            headers.insert(HeaderName::from_static(TRACE_ID_HEADER), value);
        }
    }
}

// ---------------------------------------------------------------------------
// Forwarding
// ---------------------------------------------------------------------------

/// Headers that must not be forwarded; `content-length` is recomputed by
/// the client and `host` by the upstream URL.
const STRIPPED_HEADERS: [&str; 9] = [
    "host",
    "connection",
    "proxy-connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
    "content-length",
];

fn is_stripped(name: &HeaderName) -> bool {
    STRIPPED_HEADERS.iter().any(|h| name.as_str() == *h)
}

/// Forward the (possibly header-enriched) request to the upstream API and
/// stream the response back without buffering.
async fn forward(
    state: &AppState,
    method: Method,
    uri: &axum::http::Uri,
    request_headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let mut url = format!(
        "{}{}",
        state.config.proxy.upstream_url.trim_end_matches('/'),
        uri.path()
    );
    if let Some(query) = uri.query() {
        url.push('?');
        url.push_str(query);
    }

    let mut headers = HeaderMap::with_capacity(request_headers.len());
    for (name, value) in &request_headers {
        if !is_stripped(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    state.metrics.metrics.upstream_requests_total.inc();

    let upstream_resp = state
        .http_client
        .request(method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| AppError::Upstream(anyhow::Error::from(e)))?;

    let status = upstream_resp.status();
    let mut builder = Response::builder().status(status);
    for (name, value) in upstream_resp.headers() {
        if !is_stripped(name) {
            builder = builder.header(name, value);
        }
    }

    let response = builder
        .body(Body::from_stream(upstream_resp.bytes_stream()))
        .context("failed to assemble proxied response")?;
    Ok(response)
}

// ---------------------------------------------------------------------------
// Health and metrics
// ---------------------------------------------------------------------------

/// `GET /healthz`
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let upstream =
        health::check_upstream(&state.http_client, &state.config.proxy.upstream_url).await;
    let response = health::summarize(upstream);
    let status = match response.status {
        health::HealthStatus::Ok => StatusCode::OK,
        health::HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(response))
}

/// `GET /metrics`
///
/// Returns Prometheus metrics collected by the gateway.
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let mut buf = String::new();
    prometheus_client::encoding::text::encode(&mut buf, &state.metrics.registry)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("metrics encoding failed: {e}")))?;

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buf,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Application-level error type that maps cleanly to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// The upstream could not be reached.
    Upstream(anyhow::Error),
    /// An unexpected internal error.
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Upstream(err) => {
                warn!(error = %err, "upstream unreachable");
                (
                    StatusCode::BAD_GATEWAY,
                    format!("Upstream unreachable: {err:#}"),
                )
                    .into_response()
            }
            AppError::Internal(err) => {
                error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal server error: {err:#}"),
                )
                    .into_response()
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::bloom::BloomConfig;
    use crate::config::{CacheConfig, Config, ProxyConfig};
    use crate::engine::DecisionEngine;
    use crate::metrics::MetricsRegistry;
    use crate::allowlist::PathAllowlist;
    use crate::token::{Claims, TokenVerifier, VerifyError};

    // ── test doubles ─────────────────────────────────────────────────

    /// Scripted verifier: `expired-*` fails expired, a decodable JWT
    /// payload verifies, everything else is a bad signature.
    struct PrefixVerifier {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TokenVerifier for PrefixVerifier {
        async fn verify(&self, token: &str) -> Result<Claims, VerifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if token.starts_with("expired-") {
                Err(VerifyError::Expired)
            } else if let Ok(claims) = crate::token::unverified::decode_claims(token) {
                Ok(claims)
            } else {
                Err(VerifyError::SignatureInvalid)
            }
        }
    }

    fn test_token(sub: &str, uid: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"ES256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::json!({
                "sub": sub,
                "aud": "pc",
                "exp": 4_102_444_800i64,
                "uid": uid,
            })
            .to_string(),
        );
        format!("{header}.{payload}.sig")
    }

    /// Captures the headers of the last request the fake upstream saw.
    type SeenHeaders = Arc<Mutex<Option<HeaderMap>>>;

    async fn spawn_upstream() -> (SocketAddr, SeenHeaders) {
        let seen: SeenHeaders = Arc::new(Mutex::new(None));
        let capture = Arc::clone(&seen);
        let app = Router::new().fallback(move |req: Request| {
            let capture = Arc::clone(&capture);
            async move {
                *capture.lock().unwrap() = Some(req.headers().clone());
                (StatusCode::OK, "upstream ok")
            }
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, seen)
    }

    fn app_state(upstream: SocketAddr, allowlist: &[&str]) -> Arc<AppState> {
        let config = Config {
            proxy: ProxyConfig {
                listen: "127.0.0.1:0".into(),
                upstream_url: format!("http://{upstream}"),
            },
            auth: AuthConfig {
                public_key_pem: Some("unused".into()),
                public_key_path: None,
                credential_source: CredentialSource::HeaderThenCookie,
                cookie_name: "jwt".into(),
            },
            cache: CacheConfig::default(),
            allowlist: allowlist.iter().map(|s| s.to_string()).collect(),
        };
        let metrics = MetricsRegistry::new();
        let engine = DecisionEngine::new(
            BloomConfig {
                generations: 3,
                capacity: 10_000,
                false_positive_rate: 1e-6,
                rotation_interval: std::time::Duration::from_secs(60),
            },
            Arc::new(PrefixVerifier {
                calls: AtomicUsize::new(0),
            }),
            Arc::clone(&metrics.metrics),
        );
        let patterns: Vec<String> = allowlist.iter().map(|s| s.to_string()).collect();
        Arc::new(AppState {
            config: Arc::new(config),
            engine: Arc::new(engine),
            allowlist: Arc::new(PathAllowlist::new(&patterns).unwrap()),
            http_client: reqwest::Client::new(),
            metrics,
        })
    }

    async fn send(
        state: &Arc<AppState>,
        request: Request,
    ) -> (StatusCode, String) {
        let response = create_router(Arc::clone(state))
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    // ── denial paths ─────────────────────────────────────────────────

    #[tokio::test]
    async fn missing_credential_is_unauthorized() {
        let (addr, _) = spawn_upstream().await;
        let state = app_state(addr, &[]);

        let request = Request::builder()
            .uri("/api/orders")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&state, request).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, BODY_401);
    }

    #[tokio::test]
    async fn expired_token_gets_the_403_body() {
        let (addr, _) = spawn_upstream().await;
        let state = app_state(addr, &[]);

        let request = Request::builder()
            .uri("/api/orders")
            .header(AUTH_HEADER, "expired-token")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&state, request).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, BODY_403);
    }

    #[tokio::test]
    async fn forged_token_is_unauthorized() {
        let (addr, _) = spawn_upstream().await;
        let state = app_state(addr, &[]);

        let request = Request::builder()
            .uri("/api/orders")
            .header(AUTH_HEADER, "forged-token")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&state, request).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, BODY_401);
    }

    // ── accepted path ────────────────────────────────────────────────

    #[tokio::test]
    async fn accepted_token_forwards_with_identity_headers() {
        let (addr, seen) = spawn_upstream().await;
        let state = app_state(addr, &[]);

        let token = test_token("alice", 42);
        let request = Request::builder()
            .uri("/api/orders")
            .header(AUTH_HEADER, &token)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&state, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "upstream ok");

        let headers = seen.lock().unwrap().take().unwrap();
        assert_eq!(headers.get("userid").unwrap(), "42");
        assert_eq!(headers.get("username").unwrap(), "alice");
        assert_eq!(headers.get("aud").unwrap(), "pc");
        assert!(headers.get("traceid").is_some());
    }

    #[tokio::test]
    async fn cookie_credential_is_accepted() {
        let (addr, seen) = spawn_upstream().await;
        let state = app_state(addr, &[]);

        let token = test_token("bob", 7);
        let request = Request::builder()
            .uri("/api/profile")
            .header(header::COOKIE, format!("theme=dark; jwt={token}"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&state, request).await;

        assert_eq!(status, StatusCode::OK);
        let headers = seen.lock().unwrap().take().unwrap();
        assert_eq!(headers.get("userid").unwrap(), "7");
    }

    // ── allowlist ────────────────────────────────────────────────────

    #[tokio::test]
    async fn allowlisted_path_passes_without_credential() {
        let (addr, _) = spawn_upstream().await;
        let state = app_state(addr, &["/login", "/public/**"]);

        let request = Request::builder()
            .uri("/login")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&state, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "upstream ok");
    }

    #[tokio::test]
    async fn allowlisted_path_passes_with_bad_credential() {
        let (addr, _) = spawn_upstream().await;
        let state = app_state(addr, &["/public/**"]);

        let request = Request::builder()
            .uri("/public/catalog")
            .header(AUTH_HEADER, "forged-token")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&state, request).await;

        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn non_allowlisted_sibling_is_still_denied() {
        let (addr, _) = spawn_upstream().await;
        let state = app_state(addr, &["/public/**"]);

        let request = Request::builder()
            .uri("/private/catalog")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&state, request).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // ── preflight ────────────────────────────────────────────────────

    #[tokio::test]
    async fn options_preflight_bypasses_the_filter() {
        let (addr, _) = spawn_upstream().await;
        let state = app_state(addr, &[]);

        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/orders")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&state, request).await;

        assert_eq!(status, StatusCode::OK);
    }

    // ── operational endpoints ────────────────────────────────────────

    #[tokio::test]
    async fn metrics_endpoint_reports_decisions() {
        let (addr, _) = spawn_upstream().await;
        let state = app_state(addr, &[]);

        // Generate one rejected decision first.
        let request = Request::builder()
            .uri("/api/orders")
            .header(AUTH_HEADER, "forged-token")
            .body(Body::empty())
            .unwrap();
        send(&state, request).await;

        let request = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&state, request).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("tokengate_decisions_total"));
        assert!(body.contains("tokengate_verifier_calls_total"));
        assert!(body.contains("outcome=\"Rejected\""));
    }

    #[tokio::test]
    async fn healthz_reports_ok_with_live_upstream() {
        let (addr, _) = spawn_upstream().await;
        let state = app_state(addr, &[]);

        let request = Request::builder()
            .uri("/healthz")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&state, request).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#""status":"ok""#));
    }
}
