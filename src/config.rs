use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::bloom::BloomConfig;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub proxy: ProxyConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Glob patterns for paths exempt from credential enforcement.
    #[serde(default, alias = "white_list")]
    pub allowlist: Vec<String>,
}

// ---------------------------------------------------------------------------
// Proxy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Socket address for the HTTP listener (e.g. `0.0.0.0:8080`).
    pub listen: String,
    /// Base URL of the upstream API everything is forwarded to
    /// (e.g. `http://api.internal:9000`).
    pub upstream_url: String,
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// Where the bearer credential is read from on each request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialSource {
    /// `authorization` header only.
    Header,
    /// Cookie only.
    Cookie,
    /// `authorization` header, falling back to the cookie.
    #[default]
    HeaderThenCookie,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Inline PEM-encoded ES256 public key.  Exactly one of this and
    /// `public_key_path` must be set.
    pub public_key_pem: Option<String>,
    /// Path to a PEM file holding the ES256 public key.
    pub public_key_path: Option<String>,
    #[serde(default)]
    pub credential_source: CredentialSource,
    /// Cookie name consulted when the source allows cookies.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

fn default_cookie_name() -> String {
    "jwt".to_string()
}

impl AuthConfig {
    /// Resolve the trusted public key PEM, reading the file when a path is
    /// configured.
    pub fn resolve_public_key(&self) -> Result<String> {
        match (&self.public_key_pem, &self.public_key_path) {
            (Some(pem), None) => Ok(pem.clone()),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read public key file: {path}")),
            _ => anyhow::bail!("exactly one of public_key_pem and public_key_path must be set"),
        }
    }
}

// ---------------------------------------------------------------------------
// Membership caches
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of live generations per cache.
    #[serde(default = "default_generations")]
    pub generations: usize,
    /// Expected insertions per generation.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Target false-positive rate per generation.
    #[serde(default = "default_false_positive_rate")]
    pub false_positive_rate: f64,
    /// Seconds between generation rotations.
    #[serde(default = "default_rotation_interval_secs")]
    pub rotation_interval_secs: u64,
}

fn default_generations() -> usize {
    5
}

fn default_capacity() -> usize {
    1_000_000
}

fn default_false_positive_rate() -> f64 {
    1e-6
}

fn default_rotation_interval_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            generations: default_generations(),
            capacity: default_capacity(),
            false_positive_rate: default_false_positive_rate(),
            rotation_interval_secs: default_rotation_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn bloom_config(&self) -> BloomConfig {
        BloomConfig {
            generations: self.generations,
            capacity: self.capacity,
            false_positive_rate: self.false_positive_rate,
            rotation_interval: Duration::from_secs(self.rotation_interval_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        config.proxy.upstream_url.starts_with("http://")
            || config.proxy.upstream_url.starts_with("https://"),
        "upstream_url must be an http(s) URL"
    );
    anyhow::ensure!(config.cache.generations >= 1, "generations must be >= 1");
    anyhow::ensure!(config.cache.capacity >= 1, "capacity must be >= 1");
    anyhow::ensure!(
        config.cache.false_positive_rate > 0.0 && config.cache.false_positive_rate < 1.0,
        "false_positive_rate must be in (0, 1)"
    );
    anyhow::ensure!(
        config.cache.rotation_interval_secs >= 1,
        "rotation_interval_secs must be >= 1"
    );
    anyhow::ensure!(
        config.auth.public_key_pem.is_some() != config.auth.public_key_path.is_some(),
        "exactly one of public_key_pem and public_key_path must be set"
    );
    Ok(())
}
