//! Request-path allowlist.
//!
//! Paths matching any configured glob pattern are exempt from credential
//! enforcement.  Patterns use `*` for a single path segment and `**` for
//! any number of segments (`/login`, `/public/**`, `/*/health`), compiled
//! once at startup into a single matcher.

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

pub struct PathAllowlist {
    set: GlobSet,
}

impl PathAllowlist {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = GlobBuilder::new(pattern)
                // `*` must not cross `/`; only `**` spans segments.
                .literal_separator(true)
                .build()
                .with_context(|| format!("invalid allowlist pattern: {pattern}"))?;
            builder.add(glob);
        }
        let set = builder.build().context("failed to compile allowlist")?;
        Ok(Self { set })
    }

    /// Whether `path` is exempt from credential enforcement.
    pub fn is_exempt(&self, path: &str) -> bool {
        self.set.is_match(path)
    }
}
