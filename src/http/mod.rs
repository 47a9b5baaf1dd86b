//! HTTP layer for the token gateway.
//!
//! The axum-based server exposes `/healthz` and `/metrics` and routes every
//! other request through the credential filter: classify the bearer token,
//! inject identity headers on acceptance, and forward to the upstream API.

pub mod handler;
pub mod headers;
