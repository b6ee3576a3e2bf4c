//! HTTP server exposing the agent registry.
//!
//! # Endpoints
//!
//! - `GET  /health`: Liveness probe
//! - `/agents/...`: Registration, lookup, heartbeat, deregistration
//! - `GET  /capabilities/:capability/agents`: Capability resolution
//!
//! [`crate::registry::HttpRegistry`] is the matching client.

pub mod routes;

pub use routes::{app_router, AppState};
