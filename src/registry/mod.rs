//! Agent registry: capability-indexed records of live agents.
//!
//! - [`store`]: the authoritative in-memory registry
//! - [`client`]: caller-side access, local or over HTTP, with caching
//! - [`health`]: periodic probing and heartbeat expiry

pub mod cache;
pub mod capability;
pub mod client;
pub mod health;
pub mod record;
pub mod store;

pub use cache::ResolutionCache;
pub use capability::{capability_domain, validate_capability};
pub use client::{HttpRegistry, LocalRegistry, RegistryClient, RegistryTransport};
pub use health::{HealthMonitor, HealthProbe, HealthReport, HttpHealthProbe, MonitorHandle};
pub use record::{
    AgentRecord, AgentStatus, RegistrationRequest, RegistrationResponse, RegistryErrorBody,
    CHANNEL_A2A, CHANNEL_HEALTH, CHANNEL_HTTP,
};
pub use store::{CapabilityIndex, RegistryStore, DEFAULT_HEARTBEAT_TTL};
