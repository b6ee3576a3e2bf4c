//! Registry store: the authoritative table of registered agents.
//!
//! Records are keyed by `agent_id` and indexed by capability. The index is
//! derived state and is kept in step with every registration,
//! deregistration and status change; [`CapabilityIndex::rebuild`] can always
//! reconstruct it from the records.
//!
//! The store is an owned component. Share it with `Arc<RegistryStore>`;
//! tests build an isolated instance per case.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::record::{AgentRecord, AgentStatus, RegistrationRequest};
use crate::errors::A2AError;

/// Default heartbeat TTL.
pub const DEFAULT_HEARTBEAT_TTL: Duration = Duration::from_secs(30);

/// Capability → ordered set of active agent ids.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CapabilityIndex {
    by_capability: BTreeMap<String, BTreeSet<String>>,
}

impl CapabilityIndex {
    /// Rebuild the index from scratch.
    pub fn rebuild<'a>(records: impl IntoIterator<Item = &'a AgentRecord>) -> Self {
        let mut index = Self::default();
        for record in records {
            index.insert(record);
        }
        index
    }

    /// Index a record. Records that are not active are ignored.
    pub fn insert(&mut self, record: &AgentRecord) {
        if !record.is_active() {
            return;
        }
        for capability in &record.capabilities {
            self.by_capability
                .entry(capability.clone())
                .or_default()
                .insert(record.agent_id.clone());
        }
    }

    /// Drop a record from every capability it was indexed under.
    pub fn remove(&mut self, record: &AgentRecord) {
        for capability in &record.capabilities {
            if let Some(ids) = self.by_capability.get_mut(capability) {
                ids.remove(&record.agent_id);
                if ids.is_empty() {
                    self.by_capability.remove(capability);
                }
            }
        }
    }

    /// Active agent ids for a capability, ascending.
    pub fn agents_for(&self, capability: &str) -> Vec<String> {
        self.by_capability
            .get(capability)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn capabilities(&self) -> Vec<String> {
        self.by_capability.keys().cloned().collect()
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    records: HashMap<String, AgentRecord>,
    index: CapabilityIndex,
}

impl StoreInner {
    /// Mark active records whose heartbeat is older than `ttl` unhealthy.
    fn expire_stale(&mut self, now: DateTime<Utc>, ttl: chrono::Duration) -> usize {
        let stale: Vec<String> = self
            .records
            .values()
            .filter(|r| r.is_active() && now - r.last_heartbeat_at > ttl)
            .map(|r| r.agent_id.clone())
            .collect();

        for agent_id in &stale {
            if let Some(record) = self.records.get_mut(agent_id) {
                self.index.remove(record);
                record.status = AgentStatus::Unhealthy;
                log::warn!(
                    "Agent {} ({}) missed its heartbeat TTL, marked unhealthy",
                    record.agent_name,
                    record.agent_id
                );
            }
        }
        stale.len()
    }

    fn live_record_mut(&mut self, agent_id: &str) -> Result<&mut AgentRecord, A2AError> {
        match self.records.get_mut(agent_id) {
            Some(record) if record.status != AgentStatus::Deregistered => Ok(record),
            _ => Err(A2AError::UnknownAgent {
                agent_id: agent_id.to_string(),
            }),
        }
    }
}

/// In-memory registry of agents.
#[derive(Debug)]
pub struct RegistryStore {
    inner: RwLock<StoreInner>,
    heartbeat_ttl: chrono::Duration,
}

impl Default for RegistryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_TTL)
    }
}

impl RegistryStore {
    /// Create an empty store whose records expire after `heartbeat_ttl`
    /// without a heartbeat.
    pub fn new(heartbeat_ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            heartbeat_ttl: chrono::Duration::from_std(heartbeat_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(30)),
        }
    }

    /// Register an agent, or refresh it if a live record with the same name
    /// and endpoints exists. Returns the agent id.
    pub fn register(&self, request: RegistrationRequest) -> Result<String, A2AError> {
        request.validate()?;
        let now = Utc::now();
        let mut inner = self.inner.write();

        let existing = inner
            .records
            .values()
            .find(|r| {
                r.status != AgentStatus::Deregistered
                    && r.agent_name == request.agent_name
                    && r.endpoints == request.endpoints
            })
            .map(|r| r.agent_id.clone());

        if let Some(agent_id) = existing {
            let StoreInner { records, index } = &mut *inner;
            if let Some(record) = records.get_mut(&agent_id) {
                index.remove(record);
                record.agent_type = request.agent_type;
                record.capabilities = request.capabilities;
                record.last_heartbeat_at = now;
                record.status = AgentStatus::Active;
                index.insert(record);
                log::info!("Re-registered agent {} ({})", record.agent_name, agent_id);
            }
            return Ok(agent_id);
        }

        let agent_id = Uuid::new_v4().to_string();
        let record = AgentRecord {
            agent_id: agent_id.clone(),
            agent_name: request.agent_name,
            agent_type: request.agent_type,
            capabilities: request.capabilities,
            endpoints: request.endpoints,
            registered_at: now,
            last_heartbeat_at: now,
            status: AgentStatus::Active,
        };
        log::info!(
            "Registered agent {} ({}) with capabilities {:?}",
            record.agent_name,
            agent_id,
            record.capabilities
        );
        inner.index.insert(&record);
        inner.records.insert(agent_id.clone(), record);
        Ok(agent_id)
    }

    /// Tombstone a record. Deregistering twice is a no-op; an id that was
    /// never registered is [`A2AError::UnknownAgent`].
    pub fn deregister(&self, agent_id: &str) -> Result<(), A2AError> {
        let mut inner = self.inner.write();
        let StoreInner { records, index } = &mut *inner;
        let record = records.get_mut(agent_id).ok_or_else(|| A2AError::UnknownAgent {
            agent_id: agent_id.to_string(),
        })?;

        if record.status == AgentStatus::Deregistered {
            log::debug!("Agent {} already deregistered", agent_id);
            return Ok(());
        }
        index.remove(record);
        record.status = AgentStatus::Deregistered;
        log::info!("Deregistered agent {} ({})", record.agent_name, agent_id);
        Ok(())
    }

    /// Active records providing `capability`, ordered by ascending agent id.
    ///
    /// Zero active providers is [`A2AError::NoAgentFound`].
    pub fn resolve(&self, capability: &str) -> Result<Vec<AgentRecord>, A2AError> {
        let mut inner = self.inner.write();
        inner.expire_stale(Utc::now(), self.heartbeat_ttl);

        let agents: Vec<AgentRecord> = inner
            .index
            .agents_for(capability)
            .iter()
            .filter_map(|id| inner.records.get(id).cloned())
            .collect();

        if agents.is_empty() {
            return Err(A2AError::NoAgentFound {
                capability: capability.to_string(),
            });
        }
        Ok(agents)
    }

    /// Fetch a record that has not been deregistered.
    pub fn get(&self, agent_id: &str) -> Result<AgentRecord, A2AError> {
        let inner = self.inner.read();
        match inner.records.get(agent_id) {
            Some(record) if record.status != AgentStatus::Deregistered => Ok(record.clone()),
            _ => Err(A2AError::UnknownAgent {
                agent_id: agent_id.to_string(),
            }),
        }
    }

    /// Refresh `last_heartbeat_at`, reactivating an unhealthy record.
    pub fn heartbeat(&self, agent_id: &str) -> Result<(), A2AError> {
        self.heartbeat_at(agent_id, Utc::now())
    }

    fn heartbeat_at(&self, agent_id: &str, now: DateTime<Utc>) -> Result<(), A2AError> {
        let mut inner = self.inner.write();
        let record = inner.live_record_mut(agent_id)?;
        record.last_heartbeat_at = now;
        if record.status == AgentStatus::Unhealthy {
            record.status = AgentStatus::Active;
            log::info!("Agent {} ({}) is active again", record.agent_name, agent_id);
            let record = record.clone();
            inner.index.insert(&record);
        }
        Ok(())
    }

    /// Apply a health probe result. A healthy probe counts as a heartbeat;
    /// an unhealthy one takes the record out of the capability index.
    pub fn set_health(&self, agent_id: &str, healthy: bool) -> Result<(), A2AError> {
        if healthy {
            return self.heartbeat(agent_id);
        }
        let mut inner = self.inner.write();
        let StoreInner { records, index } = &mut *inner;
        let record = match records.get_mut(agent_id) {
            Some(r) if r.status != AgentStatus::Deregistered => r,
            _ => {
                return Err(A2AError::UnknownAgent {
                    agent_id: agent_id.to_string(),
                })
            }
        };
        if record.status == AgentStatus::Active {
            index.remove(record);
            record.status = AgentStatus::Unhealthy;
            log::warn!("Agent {} ({}) failed its health check", record.agent_name, agent_id);
        }
        Ok(())
    }

    /// Expire stale heartbeats now. Returns how many records changed.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    /// Expire heartbeats as of `now`.
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        self.inner.write().expire_stale(now, self.heartbeat_ttl)
    }

    /// Every record, tombstones included, ordered by agent id.
    pub fn list(&self) -> Vec<AgentRecord> {
        let inner = self.inner.read();
        let mut records: Vec<AgentRecord> = inner.records.values().cloned().collect();
        records.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        records
    }

    /// Capabilities with at least one active provider.
    pub fn capabilities(&self) -> Vec<String> {
        self.inner.read().index.capabilities()
    }

    /// Number of active records.
    pub fn active_count(&self) -> usize {
        self.inner.read().records.values().filter(|r| r.is_active()).count()
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    /// Check the derived index against a fresh rebuild.
    pub fn index_is_consistent(&self) -> bool {
        let inner = self.inner.read();
        inner.index == CapabilityIndex::rebuild(inner.records.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, capabilities: &[&str], port: u16) -> RegistrationRequest {
        RegistrationRequest::new(
            name,
            "domain",
            capabilities.iter().copied(),
            [
                ("http", format!("http://localhost:{}", port)),
                ("health", format!("http://localhost:{}/health", port)),
            ],
        )
    }

    #[test]
    fn test_register_resolve_deregister() {
        let store = RegistryStore::default();
        let a = store.register(request("accounts", &["x.y"], 8001)).unwrap();

        let resolved = store.resolve("x.y").unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].agent_id, a);

        store.deregister(&a).unwrap();
        assert_eq!(
            store.resolve("x.y").unwrap_err(),
            A2AError::NoAgentFound { capability: "x.y".into() }
        );
        // Tombstone is kept.
        assert_eq!(store.list()[0].status, AgentStatus::Deregistered);
        assert!(store.index_is_consistent());
    }

    #[test]
    fn test_register_is_idempotent_per_name_and_endpoints() {
        let store = RegistryStore::default();
        let first = store.register(request("accounts", &["account.balance"], 8001)).unwrap();
        let second = store
            .register(request("accounts", &["account.balance", "account.transfer"], 8001))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
        assert_eq!(store.resolve("account.transfer").unwrap()[0].agent_id, first);

        // Different endpoints make a different agent.
        let third = store.register(request("accounts", &["account.balance"], 8002)).unwrap();
        assert_ne!(first, third);
        assert!(store.index_is_consistent());
    }

    #[test]
    fn test_reregistration_drops_removed_capabilities() {
        let store = RegistryStore::default();
        store.register(request("accounts", &["account.balance", "account.transfer"], 8001)).unwrap();
        store.register(request("accounts", &["account.balance"], 8001)).unwrap();
        assert!(store.resolve("account.transfer").is_err());
        assert!(store.index_is_consistent());
    }

    #[test]
    fn test_resolve_orders_by_agent_id() {
        let store = RegistryStore::default();
        for port in 8001..8006 {
            store.register(request(&format!("agent-{}", port), &["product.search"], port)).unwrap();
        }
        let ids: Vec<String> = store
            .resolve("product.search")
            .unwrap()
            .into_iter()
            .map(|r| r.agent_id)
            .collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        // Identical state gives identical answers.
        let again: Vec<String> = store
            .resolve("product.search")
            .unwrap()
            .into_iter()
            .map(|r| r.agent_id)
            .collect();
        assert_eq!(ids, again);
    }

    #[test]
    fn test_deregister_is_idempotent() {
        let store = RegistryStore::default();
        let a = store.register(request("accounts", &["x.y"], 8001)).unwrap();
        store.deregister(&a).unwrap();
        store.deregister(&a).unwrap();
        assert!(matches!(store.deregister("never-registered"), Err(A2AError::UnknownAgent { .. })));
    }

    #[test]
    fn test_heartbeat_unknown_or_deregistered() {
        let store = RegistryStore::default();
        assert!(matches!(store.heartbeat("nope"), Err(A2AError::UnknownAgent { .. })));
        let a = store.register(request("accounts", &["x.y"], 8001)).unwrap();
        store.heartbeat(&a).unwrap();
        store.deregister(&a).unwrap();
        assert!(matches!(store.heartbeat(&a), Err(A2AError::UnknownAgent { .. })));
    }

    #[test]
    fn test_heartbeat_ttl_expiry_and_recovery() {
        let store = RegistryStore::new(Duration::from_secs(10));
        let a = store.register(request("accounts", &["x.y"], 8001)).unwrap();

        let later = Utc::now() + chrono::Duration::seconds(11);
        assert_eq!(store.sweep_expired_at(later), 1);
        assert_eq!(store.get(&a).unwrap().status, AgentStatus::Unhealthy);
        assert!(matches!(store.resolve("x.y"), Err(A2AError::NoAgentFound { .. })));

        store.heartbeat(&a).unwrap();
        assert_eq!(store.resolve("x.y").unwrap()[0].agent_id, a);
        assert!(store.index_is_consistent());
    }

    #[test]
    fn test_health_probe_results() {
        let store = RegistryStore::default();
        let a = store.register(request("accounts", &["x.y"], 8001)).unwrap();
        store.set_health(&a, false).unwrap();
        assert!(store.resolve("x.y").is_err());
        store.set_health(&a, true).unwrap();
        assert!(store.resolve("x.y").is_ok());
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn test_registration_errors() {
        let store = RegistryStore::default();
        assert!(matches!(
            store.register(request("accounts", &[], 8001)),
            Err(A2AError::Registration(_))
        ));
        assert!(matches!(
            store.register(request("accounts", &["NotDotted"], 8001)),
            Err(A2AError::Registration(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_get_hides_tombstones() {
        let store = RegistryStore::default();
        let a = store.register(request("accounts", &["x.y"], 8001)).unwrap();
        assert_eq!(store.get(&a).unwrap().agent_name, "accounts");
        store.deregister(&a).unwrap();
        assert!(store.get(&a).is_err());
        assert_eq!(store.capabilities(), Vec::<String>::new());
    }
}
