//! Short-lived cache of registry resolutions.
//!
//! Entries are replaced whole (copy-on-refresh): readers clone an `Arc` to
//! an immutable list, so a concurrent refresh never exposes a half-written
//! entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use super::record::AgentRecord;

/// Cached resolution entry.
struct CacheEntry {
    agents: Arc<Vec<AgentRecord>>,
    created_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

/// Resolution cache keyed by capability (or `agent:<id>` for direct lookups).
pub struct ResolutionCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl std::fmt::Debug for ResolutionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

impl ResolutionCache {
    /// A zero TTL disables caching.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh entry for `key`, if any.
    pub fn get(&self, key: &str) -> Option<Arc<Vec<AgentRecord>>> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|e| !e.is_expired(self.ttl))
            .map(|e| Arc::clone(&e.agents))
    }

    /// Store a resolution and hand back the shared copy.
    pub fn insert(&self, key: &str, agents: Vec<AgentRecord>) -> Arc<Vec<AgentRecord>> {
        let agents = Arc::new(agents);
        if self.ttl.is_zero() {
            return agents;
        }
        self.entries.write().insert(
            key.to_string(),
            CacheEntry {
                agents: Arc::clone(&agents),
                created_at: Instant::now(),
            },
        );
        agents
    }

    pub fn invalidate(&self, key: &str) {
        if self.entries.write().remove(key).is_some() {
            log::debug!("Invalidated cached resolution for {}", key);
        }
    }

    /// Drop every entry that mentions `agent_id`.
    pub fn invalidate_agent(&self, agent_id: &str) {
        self.entries
            .write()
            .retain(|_, e| !e.agents.iter().any(|a| a.agent_id == agent_id));
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
