//! Registry client: typed access to the registry from the caller's side.
//!
//! The client talks to the registry through a [`RegistryTransport`]:
//! [`LocalRegistry`] for an in-process [`RegistryStore`], [`HttpRegistry`]
//! for a remote registry server. Resolutions are cached for a short TTL.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;

use super::cache::ResolutionCache;
use super::record::{
    AgentRecord, RegistrationRequest, RegistrationResponse, RegistryErrorBody,
};
use super::store::RegistryStore;
use crate::errors::A2AError;

// ---------------------------------------------------------------------------
// RegistryTransport
// ---------------------------------------------------------------------------

/// How the client reaches the registry.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    async fn register(&self, request: &RegistrationRequest) -> Result<String, A2AError>;

    async fn deregister(&self, agent_id: &str) -> Result<(), A2AError>;

    /// Active records for a capability, in the registry's order.
    async fn resolve(&self, capability: &str) -> Result<Vec<AgentRecord>, A2AError>;

    async fn get_agent(&self, agent_id: &str) -> Result<AgentRecord, A2AError>;

    async fn heartbeat(&self, agent_id: &str) -> Result<(), A2AError>;
}

/// Transport over an in-process store.
#[derive(Debug, Clone)]
pub struct LocalRegistry {
    store: Arc<RegistryStore>,
}

impl LocalRegistry {
    pub fn new(store: Arc<RegistryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<RegistryStore> {
        &self.store
    }
}

#[async_trait]
impl RegistryTransport for LocalRegistry {
    async fn register(&self, request: &RegistrationRequest) -> Result<String, A2AError> {
        self.store.register(request.clone())
    }

    async fn deregister(&self, agent_id: &str) -> Result<(), A2AError> {
        self.store.deregister(agent_id)
    }

    async fn resolve(&self, capability: &str) -> Result<Vec<AgentRecord>, A2AError> {
        self.store.resolve(capability)
    }

    async fn get_agent(&self, agent_id: &str) -> Result<AgentRecord, A2AError> {
        self.store.get(agent_id)
    }

    async fn heartbeat(&self, agent_id: &str) -> Result<(), A2AError> {
        self.store.heartbeat(agent_id)
    }
}

/// Transport over the registry server's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    base_url: Url,
    http: reqwest::Client,
}

impl HttpRegistry {
    /// Create a transport for the registry at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, A2AError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| A2AError::Config(format!("bad registry url '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(A2AError::Config(format!("registry url '{}' cannot be a base", base_url)));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| A2AError::Registry(e.to_string()))?;
        Ok(Self { base_url, http })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, A2AError> {
        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|e| A2AError::Registry(format!("bad registry response: {}", e)));
        }
        let body = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<RegistryErrorBody>(&body) {
            Ok(err) => Err(err.into_error()),
            Err(_) => Err(A2AError::Registry(format!("registry answered HTTP {}: {}", status, body))),
        }
    }

    async fn expect_empty(resp: reqwest::Response) -> Result<(), A2AError> {
        if resp.status().is_success() || resp.status() == StatusCode::NO_CONTENT {
            return Ok(());
        }
        Self::decode::<serde_json::Value>(resp).await.map(|_| ())
    }
}

fn unreachable(err: reqwest::Error) -> A2AError {
    A2AError::Registry(format!("registry unreachable: {}", err))
}

#[async_trait]
impl RegistryTransport for HttpRegistry {
    async fn register(&self, request: &RegistrationRequest) -> Result<String, A2AError> {
        let resp = self
            .http
            .post(self.url(&["agents"]))
            .json(request)
            .send()
            .await
            .map_err(unreachable)?;
        let body: RegistrationResponse = Self::decode(resp).await?;
        Ok(body.agent_id)
    }

    async fn deregister(&self, agent_id: &str) -> Result<(), A2AError> {
        let resp = self
            .http
            .delete(self.url(&["agents", agent_id]))
            .send()
            .await
            .map_err(unreachable)?;
        Self::expect_empty(resp).await
    }

    async fn resolve(&self, capability: &str) -> Result<Vec<AgentRecord>, A2AError> {
        let resp = self
            .http
            .get(self.url(&["capabilities", capability, "agents"]))
            .send()
            .await
            .map_err(unreachable)?;
        Self::decode(resp).await
    }

    async fn get_agent(&self, agent_id: &str) -> Result<AgentRecord, A2AError> {
        let resp = self
            .http
            .get(self.url(&["agents", agent_id]))
            .send()
            .await
            .map_err(unreachable)?;
        Self::decode(resp).await
    }

    async fn heartbeat(&self, agent_id: &str) -> Result<(), A2AError> {
        let resp = self
            .http
            .post(self.url(&["agents", agent_id, "heartbeat"]))
            .send()
            .await
            .map_err(unreachable)?;
        Self::expect_empty(resp).await
    }
}

// ---------------------------------------------------------------------------
// RegistryClient
// ---------------------------------------------------------------------------

/// Caller-side registry access with a resolution cache.
pub struct RegistryClient {
    transport: Arc<dyn RegistryTransport>,
    cache: ResolutionCache,
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("transport", &"<transport>")
            .field("cache", &self.cache)
            .finish()
    }
}

impl RegistryClient {
    /// Create a client caching resolutions for `cache_ttl`.
    pub fn new(transport: Arc<dyn RegistryTransport>, cache_ttl: Duration) -> Self {
        Self {
            transport,
            cache: ResolutionCache::new(cache_ttl),
        }
    }

    /// Client over an in-process store.
    pub fn local(store: Arc<RegistryStore>, cache_ttl: Duration) -> Self {
        Self::new(Arc::new(LocalRegistry::new(store)), cache_ttl)
    }

    /// Register an agent and return its id.
    ///
    /// Re-registering the same name and endpoints updates the existing
    /// record. Fails with [`A2AError::Registration`] on an empty capability
    /// set or a malformed endpoint, before any registry round trip.
    pub async fn register(
        &self,
        agent_name: &str,
        agent_type: &str,
        capabilities: &[&str],
        endpoints: &BTreeMap<String, String>,
    ) -> Result<String, A2AError> {
        let request = RegistrationRequest::new(
            agent_name,
            agent_type,
            capabilities.iter().copied(),
            endpoints.clone(),
        );
        request.validate()?;
        let agent_id = self.transport.register(&request).await?;
        for capability in &request.capabilities {
            self.cache.invalidate(capability);
        }
        self.cache.invalidate_agent(&agent_id);
        Ok(agent_id)
    }

    /// Tombstone an agent. Idempotent.
    pub async fn deregister(&self, agent_id: &str) -> Result<(), A2AError> {
        self.transport.deregister(agent_id).await?;
        self.cache.invalidate_agent(agent_id);
        self.cache.invalidate(&agent_key(agent_id));
        Ok(())
    }

    /// Active providers of `capability`, ordered by ascending agent id.
    ///
    /// Served from the cache while fresh. An empty answer is
    /// [`A2AError::NoAgentFound`], which is never cached.
    pub async fn resolve(&self, capability: &str) -> Result<Arc<Vec<AgentRecord>>, A2AError> {
        if let Some(hit) = self.cache.get(capability) {
            return Ok(hit);
        }
        match self.transport.resolve(capability).await {
            Ok(agents) if agents.is_empty() => {
                log::debug!("Registry listed no providers for {}", capability);
                self.cache.invalidate(capability);
                Err(A2AError::NoAgentFound {
                    capability: capability.to_string(),
                })
            }
            Ok(agents) => Ok(self.cache.insert(capability, agents)),
            Err(err) => {
                if matches!(err, A2AError::NoAgentFound { .. }) {
                    self.cache.invalidate(capability);
                }
                Err(err)
            }
        }
    }

    /// Look up one agent by id.
    pub async fn lookup(&self, agent_id: &str) -> Result<AgentRecord, A2AError> {
        let key = agent_key(agent_id);
        if let Some(hit) = self.cache.get(&key) {
            if let Some(record) = hit.first() {
                return Ok(record.clone());
            }
        }
        match self.transport.get_agent(agent_id).await {
            Ok(record) => {
                self.cache.insert(&key, vec![record.clone()]);
                Ok(record)
            }
            Err(err) => {
                self.cache.invalidate(&key);
                Err(err)
            }
        }
    }

    /// Refresh an agent's heartbeat.
    pub async fn heartbeat(&self, agent_id: &str) -> Result<(), A2AError> {
        self.transport.heartbeat(agent_id).await
    }

    /// Forget the cached resolution for a capability.
    pub fn invalidate(&self, capability: &str) {
        self.cache.invalidate(capability);
    }

    /// Forget every cached entry mentioning an agent.
    pub fn invalidate_agent(&self, agent_id: &str) {
        self.cache.invalidate_agent(agent_id);
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }
}

fn agent_key(agent_id: &str) -> String {
    format!("agent:{}", agent_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts resolve round trips.
    struct CountingRegistry {
        inner: LocalRegistry,
        resolves: AtomicUsize,
    }

    #[async_trait]
    impl RegistryTransport for CountingRegistry {
        async fn register(&self, request: &RegistrationRequest) -> Result<String, A2AError> {
            self.inner.register(request).await
        }
        async fn deregister(&self, agent_id: &str) -> Result<(), A2AError> {
            self.inner.deregister(agent_id).await
        }
        async fn resolve(&self, capability: &str) -> Result<Vec<AgentRecord>, A2AError> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            self.inner.resolve(capability).await
        }
        async fn get_agent(&self, agent_id: &str) -> Result<AgentRecord, A2AError> {
            self.inner.get_agent(agent_id).await
        }
        async fn heartbeat(&self, agent_id: &str) -> Result<(), A2AError> {
            self.inner.heartbeat(agent_id).await
        }
    }

    fn endpoints(port: u16) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("http".to_string(), format!("http://localhost:{}", port));
        map
    }

    fn counting() -> (Arc<CountingRegistry>, RegistryClient) {
        let transport = Arc::new(CountingRegistry {
            inner: LocalRegistry::new(Arc::new(RegistryStore::default())),
            resolves: AtomicUsize::new(0),
        });
        let client = RegistryClient::new(transport.clone(), Duration::from_secs(5));
        (transport, client)
    }

    #[tokio::test]
    async fn test_register_resolve_deregister_scenario() {
        let client = RegistryClient::local(Arc::new(RegistryStore::default()), Duration::from_secs(5));
        let a = client.register("A", "domain", &["x.y"], &endpoints(8001)).await.unwrap();

        let resolved = client.resolve("x.y").await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].agent_id, a);

        client.deregister(&a).await.unwrap();
        assert!(matches!(
            client.resolve("x.y").await,
            Err(A2AError::NoAgentFound { .. })
        ));
        // Second deregistration is a no-op.
        client.deregister(&a).await.unwrap();
    }

    #[tokio::test]
    async fn test_register_validates_before_round_trip() {
        let (_, client) = counting();
        let err = client.register("A", "domain", &[], &endpoints(8001)).await.unwrap_err();
        assert!(matches!(err, A2AError::Registration(_)));

        let mut bad = BTreeMap::new();
        bad.insert("http".to_string(), "localhost without scheme".to_string());
        let err = client.register("A", "domain", &["x.y"], &bad).await.unwrap_err();
        assert!(matches!(err, A2AError::Registration(_)));
    }

    #[tokio::test]
    async fn test_resolve_is_cached() {
        let (transport, client) = counting();
        client.register("A", "domain", &["x.y"], &endpoints(8001)).await.unwrap();

        client.resolve("x.y").await.unwrap();
        client.resolve("x.y").await.unwrap();
        assert_eq!(transport.resolves.load(Ordering::SeqCst), 1);

        client.invalidate("x.y");
        client.resolve("x.y").await.unwrap();
        assert_eq!(transport.resolves.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_agent_found_is_not_cached() {
        let (transport, client) = counting();
        assert!(client.resolve("x.y").await.is_err());
        client.register("A", "domain", &["x.y"], &endpoints(8001)).await.unwrap();
        assert_eq!(client.resolve("x.y").await.unwrap().len(), 1);
        assert_eq!(transport.resolves.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_registration_refreshes_cached_capability() {
        let (_, client) = counting();
        client.register("A", "domain", &["x.y"], &endpoints(8001)).await.unwrap();
        assert_eq!(client.resolve("x.y").await.unwrap().len(), 1);
        client.register("B", "domain", &["x.y"], &endpoints(8002)).await.unwrap();
        assert_eq!(client.resolve("x.y").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_lookup_and_heartbeat() {
        let (_, client) = counting();
        let a = client.register("A", "domain", &["x.y"], &endpoints(8001)).await.unwrap();
        assert_eq!(client.lookup(&a).await.unwrap().agent_name, "A");
        client.heartbeat(&a).await.unwrap();

        client.deregister(&a).await.unwrap();
        assert!(matches!(client.lookup(&a).await, Err(A2AError::UnknownAgent { .. })));
        assert!(matches!(client.heartbeat(&a).await, Err(A2AError::UnknownAgent { .. })));
    }

    /// Registry that answers every resolution with an empty list.
    struct EmptyRegistry {
        resolves: AtomicUsize,
    }

    #[async_trait]
    impl RegistryTransport for EmptyRegistry {
        async fn register(&self, _request: &RegistrationRequest) -> Result<String, A2AError> {
            Ok("a-1".to_string())
        }
        async fn deregister(&self, _agent_id: &str) -> Result<(), A2AError> {
            Ok(())
        }
        async fn resolve(&self, _capability: &str) -> Result<Vec<AgentRecord>, A2AError> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
        async fn get_agent(&self, agent_id: &str) -> Result<AgentRecord, A2AError> {
            Err(A2AError::UnknownAgent {
                agent_id: agent_id.to_string(),
            })
        }
        async fn heartbeat(&self, _agent_id: &str) -> Result<(), A2AError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_empty_resolution_is_no_agent_found() {
        let transport = Arc::new(EmptyRegistry {
            resolves: AtomicUsize::new(0),
        });
        let client = RegistryClient::new(transport.clone(), Duration::from_secs(5));

        for _ in 0..2 {
            let err = client.resolve("x.y").await.unwrap_err();
            assert!(matches!(err, A2AError::NoAgentFound { ref capability } if capability == "x.y"));
        }
        assert_eq!(transport.resolves.load(Ordering::SeqCst), 2);
        assert!(client.cache().get("x.y").is_none());
    }

    /// Serve the registry API on an ephemeral port.
    async fn serve_registry() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = crate::server::app_router(crate::server::AppState::default());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_http_registry_against_server() {
        let base = serve_registry().await;
        let client = RegistryClient::new(
            Arc::new(HttpRegistry::new(&base, Duration::from_secs(5)).unwrap()),
            Duration::from_secs(5),
        );

        let a = client.register("A", "domain", &["x.y"], &endpoints(8001)).await.unwrap();
        let again = client.register("A", "domain", &["x.y"], &endpoints(8001)).await.unwrap();
        assert_eq!(a, again);

        let resolved = client.resolve("x.y").await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].agent_id, a);
        assert_eq!(client.lookup(&a).await.unwrap().agent_name, "A");
        client.heartbeat(&a).await.unwrap();

        let err = client.resolve("nobody.home").await.unwrap_err();
        assert!(matches!(err, A2AError::NoAgentFound { ref capability } if capability == "nobody.home"));

        client.deregister(&a).await.unwrap();
        client.deregister(&a).await.unwrap();
        let err = client.resolve("x.y").await.unwrap_err();
        assert!(matches!(err, A2AError::NoAgentFound { .. }));

        let err = client.lookup(&a).await.unwrap_err();
        assert!(matches!(err, A2AError::UnknownAgent { ref agent_id } if agent_id == &a));
        let err = client.heartbeat("missing").await.unwrap_err();
        assert!(matches!(err, A2AError::UnknownAgent { ref agent_id } if agent_id == "missing"));
    }

    #[tokio::test]
    async fn test_http_registry_rejects_bad_registration() {
        let base = serve_registry().await;
        let registry = HttpRegistry::new(&base, Duration::from_secs(5)).unwrap();
        // Bypasses client-side validation to exercise the server's answer.
        let request = RegistrationRequest::new("A", "domain", Vec::<String>::new(), endpoints(8001));
        let err = registry.register(&request).await.unwrap_err();
        assert!(matches!(err, A2AError::Registration(_)));
    }

    #[test]
    fn test_http_registry_builds_paths() {
        let registry = HttpRegistry::new("http://registry:8500/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            registry.url(&["capabilities", "account.balance", "agents"]).as_str(),
            "http://registry:8500/capabilities/account.balance/agents"
        );
        let nested = HttpRegistry::new("http://registry:8500/api", Duration::from_secs(1)).unwrap();
        assert_eq!(
            nested.url(&["agents", "a-1", "heartbeat"]).as_str(),
            "http://registry:8500/api/agents/a-1/heartbeat"
        );
        assert!(HttpRegistry::new("not a url", Duration::from_secs(1)).is_err());
    }
}
