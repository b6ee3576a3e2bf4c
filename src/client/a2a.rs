//! The A2A client: the single entry point for outbound agent calls.
//!
//! One `send` resolves candidates, gates each attempt through the circuit
//! breaker, dispatches over the transport and retries transient failures
//! with backoff, rotating to the next candidate after every failed attempt.
//! Attempts of one send are strictly sequential.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use super::options::{SendOptions, Target};
use super::transport::{EnvelopeTransport, HttpEnvelopeTransport, TransportError};
use crate::config::ClientConfig;
use crate::envelope::{codec, AgentRef, RequestEnvelope, RequestMetadata, ResponseEnvelope, SchemaRegistry};
use crate::errors::A2AError;
use crate::registry::{AgentRecord, HttpRegistry, RegistryClient};
use crate::resilience::{BreakerConfig, BreakerPermit, CircuitBreaker, RetryPolicy};
use crate::trace::TraceContext;

/// Resilient client for agent-to-agent calls.
pub struct A2AClient {
    source: AgentRef,
    registry: Arc<RegistryClient>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    transport: Arc<dyn EnvelopeTransport>,
    config: ClientConfig,
    schemas: Option<Arc<SchemaRegistry>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for A2AClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("A2AClient")
            .field("source", &self.source)
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Outcome of one failed attempt, before the retry decision.
enum AttemptFailure {
    /// Retry if the policy allows.
    Retryable(A2AError),
    /// Surface immediately.
    Fatal(A2AError),
}

impl A2AClient {
    /// Create a client. Fails with [`A2AError::Config`] on invalid options.
    pub fn new(
        source: AgentRef,
        registry: RegistryClient,
        transport: Arc<dyn EnvelopeTransport>,
        config: ClientConfig,
    ) -> Result<Self, A2AError> {
        config.validate()?;
        Ok(Self {
            source,
            registry: Arc::new(registry),
            breaker: Arc::new(CircuitBreaker::new(BreakerConfig::from_client_config(&config))),
            retry: RetryPolicy::from_client_config(&config),
            transport,
            config,
            schemas: None,
            closed: AtomicBool::new(false),
        })
    }

    /// Client talking to a registry server and to agents over HTTP.
    pub fn http(source: AgentRef, registry_url: &str, config: ClientConfig) -> Result<Self, A2AError> {
        let registry = RegistryClient::new(
            Arc::new(HttpRegistry::new(registry_url, config.timeout())?),
            config.cache_ttl(),
        );
        Self::new(source, registry, Arc::new(HttpEnvelopeTransport::new()), config)
    }

    /// Validate payloads against per-intent schemas before sending.
    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = Some(Arc::new(schemas));
        self
    }

    /// Share breaker state with other clients in the process.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn source(&self) -> &AgentRef {
        &self.source
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn registry(&self) -> &Arc<RegistryClient> {
        &self.registry
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Invoke `intent` on `target` and return the success response.
    ///
    /// Error responses come back as [`A2AError::Business`]; transient faults
    /// are retried up to `max_retries` attempts and then surface as
    /// [`A2AError::RetriesExhausted`]. A capability with no active provider
    /// fails with [`A2AError::NoAgentFound`] before any transport attempt.
    pub async fn send(
        &self,
        target: Target,
        intent: &str,
        payload: Value,
        options: SendOptions,
    ) -> Result<ResponseEnvelope, A2AError> {
        if self.is_closed() {
            return Err(A2AError::Closed);
        }
        let deadline = options.deadline.map(|d| Instant::now() + d);
        let timeout = options.timeout.unwrap_or_else(|| self.config.timeout());

        let trace = if self.config.enable_tracing {
            Some(match &options.trace {
                Some(parent) => parent.child(),
                None => TraceContext::new_root(),
            })
        } else {
            None
        };
        let metadata = RequestMetadata {
            timeout_seconds: Some(timeout.as_secs_f64()),
            trace,
            extensions: options.extensions.clone(),
        };

        match &target {
            Target::Capability(capability) => {
                // Validate before resolving so a bad request costs no round trip.
                let template =
                    self.template(AgentRef::capability(capability.clone()), intent, payload, metadata)?;
                let candidates = within(deadline, 0, self.registry.resolve(capability)).await?;
                self.run(template, Some(capability.as_str()), candidates, timeout, deadline, &options)
                    .await
            }
            Target::Agent(agent_id) => {
                let record = within(deadline, 0, self.registry.lookup(agent_id)).await?;
                let template = self.template(
                    AgentRef::agent(record.agent_id.clone(), record.agent_name.clone()),
                    intent,
                    payload,
                    metadata,
                )?;
                self.run(template, None, Arc::new(vec![record]), timeout, deadline, &options)
                    .await
            }
        }
    }

    fn template(
        &self,
        target: AgentRef,
        intent: &str,
        payload: Value,
        metadata: RequestMetadata,
    ) -> Result<RequestEnvelope, A2AError> {
        let mut request = codec::build_request(
            self.source.clone(),
            target,
            intent,
            payload,
            metadata,
            self.schemas.as_deref(),
        )?;
        request.protocol_version = self.config.protocol_version.clone();
        Ok(request.with_correlation_id(Uuid::new_v4().to_string()))
    }

    /// The attempt loop.
    async fn run(
        &self,
        template: RequestEnvelope,
        capability: Option<&str>,
        candidates: Arc<Vec<AgentRecord>>,
        timeout: Duration,
        deadline: Option<Instant>,
        options: &SendOptions,
    ) -> Result<ResponseEnvelope, A2AError> {
        let mut attempt: u32 = 0;
        let mut cursor: usize = 0;

        loop {
            attempt += 1;

            let failure = match self.pick(&candidates, cursor) {
                None => {
                    let err = A2AError::CircuitOpen {
                        target: capability
                            .map(str::to_string)
                            .or_else(|| candidates.first().map(|r| r.agent_id.clone()))
                            .unwrap_or_default(),
                    };
                    if attempt == 1 {
                        return Err(err);
                    }
                    AttemptFailure::Retryable(err)
                }
                Some((index, permit)) => {
                    cursor = index + 1;
                    match self
                        .attempt(
                            &template,
                            &candidates[index],
                            permit,
                            capability,
                            timeout,
                            deadline,
                            attempt,
                            options,
                        )
                        .await
                    {
                        Ok(response) => return Ok(response),
                        Err(failure) => failure,
                    }
                }
            };

            let err = match failure {
                AttemptFailure::Fatal(err) => return Err(err),
                AttemptFailure::Retryable(err) => err,
            };

            let retry = match &err {
                A2AError::Business { .. } => attempt < self.retry.max_retries,
                other => self.retry.should_retry(attempt, other),
            };
            if !retry {
                return Err(match err {
                    A2AError::Business { .. } => err,
                    err if attempt >= self.retry.max_retries => A2AError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    },
                    err => err,
                });
            }

            let backoff = self.retry.next_backoff(attempt);
            if let Some(deadline) = deadline {
                if Instant::now() + backoff >= deadline {
                    log::debug!("Deadline leaves no room for attempt {}", attempt + 1);
                    return Err(A2AError::DeadlineExceeded { attempts: attempt });
                }
            }
            log::debug!(
                "Attempt {}/{} for {} failed ({}), retrying in {:?}",
                attempt,
                self.retry.max_retries,
                template.intent,
                err,
                backoff
            );
            tokio::time::sleep(backoff).await;
        }
    }

    /// First candidate from `cursor` onwards whose breaker admits a call.
    fn pick(&self, candidates: &[AgentRecord], cursor: usize) -> Option<(usize, BreakerPermit<'_>)> {
        let n = candidates.len();
        (0..n).map(|offset| (cursor + offset) % n).find_map(|i| {
            self.breaker
                .acquire(&candidates[i].agent_id)
                .map(|permit| (i, permit))
        })
    }

    /// One dispatch to one candidate, settling `permit` with the outcome.
    /// If this future is dropped mid-flight the permit is abandoned and a
    /// half-open probe slot goes back to the breaker.
    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        template: &RequestEnvelope,
        record: &AgentRecord,
        permit: BreakerPermit<'_>,
        capability: Option<&str>,
        timeout: Duration,
        deadline: Option<Instant>,
        attempt: u32,
        options: &SendOptions,
    ) -> Result<ResponseEnvelope, AttemptFailure> {
        let agent_id = record.agent_id.as_str();

        let Some(endpoint) = record.invocation_endpoint(&self.config.channel) else {
            permit.failure();
            return Err(AttemptFailure::Retryable(A2AError::Connection {
                target: agent_id.to_string(),
                message: format!("no '{}' or http endpoint registered", self.config.channel),
            }));
        };

        let mut request = template.clone();
        request.message_id = Uuid::new_v4().to_string();
        request.timestamp = Utc::now();
        request.target = AgentRef {
            agent_id: Some(record.agent_id.clone()),
            agent_name: Some(record.agent_name.clone()),
            capability: capability.map(str::to_string),
        };

        let budget = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    drop(permit);
                    return Err(AttemptFailure::Fatal(A2AError::DeadlineExceeded {
                        attempts: attempt - 1,
                    }));
                }
                remaining.min(timeout)
            }
            None => timeout,
        };
        let cut_by_deadline = budget < timeout;

        log::debug!(
            "Dispatching {} to {} (attempt {}, message {})",
            request.intent,
            record.agent_id,
            attempt,
            request.message_id
        );
        let started = Instant::now();
        let outcome = tokio::time::timeout(budget, self.transport.send(endpoint, &request, timeout)).await;

        let result = match outcome {
            Err(_) if cut_by_deadline => {
                permit.failure();
                return Err(AttemptFailure::Fatal(A2AError::DeadlineExceeded { attempts: attempt }));
            }
            Err(_) => Err(TransportError::Timeout),
            Ok(result) => result,
        };

        match result {
            Ok(response) if response.is_success() => {
                permit.success();
                log::debug!(
                    "{} answered {} in {:?}",
                    record.agent_id,
                    request.message_id,
                    started.elapsed()
                );
                Ok(response)
            }
            Ok(response) => {
                let fault = response.error.as_ref().is_some_and(|e| e.is_target_fault());
                if fault {
                    permit.failure();
                } else {
                    permit.success();
                }
                let err = A2AError::Business {
                    target: agent_id.to_string(),
                    response: Box::new(response),
                };
                if options.retry_on_business_error {
                    Err(AttemptFailure::Retryable(err))
                } else {
                    Err(AttemptFailure::Fatal(err))
                }
            }
            Err(TransportError::Timeout) => {
                permit.failure();
                Err(AttemptFailure::Retryable(A2AError::TransportTimeout {
                    target: agent_id.to_string(),
                    timeout,
                }))
            }
            Err(TransportError::Connection(message)) => {
                permit.failure();
                if let Some(capability) = capability {
                    self.registry.invalidate(capability);
                }
                Err(AttemptFailure::Retryable(A2AError::Connection {
                    target: agent_id.to_string(),
                    message,
                }))
            }
            Err(TransportError::Decode(message)) => {
                permit.failure();
                Err(AttemptFailure::Fatal(A2AError::Decode(format!(
                    "{} answered with an invalid envelope: {}",
                    agent_id, message
                ))))
            }
        }
    }

    /// Release transport resources and drop cached resolutions. Safe to call
    /// more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.transport.close().await;
        self.registry.clear_cache();
        log::info!("A2A client for {} closed", self.source.label());
    }
}

/// Bound a registry call by the send deadline.
async fn within<T, F>(deadline: Option<Instant>, attempts: u32, fut: F) -> Result<T, A2AError>
where
    F: Future<Output = Result<T, A2AError>>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| A2AError::DeadlineExceeded { attempts })?,
        None => fut.await,
    }
}
