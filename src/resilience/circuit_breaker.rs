//! Per-target circuit breaker.
//!
//! ```text
//!   closed ──(threshold consecutive failures)──▶ open
//!     ▲                                           │
//!     │                               (timeout elapsed, next inspection)
//!     │                                           ▼
//!     └──────────(probe success)────────── half_open ──(probe failure)──▶ open
//! ```
//!
//! Keys are concrete targets (agent ids), so one failing registrant never
//! blocks traffic to its healthy alternates. Every transition for a key
//! happens under that key's map shard lock, making `can_execute`,
//! `record_success` and `record_failure` atomic with respect to each other.
//!
//! [`CircuitBreaker::acquire`] hands out a [`BreakerPermit`] tagged with the
//! state generation it was granted in. Its outcome only counts while that
//! generation is current, and dropping it unsettled returns a probe slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::ClientConfig;

/// Breaker state for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Breaker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open a closed circuit.
    pub failure_threshold: u32,
    /// How long a circuit stays open before a probe is allowed.
    pub timeout: Duration,
    /// Concurrent probes permitted while half-open.
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

impl BreakerConfig {
    pub fn from_client_config(config: &ClientConfig) -> Self {
        let defaults = Self::default();
        Self {
            failure_threshold: config.circuit_breaker_threshold.max(1),
            timeout: Duration::try_from_secs_f64(config.circuit_breaker_timeout_seconds)
                .unwrap_or(defaults.timeout),
            half_open_max_calls: config.half_open_max_calls.max(1),
        }
    }
}

#[derive(Debug, Clone)]
struct TargetState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Probes currently granted in this half-open period.
    half_open_in_flight: u32,
    /// Bumped on every state transition. Outcomes carrying an older
    /// generation are stale and ignored.
    generation: u64,
}

impl Default for TargetState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_in_flight: 0,
            generation: 0,
        }
    }
}

impl TargetState {
    fn open(&mut self, now: Instant, generation: u64) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.half_open_in_flight = 0;
        self.generation = generation;
    }

    fn close(&mut self, generation: u64) {
        *self = Self {
            generation,
            ..Self::default()
        };
    }
}

/// Read-only view of one target's breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    pub half_open_in_flight: u32,
}

/// Admission to call one target, from [`CircuitBreaker::acquire`].
///
/// Settle it with [`success`](Self::success) or [`failure`](Self::failure).
/// Dropping it unsettled abandons the call: nothing is recorded and a
/// half-open probe slot goes back to the breaker.
#[derive(Debug)]
#[must_use = "an unsettled permit records nothing"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    target: String,
    generation: u64,
    probe: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Whether this call is a half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.apply_success(&self.target, Some(self.generation));
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.apply_failure(&self.target, Some(self.generation));
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe(&self.target, self.generation);
        }
    }
}

/// Circuit breakers for every target this process has called.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    targets: DashMap<String, TargetState>,
    generations: AtomicU64,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            targets: DashMap::new(),
            generations: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Whether a call to `target` may proceed.
    ///
    /// An open circuit whose timeout has elapsed moves to half-open here and
    /// the call becomes its first probe. While half-open, at most
    /// `half_open_max_calls` calls are let through. A granted probe holds
    /// its slot until `record_success` or `record_failure`; prefer
    /// [`acquire`](Self::acquire), which also gives the slot back when the
    /// call is abandoned.
    pub fn can_execute(&self, target: &str) -> bool {
        self.admit(target).is_some()
    }

    /// Like [`can_execute`](Self::can_execute), returning a permit that
    /// settles the call.
    pub fn acquire(&self, target: &str) -> Option<BreakerPermit<'_>> {
        self.admit(target).map(|(generation, probe)| BreakerPermit {
            breaker: self,
            target: target.to_string(),
            generation,
            probe,
            settled: false,
        })
    }

    /// Returns the generation the call was admitted in and whether it is a
    /// probe.
    fn admit(&self, target: &str) -> Option<(u64, bool)> {
        let Some(mut entry) = self.targets.get_mut(target) else {
            // Never failed: closed.
            return Some((0, false));
        };
        let st = entry.value_mut();
        match st.state {
            CircuitState::Closed => Some((st.generation, false)),
            CircuitState::Open => {
                let elapsed = st.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
                if elapsed >= self.config.timeout {
                    st.state = CircuitState::HalfOpen;
                    st.half_open_in_flight = 1;
                    st.generation = self.next_generation();
                    log::info!("Circuit for {} is half-open, probing", target);
                    Some((st.generation, true))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if st.half_open_in_flight < self.config.half_open_max_calls {
                    st.half_open_in_flight += 1;
                    Some((st.generation, true))
                } else {
                    None
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self, target: &str) {
        self.apply_success(target, None);
    }

    /// Record a failed call.
    pub fn record_failure(&self, target: &str) {
        self.apply_failure(target, None);
    }

    fn apply_success(&self, target: &str, generation: Option<u64>) {
        let Some(mut entry) = self.targets.get_mut(target) else {
            return;
        };
        let st = entry.value_mut();
        if generation.is_some_and(|g| g != st.generation) {
            log::debug!("Ignoring stale success for {}", target);
            return;
        }
        match st.state {
            CircuitState::Closed => st.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                st.close(self.next_generation());
                log::info!("Circuit for {} closed after successful probe", target);
            }
            // A straggler from before the circuit opened proves nothing.
            CircuitState::Open => {}
        }
    }

    fn apply_failure(&self, target: &str, generation: Option<u64>) {
        let now = Instant::now();
        let mut entry = self.targets.entry(target.to_string()).or_default();
        let st = entry.value_mut();
        if generation.is_some_and(|g| g != st.generation) {
            log::debug!("Ignoring stale failure for {}", target);
            return;
        }
        st.consecutive_failures = st.consecutive_failures.saturating_add(1);
        match st.state {
            CircuitState::Closed => {
                if st.consecutive_failures >= self.config.failure_threshold {
                    st.open(now, self.next_generation());
                    log::warn!(
                        "Circuit for {} opened after {} consecutive failures",
                        target,
                        st.consecutive_failures
                    );
                }
            }
            CircuitState::HalfOpen => {
                st.open(now, self.next_generation());
                log::warn!("Probe to {} failed, circuit re-opened", target);
            }
            CircuitState::Open => {}
        }
    }

    fn release_probe(&self, target: &str, generation: u64) {
        let Some(mut entry) = self.targets.get_mut(target) else {
            return;
        };
        let st = entry.value_mut();
        if st.state == CircuitState::HalfOpen && st.generation == generation {
            st.half_open_in_flight = st.half_open_in_flight.saturating_sub(1);
            log::debug!("Probe to {} abandoned, slot released", target);
        }
    }

    /// Current state of `target`, without any transition.
    pub fn state(&self, target: &str) -> CircuitState {
        self.targets
            .get(target)
            .map(|e| e.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot(&self, target: &str) -> BreakerSnapshot {
        let st = self
            .targets
            .get(target)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        BreakerSnapshot {
            state: st.state,
            consecutive_failures: st.consecutive_failures,
            opened_at: st.opened_at,
            half_open_in_flight: st.half_open_in_flight,
        }
    }

    /// Forget one target's history.
    pub fn reset(&self, target: &str) {
        self.targets.remove(target);
    }

    pub fn clear(&self) {
        self.targets.clear();
    }

    /// Number of targets with recorded history.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
