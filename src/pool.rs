//! Endpoint pool: discovery, health tracking and least-recently-used
//! assignment of inference endpoints.
//!
//! The pool is the only state shared between document workers. Every
//! mutation happens under one `std::sync::Mutex` that is held only for the
//! few instructions it takes to pick or update a slot, never across an
//! `.await`.

use crate::config::EndpointDiscovery;
use crate::error::ExtractError;
use crate::pipeline::inference::InferenceBackend;
use futures::future::join_all;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Liveness of one endpoint as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Never probed.
    Unknown,
    Healthy,
    /// Failed its probe or too many consecutive requests; excluded until re-probed.
    Unreachable,
}

/// A network address hosting one inference-capable model instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Base URL, e.g. `http://127.0.0.1:11434`.
    pub address: String,
    pub health: HealthState,
    pub last_checked: Option<Instant>,
}

struct Slot {
    endpoint: Endpoint,
    consecutive_failures: u32,
    /// Logical clock value of the last assignment; 0 = never assigned.
    last_assigned: u64,
}

struct PoolState {
    slots: Vec<Slot>,
    clock: u64,
}

/// Owned, synchronised set of inference endpoints.
pub struct EndpointPool {
    discovery: EndpointDiscovery,
    failure_threshold: u32,
    state: Mutex<PoolState>,
}

impl EndpointPool {
    /// Create a pool whose candidates all start as [`HealthState::Unknown`].
    pub fn new(discovery: EndpointDiscovery, failure_threshold: u32) -> Self {
        let slots = discovery
            .candidates()
            .into_iter()
            .map(|address| Slot {
                endpoint: Endpoint {
                    address,
                    health: HealthState::Unknown,
                    last_checked: None,
                },
                consecutive_failures: 0,
                last_assigned: 0,
            })
            .collect();
        Self {
            discovery,
            failure_threshold: failure_threshold.max(1),
            state: Mutex::new(PoolState { slots, clock: 0 }),
        }
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Probe every candidate concurrently and return the healthy endpoints.
    ///
    /// Also the self-healing step: endpoints previously marked unreachable
    /// are probed again and rejoin the rotation when they answer. In `auto`
    /// mode the fallback address is probed only when the scanned range has
    /// no live instance, so one server is never counted twice.
    pub async fn discover(&self, prober: &dyn InferenceBackend) -> Vec<Endpoint> {
        let fallback = self.discovery.auto_fallback();
        let addresses: Vec<String> = self
            .state()
            .slots
            .iter()
            .map(|s| s.endpoint.address.clone())
            .filter(|addr| fallback.as_ref() != Some(addr))
            .collect();
        let timeout = self.discovery.probe_timeout();

        let mut results = join_all(addresses.iter().map(|addr| async move {
            let alive = prober.probe(addr, timeout).await;
            (addr.clone(), alive)
        }))
        .await;

        if let Some(fallback) = fallback {
            let alive = if results.iter().any(|(_, alive)| *alive) {
                false
            } else {
                debug!("No instance in the scanned range; trying {}", fallback);
                prober.probe(&fallback, timeout).await
            };
            results.push((fallback, alive));
        }

        let now = Instant::now();
        let mut state = self.state();
        for (addr, alive) in results {
            let health = if alive {
                HealthState::Healthy
            } else {
                HealthState::Unreachable
            };
            match state.slots.iter_mut().find(|s| s.endpoint.address == addr) {
                Some(slot) => {
                    slot.endpoint.health = health;
                    slot.endpoint.last_checked = Some(now);
                    slot.consecutive_failures = 0;
                }
                None => state.slots.push(Slot {
                    endpoint: Endpoint {
                        address: addr.clone(),
                        health,
                        last_checked: Some(now),
                    },
                    consecutive_failures: 0,
                    last_assigned: 0,
                }),
            }
            debug!("Probe {} → {:?}", addr, health);
        }

        let healthy: Vec<Endpoint> = state
            .slots
            .iter()
            .filter(|s| s.endpoint.health == HealthState::Healthy)
            .map(|s| s.endpoint.clone())
            .collect();
        info!(
            "Discovered {} healthy endpoint(s) out of {} candidate(s)",
            healthy.len(),
            state.slots.len()
        );
        healthy
    }

    /// Hand out the least-recently-assigned healthy endpoint.
    ///
    /// The result is advisory: nothing stops two workers from using the same
    /// endpoint, but with one document per endpoint in flight the rotation
    /// keeps every instance evenly loaded.
    pub fn acquire(&self) -> Result<Endpoint, ExtractError> {
        let mut state = self.state();
        let total = state.slots.len();
        state.clock += 1;
        let tick = state.clock;

        let slot = state
            .slots
            .iter_mut()
            .filter(|s| s.endpoint.health == HealthState::Healthy)
            .min_by_key(|s| s.last_assigned)
            .ok_or(ExtractError::NoEndpointsAvailable { probed: total })?;
        slot.last_assigned = tick;
        Ok(slot.endpoint.clone())
    }

    /// Record a failed request. After `failure_threshold` consecutive
    /// failures the endpoint leaves the rotation until the next discovery.
    pub fn report_failure(&self, address: &str) -> HealthState {
        let threshold = self.failure_threshold;
        let mut state = self.state();
        let Some(slot) = state.slots.iter_mut().find(|s| s.endpoint.address == address) else {
            return HealthState::Unknown;
        };
        slot.consecutive_failures += 1;
        if slot.consecutive_failures >= threshold
            && slot.endpoint.health != HealthState::Unreachable
        {
            slot.endpoint.health = HealthState::Unreachable;
            slot.endpoint.last_checked = Some(Instant::now());
            warn!(
                "Endpoint {} marked unreachable after {} consecutive failure(s)",
                address, slot.consecutive_failures
            );
        }
        slot.endpoint.health
    }

    /// Record a successful request, resetting the failure streak.
    pub fn report_success(&self, address: &str) {
        let mut state = self.state();
        if let Some(slot) = state.slots.iter_mut().find(|s| s.endpoint.address == address) {
            slot.consecutive_failures = 0;
        }
    }

    /// Number of endpoints currently eligible for assignment.
    pub fn healthy_count(&self) -> usize {
        self.state()
            .slots
            .iter()
            .filter(|s| s.endpoint.health == HealthState::Healthy)
            .count()
    }

    /// Number of candidates known to the pool, including a probed fallback.
    pub fn candidate_count(&self) -> usize {
        self.state().slots.len()
    }

    /// Copy of the current endpoint table, for reporting.
    pub fn snapshot(&self) -> Vec<Endpoint> {
        self.state().slots.iter().map(|s| s.endpoint.clone()).collect()
    }
}
