//! Per-dependency circuit breakers.
//!
//! One breaker instance guards each named downstream dependency so that a
//! failing identity provider cannot take webhook delivery down with it. The
//! registry is an explicit object handed to callers; there is no global
//! singleton. All state transitions happen under the breaker's mutex since
//! many concurrent requests share one instance.

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use utoipa::ToSchema;

/// Successes required in `HalfOpen` before the circuit closes again.
const HALF_OPEN_SUCCESS_QUOTA: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

/// Error returned by [`CircuitBreaker::call`].
///
/// `Open` means the wrapped call was never attempted, as opposed to a genuine
/// downstream failure, so operators can tell "we didn't even try" from "it
/// failed".
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("{name} is currently unavailable")]
    Open { name: String, retry_after: Duration },
    #[error("{0}")]
    Inner(E),
}

/// Point-in-time view of a breaker, for health reporting.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
}

/// A stateful guard that stops calling a failing dependency until it shows
/// signs of recovery.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            }),
        }
    }

    /// Runs `fut` through the breaker.
    ///
    /// While `Open`, the future is dropped unpolled and the call fails
    /// immediately; the first call after `recovery_timeout` has elapsed moves
    /// the breaker to `HalfOpen` and is allowed through.
    pub async fn call<T, E, F>(&self, fut: F) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        if let Err((name, retry_after)) = self.admit() {
            return Err(BreakerError::Open { name, retry_after });
        }

        match fut.await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(BreakerError::Inner(err))
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker mutex poisoned").state
    }

    pub fn metrics(&self) -> BreakerMetrics {
        let inner = self.inner.lock().expect("breaker mutex poisoned");
        BreakerMetrics {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
        }
    }

    fn admit(&self) -> Result<(), (String, Duration)> {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_time
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err((self.name.clone(), self.recovery_timeout - elapsed))
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_sub(1);
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= HALF_OPEN_SUCCESS_QUOTA {
                    log::info!("circuit breaker '{}' closed after recovery", self.name);
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            }
            // A call admitted earlier finished after another one reopened the
            // circuit; its success says nothing about recovery timing.
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.last_failure_time = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    log::warn!(
                        "circuit breaker '{}' opened after {} consecutive failures",
                        self.name,
                        inner.failure_count
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                log::warn!("circuit breaker '{}' reopened during recovery probe", self.name);
                inner.state = CircuitState::Open;
                inner.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }
}

/// Constructs and hands out one breaker per dependency name.
pub struct BreakerRegistry {
    failure_threshold: u32,
    recovery_timeout: Duration,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the breaker for `name`, creating it on first use.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().expect("registry lock poisoned").get(name) {
            return breaker.clone();
        }
        let mut breakers = self.breakers.write().expect("registry lock poisoned");
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    name,
                    self.failure_threshold,
                    self.recovery_timeout,
                ))
            })
            .clone()
    }

    pub fn metrics(&self) -> Vec<BreakerMetrics> {
        self.breakers
            .read()
            .expect("registry lock poisoned")
            .values()
            .map(|b| b.metrics())
            .collect()
    }
}
