//! Store connection pool with reconnect backoff
//!
//! Wraps deadpool-postgres behind an explicit health state machine so
//! callers fail fast while the store is down instead of piling up on a
//! dead connection.

use crate::config::DbConfig;
use crate::error::AppError;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_postgres::NoTls;

/// Store health. `Unavailable` is terminal; no further auto-retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthState {
    Connected,
    Reconnecting { attempt: u32, delay: Duration },
    Unavailable,
}

impl HealthState {
    /// Next state after a connection-level failure.
    pub fn after_failure(&self, config: &DbConfig) -> HealthState {
        match self {
            HealthState::Unavailable => HealthState::Unavailable,
            HealthState::Connected => HealthState::Reconnecting {
                attempt: 1,
                delay: backoff_delay(1, config),
            },
            HealthState::Reconnecting { attempt, .. } => {
                let next = attempt + 1;
                if next > config.reconnect_max_attempts {
                    HealthState::Unavailable
                } else {
                    HealthState::Reconnecting {
                        attempt: next,
                        delay: backoff_delay(next, config),
                    }
                }
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Connected => "connected",
            HealthState::Reconnecting { .. } => "reconnecting",
            HealthState::Unavailable => "unavailable",
        }
    }
}

fn backoff_delay(attempt: u32, config: &DbConfig) -> Duration {
    let exp = config
        .reconnect_base_ms
        .saturating_mul(1u64 << (attempt - 1).min(16));
    Duration::from_millis(exp.min(config.reconnect_max_ms))
}

struct Inner {
    pool: Pool,
    health: Mutex<HealthState>,
    probing: AtomicBool,
    config: DbConfig,
}

impl Inner {
    fn health(&self) -> HealthState {
        self.health.lock().unwrap().clone()
    }

    /// Apply one failure transition and return the new state.
    fn advance_failure(&self) -> HealthState {
        let mut health = self.health.lock().unwrap();
        *health = health.after_failure(&self.config);
        health.clone()
    }

    fn mark_connected(&self) {
        *self.health.lock().unwrap() = HealthState::Connected;
        tracing::info!("Store connection re-established");
    }

    async fn ping(&self) -> Result<(), anyhow::Error> {
        let client = self.pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }
}

/// Resilient store pool. Cheap to clone and share.
#[derive(Clone)]
pub struct StorePool {
    inner: Arc<Inner>,
}

impl StorePool {
    pub fn new(config: DbConfig) -> Result<Self, tokio_postgres::Error> {
        let pg_config: tokio_postgres::Config = config.url.parse()?;
        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let manager = Manager::from_config(pg_config, NoTls, manager_config);
        let pool = Pool::builder(manager)
            .max_size(config.max_connections)
            .build()
            .unwrap();

        Ok(Self {
            inner: Arc::new(Inner {
                pool,
                health: Mutex::new(HealthState::Connected),
                probing: AtomicBool::new(false),
                config,
            }),
        })
    }

    pub fn health(&self) -> HealthState {
        self.inner.health()
    }

    /// Checked-out client, or a fast failure while the store is down.
    pub async fn client(&self) -> Result<Object, AppError> {
        match self.health() {
            HealthState::Unavailable => return Err(AppError::Unavailable),
            HealthState::Reconnecting { .. } => return Err(AppError::ConnectionError),
            HealthState::Connected => {}
        }

        match self.inner.pool.get().await {
            Ok(client) => Ok(client),
            Err(e) => {
                tracing::warn!(error = %e, "Store connection failed");
                self.note_failure();
                Err(AppError::ConnectionError)
            }
        }
    }

    /// Map a query error; connection-level failures trip the reconnect
    /// machinery, everything else passes through as a store error.
    pub fn query_error(&self, e: tokio_postgres::Error) -> AppError {
        tracing::warn!(error = %e, "Store query failed");
        if e.is_closed() {
            self.note_failure();
        }
        AppError::ConnectionError
    }

    /// Record a connection-level failure and schedule a reconnect probe.
    pub fn note_failure(&self) {
        match self.inner.advance_failure() {
            HealthState::Reconnecting { attempt, delay } => {
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Store reconnect scheduled"
                );
                spawn_probe(&self.inner);
            }
            HealthState::Unavailable => {
                tracing::error!("Store reconnect attempts exhausted, store unavailable");
            }
            HealthState::Connected => {}
        }
    }
}

fn spawn_probe(inner: &Arc<Inner>) {
    if inner.probing.swap(true, Ordering::SeqCst) {
        return;
    }

    let inner = inner.clone();
    tokio::spawn(async move {
        loop {
            let delay = match inner.health() {
                HealthState::Reconnecting { delay, .. } => delay,
                _ => break,
            };
            tokio::time::sleep(delay).await;

            match inner.ping().await {
                Ok(()) => {
                    inner.mark_connected();
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Store reconnect probe failed");
                    if inner.advance_failure() == HealthState::Unavailable {
                        tracing::error!("Store reconnect attempts exhausted, store unavailable");
                        break;
                    }
                }
            }
        }
        inner.probing.store(false, Ordering::SeqCst);
    });
}
