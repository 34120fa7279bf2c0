//! Tenant connection router: one cached connection pool per tenant database,
//! created lazily, shared by concurrent requests, and bound to the entity
//! schemas exactly once.
//!
//! The cache maps a tenant to a slot that is either `Connecting` (an in-flight
//! handshake other callers join) or `Connected`. The check-and-set of a slot
//! happens under a synchronous mutex that is never held across an await, so a
//! slow handshake for one tenant never blocks lookups for another.

use crate::config::RouterConfig;
use crate::driver::{LifecycleEvent, TenantDriver};
use crate::error::{DriverError, RouterError};
use crate::schema::SchemaRegistry;
use crate::tenant::TenantId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{watch, OnceCell};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

/// Lifecycle state of a tenant connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Data-access objects bound to one connection, keyed by entity name.
pub struct ModelRegistry<M> {
    handle_id: u64,
    models: HashMap<String, M>,
}

impl<M> ModelRegistry<M> {
    pub fn get(&self, entity: &str) -> Option<&M> {
        self.models.get(entity)
    }

    /// Identity of the connection these models are bound to.
    pub fn handle_id(&self) -> u64 {
        self.handle_id
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// A live connection to one tenant database, loaned out as `Arc`.
pub struct ConnectionHandle<C, M> {
    id: u64,
    tenant: TenantId,
    database_name: String,
    conn: C,
    state: Mutex<ConnectionState>,
    created_at: DateTime<Utc>,
    last_used: Mutex<Instant>,
    models: OnceCell<Arc<ModelRegistry<M>>>,
    retired: watch::Sender<bool>,
}

impl<C, M> ConnectionHandle<C, M> {
    fn new(id: u64, tenant: TenantId, database_name: String, conn: C) -> Self {
        let (retired, _) = watch::channel(false);
        ConnectionHandle {
            id,
            tenant,
            database_name,
            conn,
            state: Mutex::new(ConnectionState::Connected),
            created_at: Utc::now(),
            last_used: Mutex::new(Instant::now()),
            models: OnceCell::new(),
            retired,
        }
    }

    /// Unique per connection; a reconnect for the same tenant gets a new id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn idle_for(&self) -> Duration {
        lock(&self.last_used).elapsed()
    }

    fn touch(&self) {
        *lock(&self.last_used) = Instant::now();
    }

    /// Mark the handle out of service and stop its lifecycle listener.
    fn retire(&self, state: ConnectionState) {
        *lock(&self.state) = state;
        self.retired.send_replace(true);
    }
}

/// Handle type produced by a router over driver `D`.
pub type TenantHandle<D> = ConnectionHandle<<D as TenantDriver>::Connection, <D as TenantDriver>::Model>;
type Outcome<D> = Result<Arc<TenantHandle<D>>, RouterError>;

enum Slot<D: TenantDriver> {
    Connecting {
        attempt: u64,
        outcome: watch::Receiver<Option<Outcome<D>>>,
    },
    Connected(Arc<TenantHandle<D>>),
}

/// Health report entry for one cached tenant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TenantHealth {
    pub tenant: TenantId,
    pub state: ConnectionState,
    pub reachable: bool,
}

impl TenantHealth {
    /// An established connection that failed its probe. A tenant still
    /// connecting is not degraded.
    pub fn is_degraded(&self) -> bool {
        self.state != ConnectionState::Connecting && !self.reachable
    }
}

struct RouterInner<D: TenantDriver> {
    driver: Arc<D>,
    config: RouterConfig,
    slots: Mutex<HashMap<TenantId, Slot<D>>>,
    next_id: AtomicU64,
}

/// Process-wide cache of tenant connections. Cheap to clone; clones share the cache.
pub struct TenantRouter<D: TenantDriver> {
    inner: Arc<RouterInner<D>>,
}

impl<D: TenantDriver> Clone for TenantRouter<D> {
    fn clone(&self) -> Self {
        TenantRouter {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: TenantDriver> TenantRouter<D> {
    pub fn new(driver: D, config: RouterConfig) -> Self {
        TenantRouter {
            inner: Arc::new(RouterInner {
                driver: Arc::new(driver),
                config,
                slots: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn driver(&self) -> &D {
        &self.inner.driver
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    /// Return the tenant's connected handle, opening it on first use.
    ///
    /// Concurrent first calls for one tenant share a single handshake. Waiting is
    /// bounded by `connect_timeout`; a failed or timed-out attempt is evicted so
    /// the next call starts fresh. Failures are never retried here.
    pub async fn acquire(&self, tenant: &TenantId) -> Result<Arc<TenantHandle<D>>, RouterError> {
        let (attempt, mut outcome) = {
            let mut slots = lock(&self.inner.slots);
            match slots.get(tenant) {
                Some(Slot::Connected(handle)) => {
                    handle.touch();
                    tracing::debug!(tenant = %tenant, handle = handle.id, "tenant connection reused");
                    return Ok(Arc::clone(handle));
                }
                Some(Slot::Connecting { attempt, outcome }) => (*attempt, outcome.clone()),
                None => {
                    let attempt = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    slots.insert(
                        tenant.clone(),
                        Slot::Connecting {
                            attempt,
                            outcome: rx.clone(),
                        },
                    );
                    let inner = Arc::clone(&self.inner);
                    let tenant = tenant.clone();
                    tokio::spawn(async move {
                        let result = inner.handshake(&tenant, attempt).await;
                        tx.send_replace(Some(result));
                    });
                    (attempt, rx)
                }
            }
        };

        let timeout = self.inner.config.connect_timeout;
        let published = match tokio::time::timeout(timeout, outcome.wait_for(Option::is_some)).await {
            Ok(Ok(value)) => (*value).clone(),
            Ok(Err(_)) => None,
            Err(_) => {
                self.inner.evict_attempt(tenant, attempt);
                tracing::warn!(tenant = %tenant, ?timeout, "timed out waiting for tenant connection");
                return Err(RouterError::ConnectionTimeout {
                    tenant: tenant.clone(),
                    timeout,
                });
            }
        };
        match published {
            Some(result) => result,
            None => {
                self.inner.evict_attempt(tenant, attempt);
                Err(RouterError::ConnectionFailed {
                    tenant: tenant.clone(),
                    source: DriverError::Closed("connection attempt abandoned".into()),
                })
            }
        }
    }

    /// Models bound to `handle`, binding every schema on first call.
    ///
    /// Later calls return the same registry regardless of `schemas`. A failed
    /// binding leaves the handle without models so a later call can retry.
    pub async fn models(
        &self,
        handle: &Arc<TenantHandle<D>>,
        schemas: &SchemaRegistry,
    ) -> Result<Arc<ModelRegistry<D::Model>>, RouterError> {
        let registry = handle
            .models
            .get_or_try_init(|| async {
                let mut models = HashMap::with_capacity(schemas.len());
                for schema in schemas.iter() {
                    let model = self
                        .inner
                        .driver
                        .bind(&handle.conn, schema)
                        .await
                        .map_err(|e| RouterError::SchemaBindingFailed {
                            entity: schema.name().to_string(),
                            reason: e.to_string(),
                        })?;
                    models.insert(schema.name().to_string(), model);
                }
                tracing::debug!(tenant = %handle.tenant, entities = models.len(), "models bound");
                Ok::<_, RouterError>(Arc::new(ModelRegistry {
                    handle_id: handle.id,
                    models,
                }))
            })
            .await?;
        Ok(Arc::clone(registry))
    }

    /// `acquire` followed by `models`.
    pub async fn acquire_models(
        &self,
        tenant: &TenantId,
        schemas: &SchemaRegistry,
    ) -> Result<Arc<ModelRegistry<D::Model>>, RouterError> {
        let handle = self.acquire(tenant).await?;
        self.models(&handle, schemas).await
    }

    /// Close and forget the tenant's connection. No-op when absent.
    pub async fn release(&self, tenant: &TenantId) {
        let slot = lock(&self.inner.slots).remove(tenant);
        match slot {
            Some(Slot::Connected(handle)) => {
                handle.retire(ConnectionState::Disconnected);
                self.inner.driver.close(&handle.conn).await;
                tracing::info!(tenant = %tenant, handle = handle.id, "tenant connection released");
            }
            Some(Slot::Connecting { attempt, .. }) => {
                tracing::info!(tenant = %tenant, attempt, "tenant connection released while connecting");
            }
            None => {}
        }
    }

    /// Probe every cached connection. Read-only: unreachable tenants stay cached.
    pub async fn health_check(&self) -> Vec<TenantHealth> {
        let snapshot: Vec<(TenantId, Option<Arc<TenantHandle<D>>>)> = lock(&self.inner.slots)
            .iter()
            .map(|(tenant, slot)| match slot {
                Slot::Connected(handle) => (tenant.clone(), Some(Arc::clone(handle))),
                Slot::Connecting { .. } => (tenant.clone(), None),
            })
            .collect();

        let timeout = self.inner.config.connect_timeout;
        let mut report = Vec::with_capacity(snapshot.len());
        let mut probes = JoinSet::new();
        for (tenant, handle) in snapshot {
            match handle {
                None => report.push(TenantHealth {
                    tenant,
                    state: ConnectionState::Connecting,
                    reachable: false,
                }),
                Some(handle) => {
                    let driver = Arc::clone(&self.inner.driver);
                    probes.spawn(async move {
                        let probe = tokio::time::timeout(timeout, driver.ping(&handle.conn)).await;
                        let reachable = matches!(probe, Ok(Ok(())));
                        if !reachable {
                            tracing::warn!(tenant = %handle.tenant, "tenant health probe failed");
                        }
                        TenantHealth {
                            tenant: handle.tenant.clone(),
                            state: handle.state(),
                            reachable,
                        }
                    });
                }
            }
        }
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(health) => report.push(health),
                Err(e) => tracing::warn!(error = %e, "health probe task failed"),
            }
        }
        report.sort_by(|a, b| a.tenant.cmp(&b.tenant));
        report
    }

    /// Release connections idle for longer than `max_idle`. Returns the evicted tenants.
    pub async fn evict_idle(&self, max_idle: Duration) -> Vec<TenantId> {
        let stale: Vec<Arc<TenantHandle<D>>> = {
            let mut slots = lock(&self.inner.slots);
            let tenants: Vec<TenantId> = slots
                .iter()
                .filter_map(|(tenant, slot)| match slot {
                    Slot::Connected(handle) if handle.idle_for() > max_idle => Some(tenant.clone()),
                    _ => None,
                })
                .collect();
            tenants
                .iter()
                .filter_map(|tenant| match slots.remove(tenant) {
                    Some(Slot::Connected(handle)) => Some(handle),
                    _ => None,
                })
                .collect()
        };
        let mut evicted = Vec::with_capacity(stale.len());
        for handle in stale {
            handle.retire(ConnectionState::Disconnected);
            self.inner.driver.close(&handle.conn).await;
            tracing::info!(tenant = %handle.tenant, idle = ?handle.idle_for(), "idle tenant connection evicted");
            evicted.push(handle.tenant.clone());
        }
        evicted
    }

    /// Periodically evict idle connections when `idle_timeout` is configured.
    /// The task stops once every router clone is dropped.
    pub fn spawn_idle_reaper(&self) -> Option<JoinHandle<()>> {
        let max_idle = self.inner.config.idle_timeout?;
        let period = (max_idle / 2).max(Duration::from_secs(1));
        let weak: Weak<RouterInner<D>> = Arc::downgrade(&self.inner);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                TenantRouter { inner }.evict_idle(max_idle).await;
            }
        }))
    }

    /// Close every cached connection. Called once on process shutdown.
    pub async fn shutdown(&self) {
        let drained: Vec<(TenantId, Slot<D>)> = lock(&self.inner.slots).drain().collect();
        let mut closed = 0usize;
        for (_, slot) in drained {
            if let Slot::Connected(handle) = slot {
                handle.retire(ConnectionState::Disconnected);
                self.inner.driver.close(&handle.conn).await;
                closed += 1;
            }
        }
        tracing::info!(closed, "tenant router shut down");
    }

    /// Tenants currently cached (connecting or connected), sorted.
    pub fn tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<TenantId> = lock(&self.inner.slots).keys().cloned().collect();
        tenants.sort();
        tenants
    }

    /// Cached state for one tenant; `None` when absent.
    pub fn state_of(&self, tenant: &TenantId) -> Option<ConnectionState> {
        lock(&self.inner.slots).get(tenant).map(|slot| match slot {
            Slot::Connecting { .. } => ConnectionState::Connecting,
            Slot::Connected(handle) => handle.state(),
        })
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<D: TenantDriver> RouterInner<D> {
    /// Open the tenant database and promote the slot to `Connected`. Runs in its
    /// own task so a cancelled first caller does not strand the others.
    async fn handshake(self: &Arc<Self>, tenant: &TenantId, attempt: u64) -> Outcome<D> {
        let database_name = tenant.database_name(&self.config.db_prefix);
        let timeout = self.config.connect_timeout;
        let connected = tokio::time::timeout(
            timeout,
            self.driver.connect(&database_name, self.config.pool_size),
        )
        .await;
        let conn = match connected {
            Ok(Ok(conn)) => conn,
            Ok(Err(source)) => {
                self.evict_attempt(tenant, attempt);
                tracing::warn!(tenant = %tenant, database = %database_name, error = %source, "tenant connection failed");
                return Err(RouterError::ConnectionFailed {
                    tenant: tenant.clone(),
                    source,
                });
            }
            Err(_) => {
                self.evict_attempt(tenant, attempt);
                tracing::warn!(tenant = %tenant, database = %database_name, ?timeout, "tenant connection timed out");
                return Err(RouterError::ConnectionTimeout {
                    tenant: tenant.clone(),
                    timeout,
                });
            }
        };

        let handle = Arc::new(ConnectionHandle::new(attempt, tenant.clone(), database_name, conn));
        let promoted = {
            let mut slots = lock(&self.slots);
            let current = matches!(
                slots.get(tenant),
                Some(Slot::Connecting { attempt: a, .. }) if *a == attempt
            );
            if current {
                slots.insert(tenant.clone(), Slot::Connected(Arc::clone(&handle)));
            }
            current
        };
        if !promoted {
            handle.retire(ConnectionState::Disconnected);
            self.driver.close(&handle.conn).await;
            return Err(RouterError::ConnectionFailed {
                tenant: tenant.clone(),
                source: DriverError::Closed("released during handshake".into()),
            });
        }

        self.attach_listener(&handle);
        tracing::info!(tenant = %tenant, database = %handle.database_name, handle = handle.id, "tenant connection established");
        Ok(handle)
    }

    /// Evict the slot when the driver reports the connection lost.
    fn attach_listener(self: &Arc<Self>, handle: &Arc<TenantHandle<D>>) {
        let weak = Arc::downgrade(self);
        let driver = Arc::clone(&self.driver);
        let handle = Arc::clone(handle);
        let mut retired = handle.retired.subscribe();
        tokio::spawn(async move {
            let event = tokio::select! {
                biased;
                _ = retired.wait_for(|r| *r) => return,
                event = driver.closed(&handle.conn) => event,
            };
            if let Some(inner) = weak.upgrade() {
                inner.on_lifecycle(&handle, event);
            }
            driver.close(&handle.conn).await;
        });
    }

    fn on_lifecycle(&self, handle: &Arc<TenantHandle<D>>, event: LifecycleEvent) {
        let state = match event {
            LifecycleEvent::Disconnected => ConnectionState::Disconnected,
            LifecycleEvent::Error => ConnectionState::Error,
        };
        handle.retire(state);
        let mut slots = lock(&self.slots);
        if matches!(slots.get(&handle.tenant), Some(Slot::Connected(h)) if h.id == handle.id) {
            slots.remove(&handle.tenant);
            tracing::warn!(tenant = %handle.tenant, handle = handle.id, ?state, "tenant connection lost, evicted");
        }
    }

    /// Remove the slot only if it still belongs to `attempt`.
    fn evict_attempt(&self, tenant: &TenantId, attempt: u64) {
        let mut slots = lock(&self.slots);
        if matches!(slots.get(tenant), Some(Slot::Connecting { attempt: a, .. }) if *a == attempt) {
            slots.remove(tenant);
        }
    }
}
