//! PostgreSQL driver: one sqlx pool per tenant database on a shared server.

use crate::driver::{LifecycleEvent, TenantDriver};
use crate::error::{ConfigError, DriverError};
use crate::schema::EntitySchema;
use crate::store::PgModel;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Spacing of liveness probes while a pool is cached; also bounds each probe.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(15);
/// Consecutive failed probes before a pool is reported lost.
pub const PROBE_FAILURES: u32 = 3;

/// Driver built from the base connection URI (host, port, credentials). The
/// database component of the URI is replaced by each tenant's database name.
#[derive(Clone, Debug)]
pub struct PgDriver {
    base: PgConnectOptions,
}

impl PgDriver {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let base = PgConnectOptions::from_str(base_url).map_err(|e| ConfigError::Invalid {
            var: "TENANT_DATABASE_URL",
            reason: e.to_string(),
        })?;
        Ok(PgDriver { base })
    }

    pub fn connect_options(&self, database_name: &str) -> PgConnectOptions {
        self.base.clone().database(database_name)
    }
}

/// Map a sqlx failure onto the driver taxonomy. 3D000 is invalid_catalog_name
/// (database missing); 28000/28P01 are authorization failures.
fn classify(err: sqlx::Error) -> DriverError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("3D000") => DriverError::UnknownDatabase(db.message().to_string()),
            Some("28000") | Some("28P01") => DriverError::Rejected(db.message().to_string()),
            _ => DriverError::Unreachable(err.to_string()),
        },
        sqlx::Error::PoolClosed => DriverError::Closed(err.to_string()),
        _ => DriverError::Unreachable(err.to_string()),
    }
}

/// Turns a stream of probe results into a lifecycle decision. A closed pool is
/// lost at once; transient failures must repeat `threshold` times in a row.
#[derive(Debug)]
struct LossDetector {
    threshold: u32,
    failures: u32,
}

impl LossDetector {
    fn new(threshold: u32) -> Self {
        LossDetector {
            threshold: threshold.max(1),
            failures: 0,
        }
    }

    fn observe(&mut self, probe: Result<(), DriverError>) -> Option<LifecycleEvent> {
        match probe {
            Ok(()) => {
                self.failures = 0;
                None
            }
            Err(DriverError::Closed(_)) => Some(LifecycleEvent::Disconnected),
            Err(_) => {
                self.failures += 1;
                (self.failures >= self.threshold).then_some(LifecycleEvent::Error)
            }
        }
    }
}

#[async_trait]
impl TenantDriver for PgDriver {
    type Connection = PgPool;
    type Model = PgModel;

    async fn connect(&self, database_name: &str, pool_size: u32) -> Result<PgPool, DriverError> {
        PgPoolOptions::new()
            .max_connections(pool_size)
            .connect_with(self.connect_options(database_name))
            .await
            .map_err(classify)
    }

    async fn bind(&self, conn: &PgPool, schema: &Arc<EntitySchema>) -> Result<PgModel, DriverError> {
        PgModel::bind(conn.clone(), Arc::clone(schema)).await
    }

    async fn ping(&self, conn: &PgPool) -> Result<(), DriverError> {
        sqlx::query("SELECT 1")
            .execute(conn)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn close(&self, conn: &PgPool) {
        conn.close().await;
    }

    /// sqlx pools reconnect silently and only signal an explicit `close`, so
    /// server-side loss is detected by probing.
    async fn closed(&self, conn: &PgPool) -> LifecycleEvent {
        let mut detector = LossDetector::new(PROBE_FAILURES);
        let mut ticker = tokio::time::interval(PROBE_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = conn.close_event() => return LifecycleEvent::Disconnected,
                _ = ticker.tick() => {}
            }
            let probe = match tokio::time::timeout(PROBE_INTERVAL, self.ping(conn)).await {
                Ok(result) => result,
                Err(_) => Err(DriverError::Unreachable("liveness probe timed out".into())),
            };
            if let Err(e) = &probe {
                tracing::debug!(error = %e, "tenant pool probe failed");
            }
            if let Some(event) = detector.observe(probe) {
                return event;
            }
        }
    }
}
