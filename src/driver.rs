//! Database driver seam used by the tenant router.
//!
//! A driver knows how to open a connection pool for one physical database, bind
//! entity schemas to it, probe it, and close it. The router owns caching and
//! lifecycle; drivers own the wire.

use crate::error::DriverError;
use crate::schema::EntitySchema;
use crate::store::EntityStore;
use async_trait::async_trait;
use std::sync::Arc;

/// Why a live connection stopped being usable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    Disconnected,
    Error,
}

#[async_trait]
pub trait TenantDriver: Send + Sync + 'static {
    /// Live connection (pool) to one tenant database.
    type Connection: Send + Sync + 'static;
    /// Data-access object produced by binding a schema to a connection.
    type Model: EntityStore + 'static;

    /// Open a pool of at most `pool_size` connections and complete the handshake.
    async fn connect(
        &self,
        database_name: &str,
        pool_size: u32,
    ) -> Result<Self::Connection, DriverError>;

    async fn bind(
        &self,
        conn: &Self::Connection,
        schema: &Arc<EntitySchema>,
    ) -> Result<Self::Model, DriverError>;

    /// Lightweight liveness probe.
    async fn ping(&self, conn: &Self::Connection) -> Result<(), DriverError>;

    async fn close(&self, conn: &Self::Connection);

    /// Resolves once the connection is lost. Drivers without lifecycle
    /// notifications never resolve.
    async fn closed(&self, conn: &Self::Connection) -> LifecycleEvent {
        let _ = conn;
        std::future::pending().await
    }
}
