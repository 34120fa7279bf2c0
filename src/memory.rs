//! In-process driver. Each "server" holds named databases of document
//! collections; useful for local development without PostgreSQL and for tests.
//!
//! Fault controls (`stall`, `refuse`, `sever`, `break_collection`,
//! `drop_connections`) simulate a misbehaving server per database.

use crate::driver::{LifecycleEvent, TenantDriver};
use crate::error::{AppError, DriverError};
use crate::schema::{Document, EntitySchema};
use crate::store::{clamp_limit, EntityStore};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type Collection = Mutex<Vec<Document>>;

#[derive(Default)]
struct MemoryDatabase {
    collections: Mutex<HashMap<String, Arc<Collection>>>,
}

#[derive(Default)]
struct Faults {
    provisioned_only: bool,
    connect_delay: Option<Duration>,
    stalled: HashSet<String>,
    refused: HashSet<String>,
    severed: HashSet<String>,
    broken_collections: HashSet<String>,
}

#[derive(Default)]
struct MemoryServer {
    databases: Mutex<HashMap<String, Arc<MemoryDatabase>>>,
    faults: Mutex<Faults>,
    live: Mutex<HashMap<String, Vec<Weak<watch::Sender<Option<LifecycleEvent>>>>>>,
    connects: AtomicUsize,
    binds: AtomicUsize,
}

/// In-memory driver. Clones share the same server.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    server: Arc<MemoryServer>,
}

/// Connection to one in-memory database.
pub struct MemoryConnection {
    database_name: String,
    database: Arc<MemoryDatabase>,
    lifecycle: Arc<watch::Sender<Option<LifecycleEvent>>>,
}

impl MemoryConnection {
    pub fn database_name(&self) -> &str {
        &self.database_name
    }
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only connect to databases created with `provision`; others fail as unknown.
    pub fn require_provisioned(&self, on: bool) {
        lock(&self.server.faults).provisioned_only = on;
    }

    pub fn provision(&self, database_name: &str) {
        lock(&self.server.databases)
            .entry(database_name.to_string())
            .or_default();
    }

    /// Delay every handshake by `delay`.
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        lock(&self.server.faults).connect_delay = delay;
    }

    /// Handshakes to `database_name` never complete.
    pub fn stall(&self, database_name: &str) {
        lock(&self.server.faults).stalled.insert(database_name.to_string());
    }

    /// Handshakes to `database_name` fail as unreachable.
    pub fn refuse(&self, database_name: &str) {
        lock(&self.server.faults).refused.insert(database_name.to_string());
    }

    /// Pings on existing connections to `database_name` fail.
    pub fn sever(&self, database_name: &str) {
        lock(&self.server.faults).severed.insert(database_name.to_string());
    }

    /// Clear stall, refuse and sever faults for `database_name`.
    pub fn restore(&self, database_name: &str) {
        let mut faults = lock(&self.server.faults);
        faults.stalled.remove(database_name);
        faults.refused.remove(database_name);
        faults.severed.remove(database_name);
    }

    /// Binding a schema whose collection is `collection` fails.
    pub fn break_collection(&self, collection: &str) {
        lock(&self.server.faults)
            .broken_collections
            .insert(collection.to_string());
    }

    pub fn repair_collection(&self, collection: &str) {
        lock(&self.server.faults).broken_collections.remove(collection);
    }

    /// Server-side drop of every live connection to `database_name`.
    pub fn drop_connections(&self, database_name: &str, event: LifecycleEvent) {
        let senders = lock(&self.server.live).remove(database_name).unwrap_or_default();
        for sender in senders.iter().filter_map(Weak::upgrade) {
            sender.send_replace(Some(event));
        }
    }

    /// Handshakes attempted so far.
    pub fn connect_count(&self) -> usize {
        self.server.connects.load(Ordering::SeqCst)
    }

    /// Schema bindings performed so far.
    pub fn bind_count(&self) -> usize {
        self.server.binds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TenantDriver for MemoryDriver {
    type Connection = MemoryConnection;
    type Model = MemoryModel;

    async fn connect(
        &self,
        database_name: &str,
        _pool_size: u32,
    ) -> Result<MemoryConnection, DriverError> {
        self.server.connects.fetch_add(1, Ordering::SeqCst);
        let (delay, stalled, refused, provisioned_only) = {
            let faults = lock(&self.server.faults);
            (
                faults.connect_delay,
                faults.stalled.contains(database_name),
                faults.refused.contains(database_name),
                faults.provisioned_only,
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if stalled {
            std::future::pending::<()>().await;
        }
        if refused {
            return Err(DriverError::Unreachable(format!(
                "connection refused: {}",
                database_name
            )));
        }
        let database = {
            let mut databases = lock(&self.server.databases);
            match databases.get(database_name) {
                Some(db) => Arc::clone(db),
                None if provisioned_only => {
                    return Err(DriverError::UnknownDatabase(database_name.to_string()))
                }
                None => Arc::clone(databases.entry(database_name.to_string()).or_default()),
            }
        };
        let (tx, _) = watch::channel(None);
        let lifecycle = Arc::new(tx);
        {
            let mut live = lock(&self.server.live);
            let senders = live.entry(database_name.to_string()).or_default();
            senders.retain(|s| s.strong_count() > 0);
            senders.push(Arc::downgrade(&lifecycle));
        }
        Ok(MemoryConnection {
            database_name: database_name.to_string(),
            database,
            lifecycle,
        })
    }

    async fn bind(
        &self,
        conn: &MemoryConnection,
        schema: &Arc<EntitySchema>,
    ) -> Result<MemoryModel, DriverError> {
        if lock(&self.server.faults)
            .broken_collections
            .contains(schema.collection())
        {
            return Err(DriverError::Binding(format!(
                "cannot register collection {}",
                schema.collection()
            )));
        }
        self.server.binds.fetch_add(1, Ordering::SeqCst);
        let documents = Arc::clone(
            lock(&conn.database.collections)
                .entry(schema.collection().to_string())
                .or_default(),
        );
        Ok(MemoryModel {
            schema: Arc::clone(schema),
            documents,
        })
    }

    async fn ping(&self, conn: &MemoryConnection) -> Result<(), DriverError> {
        if lock(&self.server.faults).severed.contains(&conn.database_name) {
            return Err(DriverError::Unreachable(format!(
                "no route to {}",
                conn.database_name
            )));
        }
        Ok(())
    }

    async fn close(&self, conn: &MemoryConnection) {
        conn.lifecycle.send_replace(Some(LifecycleEvent::Disconnected));
    }

    async fn closed(&self, conn: &MemoryConnection) -> LifecycleEvent {
        let mut rx = conn.lifecycle.subscribe();
        let event = match rx.wait_for(Option::is_some).await {
            Ok(event) => *event,
            Err(_) => None,
        };
        event.unwrap_or(LifecycleEvent::Disconnected)
    }
}

/// Collection bound to one in-memory database.
#[derive(Clone)]
pub struct MemoryModel {
    schema: Arc<EntitySchema>,
    documents: Arc<Collection>,
}

fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(k, v)| doc.get(k) == Some(v))
}

fn document_id(doc: &Document) -> Option<Uuid> {
    doc.get("id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn now() -> Value {
    Value::String(chrono::Utc::now().to_rfc3339())
}

#[async_trait]
impl EntityStore for MemoryModel {
    fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    async fn find_many(
        &self,
        filter: &Document,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Value>, AppError> {
        let docs = lock(&self.documents);
        Ok(docs
            .iter()
            .filter(|d| matches_filter(d, filter))
            .skip(offset.unwrap_or(0) as usize)
            .take(clamp_limit(limit) as usize)
            .map(|d| Value::Object(d.clone()))
            .collect())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Value>, AppError> {
        let docs = lock(&self.documents);
        Ok(docs
            .iter()
            .find(|d| document_id(d) == Some(id))
            .map(|d| Value::Object(d.clone())))
    }

    async fn create(&self, doc: Document) -> Result<Value, AppError> {
        let mut doc = self.schema.prepare_insert(doc)?;
        let stamp = now();
        doc.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
        doc.insert("created_at".into(), stamp.clone());
        doc.insert("updated_at".into(), stamp);
        lock(&self.documents).push(doc.clone());
        Ok(Value::Object(doc))
    }

    async fn update_by_id(&self, id: Uuid, patch: Document) -> Result<Option<Value>, AppError> {
        let patch = self.schema.prepare_patch(patch)?;
        let mut docs = lock(&self.documents);
        let Some(doc) = docs.iter_mut().find(|d| document_id(d) == Some(id)) else {
            return Ok(None);
        };
        doc.extend(patch);
        doc.insert("updated_at".into(), now());
        Ok(Some(Value::Object(doc.clone())))
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<Option<Value>, AppError> {
        let mut docs = lock(&self.documents);
        let removed = docs
            .iter()
            .position(|d| document_id(d) == Some(id))
            .map(|i| docs.remove(i));
        Ok(removed.map(Value::Object))
    }

    async fn count(&self, filter: &Document) -> Result<u64, AppError> {
        let docs = lock(&self.documents);
        Ok(docs.iter().filter(|d| matches_filter(d, filter)).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    async fn products(driver: &MemoryDriver, database: &str) -> MemoryModel {
        let conn = driver.connect(database, 1).await.unwrap();
        let schema = Arc::new(EntitySchema::new("products").with_required(&["name"]));
        driver.bind(&conn, &schema).await.unwrap()
    }

    #[tokio::test]
    async fn crud_round_trip() {
        let driver = MemoryDriver::new();
        let model = products(&driver, "db1").await;

        let created = model.create(doc(json!({"name": "Bolt", "qty": 3}))).await.unwrap();
        let id = Uuid::parse_str(created["id"].as_str().unwrap()).unwrap();
        assert_eq!(model.find_by_id(id).await.unwrap().unwrap()["name"], "Bolt");

        let updated = model
            .update_by_id(id, doc(json!({"qty": 5})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["qty"], 5);
        assert_eq!(updated["name"], "Bolt");

        assert!(model.delete_by_id(id).await.unwrap().is_some());
        assert!(model.find_by_id(id).await.unwrap().is_none());
        assert!(model.delete_by_id(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn filters_and_pages() {
        let driver = MemoryDriver::new();
        let model = products(&driver, "db1").await;
        for (name, color) in [("a", "red"), ("b", "blue"), ("c", "red"), ("d", "red")] {
            model.create(doc(json!({"name": name, "color": color}))).await.unwrap();
        }
        let red = doc(json!({"color": "red"}));
        assert_eq!(model.count(&red).await.unwrap(), 3);
        let page = model.find_many(&red, Some(1), Some(1)).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["name"], "c");
        assert_eq!(model.count(&Document::new()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn databases_are_isolated() {
        let driver = MemoryDriver::new();
        let one = products(&driver, "db1").await;
        let two = products(&driver, "db2").await;
        one.create(doc(json!({"name": "only in db1"}))).await.unwrap();
        assert_eq!(one.count(&Document::new()).await.unwrap(), 1);
        assert_eq!(two.count(&Document::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn provisioned_only_rejects_unknown_databases() {
        let driver = MemoryDriver::new();
        driver.require_provisioned(true);
        driver.provision("known");
        assert!(driver.connect("known", 1).await.is_ok());
        assert!(matches!(
            driver.connect("unknown", 1).await,
            Err(DriverError::UnknownDatabase(_))
        ));
    }

    #[tokio::test]
    async fn dropped_connections_report_lifecycle_event() {
        let driver = MemoryDriver::new();
        let conn = driver.connect("db1", 1).await.unwrap();
        driver.drop_connections("db1", LifecycleEvent::Error);
        assert_eq!(driver.closed(&conn).await, LifecycleEvent::Error);
    }
}
