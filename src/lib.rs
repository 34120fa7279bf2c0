//! Inventory tenancy: per-tenant database routing for the inventory backend.

pub mod config;
pub mod driver;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod memory;
pub mod postgres;
pub mod response;
pub mod router;
pub mod routes;
pub mod schema;
pub mod state;
pub mod store;
pub mod tenant;

pub use config::{Backend, RouterConfig, ServerConfig};
pub use driver::{LifecycleEvent, TenantDriver};
pub use error::{AppError, ConfigError, DriverError, RouterError};
pub use memory::MemoryDriver;
pub use postgres::PgDriver;
pub use router::{ConnectionHandle, ConnectionState, ModelRegistry, TenantHandle, TenantHealth, TenantRouter};
pub use routes::{build_router, common_routes_with_ready, entity_routes};
pub use schema::{inventory_schemas, Document, EntitySchema, SchemaRegistry};
pub use state::AppState;
pub use store::{EntityStore, PgModel};
pub use tenant::{AuthenticatedTenant, TenantId};
