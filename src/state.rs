//! Shared application state for all routes: the tenant router and the entity schemas it binds.

use crate::driver::TenantDriver;
use crate::router::TenantRouter;
use crate::schema::SchemaRegistry;
use std::sync::Arc;

pub struct AppState<D: TenantDriver> {
    pub router: TenantRouter<D>,
    /// Bound into every tenant connection on first use.
    pub schemas: Arc<SchemaRegistry>,
}

impl<D: TenantDriver> AppState<D> {
    pub fn new(router: TenantRouter<D>, schemas: Arc<SchemaRegistry>) -> Self {
        AppState { router, schemas }
    }
}

impl<D: TenantDriver> Clone for AppState<D> {
    fn clone(&self) -> Self {
        AppState {
            router: self.router.clone(),
            schemas: Arc::clone(&self.schemas),
        }
    }
}
