//! Route assembly.

pub mod common;
pub mod entity;

pub use common::common_routes_with_ready;
pub use entity::entity_routes;

use crate::driver::TenantDriver;
use crate::state::AppState;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

/// Max accepted request body.
pub const BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Full application: health/ready/version at the root, entity CRUD under /api/v1.
pub fn build_router<D: TenantDriver>(state: AppState<D>) -> Router {
    Router::new()
        .merge(common_routes_with_ready(state.clone()))
        .nest("/api/v1", entity_routes(state))
        .layer(ServiceBuilder::new().layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES)))
}
