//! Entity CRUD routes. The entity name is a path parameter resolved against the
//! tenant's bound model registry; the tenant comes from the request.

use crate::driver::TenantDriver;
use crate::handlers::entity::{count, create, delete as delete_handler, list, read, update};
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn entity_routes<D: TenantDriver>(state: AppState<D>) -> Router {
    Router::new()
        .route("/:entity", get(list::<D>).post(create::<D>))
        .route("/:entity/count", get(count::<D>))
        .route(
            "/:entity/:id",
            get(read::<D>).patch(update::<D>).delete(delete_handler::<D>),
        )
        .with_state(state)
}
