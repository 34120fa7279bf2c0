//! Common routes: health, readiness (tenant connection health), version.

use crate::driver::TenantDriver;
use crate::router::TenantHealth;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyBody {
    status: &'static str,
    tenants: Vec<TenantHealth>,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

/// Probes every cached tenant connection; 503 when a connected tenant is
/// unreachable. Handshakes still in flight are reported but do not degrade. Never evicts.
async fn ready<D: TenantDriver>(
    State(state): State<AppState<D>>,
) -> Result<Json<ReadyBody>, (StatusCode, Json<ReadyBody>)> {
    let tenants = state.router.health_check().await;
    if tenants.iter().any(TenantHealth::is_degraded) {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyBody {
                status: "degraded",
                tenants,
            }),
        ));
    }
    Ok(Json(ReadyBody {
        status: "ok",
        tenants,
    }))
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Common routes including readiness over the tenant router.
pub fn common_routes_with_ready<D: TenantDriver>(state: AppState<D>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready::<D>))
        .route("/version", get(version))
        .with_state(state)
}
