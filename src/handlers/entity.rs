//! Entity CRUD handlers. Every call resolves the tenant's bound models through
//! the router; handlers never touch a driver connection directly.

use crate::driver::TenantDriver;
use crate::error::AppError;
use crate::extractors::Tenant;
use crate::response::{created, found, page};
use crate::router::ModelRegistry;
use crate::schema::Document;
use crate::state::AppState;
use crate::store::{clamp_limit, EntityStore};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

fn parse_id(id_str: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(id_str).map_err(|_| AppError::BadRequest("invalid id".into()))
}

fn body_to_document(value: Value) -> Result<Document, AppError> {
    match value {
        Value::Object(m) => Ok(m),
        _ => Err(AppError::BadRequest("body must be a JSON object".into())),
    }
}

/// Query string value as JSON: numbers, booleans and null keep their type, anything else is a string.
fn query_value(s: &str) -> Value {
    match serde_json::from_str::<Value>(s) {
        Ok(v @ (Value::Number(_) | Value::Bool(_) | Value::Null)) => v,
        _ => Value::String(s.to_string()),
    }
}

fn paging_param(name: &str, raw: &str) -> Result<u32, AppError> {
    raw.trim().parse().map_err(|_| {
        AppError::BadRequest(format!("{} must be a non-negative integer, got '{}'", name, raw))
    })
}

/// Split list query params into paging and an exact-match filter.
fn filter_from_params(
    params: HashMap<String, String>,
) -> Result<(Document, Option<u32>, Option<u32>), AppError> {
    let mut limit: Option<u32> = None;
    let mut offset: Option<u32> = None;
    let mut filter = Document::new();
    for (k, v) in params {
        match k.as_str() {
            "limit" => limit = Some(paging_param("limit", &v)?),
            "offset" => offset = Some(paging_param("offset", &v)?),
            _ => {
                filter.insert(k, query_value(&v));
            }
        }
    }
    Ok((filter, limit, offset))
}

async fn tenant_models<D: TenantDriver>(
    state: &AppState<D>,
    tenant: &crate::tenant::TenantId,
) -> Result<Arc<ModelRegistry<D::Model>>, AppError> {
    Ok(state.router.acquire_models(tenant, &state.schemas).await?)
}

fn entity_model<'a, M>(models: &'a ModelRegistry<M>, entity: &str) -> Result<&'a M, AppError> {
    models
        .get(entity)
        .ok_or_else(|| AppError::NotFound(format!("entity {}", entity)))
}

pub async fn list<D: TenantDriver>(
    State(state): State<AppState<D>>,
    Tenant(tenant): Tenant,
    Path(entity): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let models = tenant_models(&state, &tenant).await?;
    let model = entity_model(&models, &entity)?;
    let (filter, limit, offset) = filter_from_params(params)?;
    let rows = model.find_many(&filter, limit, offset).await?;
    Ok(page(rows, clamp_limit(limit), offset.unwrap_or(0)))
}

pub async fn count<D: TenantDriver>(
    State(state): State<AppState<D>>,
    Tenant(tenant): Tenant,
    Path(entity): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let models = tenant_models(&state, &tenant).await?;
    let model = entity_model(&models, &entity)?;
    let (filter, _, _) = filter_from_params(params)?;
    let count = model.count(&filter).await?;
    Ok(found(serde_json::json!({ "count": count })))
}

pub async fn create<D: TenantDriver>(
    State(state): State<AppState<D>>,
    Tenant(tenant): Tenant,
    Path(entity): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let models = tenant_models(&state, &tenant).await?;
    let model = entity_model(&models, &entity)?;
    let row = model.create(body_to_document(body)?).await?;
    Ok(created(row))
}

pub async fn read<D: TenantDriver>(
    State(state): State<AppState<D>>,
    Tenant(tenant): Tenant,
    Path((entity, id_str)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let models = tenant_models(&state, &tenant).await?;
    let model = entity_model(&models, &entity)?;
    let id = parse_id(&id_str)?;
    let row = model
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(id_str))?;
    Ok(found(row))
}

pub async fn update<D: TenantDriver>(
    State(state): State<AppState<D>>,
    Tenant(tenant): Tenant,
    Path((entity, id_str)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let models = tenant_models(&state, &tenant).await?;
    let model = entity_model(&models, &entity)?;
    let id = parse_id(&id_str)?;
    let row = model
        .update_by_id(id, body_to_document(body)?)
        .await?
        .ok_or_else(|| AppError::NotFound(id_str))?;
    Ok(found(row))
}

pub async fn delete<D: TenantDriver>(
    State(state): State<AppState<D>>,
    Tenant(tenant): Tenant,
    Path((entity, id_str)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let models = tenant_models(&state, &tenant).await?;
    let model = entity_model(&models, &entity)?;
    let id = parse_id(&id_str)?;
    model
        .delete_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(id_str))?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn query_values_keep_scalar_types() {
        assert_eq!(query_value("42"), json!(42));
        assert_eq!(query_value("true"), json!(true));
        assert_eq!(query_value("red"), json!("red"));
        assert_eq!(query_value("[1]"), json!("[1]"));
    }

    #[test]
    fn paging_params_are_not_filters() {
        let (filter, limit, offset) =
            filter_from_params(params(&[("limit", "5"), ("offset", "10"), ("status", "active")]))
                .unwrap();
        assert_eq!(limit, Some(5));
        assert_eq!(offset, Some(10));
        assert_eq!(Value::Object(filter), json!({"status": "active"}));
    }

    #[test]
    fn malformed_paging_is_rejected() {
        for (key, value) in [("limit", "abc"), ("limit", "-1"), ("offset", "1.5"), ("offset", "")] {
            assert!(
                matches!(
                    filter_from_params(params(&[(key, value)])),
                    Err(AppError::BadRequest(_))
                ),
                "accepted {}={}",
                key,
                value
            );
        }
    }
}
