#![allow(dead_code)]

use axum::body::Body;
use axum::http::Request;
use axum::Router;
use inventory_tenancy::{
    build_router, inventory_schemas, AppState, MemoryDriver, RouterConfig, TenantId, TenantRouter,
};
use std::sync::Arc;

pub const CLIENT_CODE: &str = "X-Client-Code";

pub fn tenant(code: &str) -> TenantId {
    TenantId::parse(code).expect("tenant code")
}

pub fn database(code: &str) -> String {
    format!("inventory_management_{}", code)
}

pub fn router(driver: &MemoryDriver) -> TenantRouter<MemoryDriver> {
    TenantRouter::new(driver.clone(), RouterConfig::default())
}

pub fn app(driver: &MemoryDriver) -> (Router, TenantRouter<MemoryDriver>) {
    let router = router(driver);
    let state = AppState::new(router.clone(), Arc::new(inventory_schemas()));
    (build_router(state), router)
}

pub fn json_request(method: &str, uri: &str, tenant: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(CLIENT_CODE, tenant)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn tenant_request(method: &str, uri: &str, tenant: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(CLIENT_CODE, tenant)
        .body(Body::empty())
        .expect("request")
}

pub fn plain_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request")
}

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}
