//! Response envelopes for entity routes: `{data}` for one document,
//! `{data, meta}` for a page of documents.

use axum::{http::StatusCode, Json};
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
pub struct Single {
    pub data: Value,
}

#[derive(Serialize)]
pub struct Page {
    pub data: Vec<Value>,
    pub meta: PageMeta,
}

/// Paging actually applied to a list query; `limit` is after clamping.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    pub limit: u32,
    pub offset: u32,
    /// Documents in this page. Fewer than `limit` means the last page.
    pub returned: usize,
}

pub fn created(data: Value) -> (StatusCode, Json<Single>) {
    (StatusCode::CREATED, Json(Single { data }))
}

pub fn found(data: Value) -> (StatusCode, Json<Single>) {
    (StatusCode::OK, Json(Single { data }))
}

pub fn page(data: Vec<Value>, limit: u32, offset: u32) -> (StatusCode, Json<Page>) {
    let returned = data.len();
    (
        StatusCode::OK,
        Json(Page {
            data,
            meta: PageMeta {
                limit,
                offset,
                returned,
            },
        }),
    )
}
