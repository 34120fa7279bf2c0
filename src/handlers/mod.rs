//! HTTP handlers for tenant-scoped entity CRUD.

pub mod entity;
pub use entity::*;
