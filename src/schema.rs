//! Entity schemas: per-entity structure shared by every tenant database, and the
//! startup-time registry the router binds to each tenant connection.

use crate::error::{AppError, ConfigError};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// A stored or submitted entity document.
pub type Document = Map<String, Value>;

/// Fields managed by the store; clients cannot set them.
pub const RESERVED_FIELDS: [&str; 3] = ["id", "created_at", "updated_at"];

/// Structure and validation for one business entity.
#[derive(Clone, Debug, PartialEq)]
pub struct EntitySchema {
    name: String,
    collection: String,
    required: Vec<String>,
    defaults: Document,
}

impl EntitySchema {
    /// New schema whose collection (table) is named after the entity.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        EntitySchema {
            collection: name.clone(),
            name,
            required: Vec::new(),
            defaults: Document::new(),
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_required(mut self, fields: &[&str]) -> Self {
        self.required.extend(fields.iter().map(|f| f.to_string()));
        self
    }

    pub fn with_default(mut self, field: &str, value: Value) -> Self {
        self.defaults.insert(field.to_string(), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Validate a new document: drop reserved fields, fill defaults, require required fields.
    pub fn prepare_insert(&self, mut doc: Document) -> Result<Document, AppError> {
        strip_reserved(&mut doc);
        for (field, value) in &self.defaults {
            doc.entry(field.clone()).or_insert_with(|| value.clone());
        }
        for field in &self.required {
            if doc.get(field).map(Value::is_null).unwrap_or(true) {
                return Err(AppError::Validation(format!(
                    "{}: {} is required",
                    self.name, field
                )));
            }
        }
        Ok(doc)
    }

    /// Validate a partial update. Required fields may be omitted but not nulled.
    pub fn prepare_patch(&self, mut patch: Document) -> Result<Document, AppError> {
        strip_reserved(&mut patch);
        for field in &self.required {
            if patch.get(field).map(Value::is_null).unwrap_or(false) {
                return Err(AppError::Validation(format!(
                    "{}: {} cannot be null",
                    self.name, field
                )));
            }
        }
        Ok(patch)
    }
}

fn strip_reserved(doc: &mut Document) {
    for field in RESERVED_FIELDS {
        doc.remove(field);
    }
}

/// Ordered, duplicate-free set of schemas, identical across tenants.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    schemas: Vec<Arc<EntitySchema>>,
}

impl SchemaRegistry {
    pub fn new(schemas: Vec<EntitySchema>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for schema in &schemas {
            if !seen.insert(schema.name.as_str()) {
                return Err(ConfigError::DuplicateEntity(schema.name.clone()));
            }
        }
        Ok(SchemaRegistry {
            schemas: schemas.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntitySchema>> {
        self.schemas.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EntitySchema>> {
        self.schemas.iter().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// Standard inventory entities bound into every tenant database.
pub fn inventory_schemas() -> SchemaRegistry {
    let active = Value::String("active".into());
    let schemas = vec![
        EntitySchema::new("products")
            .with_required(&["name", "sku"])
            .with_default("price", Value::from(0))
            .with_default("status", active.clone()),
        EntitySchema::new("categories")
            .with_required(&["name"])
            .with_default("status", active.clone()),
        EntitySchema::new("warehouses")
            .with_required(&["name"])
            .with_default("status", active.clone()),
        EntitySchema::new("inventory")
            .with_collection("inventory_items")
            .with_required(&["product_id", "warehouse_id"])
            .with_default("quantity", Value::from(0))
            .with_default("reorder_level", Value::from(0)),
        EntitySchema::new("orders")
            .with_required(&["customer_id", "items"])
            .with_default("status", Value::String("pending".into())),
        EntitySchema::new("suppliers")
            .with_required(&["name"])
            .with_default("status", active.clone()),
        EntitySchema::new("customers")
            .with_required(&["name"])
            .with_default("status", active),
    ];
    SchemaRegistry {
        schemas: schemas.into_iter().map(Arc::new).collect(),
    }
}
