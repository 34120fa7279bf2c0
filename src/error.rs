//! Typed errors and HTTP mapping.

use crate::tenant::TenantId;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a database driver while talking to one tenant database.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The tenant database does not exist on the server.
    #[error("unknown database: {0}")]
    UnknownDatabase(String),
    /// The server refused the credentials.
    #[error("rejected: {0}")]
    Rejected(String),
    /// Network or server failure.
    #[error("unreachable: {0}")]
    Unreachable(String),
    /// Connection was closed before it could be used.
    #[error("closed: {0}")]
    Closed(String),
    /// A schema could not be bound to the connection.
    #[error("binding: {0}")]
    Binding(String),
}

/// Errors surfaced by the tenant connection router. Cloned to every caller
/// waiting on the same connection attempt.
#[derive(Error, Debug, Clone)]
pub enum RouterError {
    #[error("tenant {tenant}: connection not established within {timeout:?}")]
    ConnectionTimeout { tenant: TenantId, timeout: Duration },
    #[error("tenant {tenant}: connection failed: {source}")]
    ConnectionFailed {
        tenant: TenantId,
        #[source]
        source: DriverError,
    },
    #[error("binding entity '{entity}' failed: {reason}")]
    SchemaBindingFailed { entity: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
    #[error("duplicate entity schema: {0}")]
    DuplicateEntity(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("missing tenant: provide the X-Client-Code header")]
    MissingTenant,
    #[error("invalid tenant code: {0}")]
    InvalidTenant(String),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl AppError {
    /// Status and machine-readable code for the response body.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Router(RouterError::ConnectionTimeout { .. }) => {
                (StatusCode::GATEWAY_TIMEOUT, "tenant_timeout")
            }
            AppError::Router(RouterError::ConnectionFailed {
                source: DriverError::UnknownDatabase(_),
                ..
            }) => (StatusCode::NOT_FOUND, "tenant_not_found"),
            AppError::Router(RouterError::ConnectionFailed { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "tenant_unavailable")
            }
            AppError::Router(RouterError::SchemaBindingFailed { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "model_binding_error")
            }
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            AppError::Db(e) => {
                if let sqlx::Error::RowNotFound = e {
                    (StatusCode::NOT_FOUND, "not_found")
                } else {
                    (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
                }
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::MissingTenant => (StatusCode::BAD_REQUEST, "missing_tenant"),
            AppError::InvalidTenant(_) => (StatusCode::BAD_REQUEST, "invalid_tenant"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::warn!(error = %self, code, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantId {
        TenantId::parse("AB12CD34").unwrap()
    }

    #[test]
    fn router_failures_map_to_distinct_statuses() {
        let timeout = AppError::from(RouterError::ConnectionTimeout {
            tenant: tenant(),
            timeout: Duration::from_secs(5),
        });
        let missing_db = AppError::from(RouterError::ConnectionFailed {
            tenant: tenant(),
            source: DriverError::UnknownDatabase("inventory_management_AB12CD34".into()),
        });
        let unreachable = AppError::from(RouterError::ConnectionFailed {
            tenant: tenant(),
            source: DriverError::Unreachable("connection refused".into()),
        });
        let binding = AppError::from(RouterError::SchemaBindingFailed {
            entity: "orders".into(),
            reason: "boom".into(),
        });

        let codes: Vec<_> = [timeout, missing_db, unreachable, binding]
            .iter()
            .map(AppError::status_and_code)
            .collect();
        assert_eq!(
            codes,
            vec![
                (StatusCode::GATEWAY_TIMEOUT, "tenant_timeout"),
                (StatusCode::NOT_FOUND, "tenant_not_found"),
                (StatusCode::SERVICE_UNAVAILABLE, "tenant_unavailable"),
                (StatusCode::INTERNAL_SERVER_ERROR, "model_binding_error"),
            ]
        );
    }

    #[test]
    fn tenant_errors_are_bad_requests() {
        assert_eq!(
            AppError::MissingTenant.status_and_code(),
            (StatusCode::BAD_REQUEST, "missing_tenant")
        );
        assert_eq!(
            AppError::InvalidTenant("a-b".into()).status_and_code(),
            (StatusCode::BAD_REQUEST, "invalid_tenant")
        );
    }
}
