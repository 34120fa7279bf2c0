//! Extract the tenant for a request: authenticated token first, then the X-Client-Code header.

use crate::error::AppError;
use crate::tenant::{AuthenticatedTenant, TenantId};
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::request::Parts,
};

/// Header carrying the client code on unauthenticated tenant-scoped calls.
pub const CLIENT_CODE_HEADER: &str = "X-Client-Code";

/// Extractor for the validated tenant of the current request.
#[derive(Clone, Debug)]
pub struct Tenant(pub TenantId);

#[async_trait]
impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(AuthenticatedTenant(tenant)) = parts.extensions.get::<AuthenticatedTenant>() {
            return Ok(Tenant(tenant.clone()));
        }
        let value = parts
            .headers
            .get(CLIENT_CODE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(AppError::MissingTenant)?;
        Ok(Tenant(TenantId::parse(value)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<Tenant, AppError> {
        let (mut parts, _) = request.into_parts();
        Tenant::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_client_code_header() {
        let request = Request::builder()
            .header(CLIENT_CODE_HEADER, " AB12CD34 ")
            .body(())
            .unwrap();
        let Tenant(tenant) = extract(request).await.unwrap();
        assert_eq!(tenant.as_str(), "AB12CD34");
    }

    #[tokio::test]
    async fn authenticated_tenant_wins_over_header() {
        let mut request = Request::builder()
            .header(CLIENT_CODE_HEADER, "HEADER1")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(AuthenticatedTenant(TenantId::parse("TOKEN1").unwrap()));
        let Tenant(tenant) = extract(request).await.unwrap();
        assert_eq!(tenant.as_str(), "TOKEN1");
    }

    #[tokio::test]
    async fn missing_and_malformed_codes_are_rejected() {
        let missing = extract(Request::builder().body(()).unwrap()).await;
        assert!(matches!(missing, Err(AppError::MissingTenant)));

        let malformed = Request::builder()
            .header(CLIENT_CODE_HEADER, "AB/12")
            .body(())
            .unwrap();
        assert!(matches!(extract(malformed).await, Err(AppError::InvalidTenant(_))));
    }
}
