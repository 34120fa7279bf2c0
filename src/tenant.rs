//! Tenant identifier (client code) and physical database naming.

use crate::error::AppError;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Longest accepted client code.
pub const MAX_TENANT_CODE_LEN: usize = 32;

fn tenant_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[A-Za-z0-9]+$").expect("static tenant code pattern"))
}

/// Opaque alphanumeric client code naming one tenant database.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Validate a client code. No trimming or case folding: the code is used verbatim.
    pub fn parse(code: &str) -> Result<Self, AppError> {
        if code.is_empty() || code.len() > MAX_TENANT_CODE_LEN {
            return Err(AppError::InvalidTenant(format!(
                "'{}' must be 1 to {} characters",
                code, MAX_TENANT_CODE_LEN
            )));
        }
        if !tenant_code_pattern().is_match(code) {
            return Err(AppError::InvalidTenant(format!(
                "'{}' must be alphanumeric",
                code
            )));
        }
        Ok(TenantId(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Physical database name: `prefix + code`.
    pub fn database_name(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.0)
    }
}

impl FromStr for TenantId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TenantId::parse(s)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tenant taken from a validated access token. The authenticator inserts it
/// into the request extensions; it takes precedence over the client code header.
#[derive(Clone, Debug)]
pub struct AuthenticatedTenant(pub TenantId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_name_is_prefix_plus_code() {
        let tenant = TenantId::parse("AB12CD34").unwrap();
        assert_eq!(
            tenant.database_name("inventory_management_"),
            "inventory_management_AB12CD34"
        );
    }

    #[test]
    fn code_is_kept_verbatim() {
        let tenant: TenantId = "abCD12".parse().unwrap();
        assert_eq!(tenant.as_str(), "abCD12");
        assert_eq!(tenant.to_string(), "abCD12");
    }

    #[test]
    fn rejects_malformed_codes() {
        for code in ["", " AB12", "AB-12", "AB_12", "ab12 ", &"A".repeat(33)] {
            assert!(
                matches!(TenantId::parse(code), Err(AppError::InvalidTenant(_))),
                "accepted {:?}",
                code
            );
        }
    }

    #[test]
    fn serializes_as_plain_string() {
        let tenant = TenantId::parse("T1").unwrap();
        assert_eq!(serde_json::to_value(&tenant).unwrap(), serde_json::json!("T1"));
    }
}
