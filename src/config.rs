//! Router and server configuration from environment variables.

use crate::error::ConfigError;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DB_PREFIX: &str = "inventory_management_";
pub const DEFAULT_POOL_SIZE: u32 = 10;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Tunables for the tenant connection router.
#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// Prepended to the client code to form the tenant database name.
    pub db_prefix: String,
    /// Max pooled connections per tenant database.
    pub pool_size: u32,
    /// Bound on the connection handshake, and on waiting for an in-flight one.
    pub connect_timeout: Duration,
    /// Release connections unused for this long. `None` keeps them until shutdown.
    pub idle_timeout: Option<Duration>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            db_prefix: DEFAULT_DB_PREFIX.to_string(),
            pool_size: DEFAULT_POOL_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: None,
        }
    }
}

/// Which driver backs tenant databases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    /// In-process databases; for local development.
    Memory,
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            "memory" => Ok(Backend::Memory),
            _ => Err(ConfigError::Invalid {
                var: "TENANT_BACKEND",
                reason: format!("{} (expected postgres or memory)", s),
            }),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub backend: Backend,
    /// Base URI of the database server; the path is replaced per tenant.
    pub database_url: String,
    pub router: RouterConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = parse_var(&lookup, "BIND_ADDR")?
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));
        let backend = parse_var(&lookup, "TENANT_BACKEND")?.unwrap_or(Backend::Postgres);
        let database_url = lookup("TENANT_DATABASE_URL")
            .unwrap_or_else(|| "postgres://localhost:5432".into());
        let db_prefix = lookup("TENANT_DB_PREFIX").unwrap_or_else(|| DEFAULT_DB_PREFIX.into());
        let pool_size: u32 = parse_var(&lookup, "TENANT_POOL_SIZE")?.unwrap_or(DEFAULT_POOL_SIZE);
        if pool_size == 0 {
            return Err(ConfigError::Invalid {
                var: "TENANT_POOL_SIZE",
                reason: "must be at least 1".into(),
            });
        }
        let connect_timeout = parse_var::<u64>(&lookup, "TENANT_CONNECT_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        if connect_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "TENANT_CONNECT_TIMEOUT_MS",
                reason: "must be at least 1".into(),
            });
        }
        let idle_timeout = parse_var::<u64>(&lookup, "TENANT_IDLE_TIMEOUT_SECS")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Ok(ServerConfig {
            bind_addr,
            backend,
            database_url,
            router: RouterConfig {
                db_prefix,
                pool_size,
                connect_timeout,
                idle_timeout,
            },
        })
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: format!("{}: {}", raw, e),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(pairs: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from_map(&[]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(config.backend, Backend::Postgres);
        assert_eq!(config.router.db_prefix, "inventory_management_");
        assert_eq!(config.router.pool_size, 10);
        assert_eq!(config.router.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.router.idle_timeout, None);
    }

    #[test]
    fn reads_overrides() {
        let config = from_map(&[
            ("TENANT_BACKEND", "memory"),
            ("TENANT_DB_PREFIX", "inv_"),
            ("TENANT_POOL_SIZE", "3"),
            ("TENANT_CONNECT_TIMEOUT_MS", "750"),
            ("TENANT_IDLE_TIMEOUT_SECS", "600"),
        ])
        .unwrap();
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.router.db_prefix, "inv_");
        assert_eq!(config.router.pool_size, 3);
        assert_eq!(config.router.connect_timeout, Duration::from_millis(750));
        assert_eq!(config.router.idle_timeout, Some(Duration::from_secs(600)));
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            from_map(&[("TENANT_POOL_SIZE", "lots")]),
            Err(ConfigError::Invalid { var: "TENANT_POOL_SIZE", .. })
        ));
        assert!(matches!(
            from_map(&[("TENANT_POOL_SIZE", "0")]),
            Err(ConfigError::Invalid { var: "TENANT_POOL_SIZE", .. })
        ));
        assert!(matches!(
            from_map(&[("TENANT_CONNECT_TIMEOUT_MS", "0")]),
            Err(ConfigError::Invalid { var: "TENANT_CONNECT_TIMEOUT_MS", .. })
        ));
        assert!(matches!(
            from_map(&[("TENANT_BACKEND", "mongo")]),
            Err(ConfigError::Invalid { var: "TENANT_BACKEND", .. })
        ));
    }
}
