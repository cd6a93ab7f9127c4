use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

use crate::transport::TlsConfig;

pub const DEFAULT_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// SQLite URL. When unset (or built without the `storage` feature) the
    /// server keeps todos in memory.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            tls: None,
        }
    }
}

impl ServerConfig {
    /// Reads the process environment, after loading `.env` if one exists.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let addr = get("TODO_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr = addr
            .parse::<SocketAddr>()
            .with_context(|| format!("TODO_ADDR is not a socket address: {}", addr))?;

        let max_connections = match get("DATABASE_MAX_CONNECTIONS") {
            Some(value) => value
                .parse::<u32>()
                .with_context(|| format!("DATABASE_MAX_CONNECTIONS is not a number: {}", value))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let tls = match (get("TLS_CERT_PATH"), get("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            (None, None) => None,
            _ => bail!("TLS_CERT_PATH and TLS_KEY_PATH must be set together"),
        };

        Ok(Self {
            addr,
            database_url: get("DATABASE_URL"),
            max_connections,
            tls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.addr.to_string(), DEFAULT_ADDR);
    }

    #[test]
    fn reads_every_setting() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("TODO_ADDR", "127.0.0.1:8080"),
            ("DATABASE_URL", "sqlite://todos.db"),
            ("DATABASE_MAX_CONNECTIONS", "12"),
            ("TLS_CERT_PATH", "cert.pem"),
            ("TLS_KEY_PATH", "key.pem"),
        ]))
        .unwrap();
        assert_eq!(config.addr.port(), 8080);
        assert_eq!(config.database_url.as_deref(), Some("sqlite://todos.db"));
        assert_eq!(config.max_connections, 12);
        let tls = config.tls.unwrap();
        assert_eq!(tls.cert_path, PathBuf::from("cert.pem"));
        assert_eq!(tls.key_path, PathBuf::from("key.pem"));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = ServerConfig::from_lookup(lookup(&[("DATABASE_URL", "  ")])).unwrap();
        assert!(config.database_url.is_none());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(ServerConfig::from_lookup(lookup(&[("TODO_ADDR", "localhost")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("DATABASE_MAX_CONNECTIONS", "many")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("TLS_CERT_PATH", "cert.pem")])).is_err());
    }
}
