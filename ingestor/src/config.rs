use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_DATABASE_NAME: &str = "telemetrydb";
const DEFAULT_CONTAINER_NAME: &str = "telemetry";
const DEFAULT_PARTITION_KEY_PATH: &str = "/deviceId";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not configured")]
    Missing(&'static str),

    #[error("{name} has invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Cosmos,
    Memory,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Cosmos => write!(f, "cosmos"),
            StoreBackend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Clone)]
pub struct CosmosConfig {
    pub account_endpoint: String,
    /// Master key. When absent an Azure AD token is used.
    pub account_key: Option<String>,
    /// User-assigned managed identity.
    pub client_id: Option<String>,
    pub accept_invalid_certs: bool,
    pub request_timeout: Duration,
}

impl fmt::Debug for CosmosConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CosmosConfig")
            .field("account_endpoint", &self.account_endpoint)
            .field("account_key", &self.account_key.as_ref().map(|_| "[REDACTED]"))
            .field("client_id", &self.client_id)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_addr: String,
    pub backend: StoreBackend,
    pub cosmos: Option<CosmosConfig>,
    pub database_name: String,
    pub container_name: String,
    pub partition_key_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let http_addr = match var("FUNCTIONS_CUSTOMHANDLER_PORT") {
            Some(port) => {
                let port: u16 = port.trim().parse().map_err(|_| ConfigError::Invalid {
                    name: "FUNCTIONS_CUSTOMHANDLER_PORT",
                    value: port.clone(),
                })?;
                format!("0.0.0.0:{}", port)
            }
            None => var("HTTP_ADDR").unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string()),
        };

        let backend = match var("STORE_BACKEND")
            .unwrap_or_else(|| "cosmos".to_string())
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "cosmos" => StoreBackend::Cosmos,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    name: "STORE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let cosmos = match backend {
            StoreBackend::Memory => None,
            StoreBackend::Cosmos => {
                let account_endpoint = var("COSMOSDB_ACCOUNT_ENDPOINT")
                    .ok_or(ConfigError::Missing("COSMOSDB_ACCOUNT_ENDPOINT"))?;
                let accept_invalid_certs = match var("COSMOSDB_ACCEPT_INVALID_CERTS") {
                    Some(v) => parse_bool("COSMOSDB_ACCEPT_INVALID_CERTS", &v)?,
                    None => false,
                };
                let timeout_secs = match var("COSMOSDB_REQUEST_TIMEOUT_SECS") {
                    Some(v) => v.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
                        name: "COSMOSDB_REQUEST_TIMEOUT_SECS",
                        value: v.clone(),
                    })?,
                    None => DEFAULT_REQUEST_TIMEOUT_SECS,
                };
                Some(CosmosConfig {
                    account_endpoint: account_endpoint.trim().trim_end_matches('/').to_string(),
                    account_key: var("COSMOSDB_ACCOUNT_KEY"),
                    client_id: var("AZURE_CLIENT_ID"),
                    accept_invalid_certs,
                    request_timeout: Duration::from_secs(timeout_secs),
                })
            }
        };

        Ok(Config {
            http_addr,
            backend,
            cosmos,
            database_name: var("COSMOSDB_DATABASE_NAME")
                .unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string()),
            container_name: var("COSMOSDB_CONTAINER_NAME")
                .unwrap_or_else(|| DEFAULT_CONTAINER_NAME.to_string()),
            partition_key_path: var("COSMOSDB_PARTITION_KEY_PATH")
                .unwrap_or_else(|| DEFAULT_PARTITION_KEY_PATH.to_string()),
        })
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_with_endpoint() {
        let config = config_from(&[("COSMOSDB_ACCOUNT_ENDPOINT", "https://acct.documents.azure.com:443/")])
            .unwrap();

        assert_eq!(config.http_addr, "0.0.0.0:8080");
        assert_eq!(config.backend, StoreBackend::Cosmos);
        assert_eq!(config.database_name, "telemetrydb");
        assert_eq!(config.container_name, "telemetry");
        assert_eq!(config.partition_key_path, "/deviceId");

        let cosmos = config.cosmos.unwrap();
        assert_eq!(cosmos.account_endpoint, "https://acct.documents.azure.com:443");
        assert!(cosmos.account_key.is_none());
        assert!(cosmos.client_id.is_none());
        assert!(!cosmos.accept_invalid_certs);
        assert_eq!(cosmos.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_endpoint_is_an_error() {
        let err = config_from(&[]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("COSMOSDB_ACCOUNT_ENDPOINT"));
    }

    #[test]
    fn test_blank_endpoint_is_missing() {
        let err = config_from(&[("COSMOSDB_ACCOUNT_ENDPOINT", "   ")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("COSMOSDB_ACCOUNT_ENDPOINT"));
    }

    #[test]
    fn test_memory_backend_needs_no_endpoint() {
        let config = config_from(&[("STORE_BACKEND", "Memory")]).unwrap();
        assert_eq!(config.backend, StoreBackend::Memory);
        assert!(config.cosmos.is_none());
    }

    #[test]
    fn test_unknown_backend() {
        let err = config_from(&[("STORE_BACKEND", "postgres")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "STORE_BACKEND", .. }));
    }

    #[test]
    fn test_custom_handler_port_overrides_http_addr() {
        let config = config_from(&[
            ("STORE_BACKEND", "memory"),
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("FUNCTIONS_CUSTOMHANDLER_PORT", "7071"),
        ])
        .unwrap();
        assert_eq!(config.http_addr, "0.0.0.0:7071");
    }

    #[test]
    fn test_invalid_custom_handler_port() {
        let err = config_from(&[("STORE_BACKEND", "memory"), ("FUNCTIONS_CUSTOMHANDLER_PORT", "http")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "FUNCTIONS_CUSTOMHANDLER_PORT", .. }));
    }

    #[test]
    fn test_cosmos_overrides() {
        let config = config_from(&[
            ("COSMOSDB_ACCOUNT_ENDPOINT", "https://localhost:8081"),
            ("COSMOSDB_ACCOUNT_KEY", "c2VjcmV0"),
            ("AZURE_CLIENT_ID", "user-assigned"),
            ("COSMOSDB_ACCEPT_INVALID_CERTS", "true"),
            ("COSMOSDB_REQUEST_TIMEOUT_SECS", "5"),
            ("COSMOSDB_DATABASE_NAME", "iot"),
            ("COSMOSDB_CONTAINER_NAME", "readings"),
            ("COSMOSDB_PARTITION_KEY_PATH", "/device"),
        ])
        .unwrap();

        assert_eq!(config.database_name, "iot");
        assert_eq!(config.container_name, "readings");
        assert_eq!(config.partition_key_path, "/device");

        let cosmos = config.cosmos.unwrap();
        assert_eq!(cosmos.account_key.as_deref(), Some("c2VjcmV0"));
        assert_eq!(cosmos.client_id.as_deref(), Some("user-assigned"));
        assert!(cosmos.accept_invalid_certs);
        assert_eq!(cosmos.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_bool() {
        let err = config_from(&[
            ("COSMOSDB_ACCOUNT_ENDPOINT", "https://localhost:8081"),
            ("COSMOSDB_ACCEPT_INVALID_CERTS", "maybe"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "COSMOSDB_ACCEPT_INVALID_CERTS", .. }));
    }

    #[test]
    fn test_debug_redacts_account_key() {
        let config = config_from(&[
            ("COSMOSDB_ACCOUNT_ENDPOINT", "https://localhost:8081"),
            ("COSMOSDB_ACCOUNT_KEY", "super-private-key"),
        ])
        .unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super-private-key"));
    }
}
