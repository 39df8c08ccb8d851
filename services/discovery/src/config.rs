//! Service configuration from the environment

use std::path::PathBuf;

/// Typed view of the environment. Missing values fall back to defaults;
/// malformed integers are startup errors.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub service_version: String,
    pub default_ttl_seconds: u32,
    pub cleanup_interval_ms: u64,
    pub log_level: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// JSON `{id, privateKey}`; required for token issuance.
    pub signing_key: Option<String>,
    /// JSON array of `{id, privateKey}` kept in the JWKS during rotation.
    pub previous_keys: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let default_ttl_seconds: u32 = std::env::var("DEFAULT_TTL_SECONDS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .map_err(|e| format!("DEFAULT_TTL_SECONDS must be a valid number: {}", e))?;

        let cleanup_interval_ms: u64 = std::env::var("CLEANUP_INTERVAL_MS")
            .unwrap_or_else(|_| "60000".to_string())
            .parse()
            .map_err(|e| format!("CLEANUP_INTERVAL_MS must be a valid number: {}", e))?;

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|e| format!("PORT must be a valid number: {}", e))?;

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        match log_level.as_str() {
            "debug" | "info" | "warn" | "error" | "silent" => {}
            other => return Err(format!("LOG_LEVEL must be one of debug|info|warn|error|silent, got {}", other)),
        }

        Ok(Self {
            environment: std::env::var("ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            service_version: std::env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| "0.0.0".to_string()),
            default_ttl_seconds,
            cleanup_interval_ms,
            log_level,
            port,
            data_dir: PathBuf::from(
                std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            ),
            signing_key: std::env::var("DISCOVERY_SIGNING_KEY").ok(),
            previous_keys: std::env::var("DISCOVERY_PREVIOUS_KEYS").ok(),
        })
    }

    /// Default `tracing` filter directive derived from `LOG_LEVEL`;
    /// `RUST_LOG` overrides it entirely.
    pub fn env_filter(&self) -> String {
        match self.log_level.as_str() {
            "silent" => "off".to_string(),
            level => format!("discovery_service={level},coral={level},tower_http={level}"),
        }
    }
}
