use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::error::AppError;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Server configuration
    pub http_port: u16,

    // Database configuration; in-memory repositories when unset
    pub database_url: Option<String>,
    pub db_max_connections: u32,

    // Moderation
    pub moderation_enabled: bool,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub oracle_timeout_ms: u64,
    pub flood_sweep_interval_secs: u64,

    // Service configuration
    pub service_name: String,
    pub environment: String,
}

/// Connection settings for the moderation oracle
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let http_port = env::var("HTTP_PORT")
            .unwrap_or_else(|_| "8085".to_string())
            .parse()
            .map_err(|e| AppError::Config(format!("HTTP_PORT: {e}")))?;

        Ok(Self {
            http_port,
            database_url: non_empty_var("DATABASE_URL"),
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .unwrap_or(20),
            moderation_enabled: env::var("MODERATION_ENABLED")
                .map(|v| !matches!(v.to_lowercase().as_str(), "false" | "0" | "off"))
                .unwrap_or(true),
            gemini_api_key: non_empty_var("GEMINI_API_KEY"),
            gemini_model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| DEFAULT_GEMINI_MODEL.to_string()),
            gemini_base_url: env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_GEMINI_BASE_URL.to_string()),
            oracle_timeout_ms: env::var("ORACLE_TIMEOUT_MS")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .unwrap_or(4000),
            flood_sweep_interval_secs: env::var("FLOOD_SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "group-chat-service".to_string()),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        })
    }

    /// Oracle settings, None when no API key is configured
    pub fn oracle(&self) -> Option<OracleConfig> {
        let api_key = self.gemini_api_key.clone()?;
        Some(OracleConfig {
            api_key,
            model: self.gemini_model.clone(),
            base_url: self.gemini_base_url.clone(),
            timeout: Duration::from_millis(self.oracle_timeout_ms),
        })
    }

    pub fn flood_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.flood_sweep_interval_secs.max(1))
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: [&str; 6] = [
        "HTTP_PORT",
        "DATABASE_URL",
        "MODERATION_ENABLED",
        "GEMINI_API_KEY",
        "ORACLE_TIMEOUT_MS",
        "FLOOD_SWEEP_INTERVAL_SECS",
    ];

    fn clear_env() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_default_config() {
        clear_env();
        let config = Config::from_env().unwrap();
        assert_eq!(config.http_port, 8085);
        assert!(config.database_url.is_none());
        assert!(config.moderation_enabled);
        assert_eq!(config.oracle_timeout_ms, 4000);
        assert!(config.oracle().is_none());
    }

    #[test]
    #[serial]
    fn test_oracle_config_from_env() {
        clear_env();
        env::set_var("GEMINI_API_KEY", "secret");
        env::set_var("ORACLE_TIMEOUT_MS", "1500");
        env::set_var("MODERATION_ENABLED", "false");

        let config = Config::from_env().unwrap();
        let oracle = config.oracle().unwrap();
        assert_eq!(oracle.api_key, "secret");
        assert_eq!(oracle.timeout, Duration::from_millis(1500));
        assert!(!config.moderation_enabled);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_port_is_rejected() {
        clear_env();
        env::set_var("HTTP_PORT", "not-a-port");
        assert!(matches!(Config::from_env(), Err(AppError::Config(_))));
        clear_env();
    }
}
