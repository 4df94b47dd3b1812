use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rooms: RoomsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory of built frontend assets served behind the page redirector.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            static_dir: default_static_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static/dist")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Seed admin account created on first start if no users exist.
    #[serde(default = "default_admin_email")]
    pub admin_email: String,
    #[serde(default)]
    pub admin_password: Option<String>,
    /// Lifetime of issued login sessions, in days.
    #[serde(default = "default_session_ttl_days")]
    pub session_ttl_days: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_email: default_admin_email(),
            admin_password: None,
            session_ttl_days: default_session_ttl_days(),
        }
    }
}

fn default_admin_email() -> String {
    "admin@classhub.local".to_string()
}

fn default_session_ttl_days() -> i64 {
    14
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomsConfig {
    /// Base URL of the video-room provider REST API.
    #[serde(default = "default_rooms_api_base")]
    pub api_base: String,
    /// Bearer key for the provider; rooms cannot be provisioned without it.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Lifetime of minted join tokens, in hours.
    #[serde(default = "default_join_token_ttl_hours")]
    pub join_token_ttl_hours: i64,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            api_base: default_rooms_api_base(),
            api_key: None,
            join_token_ttl_hours: default_join_token_ttl_hours(),
        }
    }
}

fn default_rooms_api_base() -> String {
    "https://api.daily.co/v1".to_string()
}

fn default_join_token_ttl_hours() -> i64 {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Bucket for attachment objects. Empty disables uploads.
    #[serde(default)]
    pub bucket: Option<String>,
    /// Custom S3-compatible endpoint (e.g. MinIO); AWS default when unset.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            endpoint: None,
            region: default_region(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| "Failed to parse configuration file")?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.session_ttl_days, 14);
        assert_eq!(config.rooms.join_token_ttl_hours, 4);
        assert!(config.storage.bucket.is_none());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9000

            [rooms]
            api_key = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.rooms.api_key.as_deref(), Some("secret"));
        assert_eq!(config.auth.session_ttl_days, 14);
    }
}
