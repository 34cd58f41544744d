use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};

pub const DEFAULT_PORT: u16 = 5001;
pub const DEFAULT_DB_PATH: &str = "erpnext_talk.db";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingEnv(&'static str),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Optional TOML overlay; environment variables take precedence.
#[derive(Debug, Deserialize, Default)]
pub struct RelayConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub retry: RetrySection,
}

#[derive(Debug, Deserialize, Default)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RetrySection {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub max_body_bytes: usize,
    /// Applied to every outbound request.
    pub http_timeout: Duration,
    pub talk_retry: RetryPolicy,
    /// ERPNext base URL, used for the directory API and document links.
    pub erpnext_api_url: String,
    pub erpnext_api_key: String,
    pub erpnext_api_secret: String,
    pub nextcloud_api_url: String,
    pub nextcloud_username: String,
    pub nextcloud_app_password: String,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let file = match env::var("RELAY_CONFIG_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
        {
            Some(path) => load_config_file(Path::new(&path))?,
            None => RelayConfigFile::default(),
        };
        Self::from_sources(file, |key| env::var(key).ok())
    }

    pub fn from_sources(
        file: RelayConfigFile,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let required = |key: &'static str| var(key).ok_or(ConfigError::MissingEnv(key));

        let host = var("RELAY_HOST")
            .or(file.server.host)
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let port = match var("RELAY_PORT") {
            Some(value) => parse_value("RELAY_PORT", &value)?,
            None => file.server.port.unwrap_or(DEFAULT_PORT),
        };
        let db_path = var("RELAY_DB_PATH")
            .map(PathBuf::from)
            .or(file.server.db_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));
        let max_body_bytes = match var("RELAY_MAX_BODY_BYTES") {
            Some(value) => parse_positive("RELAY_MAX_BODY_BYTES", &value)?,
            None => DEFAULT_MAX_BODY_BYTES,
        };
        let http_timeout = match var("RELAY_HTTP_TIMEOUT_SECS") {
            Some(value) => Duration::from_secs(parse_positive("RELAY_HTTP_TIMEOUT_SECS", &value)?),
            None => DEFAULT_HTTP_TIMEOUT,
        };
        let max_attempts = match var("RELAY_TALK_MAX_ATTEMPTS") {
            Some(value) => parse_positive("RELAY_TALK_MAX_ATTEMPTS", &value)?,
            None => file.retry.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
        };
        let base_delay = match var("RELAY_TALK_BACKOFF_BASE_MS") {
            Some(value) => Duration::from_millis(parse_value("RELAY_TALK_BACKOFF_BASE_MS", &value)?),
            None => file
                .retry
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_BASE_DELAY),
        };

        Ok(Self {
            host,
            port,
            db_path,
            max_body_bytes,
            http_timeout,
            talk_retry: RetryPolicy::new(max_attempts, base_delay),
            erpnext_api_url: required("ERPNEXT_API_URL")?,
            erpnext_api_key: required("ERPNEXT_API_KEY")?,
            erpnext_api_secret: required("ERPNEXT_API_SECRET")?,
            nextcloud_api_url: required("NEXTCLOUD_API_URL")?,
            nextcloud_username: required("NEXTCLOUD_USERNAME")?,
            nextcloud_app_password: required("NEXTCLOUD_APP_PASSWORD")?,
        })
    }
}

pub fn load_config_file(path: &Path) -> Result<RelayConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_positive<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let parsed: T = parse_value(key, value)?;
    if parsed > T::default() {
        Ok(parsed)
    } else {
        Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn required_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("ERPNEXT_API_URL", "https://erp.example.com"),
            ("ERPNEXT_API_KEY", "key"),
            ("ERPNEXT_API_SECRET", "secret"),
            ("NEXTCLOUD_API_URL", "https://cloud.example.com"),
            ("NEXTCLOUD_USERNAME", "relay"),
            ("NEXTCLOUD_APP_PASSWORD", "app-pass"),
        ])
    }

    fn build(
        vars: HashMap<&'static str, &'static str>,
        file: RelayConfigFile,
    ) -> Result<RelayConfig, ConfigError> {
        RelayConfig::from_sources(file, |key| vars.get(key).map(|value| value.to_string()))
    }

    #[test]
    fn defaults_apply_when_optional_vars_are_unset() {
        let config = build(required_vars(), RelayConfigFile::default()).expect("config");

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.db_path, PathBuf::from(DEFAULT_DB_PATH));
        assert_eq!(config.http_timeout, DEFAULT_HTTP_TIMEOUT);
        assert_eq!(config.talk_retry, RetryPolicy::default());
    }

    #[test]
    fn missing_credentials_are_reported() {
        let mut vars = required_vars();
        vars.remove("NEXTCLOUD_APP_PASSWORD");

        let err = build(vars, RelayConfigFile::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv("NEXTCLOUD_APP_PASSWORD")));
    }

    #[test]
    fn env_overrides_file_values() {
        let file: RelayConfigFile = toml::from_str(
            r#"
            [server]
            host = "127.0.0.1"
            port = 8080

            [retry]
            max_attempts = 3
            base_delay_ms = 250
            "#,
        )
        .expect("toml");
        let mut vars = required_vars();
        vars.insert("RELAY_PORT", "9000");

        let config = build(vars, file).expect("config");
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(
            config.talk_retry,
            RetryPolicy::new(3, Duration::from_millis(250))
        );
    }

    #[test]
    fn rejects_zero_timeout() {
        let mut vars = required_vars();
        vars.insert("RELAY_HTTP_TIMEOUT_SECS", "0");

        let err = build(vars, RelayConfigFile::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "RELAY_HTTP_TIMEOUT_SECS",
                ..
            }
        ));
    }
}
