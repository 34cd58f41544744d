//! ERPNext user directory lookups.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory returned {status} for {email}")]
    Http { email: String, status: StatusCode },
    #[error("http error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid directory response: {0}")]
    InvalidResponse(String),
}

/// The parts of an ERPNext `User` document the relay cares about.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DirectoryUser {
    #[serde(default, rename = "name")]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

impl DirectoryUser {
    /// Display name with surrounding whitespace removed, if any is set.
    pub fn display_name(&self) -> Option<&str> {
        self.full_name
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

pub trait DirectoryClient: Send + Sync {
    fn fetch_user(&self, email: &str) -> Result<DirectoryUser, DirectoryError>;

    /// Single-shot lookup; any failure is logged and reported as absence.
    fn resolve(&self, email: &str) -> Option<DirectoryUser> {
        match self.fetch_user(email) {
            Ok(user) => {
                info!("resolved directory user for {}", email);
                Some(user)
            }
            Err(err) => {
                warn!("could not fetch user details for {}: {}", email, err);
                None
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErpNextDirectoryConfig {
    pub api_base: String,
    pub api_key: String,
    pub api_secret: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ErpNextDirectory {
    config: ErpNextDirectoryConfig,
}

#[derive(Debug, Deserialize)]
struct ResourceResponse {
    data: Option<DirectoryUser>,
}

impl ErpNextDirectory {
    pub fn new(config: ErpNextDirectoryConfig) -> Self {
        Self { config }
    }

    fn user_url(&self, email: &str) -> String {
        format!(
            "{}/api/resource/User/{}",
            self.config.api_base.trim_end_matches('/'),
            urlencoding::encode(email)
        )
    }
}

impl DirectoryClient for ErpNextDirectory {
    fn fetch_user(&self, email: &str) -> Result<DirectoryUser, DirectoryError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.config.timeout)
            .build()?;
        let response = client
            .get(self.user_url(email))
            .header(
                "Authorization",
                format!("token {}:{}", self.config.api_key, self.config.api_secret),
            )
            .header("Accept", "application/json")
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Http {
                email: email.to_string(),
                status,
            });
        }

        let body: ResourceResponse = response
            .json()
            .map_err(|err| DirectoryError::InvalidResponse(err.to_string()))?;
        body.data
            .ok_or_else(|| DirectoryError::InvalidResponse("missing data".to_string()))
    }
}
