//! Blocking client for the Nextcloud Talk (spreed) OCS API.
//!
//! Only the two calls the relay needs are covered:
//! - creating (or reopening) a one-to-one conversation
//! - posting a chat message into a conversation
//!
//! Retries are the caller's concern; this crate maps HTTP outcomes onto
//! `TalkError` so the caller can tell a rate limit apart from a hard failure.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Conversation type for a one-to-one chat.
pub const ROOM_TYPE_ONE_TO_ONE: u8 = 1;

const ROOM_PATH: &str = "ocs/v2.php/apps/spreed/api/v4/room";
const CHAT_PATH: &str = "ocs/v2.php/apps/spreed/api/v1/chat";

#[derive(Debug, thiserror::Error)]
pub enum TalkError {
    #[error("rate limited by Nextcloud Talk")]
    RateLimited,
    #[error("Nextcloud Talk returned {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("http error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed Nextcloud Talk response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone)]
pub struct TalkClientConfig {
    pub api_base: String,
    pub username: String,
    pub app_password: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TalkClient {
    config: TalkClientConfig,
}

/// Request body for the room endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CreateRoomRequest<'a> {
    #[serde(rename = "roomType")]
    pub room_type: u8,
    pub invite: &'a str,
}

/// Request body for the chat endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest<'a> {
    pub message: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcsEnvelope<T> {
    pub ocs: OcsBody<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct OcsBody<T> {
    #[serde(default)]
    pub data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomData {
    #[serde(default)]
    pub token: Option<String>,
}

impl TalkClient {
    pub fn new(config: TalkClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TalkClientConfig {
        &self.config
    }

    /// Create a direct conversation with `invite` and return its token.
    ///
    /// Talk hands back the existing room when a one-to-one conversation with
    /// the same participant is already open.
    pub fn create_direct_room(&self, invite: &str) -> Result<String, TalkError> {
        let url = format!("{}?format=json", self.endpoint(ROOM_PATH));
        let request = CreateRoomRequest {
            room_type: ROOM_TYPE_ONE_TO_ONE,
            invite,
        };
        let response = self.post(&url)?.json(&request).send()?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TalkError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(TalkError::Http { status, body });
        }

        let body = response.text()?;
        let envelope: OcsEnvelope<RoomData> = serde_json::from_str(&body)
            .map_err(|err| TalkError::MalformedResponse(format!("{}: {}", err, body)))?;
        envelope
            .ocs
            .data
            .and_then(|room| room.token)
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| TalkError::MalformedResponse(format!("room token missing: {}", body)))
    }

    /// Post `message` into the conversation identified by `token`.
    pub fn send_chat_message(&self, token: &str, message: &str) -> Result<(), TalkError> {
        let url = format!(
            "{}/{}?format=json",
            self.endpoint(CHAT_PATH),
            urlencoding::encode(token)
        );
        let response = self
            .post(&url)?
            .json(&SendMessageRequest { message })
            .send()?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TalkError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(TalkError::Http { status, body });
        }
        Ok(())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    fn post(&self, url: &str) -> Result<RequestBuilder, TalkError> {
        let client = Client::builder().timeout(self.config.timeout).build()?;
        Ok(client
            .post(url)
            .basic_auth(&self.config.username, Some(&self.config.app_password))
            .header("OCS-APIRequest", "true")
            .header("Accept", "application/json"))
    }
}
