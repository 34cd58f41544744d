//! End-to-end handling of one ERPNext assignment webhook.

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::conversation::ConversationManager;
use crate::directory::DirectoryClient;
use crate::message::{compose_assignment_message, document_url};
use crate::notifier::Notifier;
use crate::store::RelayStore;
use crate::webhook::{fingerprint, parse_payload, AssignmentEvent};

pub const MISSING_RECIPIENT: &str = "Missing 'allocated_to' in webhook payload";

/// Terminal state of a webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Success,
    AlreadyProcessed,
    BadRequest(String),
    UpstreamError(String),
    StorageError(String),
}

impl WebhookOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            WebhookOutcome::Success | WebhookOutcome::AlreadyProcessed => StatusCode::OK,
            WebhookOutcome::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebhookOutcome::UpstreamError(_) | WebhookOutcome::StorageError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn body(&self) -> Value {
        match self {
            WebhookOutcome::Success => json!({"message": "Notification sent to Nextcloud Talk"}),
            WebhookOutcome::AlreadyProcessed => json!({"message": "Webhook already processed"}),
            WebhookOutcome::BadRequest(reason) | WebhookOutcome::UpstreamError(reason) => {
                json!({"error": reason})
            }
            // Storage details stay in the logs.
            WebhookOutcome::StorageError(_) => json!({"error": "Internal storage error"}),
        }
    }
}

pub struct WebhookPipeline {
    store: Arc<RelayStore>,
    directory: Arc<dyn DirectoryClient>,
    conversations: ConversationManager,
    notifier: Notifier,
    erp_base_url: String,
}

impl WebhookPipeline {
    pub fn new(
        store: Arc<RelayStore>,
        directory: Arc<dyn DirectoryClient>,
        conversations: ConversationManager,
        notifier: Notifier,
        erp_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            directory,
            conversations,
            notifier,
            erp_base_url: erp_base_url.into(),
        }
    }

    /// Process one delivery. Blocks on every outbound call, so callers on an
    /// async runtime must run this on a blocking thread.
    pub fn handle(&self, content_type: Option<&str>, body: &[u8]) -> WebhookOutcome {
        let payload = match parse_payload(content_type, body) {
            Ok(payload) => payload,
            Err(err) => {
                info!("rejecting webhook: {}", err);
                return WebhookOutcome::BadRequest(err.to_string());
            }
        };

        let key = fingerprint(&payload);
        match self.store.is_duplicate(&key) {
            Ok(true) => {
                info!("webhook already processed; ignoring");
                return WebhookOutcome::AlreadyProcessed;
            }
            Ok(false) => {}
            Err(err) => {
                error!("dedup lookup failed: {}", err);
                return WebhookOutcome::StorageError(err.to_string());
            }
        }
        // Marked before any side effect: a failure further down loses this
        // notification instead of repeating it on redelivery.
        match self.store.mark_processed(&key) {
            Ok(true) => {}
            Ok(false) => {
                info!("webhook processed concurrently; ignoring");
                return WebhookOutcome::AlreadyProcessed;
            }
            Err(err) => {
                error!("failed to mark webhook processed: {}", err);
                return WebhookOutcome::StorageError(err.to_string());
            }
        }

        let event = AssignmentEvent::from_payload(&payload);
        let Some(email) = event.recipient_email.as_deref() else {
            warn!("webhook payload missing 'allocated_to'");
            return WebhookOutcome::BadRequest(MISSING_RECIPIENT.to_string());
        };

        let Some(user) = self.directory.resolve(email) else {
            return WebhookOutcome::UpstreamError(format!(
                "Could not fetch user details for {}",
                email
            ));
        };
        let Some(display_name) = user.display_name() else {
            error!("could not retrieve full name for {}", email);
            return WebhookOutcome::UpstreamError("Could not retrieve full name".to_string());
        };

        let url = document_url(
            &self.erp_base_url,
            event.reference_type.as_deref().unwrap_or_default(),
            event.reference_name.as_deref().unwrap_or_default(),
        );
        let message = compose_assignment_message(display_name, &event, &url);

        let handle = match self.conversations.get_or_create_conversation(display_name) {
            Ok(handle) => handle,
            Err(err) => {
                error!("could not create or find Talk conversation: {}", err);
                return WebhookOutcome::UpstreamError(
                    "Could not create or find Talk conversation".to_string(),
                );
            }
        };

        if self.notifier.send(&handle, &message).is_err() {
            return WebhookOutcome::UpstreamError(
                "Could not send message to Nextcloud Talk".to_string(),
            );
        }

        info!("assignment notification delivered for {}", email);
        WebhookOutcome::Success
    }
}
