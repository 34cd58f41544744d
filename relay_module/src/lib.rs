//! Relays ERPNext ToDo assignment webhooks into Nextcloud Talk one-to-one
//! conversations.

pub mod conversation;
pub mod directory;
pub mod message;
pub mod notifier;
pub mod pipeline;
pub mod retry;
pub mod service;
pub mod store;
pub mod webhook;

pub use pipeline::{WebhookOutcome, WebhookPipeline};
pub use service::{run_server, RelayConfig};
