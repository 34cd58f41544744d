//! Recipient -> Talk conversation resolution with a local cache in front.

use std::sync::Arc;

use send_talk_module::{TalkClient, TalkError};
use tracing::{error, info, warn};

use crate::retry::{RetryDecision, RetryError, RetryPolicy, Sleeper, ThreadSleeper};
use crate::store::{RelayStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("conversation creation for {recipient} still rate limited after {attempts} attempts")]
    RetriesExhausted { recipient: String, attempts: u32 },
    #[error("could not create conversation with {recipient}: {source}")]
    Creation {
        recipient: String,
        #[source]
        source: TalkError,
    },
    #[error("conversation response for {recipient} had no room token")]
    MalformedResponse { recipient: String },
    #[error("conversation cache lookup failed: {0}")]
    Cache(#[from] StoreError),
}

/// Local, non-authoritative recipient -> room token mapping.
pub trait ConversationCache: Send + Sync {
    fn cached_handle(&self, recipient_key: &str) -> Result<Option<String>, StoreError>;
    fn store_handle(&self, recipient_key: &str, handle: &str) -> Result<(), StoreError>;
}

impl ConversationCache for RelayStore {
    fn cached_handle(&self, recipient_key: &str) -> Result<Option<String>, StoreError> {
        self.conversation_handle(recipient_key)
    }

    fn store_handle(&self, recipient_key: &str, handle: &str) -> Result<(), StoreError> {
        self.put_conversation_handle(recipient_key, handle)
    }
}

/// Outbound calls made against the messaging system.
pub trait TalkApi: Send + Sync {
    fn create_direct_room(&self, invite: &str) -> Result<String, TalkError>;
    fn send_chat_message(&self, token: &str, message: &str) -> Result<(), TalkError>;
}

impl TalkApi for TalkClient {
    fn create_direct_room(&self, invite: &str) -> Result<String, TalkError> {
        TalkClient::create_direct_room(self, invite)
    }

    fn send_chat_message(&self, token: &str, message: &str) -> Result<(), TalkError> {
        TalkClient::send_chat_message(self, token, message)
    }
}

/// Collapse whitespace runs so "Alice  Smith " and "Alice Smith" share a key.
pub fn normalize_recipient_key(display_name: &str) -> String {
    display_name.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct ConversationManager {
    cache: Arc<dyn ConversationCache>,
    talk: Arc<dyn TalkApi>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl ConversationManager {
    pub fn new(
        cache: Arc<dyn ConversationCache>,
        talk: Arc<dyn TalkApi>,
        policy: RetryPolicy,
    ) -> Self {
        Self::with_sleeper(cache, talk, policy, Arc::new(ThreadSleeper))
    }

    pub fn with_sleeper(
        cache: Arc<dyn ConversationCache>,
        talk: Arc<dyn TalkApi>,
        policy: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            cache,
            talk,
            policy,
            sleeper,
        }
    }

    /// Return the room token for `display_name`, creating the conversation on
    /// a cache miss.
    ///
    /// Two concurrent misses for the same recipient may both create a room;
    /// Talk returns the same one-to-one room and the later cache write wins.
    pub fn get_or_create_conversation(
        &self,
        display_name: &str,
    ) -> Result<String, ConversationError> {
        let recipient_key = normalize_recipient_key(display_name);

        if let Some(handle) = self.cache.cached_handle(&recipient_key)? {
            info!("found cached room token for {}", recipient_key);
            return Ok(handle);
        }

        info!("creating Talk conversation with {}", recipient_key);
        let created = self
            .policy
            .run(self.sleeper.as_ref(), |_| {
                match self.talk.create_direct_room(&recipient_key) {
                    Ok(token) => RetryDecision::Done(token),
                    Err(TalkError::RateLimited) => RetryDecision::Retry(TalkError::RateLimited),
                    Err(err) => RetryDecision::Fail(err),
                }
            });

        let handle = match created {
            Ok(handle) => handle,
            Err(RetryError::Exhausted { attempts, .. }) => {
                error!(
                    "max retries reached creating Talk conversation with {}",
                    recipient_key
                );
                return Err(ConversationError::RetriesExhausted {
                    recipient: recipient_key,
                    attempts,
                });
            }
            Err(RetryError::Failed(TalkError::MalformedResponse(body))) => {
                error!(
                    "Talk conversation response for {} had no token: {}",
                    recipient_key, body
                );
                return Err(ConversationError::MalformedResponse {
                    recipient: recipient_key,
                });
            }
            Err(RetryError::Failed(source)) => {
                error!(
                    "error creating Talk conversation with {}: {}",
                    recipient_key, source
                );
                return Err(ConversationError::Creation {
                    recipient: recipient_key,
                    source,
                });
            }
        };

        if let Err(err) = self.cache.store_handle(&recipient_key, &handle) {
            warn!("failed to cache room token for {}: {}", recipient_key, err);
        }
        info!("created Talk conversation with {}", recipient_key);
        Ok(handle)
    }
}
