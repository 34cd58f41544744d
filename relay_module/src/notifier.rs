use std::sync::Arc;

use send_talk_module::TalkError;
use tracing::{error, info};

use crate::conversation::TalkApi;

#[derive(Debug, thiserror::Error)]
#[error("could not send message to room {handle}: {source}")]
pub struct NotifyError {
    pub handle: String,
    #[source]
    pub source: TalkError,
}

/// Posts an already-composed message into a Talk room. One attempt only.
pub struct Notifier {
    talk: Arc<dyn TalkApi>,
}

impl Notifier {
    pub fn new(talk: Arc<dyn TalkApi>) -> Self {
        Self { talk }
    }

    pub fn send(&self, handle: &str, message: &str) -> Result<(), NotifyError> {
        match self.talk.send_chat_message(handle, message) {
            Ok(()) => {
                info!("sent message to Talk room {}", handle);
                Ok(())
            }
            Err(source) => {
                error!("error sending message to Talk room {}: {}", handle, source);
                Err(NotifyError {
                    handle: handle.to_string(),
                    source,
                })
            }
        }
    }
}
