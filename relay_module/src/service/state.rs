use std::sync::Arc;

use crate::pipeline::WebhookPipeline;

#[derive(Clone)]
pub(super) struct AppState {
    pub(super) pipeline: Arc<WebhookPipeline>,
}
