use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use send_talk_module::{TalkClient, TalkClientConfig};
use tokio::task;
use tracing::info;

use crate::conversation::ConversationManager;
use crate::directory::{ErpNextDirectory, ErpNextDirectoryConfig};
use crate::notifier::Notifier;
use crate::pipeline::WebhookPipeline;
use crate::store::{RelayStore, StoreError};

use super::config::RelayConfig;
use super::handlers::{health, ingest_webhook};
use super::state::AppState;
use super::BoxError;

/// Wire the production collaborators for `config`. Opens (and migrates) the
/// SQLite database, so run it off the async runtime.
pub fn build_pipeline(config: &RelayConfig) -> Result<WebhookPipeline, StoreError> {
    let store = Arc::new(RelayStore::new(&config.db_path)?);
    let directory = Arc::new(ErpNextDirectory::new(ErpNextDirectoryConfig {
        api_base: config.erpnext_api_url.clone(),
        api_key: config.erpnext_api_key.clone(),
        api_secret: config.erpnext_api_secret.clone(),
        timeout: config.http_timeout,
    }));
    let talk = Arc::new(TalkClient::new(TalkClientConfig {
        api_base: config.nextcloud_api_url.clone(),
        username: config.nextcloud_username.clone(),
        app_password: config.nextcloud_app_password.clone(),
        timeout: config.http_timeout,
    }));
    let conversations = ConversationManager::new(store.clone(), talk.clone(), config.talk_retry);
    let notifier = Notifier::new(talk);

    Ok(WebhookPipeline::new(
        store,
        directory,
        conversations,
        notifier,
        config.erpnext_api_url.clone(),
    ))
}

pub fn build_router(pipeline: Arc<WebhookPipeline>, max_body_bytes: usize) -> Router {
    let state = AppState { pipeline };
    Router::new()
        .route("/health", get(health))
        .route("/webhook", post(ingest_webhook))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
}

pub async fn run_server(
    config: RelayConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let config = Arc::new(config);
    let pipeline = {
        let config = config.clone();
        task::spawn_blocking(move || build_pipeline(&config))
            .await
            .map_err(|err| -> BoxError { err.into() })??
    };
    info!("relay store ready at {}", config.db_path.display());

    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    info!("ERPNext Talk relay listening on {}", addr);

    let app = build_router(Arc::new(pipeline), config.max_body_bytes);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("ERPNext Talk relay stopped");
    Ok(())
}
