use relay_module::service::{run_server, RelayConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = RelayConfig::from_env()?;
    info!(
        "relay configured erpnext={} nextcloud={} db={}",
        config.erpnext_api_url,
        config.nextcloud_api_url,
        config.db_path.display()
    );

    run_server(config, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await
}
