mod config;
mod handlers;
mod server;
mod state;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::{
    load_config_file, ConfigError, RelayConfig, RelayConfigFile, RetrySection, ServerSection,
    DEFAULT_DB_PATH, DEFAULT_HTTP_TIMEOUT, DEFAULT_MAX_BODY_BYTES, DEFAULT_PORT,
};
pub use server::{build_pipeline, build_router, run_server};
