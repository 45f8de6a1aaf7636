pub mod batches;
pub mod chat_completions;
pub mod completions;
pub mod embeddings;
pub mod files;
pub mod fine_tuning;
pub mod health;
pub mod images;

use crate::config::Config;
use crate::credentials::CredentialProvider;
use std::sync::Arc;
use std::time::Duration;

/// Application state shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub http_client: reqwest::Client,
    pub credentials: Arc<CredentialProvider>,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        let http_client = reqwest::Client::new();
        let credentials = Arc::new(CredentialProvider::new(http_client.clone()));
        Self {
            config,
            http_client,
            credentials,
        }
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.config.upstream.timeout_seconds)
    }
}
