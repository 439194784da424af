use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::config::{Config, ServiceConfig};
use crate::drain::{CounterStore, MemoryCounterStore, RedisCounterStore};
use crate::oauth::client::AggregatorClient;
use crate::pipes::PipeClient;
use crate::session::SessionStore;
use crate::sync_key::SyncKeyCodec;

/// Shared, immutable-after-startup handles passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub aggregator: AggregatorClient,
    pub pipes: PipeClient,
    pub sessions: SessionStore,
    pub sync_keys: SyncKeyCodec,
    pub counters: Arc<dyn CounterStore>,
    pub services: Arc<Vec<ServiceConfig>>,
    pub delegated_service: String,
    /// Fixed public origin; derived per request when `None`.
    pub public_url: Option<String>,
}

impl AppState {
    /// Wire up clients and stores from a validated config.
    pub async fn from_config(cfg: &Config) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.server.upstream_timeout_secs))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;

        let counters: Arc<dyn CounterStore> = if cfg.store.url.is_empty() {
            tracing::warn!("store.url not set; drain counts are kept in memory only");
            Arc::new(MemoryCounterStore::new())
        } else {
            let store = RedisCounterStore::connect(&cfg.store.url)
                .await
                .map_err(|e| format!("Failed to connect to counter store: {e}"))?;
            Arc::new(store)
        };

        let session_secret = if cfg.server.session_secret.is_empty() {
            tracing::warn!("server.session_secret not set; sessions will not survive a restart");
            rand::random::<[u8; 32]>().to_vec()
        } else {
            cfg.server.session_secret.as_bytes().to_vec()
        };
        let sessions = SessionStore::new(&session_secret)
            .map_err(|e| format!("Invalid session secret: {e}"))?;

        let sync_secret = STANDARD
            .decode(&cfg.server.sync_secret)
            .map_err(|e| format!("server.sync_secret is not valid base64: {e}"))?;

        Ok(Self {
            aggregator: AggregatorClient::new(
                http.clone(),
                &cfg.aggregator.api_base_url,
                &cfg.aggregator.client_id,
                &cfg.aggregator.client_secret,
            ),
            pipes: PipeClient::new(
                http,
                &cfg.pipes.api_base_url,
                &cfg.pipes.app_key,
                &cfg.pipes.app_secret,
            ),
            sessions,
            sync_keys: SyncKeyCodec::new(&sync_secret),
            counters,
            services: Arc::new(cfg.services.clone()),
            delegated_service: cfg.aggregator.delegated_service.clone(),
            public_url: (!cfg.server.public_url.is_empty())
                .then(|| cfg.server.public_url.trim_end_matches('/').to_string()),
        })
    }
}
