//! Application state for the API server

use crate::config::Config;
use crate::content::{ContentStore, FileTokenVerifier};
use crate::delivery::DeliveryPipeline;
use crate::error::Result;
use crate::export::DatasetRows;
use crate::gateway::GatewayClient;
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request (cheap Arc clones).
#[derive(Clone)]
pub struct AppState {
    /// Staging, transform and serving of files
    pub pipeline: Arc<DeliveryPipeline>,

    /// Resolves download tokens
    pub tokens: Arc<dyn FileTokenVerifier>,

    /// Dataset rows for exports
    pub dataset: Arc<dyn DatasetRows>,

    /// Configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire the gateway client and delivery pipeline from configuration
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the gateway is configured with an
    /// invalid base URL.
    pub fn new(
        config: Config,
        store: Arc<dyn ContentStore>,
        tokens: Arc<dyn FileTokenVerifier>,
        dataset: Arc<dyn DatasetRows>,
    ) -> Result<Self> {
        let gateway = Arc::new(GatewayClient::from_config(&config.gateway)?);
        Ok(Self::with_gateway(config, gateway, store, tokens, dataset))
    }

    /// Like [`AppState::new`] with a prebuilt gateway client
    pub fn with_gateway(
        config: Config,
        gateway: Arc<GatewayClient>,
        store: Arc<dyn ContentStore>,
        tokens: Arc<dyn FileTokenVerifier>,
        dataset: Arc<dyn DatasetRows>,
    ) -> Self {
        let pipeline = Arc::new(DeliveryPipeline::new(&config, gateway, store));
        Self {
            pipeline,
            tokens,
            dataset,
            config: Arc::new(config),
        }
    }
}
