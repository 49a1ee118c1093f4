use std::time::Duration;

use crate::config::{AssetConfig, ImportConfig};
use crate::retry::RetryPolicy;

/// First backoff step for datastore and object-store retries.
const INFRA_BACKOFF_BASE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub assets: AssetConfig,
    pub infra_retry: RetryPolicy,
    /// Limit on each object-store call (put, get and delete alike).
    pub store_timeout: Duration,
}

impl PipelineConfig {
    pub fn from_config(config: &ImportConfig) -> Self {
        Self {
            assets: config.assets.clone(),
            infra_retry: RetryPolicy::new(config.infra_retry_attempts, INFRA_BACKOFF_BASE),
            store_timeout: config.assets.upload_timeout(),
        }
    }
}
