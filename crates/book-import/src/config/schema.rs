use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    pub version: String,
    /// SQLite file holding jobs and books. Defaults to the per-user data dir.
    #[serde(default)]
    pub database_path: Option<String>,
    /// How long a write waits on a locked database before failing as busy.
    #[serde(default = "default_database_busy_timeout_ms")]
    pub database_busy_timeout_ms: u64,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Attempts for datastore/object-store calls before a job is failed.
    #[serde(default = "default_infra_retry_attempts")]
    pub infra_retry_attempts: u32,
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub assets: AssetConfig,
    #[serde(default)]
    pub google_docs: GoogleDocsConfig,
}

fn default_database_busy_timeout_ms() -> u64 {
    2000
}

fn default_max_concurrent_jobs() -> usize {
    num_cpus::get()
}

fn default_infra_retry_attempts() -> u32 {
    3
}

impl ImportConfig {
    /// Resolved database location, falling back to `~/.book-import/data`.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| {
                dirs::home_dir()
                    .map(|home| home.join(".book-import").join("data").join("book-import.db"))
            })
    }

    pub fn database_busy_timeout(&self) -> Duration {
        Duration::from_millis(self.database_busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub root: String,
    pub public_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,
    #[serde(default = "default_max_upload_attempts")]
    pub max_upload_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
}

fn default_max_image_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_allowed_mime_types() -> Vec<String> {
    [
        "image/png",
        "image/jpeg",
        "image/gif",
        "image/webp",
        "image/svg+xml",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_upload_concurrency() -> usize {
    4
}

fn default_max_upload_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_upload_timeout_secs() -> u64 {
    30
}

impl AssetConfig {
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn is_allowed(&self, mime_type: &str) -> bool {
        self.allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(mime_type))
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: default_max_image_bytes(),
            allowed_mime_types: default_allowed_mime_types(),
            upload_concurrency: default_upload_concurrency(),
            max_upload_attempts: default_max_upload_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            upload_timeout_secs: default_upload_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleDocsConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_api_base_url() -> String {
    "https://docs.googleapis.com".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl GoogleDocsConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for GoogleDocsConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}
