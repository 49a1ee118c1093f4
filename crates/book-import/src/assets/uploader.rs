//! Re-hosts extracted images in the object store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::AssetConfig;
use crate::document::ExtractedImage;
use crate::error::ErrorCode;
use crate::job::JobWarning;
use crate::retry::RetryPolicy;
use crate::sanitize;
use crate::store::{self, ObjectStore, StoreError};

/// How many `-N` suffixed keys are tried when a key holds different bytes.
const MAX_KEY_SUFFIX: u32 = 8;

/// Longest file-name component kept in a storage key.
const MAX_FILE_NAME_LEN: usize = 80;

/// Outcome of uploading one document's images.
#[derive(Debug, Default, Clone)]
pub struct AssetUploadReport {
    /// Original reference → durable URL, for every image that was stored.
    pub urls: HashMap<String, String>,
    /// Images that were dropped, one entry each.
    pub warnings: Vec<JobWarning>,
    /// Every key written for this book, for cleanup if the job fails later.
    pub stored_keys: Vec<String>,
}

/// The object store itself is unusable; the job cannot continue.
#[derive(Error, Debug)]
#[error("Asset upload aborted: {source}")]
pub struct AssetUploadError {
    #[source]
    pub source: StoreError,
    /// Keys written before the abort.
    pub stored_keys: Vec<String>,
}

/// Builds `books/{book_id}/images/{index:04}-{file_name}`.
///
/// The file name is the last path segment of the reference restricted to
/// key-safe characters, with an extension derived from the mime type when
/// the reference has none.
pub fn storage_key(book_id: &str, index: usize, image: &ExtractedImage) -> String {
    let last = image
        .original_reference
        .rsplit(['/', ':'])
        .next()
        .unwrap_or("");
    let mut name: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    name = name.trim_matches(|c| c == '.' || c == '-').to_string();
    if name.len() > MAX_FILE_NAME_LEN {
        name = name[name.len() - MAX_FILE_NAME_LEN..].to_string();
    }
    if name.is_empty() {
        name = "image".to_string();
    }
    if !name.contains('.') {
        if let Some(ext) = mime_guess::get_mime_extensions_str(&image.mime_type)
            .and_then(|exts| exts.first())
        {
            name = format!("{}.{}", name, ext);
        }
    }
    format!("books/{}/images/{:04}-{}", book_id, index, name)
}

struct StoredAsset {
    key: String,
    url: String,
}

pub struct AssetUploader {
    store: Arc<dyn ObjectStore>,
    config: AssetConfig,
    upload_timeout: Duration,
}

impl AssetUploader {
    pub fn new(store: Arc<dyn ObjectStore>, config: AssetConfig) -> Self {
        let upload_timeout = config.upload_timeout();
        Self {
            store,
            config,
            upload_timeout,
        }
    }

    /// Overrides the per-attempt upload timeout from the config.
    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.max_upload_attempts, self.config.backoff_base())
    }

    fn reject(&self, image: &ExtractedImage) -> Option<JobWarning> {
        let warning = |code: ErrorCode, message: String| JobWarning {
            code,
            reference: image.original_reference.clone(),
            message,
        };
        if !self.config.is_allowed(&image.mime_type) {
            return Some(warning(
                ErrorCode::UnsupportedMimeType,
                format!("Image type {} is not supported", image.mime_type),
            ));
        }
        if image.bytes.len() as u64 > self.config.max_image_bytes {
            return Some(warning(
                ErrorCode::AssetTooLarge,
                format!(
                    "Image is {} bytes, the limit is {} bytes",
                    image.bytes.len(),
                    self.config.max_image_bytes
                ),
            ));
        }
        None
    }

    /// Uploads `images` for `book_id`. Individual failures become warnings;
    /// only an unusable store aborts. `on_progress(done, total)` is called
    /// after each accepted image resolves.
    pub async fn upload(
        &self,
        images: &[ExtractedImage],
        book_id: &str,
        on_progress: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> Result<AssetUploadReport, AssetUploadError> {
        let mut ordered: Vec<&ExtractedImage> = images.iter().collect();
        ordered.sort_by(|a, b| a.original_reference.cmp(&b.original_reference));

        let mut report = AssetUploadReport::default();
        let mut accepted = Vec::new();
        for (index, image) in ordered.into_iter().enumerate() {
            match self.reject(image) {
                Some(warning) => {
                    debug!(code = %warning.code, "Image rejected before upload");
                    report.warnings.push(warning);
                }
                None => accepted.push((index + 1, image)),
            }
        }

        let total = accepted.len();
        let mut done = 0;
        let mut fatal: Option<StoreError> = None;

        let uploads: Vec<_> = accepted
            .into_iter()
            .map(|(index, image)| async move {
                let key = storage_key(book_id, index, image);
                (image, self.upload_one(key, image).await)
            })
            .collect();
        let mut outcomes = stream::iter(uploads)
        .buffer_unordered(self.config.upload_concurrency.max(1));

        while let Some((image, outcome)) = outcomes.next().await {
            done += 1;
            match outcome {
                Ok(stored) => {
                    report.stored_keys.push(stored.key);
                    report
                        .urls
                        .insert(image.original_reference.clone(), stored.url);
                }
                Err(e @ StoreError::Io { .. }) => {
                    warn!(error = %e, "Object store write failed");
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    warn!(
                        error = %sanitize::truncate_detail(&e.to_string()),
                        "Image upload failed, dropping image"
                    );
                    report.warnings.push(JobWarning {
                        code: ErrorCode::UploadFailed,
                        reference: image.original_reference.clone(),
                        message: "The image could not be uploaded".to_string(),
                    });
                }
            }
            on_progress(done, total);
        }

        match fatal {
            Some(source) => Err(AssetUploadError {
                source,
                stored_keys: report.stored_keys,
            }),
            None => Ok(report),
        }
    }

    async fn upload_one(&self, key: String, image: &ExtractedImage) -> Result<StoredAsset, StoreError> {
        let policy = self.retry_policy();

        for suffix in 0..=MAX_KEY_SUFFIX {
            let candidate = if suffix == 0 {
                key.clone()
            } else {
                format!("{}-{}", key, suffix)
            };
            let candidate_ref = candidate.as_str();

            let result = policy
                .run(
                    "upload image",
                    move || self.put_with_timeout(candidate_ref, image),
                    StoreError::is_transient,
                )
                .await;

            match result {
                Ok(url) => {
                    return Ok(StoredAsset {
                        key: candidate,
                        url,
                    })
                }
                Err(StoreError::AlreadyExists { .. }) => {
                    let existing =
                        store::within(self.upload_timeout, self.store.get(&candidate)).await?;
                    if existing == image.bytes {
                        debug!(key = %candidate, "Identical object already stored, reusing");
                        return Ok(StoredAsset {
                            url: self.store.url_for(&candidate),
                            key: candidate,
                        });
                    }
                    debug!(key = %candidate, "Key holds different bytes, trying next suffix");
                }
                Err(e) => return Err(e),
            }
        }

        Err(StoreError::AlreadyExists { key })
    }

    async fn put_with_timeout(&self, key: &str, image: &ExtractedImage) -> Result<String, StoreError> {
        let result = store::within(
            self.upload_timeout,
            self.store.put(key, &image.bytes, &image.mime_type),
        )
        .await;

        if matches!(result, Err(StoreError::Timeout(_))) {
            // A cancelled put can leave a partial object under the key; the
            // retry would then see a collision with bytes that never match.
            if let Err(e) = store::within(self.upload_timeout, self.store.delete(key)).await {
                warn!(error = %e, "Could not remove object left by a timed-out upload");
            }
        }
        result
    }
}
