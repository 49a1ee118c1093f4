//! Object store collaborator: durable, publicly addressable asset storage.
//!
//! Stores never overwrite. Writing to an existing key fails with
//! [`StoreError::AlreadyExists`], which lets callers decide between reusing
//! the stored object and picking a fresh key.

pub mod error;
pub mod fs;
pub mod memory;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

pub use error::StoreError;
pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` under `key` and returns its durable URL.
    async fn put(&self, key: &str, bytes: &[u8], mime_type: &str) -> Result<String, StoreError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Removes `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// The durable URL an object at `key` is (or would be) served from.
    fn url_for(&self, key: &str) -> String;
}

/// Rejects keys that could escape the store root or produce odd URLs.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let invalid = |reason: &str| StoreError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if key.is_empty() {
        return Err(invalid("empty key"));
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err(invalid("keys must be relative and use '/' separators"));
    }
    if key.split('/').any(|seg| seg.is_empty() || seg.starts_with('.')) {
        return Err(invalid("empty or dot-prefixed path segment"));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.'))
    {
        return Err(invalid("unsupported character"));
    }
    Ok(())
}

/// Bounds one store call. An elapsed limit becomes [`StoreError::Timeout`];
/// the call's future is dropped.
pub async fn within<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(StoreError::Timeout(limit)))
}

pub(crate) fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key_accepts_storage_keys() {
        assert!(validate_key("books/abc-123/images/0001-cover.png").is_ok());
    }

    #[test]
    fn test_validate_key_rejects_traversal() {
        assert!(validate_key("books/../etc/passwd").is_err());
        assert!(validate_key("/abs/key").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("").is_err());
        assert!(validate_key("books/a b.png").is_err());
        assert!(validate_key("books/.hidden.png").is_err());
    }

    #[tokio::test]
    async fn test_within_maps_elapsed_call_to_timeout() {
        let limit = Duration::from_millis(10);
        let stalled = within(limit, std::future::pending::<Result<(), StoreError>>()).await;
        assert!(matches!(stalled, Err(StoreError::Timeout(d)) if d == limit));

        let quick = within(limit, async { Ok::<_, StoreError>(3) }).await;
        assert_eq!(quick.unwrap(), 3);
    }

    #[test]
    fn test_join_url_trims_trailing_slash() {
        assert_eq!(
            join_url("https://cdn.example.com/assets/", "books/x.png"),
            "https://cdn.example.com/assets/books/x.png"
        );
    }
}
