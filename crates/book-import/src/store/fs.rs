use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{join_url, validate_key, ObjectStore, StoreError};

/// Staging area under the root. Its leading dot keeps it out of the key space.
const STAGING_DIR: &str = ".staging";

/// Object store backed by a local directory, served under a public base URL.
pub struct FsObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsObjectStore {
    pub fn new<P: AsRef<Path>>(root: P, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            public_base_url: public_base_url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn io_error(key: &str, source: std::io::Error) -> StoreError {
    StoreError::Io {
        key: key.to_string(),
        source,
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: &[u8], _mime_type: &str) -> Result<String, StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(key, e))?;
        }

        // Bytes land in a staging file first, so the key only ever names a
        // complete object even if this future is dropped mid-write.
        let staging_dir = self.root.join(STAGING_DIR);
        tokio::fs::create_dir_all(&staging_dir)
            .await
            .map_err(|e| io_error(key, e))?;
        let staging = staging_dir.join(uuid::Uuid::new_v4().to_string());

        let written = async {
            let mut file = tokio::fs::File::create(&staging).await?;
            file.write_all(bytes).await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(io_error(key, e));
        }

        // link(2) refuses an existing target: an object is never replaced.
        let linked = tokio::fs::hard_link(&staging, &path).await;
        let _ = tokio::fs::remove_file(&staging).await;
        match linked {
            Ok(()) => Ok(self.url_for(key)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists {
                    key: key.to_string(),
                })
            }
            Err(e) => Err(io_error(key, e)),
        }
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(io_error(key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, e)),
        }
    }

    fn url_for(&self, key: &str) -> String {
        join_url(&self.public_base_url, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path(), "https://cdn.example.com/a/");

        let url = store
            .put("books/b1/images/0000-cover.png", b"png", "image/png")
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example.com/a/books/b1/images/0000-cover.png");
        assert!(dir.path().join("books/b1/images/0000-cover.png").exists());

        let bytes = store.get("books/b1/images/0000-cover.png").await.unwrap();
        assert_eq!(bytes, b"png");

        store.delete("books/b1/images/0000-cover.png").await.unwrap();
        assert!(matches!(
            store.get("books/b1/images/0000-cover.png").await,
            Err(StoreError::NotFound { .. })
        ));
        // Second delete is a no-op.
        store.delete("books/b1/images/0000-cover.png").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path(), "https://cdn.example.com");

        store.put("k/one.png", b"first", "image/png").await.unwrap();
        let second = store.put("k/one.png", b"second", "image/png").await;

        assert!(matches!(second, Err(StoreError::AlreadyExists { .. })));
        assert_eq!(store.get("k/one.png").await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_put_leaves_no_staging_files() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path(), "https://cdn.example.com");

        store.put("k/one.png", b"first", "image/png").await.unwrap();
        let _ = store.put("k/one.png", b"second", "image/png").await;

        let staged = std::fs::read_dir(dir.path().join(STAGING_DIR))
            .unwrap()
            .count();
        assert_eq!(staged, 0);
        assert!(validate_key(".staging/x").is_err());
    }

    #[tokio::test]
    async fn test_put_rejects_escaping_key() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path(), "https://cdn.example.com");

        let result = store.put("../outside.png", b"x", "image/png").await;
        assert!(matches!(result, Err(StoreError::InvalidKey { .. })));
    }
}
