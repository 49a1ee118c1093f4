use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object '{key}' already exists")]
    AlreadyExists { key: String },

    #[error("Object '{key}' not found")]
    NotFound { key: String },

    #[error("Invalid object key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("I/O error for object '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Object store unavailable: {0}")]
    Unavailable(String),

    #[error("Object store call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) | StoreError::Timeout(_) => true,
            StoreError::Io { source, .. } => !matches!(
                source.kind(),
                std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::InvalidInput
            ),
            StoreError::AlreadyExists { .. }
            | StoreError::NotFound { .. }
            | StoreError::InvalidKey { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(StoreError::Timeout(std::time::Duration::from_secs(1)).is_transient());
        assert!(!StoreError::AlreadyExists { key: "k".into() }.is_transient());
        assert!(!StoreError::Io {
            key: "k".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        }
        .is_transient());
        assert!(StoreError::Io {
            key: "k".into(),
            source: std::io::Error::from(std::io::ErrorKind::Interrupted),
        }
        .is_transient());
    }
}
