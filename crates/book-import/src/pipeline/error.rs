use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::ErrorCode;
use crate::parser::ParseError;
use crate::store::StoreError;

/// A fatal pipeline failure. Per-image problems are warnings, not errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Parsing failed: {0}")]
    Parse(#[from] ParseError),

    #[error("Object store failed: {0}")]
    Storage(#[from] StoreError),

    #[error("Datastore failed: {0}")]
    Datastore(#[from] DatabaseError),

    #[error("Internal pipeline error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::Parse(e) => e.code(),
            PipelineError::Storage(_) => ErrorCode::StorageUnavailable,
            PipelineError::Datastore(_) => ErrorCode::DatastoreUnavailable,
            PipelineError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// The sentence stored as the job's `error_message`.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Parse(e) => e.user_message(),
            PipelineError::Storage(_) => {
                "Image storage is unavailable right now. Please try again later.".to_string()
            }
            PipelineError::Datastore(_) => {
                "Your book could not be saved right now. Please try again later.".to_string()
            }
            PipelineError::Internal(_) => {
                "Something went wrong while importing your document. Please try again."
                    .to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_follow_cause() {
        let parse = PipelineError::from(ParseError::MalformedContainer("x".into()));
        assert_eq!(parse.code(), ErrorCode::MalformedContainer);

        let store = PipelineError::from(StoreError::Unavailable("down".into()));
        assert_eq!(store.code(), ErrorCode::StorageUnavailable);

        let db = PipelineError::from(DatabaseError::LockPoisoned);
        assert_eq!(db.code(), ErrorCode::DatastoreUnavailable);
    }

    #[test]
    fn test_user_message_is_not_the_code() {
        let err = PipelineError::from(ParseError::AuthRequired("401".into()));
        assert_eq!(err.code(), ErrorCode::AuthRequired);
        assert_ne!(err.user_message(), err.code().as_str());
        assert!(!err.user_message().contains("401"));
    }
}
