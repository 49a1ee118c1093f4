use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, machine-readable failure and warning codes recorded on import jobs.
///
/// The string forms are part of the job record and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    MalformedContainer,
    UnparsableDocument,
    DocumentUnavailable,
    AuthRequired,
    ExternalService,
    UnsupportedFormat,
    StorageUnavailable,
    DatastoreUnavailable,
    Internal,
    AssetTooLarge,
    UnsupportedMimeType,
    UploadFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MalformedContainer => "MalformedContainer",
            ErrorCode::UnparsableDocument => "UnparsableDocument",
            ErrorCode::DocumentUnavailable => "DocumentUnavailable",
            ErrorCode::AuthRequired => "AuthRequired",
            ErrorCode::ExternalService => "ExternalService",
            ErrorCode::UnsupportedFormat => "UnsupportedFormat",
            ErrorCode::StorageUnavailable => "StorageUnavailable",
            ErrorCode::DatastoreUnavailable => "DatastoreUnavailable",
            ErrorCode::Internal => "Internal",
            ErrorCode::AssetTooLarge => "AssetTooLarge",
            ErrorCode::UnsupportedMimeType => "UnsupportedMimeType",
            ErrorCode::UploadFailed => "UploadFailed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let code = match s {
            "MalformedContainer" => ErrorCode::MalformedContainer,
            "UnparsableDocument" => ErrorCode::UnparsableDocument,
            "DocumentUnavailable" => ErrorCode::DocumentUnavailable,
            "AuthRequired" => ErrorCode::AuthRequired,
            "ExternalService" => ErrorCode::ExternalService,
            "UnsupportedFormat" => ErrorCode::UnsupportedFormat,
            "StorageUnavailable" => ErrorCode::StorageUnavailable,
            "DatastoreUnavailable" => ErrorCode::DatastoreUnavailable,
            "Internal" => ErrorCode::Internal,
            "AssetTooLarge" => ErrorCode::AssetTooLarge,
            "UnsupportedMimeType" => ErrorCode::UnsupportedMimeType,
            "UploadFailed" => ErrorCode::UploadFailed,
            other => return Err(format!("unknown error code '{}'", other)),
        };
        Ok(code)
    }
}

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Object store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Parser setup failed: {0}")]
    Parser(#[from] crate::parser::ParseError),

    #[error("Invalid import request: {0}")]
    InvalidRequest(String),

    #[error("Failed to read manuscript '{path}': {source}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Import job '{0}' not found")]
    JobNotFound(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

pub type Result<T> = std::result::Result<T, ImportError>;
