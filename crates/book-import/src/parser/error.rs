use thiserror::Error;

use crate::error::ErrorCode;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Malformed EPUB container: {0}")]
    MalformedContainer(String),

    #[error("Unparsable Word document: {0}")]
    UnparsableDocument(String),

    #[error("Access token rejected by the document service: {0}")]
    AuthRequired(String),

    #[error("Document unavailable: {0}")]
    DocumentUnavailable(String),

    #[error("Document service error: {0}")]
    ExternalService(String),

    #[error("Unsupported import source: {0}")]
    UnsupportedSource(String),

    #[error("Parser task failed: {0}")]
    Internal(String),
}

impl ParseError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ParseError::MalformedContainer(_) => ErrorCode::MalformedContainer,
            ParseError::UnparsableDocument(_) => ErrorCode::UnparsableDocument,
            ParseError::AuthRequired(_) => ErrorCode::AuthRequired,
            ParseError::DocumentUnavailable(_) => ErrorCode::DocumentUnavailable,
            ParseError::ExternalService(_) => ErrorCode::ExternalService,
            ParseError::UnsupportedSource(_) => ErrorCode::UnsupportedFormat,
            ParseError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Message suitable for showing to the author who submitted the import.
    pub fn user_message(&self) -> String {
        match self {
            ParseError::MalformedContainer(_) => {
                "The EPUB file is damaged or incomplete. Please re-export it and upload again."
                    .to_string()
            }
            ParseError::UnparsableDocument(_) => {
                "The Word document could not be read. Please save it as .docx and try again."
                    .to_string()
            }
            ParseError::AuthRequired(_) => {
                "Your Google account access has expired. Please reconnect and try again."
                    .to_string()
            }
            ParseError::DocumentUnavailable(_) => {
                "The Google document could not be found or you do not have permission to read it."
                    .to_string()
            }
            ParseError::ExternalService(_) => {
                "Google Docs did not respond. Please try again in a few minutes.".to_string()
            }
            ParseError::UnsupportedSource(_) => {
                "This kind of file cannot be imported.".to_string()
            }
            ParseError::Internal(_) => {
                "Something went wrong while reading your document. Please try again.".to_string()
            }
        }
    }
}
