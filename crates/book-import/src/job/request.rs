use std::fmt;
use std::path::Path;

use secrecy::SecretString;

use crate::error::ImportError;
use crate::job::ImportType;
use crate::parser::ParserInput;
use crate::sanitize;

/// Where the manuscript comes from.
pub enum ImportSource {
    /// An uploaded EPUB or Word file.
    File {
        import_type: ImportType,
        filename: String,
        bytes: Vec<u8>,
    },
    /// A Google document read with the author's delegated access token.
    GoogleDoc {
        document_handle: String,
        access_token: SecretString,
    },
}

impl fmt::Debug for ImportSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportSource::File {
                import_type,
                filename,
                bytes,
            } => f
                .debug_struct("File")
                .field("import_type", import_type)
                .field("filename", filename)
                .field("len", &bytes.len())
                .finish(),
            ImportSource::GoogleDoc {
                document_handle, ..
            } => f
                .debug_struct("GoogleDoc")
                .field("document", &sanitize::redact_handle(document_handle))
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug)]
pub struct ImportRequest {
    pub author_id: String,
    pub source: ImportSource,
}

impl ImportRequest {
    pub fn file(
        author_id: impl Into<String>,
        import_type: ImportType,
        filename: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            author_id: author_id.into(),
            source: ImportSource::File {
                import_type,
                filename: filename.into(),
                bytes,
            },
        }
    }

    /// Reads a manuscript from disk. The recorded filename is the last path
    /// component.
    pub fn from_path(
        author_id: impl Into<String>,
        import_type: ImportType,
        path: &Path,
    ) -> Result<Self, ImportError> {
        let bytes = std::fs::read(path).map_err(|source| ImportError::ReadSource {
            path: path.to_path_buf(),
            source,
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::file(author_id, import_type, filename, bytes))
    }

    pub fn google_doc(
        author_id: impl Into<String>,
        document_handle: impl Into<String>,
        access_token: SecretString,
    ) -> Self {
        Self {
            author_id: author_id.into(),
            source: ImportSource::GoogleDoc {
                document_handle: document_handle.into(),
                access_token,
            },
        }
    }

    pub fn import_type(&self) -> ImportType {
        match &self.source {
            ImportSource::File { import_type, .. } => *import_type,
            ImportSource::GoogleDoc { .. } => ImportType::GoogleDoc,
        }
    }

    /// Name recorded on the job. Remote handles are redacted.
    pub fn source_name(&self) -> String {
        match &self.source {
            ImportSource::File { filename, .. } => {
                sanitize::redact_path(std::path::Path::new(filename))
            }
            ImportSource::GoogleDoc {
                document_handle, ..
            } => sanitize::redact_handle(document_handle),
        }
    }

    /// Checks the request shape before a job is created.
    pub fn validate(&self) -> Result<(), String> {
        if self.author_id.trim().is_empty() {
            return Err("author_id must not be empty".to_string());
        }
        match &self.source {
            ImportSource::File { import_type, .. } if *import_type == ImportType::GoogleDoc => {
                Err("google_doc imports take a document reference, not a file".to_string())
            }
            ImportSource::File { filename, .. } if filename.trim().is_empty() => {
                Err("filename must not be empty".to_string())
            }
            ImportSource::GoogleDoc {
                document_handle, ..
            } if document_handle.trim().is_empty() => {
                Err("document reference must not be empty".to_string())
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn into_parser_input(self) -> ParserInput {
        match self.source {
            ImportSource::File {
                filename, bytes, ..
            } => ParserInput::File { filename, bytes },
            ImportSource::GoogleDoc {
                document_handle,
                access_token,
            } => ParserInput::Remote {
                document_handle,
                access_token,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_bad_requests() {
        let ok = ImportRequest::file("a1", ImportType::Epub, "x.epub", vec![1]);
        assert!(ok.validate().is_ok());

        assert!(ImportRequest::file(" ", ImportType::Epub, "x.epub", vec![1])
            .validate()
            .is_err());
        assert!(ImportRequest::file("a1", ImportType::GoogleDoc, "x", vec![1])
            .validate()
            .is_err());
        assert!(
            ImportRequest::google_doc("a1", "", SecretString::from("t".to_string()))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_source_name_is_redacted() {
        let req = ImportRequest::file("a1", ImportType::Word, "/home/me/Draft.docx", vec![]);
        assert_eq!(req.source_name(), "Draft.docx");

        let req = ImportRequest::google_doc(
            "a1",
            "https://docs.google.com/document/d/1XyZabc/edit",
            SecretString::from("token".to_string()),
        );
        assert_eq!(req.source_name(), "gdoc:1XyZ****");
        assert_eq!(req.import_type(), ImportType::GoogleDoc);
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let req = ImportRequest::google_doc(
            "a1",
            "1XyZabc",
            SecretString::from("super-secret".to_string()),
        );
        let debug = format!("{:?}", req);
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("1XyZabc"));
    }

    #[test]
    fn test_from_path_reads_file_and_names_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Draft.docx");
        std::fs::write(&path, b"PK").unwrap();

        let req = ImportRequest::from_path("a1", ImportType::Word, &path).unwrap();
        assert_eq!(req.source_name(), "Draft.docx");
        assert_eq!(req.import_type(), ImportType::Word);

        let missing = dir.path().join("missing.epub");
        let err = ImportRequest::from_path("a1", ImportType::Epub, &missing).unwrap_err();
        assert!(matches!(err, ImportError::ReadSource { ref path, .. } if path == &missing));
    }
}
