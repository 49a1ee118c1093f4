pub mod archive;
pub mod docx;
pub mod epub;
mod error;
pub mod gdoc;
pub mod segment;
pub mod xhtml;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::config::GoogleDocsConfig;
use crate::document::ParsedDocument;
use crate::job::ImportType;

pub use docx::DocxParser;
pub use epub::EpubParser;
pub use error::ParseError;
pub use gdoc::GoogleDocAdapter;

/// What a parser reads: uploaded bytes or a remote document reference.
pub enum ParserInput {
    File {
        filename: String,
        bytes: Vec<u8>,
    },
    Remote {
        document_handle: String,
        access_token: SecretString,
    },
}

impl std::fmt::Debug for ParserInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParserInput::File { filename, bytes } => f
                .debug_struct("File")
                .field("filename", filename)
                .field("len", &bytes.len())
                .finish(),
            ParserInput::Remote { .. } => f.debug_struct("Remote").finish_non_exhaustive(),
        }
    }
}

impl ParserInput {
    pub(crate) fn into_file(self, format: &str) -> Result<(String, Vec<u8>), ParseError> {
        match self {
            ParserInput::File { filename, bytes } => Ok((filename, bytes)),
            ParserInput::Remote { .. } => Err(ParseError::UnsupportedSource(format!(
                "{} import needs an uploaded file",
                format
            ))),
        }
    }
}

#[async_trait]
pub trait FormatParser: Send + Sync {
    fn supports(&self, import_type: ImportType) -> bool;
    async fn parse(&self, input: ParserInput) -> Result<ParsedDocument, ParseError>;
}

/// Runs CPU-bound archive parsing off the async worker threads.
pub(crate) async fn run_blocking<F>(parse: F) -> Result<ParsedDocument, ParseError>
where
    F: FnOnce() -> Result<ParsedDocument, ParseError> + Send + 'static,
{
    tokio::task::spawn_blocking(parse)
        .await
        .map_err(|e| ParseError::Internal(format!("parser task failed: {}", e)))?
}

/// Document title, else the filename without extension, else `"Untitled"`.
pub fn fallback_title(title: Option<&str>, filename: &str) -> String {
    if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
        return title.to_string();
    }
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("Untitled")
        .to_string()
}

pub struct ParserRegistry {
    parsers: Vec<Arc<dyn FormatParser>>,
}

impl ParserRegistry {
    pub fn new(google_docs: &GoogleDocsConfig) -> Result<Self, ParseError> {
        let parsers: Vec<Arc<dyn FormatParser>> = vec![
            Arc::new(EpubParser::new()),
            Arc::new(DocxParser::new()),
            Arc::new(GoogleDocAdapter::new(google_docs)?),
        ];
        Ok(Self { parsers })
    }

    /// Registers a parser ahead of the existing ones.
    pub fn register(&mut self, parser: Arc<dyn FormatParser>) {
        self.parsers.insert(0, parser);
    }

    pub fn for_type(&self, import_type: ImportType) -> Option<Arc<dyn FormatParser>> {
        self.parsers
            .iter()
            .find(|p| p.supports(import_type))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubParser;

    #[async_trait]
    impl FormatParser for StubParser {
        fn supports(&self, import_type: ImportType) -> bool {
            matches!(import_type, ImportType::Epub)
        }

        async fn parse(&self, _input: ParserInput) -> Result<ParsedDocument, ParseError> {
            Ok(ParsedDocument {
                title: "stub".to_string(),
                ..Default::default()
            })
        }
    }

    #[test]
    fn test_fallback_title() {
        assert_eq!(fallback_title(Some(" Real "), "file.epub"), "Real");
        assert_eq!(fallback_title(Some("  "), "dir/My Novel.docx"), "My Novel");
        assert_eq!(fallback_title(None, ""), "Untitled");
        assert_eq!(fallback_title(None, ".epub"), ".epub");
    }

    #[tokio::test]
    async fn test_registry_routes_by_import_type() {
        let registry = ParserRegistry::new(&GoogleDocsConfig::default()).unwrap();
        for import_type in [ImportType::Epub, ImportType::Word, ImportType::GoogleDoc] {
            let parser = registry.for_type(import_type).unwrap();
            assert!(parser.supports(import_type));
        }
    }

    #[tokio::test]
    async fn test_registered_parser_takes_precedence() {
        let mut registry = ParserRegistry::new(&GoogleDocsConfig::default()).unwrap();
        registry.register(Arc::new(StubParser));

        let parser = registry.for_type(ImportType::Epub).unwrap();
        let input = ParserInput::File {
            filename: "x.epub".to_string(),
            bytes: Vec::new(),
        };
        assert_eq!(parser.parse(input).await.unwrap().title, "stub");
    }
}
