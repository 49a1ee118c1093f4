use std::sync::Arc;

use crate::assembler::AssembledBook;
use crate::assets::AssetUploadReport;
use crate::document::ParsedDocument;
use crate::job::{ImportType, JobWarning};
use crate::parser::{FormatParser, ParserInput};

pub struct PipelineContext {
    // Input
    pub job_id: String,
    pub author_id: String,
    pub import_type: ImportType,
    pub source_name: String,
    /// Chosen before any upload so storage keys can embed it.
    pub book_id: String,
    pub parser: Arc<dyn FormatParser>,
    /// Taken by the parse step.
    pub input: Option<ParserInput>,

    // Parse result, Some after step_parse
    pub parsed: Option<ParsedDocument>,

    // Upload result, Some after step_upload
    pub uploads: Option<AssetUploadReport>,

    // Assembly result
    pub assembled: Option<AssembledBook>,

    /// Keys written to the object store, removed again if the job fails.
    pub stored_keys: Vec<String>,

    // Non-fatal warnings
    pub warnings: Vec<JobWarning>,
}

impl PipelineContext {
    pub fn new(
        job_id: impl Into<String>,
        author_id: impl Into<String>,
        import_type: ImportType,
        source_name: impl Into<String>,
        parser: Arc<dyn FormatParser>,
        input: ParserInput,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            author_id: author_id.into(),
            import_type,
            source_name: source_name.into(),
            book_id: uuid::Uuid::new_v4().to_string(),
            parser,
            input: Some(input),
            parsed: None,
            uploads: None,
            assembled: None,
            stored_keys: Vec::new(),
            warnings: Vec::new(),
        }
    }
}
