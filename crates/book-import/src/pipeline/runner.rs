use std::sync::Arc;

use tracing::{debug, info, info_span, warn, Instrument};

use crate::assembler;
use crate::assets::AssetUploader;
use crate::db::{book_repo, Database, DatabaseError};
use crate::error::ErrorCode;
use crate::job::{JobWarning, STEP_ASSEMBLING, STEP_UPLOADING};
use crate::store::{self, ObjectStore, StoreError};

use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::PipelineError;
use super::progress::{ProgressEvent, ProgressReporter};

/// Progress once parsing has finished.
pub const PROGRESS_PARSED: u8 = 30;
/// Progress once every image upload has resolved.
pub const PROGRESS_UPLOADED: u8 = 85;
/// Progress when assembly starts.
pub const PROGRESS_ASSEMBLING: u8 = 90;

/// Maps `done` of `total` resolved uploads onto the 30..=85 band.
pub fn upload_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return PROGRESS_UPLOADED;
    }
    let span = (PROGRESS_UPLOADED - PROGRESS_PARSED) as usize;
    PROGRESS_PARSED + (span * done.min(total) / total) as u8
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub book_id: String,
    pub chapter_count: u32,
    pub uploaded_images: usize,
    pub warnings: Vec<JobWarning>,
    /// Object keys written for the book, for [`Pipeline::discard`].
    pub stored_keys: Vec<String>,
}

pub struct Pipeline {
    config: PipelineConfig,
    db: Database,
    store: Arc<dyn ObjectStore>,
    uploader: AssetUploader,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, db: Database, store: Arc<dyn ObjectStore>) -> Self {
        let uploader = AssetUploader::new(Arc::clone(&store), config.assets.clone())
            .with_upload_timeout(config.store_timeout);
        Self {
            config,
            db,
            store,
            uploader,
        }
    }

    /// Replaces the uploader, e.g. to shorten timeouts in tests.
    pub fn with_uploader(mut self, uploader: AssetUploader) -> Self {
        self.uploader = uploader;
        self
    }

    /// Runs parse → upload → assemble for one job. On a fatal error any
    /// objects already uploaded for this job are deleted before returning.
    pub async fn run(
        &self,
        mut ctx: PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<PipelineOutput, PipelineError> {
        let span = info_span!("pipeline",
            job_id = %ctx.job_id,
            import_type = %ctx.import_type,
            source = %ctx.source_name,
        );

        async move {
            // Step 1: Parse
            self.step_parse(&mut ctx)
                .instrument(info_span!("parse"))
                .await?;
            progress.report(ProgressEvent::Phase {
                progress: PROGRESS_PARSED,
                step: STEP_UPLOADING,
            });

            // Step 2: Upload images
            let uploaded = self
                .step_upload(&mut ctx, progress)
                .instrument(info_span!("upload_assets"))
                .await;
            if let Err(e) = uploaded {
                self.remove_objects(&ctx.stored_keys).await;
                return Err(e);
            }

            // Step 3: Assemble and persist
            progress.report(ProgressEvent::Phase {
                progress: PROGRESS_ASSEMBLING,
                step: STEP_ASSEMBLING,
            });
            let assembled = self
                .step_assemble(&mut ctx)
                .instrument(info_span!("assemble"))
                .await;
            if let Err(e) = assembled {
                self.remove_objects(&ctx.stored_keys).await;
                return Err(e);
            }

            let output = PipelineOutput {
                book_id: ctx.book_id.clone(),
                chapter_count: ctx
                    .assembled
                    .as_ref()
                    .map(|a| a.content.chapter_count)
                    .unwrap_or(0),
                uploaded_images: ctx.uploads.as_ref().map(|u| u.urls.len()).unwrap_or(0),
                warnings: std::mem::take(&mut ctx.warnings),
                stored_keys: std::mem::take(&mut ctx.stored_keys),
            };
            info!(
                book_id = %output.book_id,
                chapters = output.chapter_count,
                images = output.uploaded_images,
                warnings = output.warnings.len(),
                "Import pipeline finished"
            );
            Ok(output)
        }
        .instrument(span)
        .await
    }

    async fn step_parse(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let input = ctx
            .input
            .take()
            .ok_or_else(|| PipelineError::Internal("parser input already consumed".to_string()))?;

        let parsed = ctx.parser.parse(input).await?;
        debug!(
            chapters = parsed.chapters.len(),
            images = parsed.images.len(),
            unresolved = parsed.unresolved_references.len(),
            "Document parsed"
        );

        for reference in &parsed.unresolved_references {
            ctx.warnings.push(JobWarning {
                code: ErrorCode::UploadFailed,
                reference: reference.clone(),
                message: "The image is missing from the source document".to_string(),
            });
        }

        ctx.parsed = Some(parsed);
        Ok(())
    }

    async fn step_upload(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let parsed = ctx
            .parsed
            .as_ref()
            .ok_or_else(|| PipelineError::Internal("upload before parse".to_string()))?;

        let on_progress = |done: usize, total: usize| {
            progress.report(ProgressEvent::Phase {
                progress: upload_progress(done, total),
                step: STEP_UPLOADING,
            });
        };

        let uploaded = self
            .uploader
            .upload(&parsed.images, &ctx.book_id, &on_progress)
            .await;
        match uploaded {
            Ok(report) => {
                ctx.stored_keys.extend(report.stored_keys.iter().cloned());
                ctx.warnings.extend(report.warnings.iter().cloned());
                ctx.uploads = Some(report);
                progress.report(ProgressEvent::Phase {
                    progress: PROGRESS_UPLOADED,
                    step: STEP_UPLOADING,
                });
                Ok(())
            }
            Err(e) => {
                ctx.stored_keys.extend(e.stored_keys);
                Err(PipelineError::Storage(e.source))
            }
        }
    }

    async fn step_assemble(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let (Some(parsed), Some(uploads)) = (ctx.parsed.as_ref(), ctx.uploads.as_ref()) else {
            return Err(PipelineError::Internal(
                "assembly before parse and upload".to_string(),
            ));
        };

        let assembled = assembler::assemble(parsed, &uploads.urls, &ctx.book_id, &ctx.author_id);
        assembler::persist(&self.db, &assembled, self.config.infra_retry).await?;

        // The parsed document is not needed past this point.
        ctx.parsed = None;
        ctx.assembled = Some(assembled);
        Ok(())
    }

    /// Undoes a finished run whose outcome could not be recorded: removes
    /// the book rows, then the uploaded objects. Best effort.
    pub async fn discard(&self, output: &PipelineOutput) {
        let book_id = output.book_id.as_str();
        let removed = self
            .config
            .infra_retry
            .run(
                "discard book",
                move || async move { book_repo::delete(&self.db, book_id) },
                DatabaseError::is_transient,
            )
            .await;
        if let Err(e) = removed {
            warn!(book_id = %book_id, error = %e, "Failed to remove unrecorded book");
        }
        self.remove_objects(&output.stored_keys).await;
    }

    /// Best-effort removal of uploaded objects. Each delete is bounded by the
    /// store timeout and retried like other infrastructure calls.
    async fn remove_objects(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let limit = self.config.store_timeout;
        let mut removed = 0;
        for key in keys {
            let key = key.as_str();
            let deleted = self
                .config
                .infra_retry
                .run(
                    "delete orphaned asset",
                    move || store::within(limit, self.store.delete(key)),
                    StoreError::is_transient,
                )
                .await;
            match deleted {
                Ok(()) => removed += 1,
                Err(e) => warn!(key = %key, error = %e, "Failed to delete orphaned asset"),
            }
        }
        info!(
            removed,
            total = keys.len(),
            "Removed uploaded assets of failed import"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::{Book, BookContent};
    use crate::config::AssetConfig;
    use crate::db::book_repo;
    use crate::document::{ExtractedImage, ParsedDocument};
    use crate::job::ImportType;
    use crate::parser::{FormatParser, ParseError, ParserInput};
    use crate::pipeline::progress::NoopProgress;
    use crate::retry::RetryPolicy;
    use crate::store::MemoryObjectStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FixedParser(Mutex<Option<Result<ParsedDocument, ParseError>>>);

    impl FixedParser {
        fn ok(doc: ParsedDocument) -> Arc<Self> {
            Arc::new(Self(Mutex::new(Some(Ok(doc)))))
        }

        fn err(e: ParseError) -> Arc<Self> {
            Arc::new(Self(Mutex::new(Some(Err(e)))))
        }
    }

    #[async_trait]
    impl FormatParser for FixedParser {
        fn supports(&self, _import_type: ImportType) -> bool {
            true
        }

        async fn parse(&self, _input: ParserInput) -> Result<ParsedDocument, ParseError> {
            self.0
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(ParseError::Internal("parsed twice".into())))
        }
    }

    struct Recording(Mutex<Vec<u8>>);

    impl ProgressReporter for Recording {
        fn report(&self, event: ProgressEvent) {
            let ProgressEvent::Phase { progress, .. } = event;
            self.0.lock().unwrap().push(progress);
        }
    }

    fn pipeline(store: Arc<MemoryObjectStore>) -> (Database, Pipeline) {
        let db = Database::open_in_memory().unwrap();
        let config = PipelineConfig {
            assets: AssetConfig {
                max_image_bytes: 100,
                backoff_base_ms: 0,
                ..Default::default()
            },
            infra_retry: RetryPolicy::new(2, Duration::ZERO),
            store_timeout: Duration::from_millis(50),
        };
        (db.clone(), Pipeline::new(config, db, store))
    }

    fn context(parser: Arc<dyn FormatParser>) -> PipelineContext {
        PipelineContext::new(
            "job-1",
            "author-1",
            ImportType::Epub,
            "book.epub",
            parser,
            ParserInput::File {
                filename: "book.epub".into(),
                bytes: vec![],
            },
        )
    }

    fn image(reference: &str, len: usize) -> ExtractedImage {
        ExtractedImage {
            original_reference: reference.to_string(),
            bytes: vec![1; len],
            mime_type: "image/png".to_string(),
        }
    }

    fn two_chapter_doc() -> ParsedDocument {
        ParsedDocument {
            title: "Two".to_string(),
            chapters: vec![
                r#"<h1>A</h1><img src="a.png"/>"#.to_string(),
                r#"<h1>B</h1><img src="big.png"/>"#.to_string(),
            ],
            images: vec![image("a.png", 10), image("big.png", 1000)],
            ..Default::default()
        }
    }

    /// Inserts a book under `book_id` so the pipeline's own insert fails.
    fn occupy_book_id(db: &Database, book_id: &str) {
        let now = chrono::Utc::now();
        book_repo::insert_with_content(
            db,
            &Book {
                id: book_id.to_string(),
                title: "existing".into(),
                author_id: "someone".into(),
                description: None,
                status: "pending_review".into(),
                created_at: now,
            },
            &BookContent {
                book_id: book_id.to_string(),
                full_content: String::new(),
                chapter_count: 0,
                created_at: now,
            },
        )
        .unwrap();
    }

    #[test]
    fn test_upload_progress_band() {
        assert_eq!(upload_progress(0, 4), 30);
        assert_eq!(upload_progress(2, 4), 57);
        assert_eq!(upload_progress(4, 4), 85);
        assert_eq!(upload_progress(0, 0), 85);
    }

    #[tokio::test]
    async fn test_successful_run_persists_book() {
        let store = Arc::new(MemoryObjectStore::new("https://cdn.test"));
        let (db, pipeline) = pipeline(store.clone());
        let ctx = context(FixedParser::ok(two_chapter_doc()));
        let book_id = ctx.book_id.clone();
        let progress = Recording(Mutex::new(Vec::new()));

        let output = pipeline.run(ctx, &progress).await.unwrap();

        assert_eq!(output.book_id, book_id);
        assert_eq!(output.chapter_count, 2);
        assert_eq!(output.uploaded_images, 1);
        assert_eq!(output.warnings.len(), 1);
        assert_eq!(output.warnings[0].code, ErrorCode::AssetTooLarge);

        let content = book_repo::find_content(&db, &book_id).unwrap().unwrap();
        assert!(content.full_content.contains("https://cdn.test/books/"));
        assert!(content.full_content.contains(assembler::IMAGE_PLACEHOLDER));

        let reported = progress.0.lock().unwrap().clone();
        assert!(reported.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(reported.first(), Some(&PROGRESS_PARSED));
        assert_eq!(reported.last(), Some(&PROGRESS_ASSEMBLING));
    }

    #[tokio::test]
    async fn test_parse_failure_stops_before_upload() {
        let store = Arc::new(MemoryObjectStore::new("https://cdn.test"));
        let (_db, pipeline) = pipeline(store.clone());
        let ctx = context(FixedParser::err(ParseError::MalformedContainer("no spine".into())));

        let err = pipeline.run(ctx, &NoopProgress).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedContainer);
        assert_eq!(store.put_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_persist_removes_uploaded_assets() {
        let store = Arc::new(MemoryObjectStore::new("https://cdn.test"));
        let (db, pipeline) = pipeline(store.clone());
        let ctx = context(FixedParser::ok(two_chapter_doc()));

        occupy_book_id(&db, &ctx.book_id);

        let err = pipeline.run(ctx, &NoopProgress).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::DatastoreUnavailable);
        assert_eq!(store.put_calls(), 1);
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_stalled_delete_does_not_hang_cleanup() {
        let store = Arc::new(MemoryObjectStore::new("https://cdn.test"));
        store.set_delete_delay(Some(Duration::from_secs(30)));
        let (db, pipeline) = pipeline(store.clone());
        let ctx = context(FixedParser::ok(two_chapter_doc()));
        occupy_book_id(&db, &ctx.book_id);

        let err = tokio::time::timeout(Duration::from_secs(5), pipeline.run(ctx, &NoopProgress))
            .await
            .expect("cleanup must give up on a stalled delete")
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::DatastoreUnavailable);
        assert_eq!(store.keys().len(), 1);
    }

    #[tokio::test]
    async fn test_discard_removes_book_and_objects() {
        let store = Arc::new(MemoryObjectStore::new("https://cdn.test"));
        let (db, pipeline) = pipeline(store.clone());
        let output = pipeline
            .run(context(FixedParser::ok(two_chapter_doc())), &NoopProgress)
            .await
            .unwrap();
        assert_eq!(output.stored_keys.len(), 1);

        pipeline.discard(&output).await;

        assert!(book_repo::find_book(&db, &output.book_id).unwrap().is_none());
        assert!(book_repo::find_content(&db, &output.book_id).unwrap().is_none());
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_references_become_warnings() {
        let store = Arc::new(MemoryObjectStore::new("https://cdn.test"));
        let (_db, pipeline) = pipeline(store);
        let doc = ParsedDocument {
            title: "Missing".to_string(),
            chapters: vec![r#"<img src="gone.png"/>"#.to_string()],
            unresolved_references: vec!["gone.png".to_string()],
            ..Default::default()
        };

        let output = pipeline
            .run(context(FixedParser::ok(doc)), &NoopProgress)
            .await
            .unwrap();
        assert_eq!(output.warnings.len(), 1);
        assert_eq!(output.warnings[0].reference, "gone.png");
    }
}
