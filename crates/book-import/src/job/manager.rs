use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::book::BookRepository;
use crate::config::ImportConfig;
use crate::db::{job_repo, Database, DatabaseError};
use crate::error::{ErrorCode, ImportError};
use crate::parser::{FormatParser, ParserInput, ParserRegistry};
use crate::pipeline::{
    JobProgressTracker, Pipeline, PipelineConfig, PipelineContext, PipelineError, PipelineOutput,
};
use crate::retry::RetryPolicy;
use crate::sanitize;
use crate::store::ObjectStore;

use super::model::{ImportJob, ImportType, JobStatus, STEP_PARSING};
use super::request::ImportRequest;

/// Progress recorded when a job leaves the queue.
const PROGRESS_STARTED: u8 = 5;

/// Rounds of retried saves spent on a job's final `failed` record.
const TERMINAL_SAVE_ROUNDS: u32 = 3;

/// Job history query. All fields are optional; results are newest first.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub author_id: Option<String>,
    pub status: Option<JobStatus>,
    pub import_type: Option<ImportType>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl JobFilter {
    pub fn for_author(author_id: impl Into<String>) -> Self {
        Self {
            author_id: Some(author_id.into()),
            ..Default::default()
        }
    }

    fn to_repo_filter(&self) -> job_repo::JobFilter {
        job_repo::JobFilter {
            author_id: self.author_id.clone(),
            status: self.status.map(|s| s.as_str().to_string()),
            import_type: self.import_type.map(|t| t.as_str().to_string()),
            limit: self.limit,
            offset: self.offset,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPage {
    pub jobs: Vec<ImportJob>,
    /// Matching jobs before pagination.
    pub total: u64,
}

struct Inner {
    db: Database,
    registry: ParserRegistry,
    pipeline: Pipeline,
    permits: Arc<Semaphore>,
    infra_retry: RetryPolicy,
}

/// Accepts import requests and runs each one as its own tokio task.
///
/// Submission only records the queued job; every later state change is
/// written by the job's single execution. Callers observe progress by
/// polling [`get_job`](Self::get_job) with the id returned from
/// [`submit`](Self::submit).
#[derive(Clone)]
pub struct ImportJobManager {
    inner: Arc<Inner>,
}

impl ImportJobManager {
    pub fn new(
        config: &ImportConfig,
        db: Database,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self, ImportError> {
        let registry = ParserRegistry::new(&config.google_docs)?;
        Ok(Self::with_registry(config, db, store, registry))
    }

    pub fn with_registry(
        config: &ImportConfig,
        db: Database,
        store: Arc<dyn ObjectStore>,
        registry: ParserRegistry,
    ) -> Self {
        let pipeline_config = PipelineConfig::from_config(config);
        let infra_retry = pipeline_config.infra_retry;
        let pipeline = Pipeline::new(pipeline_config, db.clone(), store);

        Self {
            inner: Arc::new(Inner {
                db,
                registry,
                pipeline,
                permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
                infra_retry,
            }),
        }
    }

    /// Records a queued job and starts it in the background.
    ///
    /// Returns as soon as the job row exists. Request-shape problems are
    /// rejected here without creating a job.
    pub async fn submit(&self, request: ImportRequest) -> Result<String, ImportError> {
        request.validate().map_err(ImportError::InvalidRequest)?;

        let import_type = request.import_type();
        let job = ImportJob::new(
            uuid::Uuid::new_v4().to_string(),
            import_type,
            request.author_id.clone(),
            request.source_name(),
        );
        self.inner.insert(&job).await?;
        info!(job_id = %job.id, import_type = %import_type, "Import job queued");

        let job_id = job.id.clone();
        let parser = self.inner.registry.for_type(import_type);
        let input = request.into_parser_input();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.execute(job, parser, input).await;
        });

        Ok(job_id)
    }

    /// Reads one job by id.
    pub fn get_job(&self, job_id: &str) -> Result<Option<ImportJob>, ImportError> {
        let job = job_repo::find_by_id(&self.inner.db, job_id)?
            .map(ImportJob::from_row)
            .transpose()?;
        Ok(job)
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> Result<JobPage, ImportError> {
        let (rows, total) = job_repo::query(&self.inner.db, &filter.to_repo_filter())?;
        let jobs = rows
            .into_iter()
            .map(ImportJob::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(JobPage { jobs, total })
    }

    /// Polls until the job is terminal or `timeout` has passed, returning
    /// the last observed record either way.
    pub async fn wait_for(
        &self,
        job_id: &str,
        poll: Duration,
        timeout: Duration,
    ) -> Result<ImportJob, ImportError> {
        let deadline = Instant::now() + timeout;
        loop {
            let job = self
                .get_job(job_id)?
                .ok_or_else(|| ImportError::JobNotFound(job_id.to_string()))?;
            if job.is_terminal() || Instant::now() >= deadline {
                return Ok(job);
            }
            tokio::time::sleep(poll).await;
        }
    }

    pub fn books(&self) -> BookRepository {
        BookRepository::new(self.inner.db.clone())
    }
}

impl Inner {
    async fn insert(&self, job: &ImportJob) -> Result<(), DatabaseError> {
        let row = job.to_row()?;
        let row = &row;
        let db = &self.db;
        self.infra_retry
            .run(
                "insert import job",
                move || async move { job_repo::insert(db, row) },
                DatabaseError::is_transient,
            )
            .await
    }

    async fn save(&self, job: &ImportJob) -> Result<(), DatabaseError> {
        let row = job.to_row()?;
        let row = &row;
        let db = &self.db;
        let found = self
            .infra_retry
            .run(
                "update import job",
                move || async move { job_repo::update(db, row) },
                DatabaseError::is_transient,
            )
            .await?;
        if !found {
            warn!(job_id = %job.id, "Import job row disappeared");
        }
        Ok(())
    }

    async fn execute(
        &self,
        mut job: ImportJob,
        parser: Option<Arc<dyn FormatParser>>,
        input: ParserInput,
    ) {
        let _permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Job scheduler closed");
                return;
            }
        };

        if let Err(e) = job.start(PROGRESS_STARTED, STEP_PARSING) {
            error!(job_id = %job.id, error = %e, "Cannot start import job");
            return;
        }
        if let Err(e) = self.save(&job).await {
            warn!(job_id = %job.id, error = %e, "Failed to record job start");
        }

        let Some(parser) = parser else {
            warn!(job_id = %job.id, import_type = %job.import_type, "No parser registered");
            self.finish_failed(
                job,
                ErrorCode::UnsupportedFormat,
                "This document type cannot be imported.".to_string(),
            )
            .await;
            return;
        };

        let ctx = PipelineContext::new(
            job.id.clone(),
            job.author_id.clone(),
            job.import_type,
            job.source_name.clone(),
            parser,
            input,
        );
        let started = job.clone();
        let tracker = JobProgressTracker::new(self.db.clone(), job);
        let result = self.pipeline.run(ctx, &tracker).await;
        let job = tracker.finish().await.unwrap_or(started);

        match result {
            Ok(output) => self.finish_completed(job, output).await,
            Err(e) => {
                warn!(
                    job_id = %job.id,
                    code = %e.code(),
                    error = %sanitize::truncate_detail(&e.to_string()),
                    "Import job failed"
                );
                self.finish_failed(job, e.code(), e.user_message()).await;
            }
        }
    }

    /// Records the completed job. If that cannot be recorded the book is
    /// rolled back and the job ends `failed`, so no job stays `processing`
    /// and no completed job points at a missing book.
    async fn finish_completed(&self, processing: ImportJob, output: PipelineOutput) {
        let mut job = processing.clone();
        let recorded = match job
            .add_warnings(output.warnings.clone())
            .and_then(|()| job.complete(output.book_id.clone()))
        {
            Ok(()) => self.save(&job).await.map_err(PipelineError::from),
            Err(e) => Err(PipelineError::Internal(e.to_string())),
        };

        match recorded {
            Ok(()) => info!(
                job_id = %job.id,
                warnings = job.warnings.len(),
                "Import job completed"
            ),
            Err(e) => {
                error!(
                    job_id = %job.id,
                    book_id = %output.book_id,
                    error = %e,
                    "Could not record completed job, rolling back the book"
                );
                self.pipeline.discard(&output).await;
                self.finish_failed(processing, e.code(), e.user_message()).await;
            }
        }
    }

    async fn finish_failed(&self, mut job: ImportJob, code: ErrorCode, message: String) {
        if let Err(e) = job.fail(code, message) {
            error!(job_id = %job.id, error = %e, "Cannot fail import job");
            return;
        }
        for round in 1..=TERMINAL_SAVE_ROUNDS {
            match self.save(&job).await {
                Ok(()) => return,
                Err(e) if round < TERMINAL_SAVE_ROUNDS => {
                    let delay = self.infra_retry.backoff(self.infra_retry.max_attempts + round);
                    warn!(job_id = %job.id, error = %e, round, "Failed to record failed job, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => error!(job_id = %job.id, error = %e, "Failed to record failed job"),
            }
        }
    }
}
