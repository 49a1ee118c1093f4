//! Import job record and its state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::job_repo::JobRow;
use crate::db::DatabaseError;
use crate::error::ErrorCode;

// ─── Step labels ────────────────────────────────────────────────────────────

pub const STEP_QUEUED: &str = "queued";
pub const STEP_PARSING: &str = "parsing";
pub const STEP_UPLOADING: &str = "uploading images";
pub const STEP_ASSEMBLING: &str = "creating book record";
pub const STEP_COMPLETED: &str = "completed";
pub const STEP_FAILED: &str = "failed";

/// Highest progress a job may report before it has completed.
pub const MAX_IN_FLIGHT_PROGRESS: u8 = 99;

// ─── ImportType ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportType {
    Epub,
    Word,
    GoogleDoc,
}

impl ImportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportType::Epub => "epub",
            ImportType::Word => "word",
            ImportType::GoogleDoc => "google_doc",
        }
    }
}

impl fmt::Display for ImportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "epub" => Ok(ImportType::Epub),
            "word" => Ok(ImportType::Word),
            "google_doc" => Ok(ImportType::GoogleDoc),
            other => Err(format!("unknown import type '{}'", other)),
        }
    }
}

// ─── JobStatus ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobStateError {
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Job is {0}, progress can only change while processing")]
    NotProcessing(JobStatus),
}

// ─── Warnings ───────────────────────────────────────────────────────────────

/// A per-asset problem that did not fail the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobWarning {
    pub code: ErrorCode,
    /// The in-document image reference the warning is about.
    pub reference: String,
    pub message: String,
}

// ─── ImportJob ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJob {
    pub id: String,
    pub import_type: ImportType,
    pub status: JobStatus,
    pub progress_percentage: u8,
    pub current_step: String,
    pub author_id: String,
    /// Uploaded filename, or the redacted remote document reference.
    pub source_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_book_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<JobWarning>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportJob {
    pub fn new(
        id: impl Into<String>,
        import_type: ImportType,
        author_id: impl Into<String>,
        source_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            import_type,
            status: JobStatus::Queued,
            progress_percentage: 0,
            current_step: STEP_QUEUED.to_string(),
            author_id: author_id.into(),
            source_name: source_name.into(),
            result_book_id: None,
            error_code: None,
            error_message: None,
            warnings: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), JobStateError> {
        if !self.status.can_transition_to(next) {
            return Err(JobStateError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        let now = Utc::now();
        // Never let updated_at move backwards on clock skew.
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// `queued -> processing`.
    pub fn start(&mut self, progress: u8, step: &str) -> Result<(), JobStateError> {
        self.transition(JobStatus::Processing)?;
        self.set_progress(progress, step);
        Ok(())
    }

    /// Records progress while processing. Lower values than the current one
    /// are ignored and values above 99 are capped.
    pub fn advance(&mut self, progress: u8, step: &str) -> Result<(), JobStateError> {
        if self.status != JobStatus::Processing {
            return Err(JobStateError::NotProcessing(self.status));
        }
        self.set_progress(progress, step);
        self.touch();
        Ok(())
    }

    fn set_progress(&mut self, progress: u8, step: &str) {
        let capped = progress.min(MAX_IN_FLIGHT_PROGRESS);
        self.progress_percentage = self.progress_percentage.max(capped);
        self.current_step = step.to_string();
    }

    pub fn add_warnings(&mut self, warnings: Vec<JobWarning>) -> Result<(), JobStateError> {
        if self.status != JobStatus::Processing {
            return Err(JobStateError::NotProcessing(self.status));
        }
        if !warnings.is_empty() {
            self.warnings.extend(warnings);
            self.touch();
        }
        Ok(())
    }

    /// `processing -> completed`.
    pub fn complete(&mut self, book_id: impl Into<String>) -> Result<(), JobStateError> {
        self.transition(JobStatus::Completed)?;
        self.progress_percentage = 100;
        self.current_step = STEP_COMPLETED.to_string();
        self.result_book_id = Some(book_id.into());
        self.completed_at = Some(self.updated_at);
        Ok(())
    }

    /// `processing -> failed`. Progress keeps its last value.
    pub fn fail(&mut self, code: ErrorCode, message: impl Into<String>) -> Result<(), JobStateError> {
        self.transition(JobStatus::Failed)?;
        self.current_step = STEP_FAILED.to_string();
        self.error_code = Some(code);
        self.error_message = Some(message.into());
        self.result_book_id = None;
        self.completed_at = Some(self.updated_at);
        Ok(())
    }

    pub fn to_row(&self) -> Result<JobRow, DatabaseError> {
        let warnings = if self.warnings.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&self.warnings).map_err(|e| DatabaseError::CorruptRow {
                id: self.id.clone(),
                reason: format!("cannot encode warnings: {}", e),
            })?)
        };

        Ok(JobRow {
            id: self.id.clone(),
            import_type: self.import_type.as_str().to_string(),
            status: self.status.as_str().to_string(),
            progress_percentage: self.progress_percentage,
            current_step: self.current_step.clone(),
            author_id: self.author_id.clone(),
            source_name: self.source_name.clone(),
            result_book_id: self.result_book_id.clone(),
            error_code: self.error_code.map(|c| c.as_str().to_string()),
            error_message: self.error_message.clone(),
            warnings,
            created_at: format_timestamp(self.created_at),
            updated_at: format_timestamp(self.updated_at),
            completed_at: self.completed_at.map(format_timestamp),
        })
    }

    pub fn from_row(row: JobRow) -> Result<Self, DatabaseError> {
        let id = row.id.clone();
        let corrupt = |reason: String| DatabaseError::CorruptRow {
            id: id.clone(),
            reason,
        };

        let warnings = match row.warnings.as_deref() {
            Some(json) if !json.is_empty() => serde_json::from_str(json)
                .map_err(|e| corrupt(format!("invalid warnings: {}", e)))?,
            _ => Vec::new(),
        };
        let error_code = row
            .error_code
            .as_deref()
            .map(ErrorCode::from_str)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?;

        Ok(Self {
            import_type: row.import_type.parse().map_err(&corrupt)?,
            status: row.status.parse().map_err(&corrupt)?,
            progress_percentage: row.progress_percentage.min(100),
            current_step: row.current_step,
            author_id: row.author_id,
            source_name: row.source_name,
            result_book_id: row.result_book_id,
            error_code,
            error_message: row.error_message,
            warnings,
            created_at: parse_timestamp(&row.created_at).map_err(&corrupt)?,
            updated_at: parse_timestamp(&row.updated_at).map_err(&corrupt)?,
            completed_at: row
                .completed_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()
                .map_err(&corrupt)?,
            id: row.id,
        })
    }
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{}': {}", s, e))
}
