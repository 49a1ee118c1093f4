use std::sync::Mutex;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::db::job_repo::{self, JobRow};
use crate::db::Database;
use crate::job::ImportJob;

/// Events emitted by the pipeline while a job is processing. Terminal
/// transitions are applied by the job manager, not reported here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Phase { progress: u8, step: &'static str },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Applies progress events to a job and persists the job row.
///
/// `report` never touches the database. It publishes the newest row to a
/// writer task, which stores rows one at a time on the blocking pool.
/// Intermediate rows may be skipped when events arrive faster than writes
/// complete. In-flight writes are best effort: a failed write is logged and
/// the next event (or the final transition) carries the state forward.
pub struct JobProgressTracker {
    job: Mutex<ImportJob>,
    latest: watch::Sender<Option<JobRow>>,
    writer: JoinHandle<()>,
}

impl JobProgressTracker {
    /// Must be called inside a tokio runtime.
    pub fn new(db: Database, job: ImportJob) -> Self {
        let (latest, rows) = watch::channel(None);
        let writer = tokio::spawn(write_rows(db, job.id.clone(), rows));
        Self {
            job: Mutex::new(job),
            latest,
            writer,
        }
    }

    pub fn snapshot(&self) -> Option<ImportJob> {
        self.job.lock().ok().map(|job| job.clone())
    }

    /// Waits for the last published row to be written and returns the job.
    /// Later writes to the job row cannot be overtaken by progress writes.
    pub async fn finish(self) -> Option<ImportJob> {
        let Self {
            job,
            latest,
            writer,
        } = self;
        drop(latest);
        if let Err(e) = writer.await {
            error!(error = %e, "Progress writer task failed");
        }
        job.into_inner().ok()
    }
}

async fn write_rows(db: Database, job_id: String, mut rows: watch::Receiver<Option<JobRow>>) {
    while rows.changed().await.is_ok() {
        let latest = rows.borrow_and_update().clone();
        let Some(row) = latest else {
            continue;
        };
        let progress = row.progress_percentage;
        let db = db.clone();
        match tokio::task::spawn_blocking(move || job_repo::update(&db, &row)).await {
            Ok(Ok(_)) => debug!(job_id = %job_id, progress, "Recorded progress"),
            Ok(Err(e)) => {
                warn!(job_id = %job_id, progress, error = %e, "Failed to record progress")
            }
            Err(e) => warn!(job_id = %job_id, error = %e, "Progress write task failed"),
        }
    }
}

impl ProgressReporter for JobProgressTracker {
    fn report(&self, event: ProgressEvent) {
        let ProgressEvent::Phase { progress, step } = event;

        let row = {
            let Ok(mut job) = self.job.lock() else {
                error!("Progress tracker lock poisoned");
                return;
            };
            let before = (job.progress_percentage, job.current_step.clone());
            if let Err(e) = job.advance(progress, step) {
                warn!(job_id = %job.id, error = %e, "Ignoring progress");
                return;
            }
            if before == (job.progress_percentage, job.current_step.clone()) {
                return;
            }
            match job.to_row() {
                Ok(row) => row,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Cannot encode progress row");
                    return;
                }
            }
        };
        self.latest.send_replace(Some(row));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ImportType, STEP_PARSING, STEP_UPLOADING};

    fn tracker() -> (Database, JobProgressTracker) {
        let db = Database::open_in_memory().unwrap();
        let mut job = ImportJob::new("job-1", ImportType::Word, "author", "a.docx");
        job_repo::insert(&db, &job.to_row().unwrap()).unwrap();
        job.start(5, STEP_PARSING).unwrap();
        (db.clone(), JobProgressTracker::new(db, job))
    }

    #[tokio::test]
    async fn test_reports_are_persisted() {
        let (db, tracker) = tracker();
        tracker.report(ProgressEvent::Phase {
            progress: 42,
            step: STEP_UPLOADING,
        });
        let job = tracker.finish().await.unwrap();

        let row = job_repo::find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(row.progress_percentage, 42);
        assert_eq!(row.current_step, STEP_UPLOADING);
        assert_eq!(row.status, "processing");
        assert_eq!(job.progress_percentage, 42);
    }

    #[tokio::test]
    async fn test_lower_progress_is_clamped() {
        let (db, tracker) = tracker();
        tracker.report(ProgressEvent::Phase {
            progress: 60,
            step: STEP_UPLOADING,
        });
        tracker.report(ProgressEvent::Phase {
            progress: 31,
            step: STEP_UPLOADING,
        });
        assert_eq!(tracker.snapshot().unwrap().progress_percentage, 60);
        tracker.finish().await;

        let row = job_repo::find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(row.progress_percentage, 60);
    }

    #[tokio::test]
    async fn test_burst_of_reports_lands_on_newest_row() {
        let (db, tracker) = tracker();
        for progress in 30..=85 {
            tracker.report(ProgressEvent::Phase {
                progress,
                step: STEP_UPLOADING,
            });
        }
        tracker.finish().await;

        let row = job_repo::find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(row.progress_percentage, 85);
    }
}
