//! Import jobs: the tracked record, the request that creates one, and the
//! manager that runs them.

mod manager;
mod model;
mod request;

pub use manager::{ImportJobManager, JobFilter, JobPage};
pub use model::{
    ImportJob, ImportType, JobStateError, JobStatus, JobWarning, MAX_IN_FLIGHT_PROGRESS,
    STEP_ASSEMBLING, STEP_COMPLETED, STEP_FAILED, STEP_PARSING, STEP_QUEUED, STEP_UPLOADING,
};
pub use request::{ImportRequest, ImportSource};
