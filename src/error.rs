use std::time::Duration;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("{0}")]
    Validation(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("worker not found: {0}")]
    WorkerNotFound(String),

    #[error("worker {worker_id} cannot accept job: at capacity or unhealthy")]
    WorkerUnavailable { worker_id: String },

    #[error("execution error for job {job_id}: {message}{}", fmt_cause(.source))]
    Execution {
        job_id: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("job {job_id} timed out after {timeout:?}")]
    Timeout { job_id: String, timeout: Duration },

    #[error("job {job_id} was cancelled")]
    Cancelled { job_id: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

fn fmt_cause(source: &Option<BoxError>) -> String {
    match source {
        Some(cause) => format!(": {}", cause),
        None => String::new(),
    }
}

impl JobError {
    pub fn validation(message: impl Into<String>) -> Self {
        JobError::Validation(message.into())
    }

    pub fn execution(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        JobError::Execution {
            job_id: job_id.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn execution_with_cause<E>(
        job_id: impl Into<String>,
        message: impl Into<String>,
        cause: E,
    ) -> Self
    where
        E: Into<BoxError>,
    {
        JobError::Execution {
            job_id: job_id.into(),
            message: message.into(),
            source: Some(cause.into()),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, JobError::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, JobError::JobNotFound(_) | JobError::WorkerNotFound(_))
    }

    pub fn is_execution(&self) -> bool {
        matches!(self, JobError::Execution { .. })
    }

    /// Timeouts are reported separately so retry policy can treat them differently.
    pub fn is_timeout(&self) -> bool {
        matches!(self, JobError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
