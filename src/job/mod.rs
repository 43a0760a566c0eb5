//! Job data model.
//!
//! - [`Job`]: the stored work item and its lifecycle ([`Job::update_status`])
//! - [`JobRequest`]: submission payload, validated and converted with [`JobRequest::to_job`]
//! - [`JobResult`]: outcome of one execution attempt
//! - [`JobStatus`]: the status state machine

pub mod duration;
pub mod status;
pub mod types;

pub use duration::parse_duration;
pub use status::JobStatus;
pub use types::{
    generate_job_id, Job, JobRequest, JobResult, JobType, DEFAULT_JOB_TIMEOUT, DEFAULT_PRIORITY,
};
