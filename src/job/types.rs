use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{JobError, Result};
use crate::job::duration::{self, parse_duration};
use crate::job::status::JobStatus;

/// Timeout applied when a request does not carry one.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Priority assigned when a request leaves it at zero.
pub const DEFAULT_PRIORITY: i32 = 1;

const JOB_ID_RANDOM_BYTES: usize = 8;

/// Kind of work a job performs. Each kind carries its own payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Command,
    Script,
    Http,
    File,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::Command,
        JobType::Script,
        JobType::Http,
        JobType::File,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Command => "command",
            JobType::Script => "script",
            JobType::Http => "http",
            JobType::File => "file",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self> {
        JobType::ALL
            .into_iter()
            .find(|job_type| job_type.as_str() == s)
            .ok_or_else(|| JobError::validation(format!("unsupported job type: {}", s)))
    }
}

/// A unit of work tracked from submission to completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub script: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_path: String,
    #[serde(rename = "timeout_ms", with = "duration::millis")]
    pub timeout: Duration,
    #[serde(default)]
    pub retries: u32,
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl Job {
    /// Create a pending job of the given type with a fresh ID and no payload.
    pub fn new(job_type: JobType) -> Self {
        Self {
            id: generate_job_id(),
            job_type,
            command: String::new(),
            script: String::new(),
            url: String::new(),
            method: String::new(),
            file_path: String::new(),
            timeout: DEFAULT_JOB_TIMEOUT,
            retries: 0,
            priority: DEFAULT_PRIORITY,
            tags: Vec::new(),
            environment: HashMap::new(),
            worker_id: None,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            output: None,
            error: None,
            exit_code: None,
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        self.status.can_transition_to(next)
    }

    /// Move the job to `next`, recording the first start and completion times.
    ///
    /// A rejected transition leaves the job untouched.
    pub fn update_status(&mut self, next: JobStatus) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(JobError::validation(format!(
                "cannot transition from {} to {}",
                self.status, next
            )));
        }

        self.status = next;
        let now = Utc::now();
        if next == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Copy an execution outcome into the job and move it to the result's status.
    pub fn apply_result(&mut self, result: &JobResult) -> Result<()> {
        self.update_status(result.status)?;
        self.output = Some(result.output.clone());
        self.error = result.error.clone();
        self.exit_code = Some(result.exit_code);
        Ok(())
    }

    /// Time spent running: start to completion, or start to now while in flight.
    pub fn duration(&self) -> Duration {
        let Some(started_at) = self.started_at else {
            return Duration::ZERO;
        };
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - started_at).to_std().unwrap_or_default()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    /// Pending or queued.
    pub fn is_pending(&self) -> bool {
        matches!(self.status, JobStatus::Pending | JobStatus::Queued)
    }
}

/// Outcome of a single execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub status: JobStatus,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub exit_code: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(rename = "duration_ms", with = "duration::millis")]
    pub duration: Duration,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Submission payload for a new job.
///
/// `job_type` and `timeout` stay textual so that malformed values surface as
/// validation errors from [`JobRequest::validate`] and [`JobRequest::to_job`]
/// rather than as deserialization failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(rename = "type", default)]
    pub job_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub script: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,
}

impl JobRequest {
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            job_type: JobType::Command.to_string(),
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn script(script: impl Into<String>) -> Self {
        Self {
            job_type: JobType::Script.to_string(),
            script: script.into(),
            ..Default::default()
        }
    }

    pub fn http(url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            job_type: JobType::Http.to_string(),
            url: url.into(),
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self {
            job_type: JobType::File.to_string(),
            file_path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Check that the request names a known type and carries that type's payload.
    ///
    /// HTTP requests without a method are defaulted to `GET` in place.
    pub fn validate(&mut self) -> Result<()> {
        if self.job_type.is_empty() {
            return Err(JobError::validation("job type is required"));
        }

        match self.job_type.parse::<JobType>()? {
            JobType::Command if self.command.is_empty() => Err(JobError::validation(
                "command is required for command jobs",
            )),
            JobType::Script if self.script.is_empty() => Err(JobError::validation(
                "script is required for script jobs",
            )),
            JobType::Http if self.url.is_empty() => {
                Err(JobError::validation("url is required for HTTP jobs"))
            }
            JobType::Http => {
                if self.method.is_empty() {
                    self.method = "GET".to_string();
                }
                Ok(())
            }
            JobType::File if self.file_path.is_empty() => Err(JobError::validation(
                "file_path is required for file jobs",
            )),
            _ => Ok(()),
        }
    }

    /// Validate the request and build a pending job from it.
    pub fn to_job(&mut self) -> Result<Job> {
        self.to_job_with_default_timeout(DEFAULT_JOB_TIMEOUT)
    }

    /// Like [`JobRequest::to_job`], using `default_timeout` when the request has none.
    ///
    /// A priority of 0 is treated as unset and becomes [`DEFAULT_PRIORITY`], so
    /// an explicit zero priority cannot be expressed.
    pub fn to_job_with_default_timeout(&mut self, default_timeout: Duration) -> Result<Job> {
        self.validate()?;
        let job_type = self.job_type.parse::<JobType>()?;

        let timeout = match self.timeout.as_deref() {
            None | Some("") => default_timeout,
            Some(raw) => parse_duration(raw).map_err(|_| {
                JobError::validation(format!("invalid timeout format: {}", raw))
            })?,
        };

        let priority = if self.priority == 0 {
            DEFAULT_PRIORITY
        } else {
            self.priority
        };

        Ok(Job {
            command: self.command.clone(),
            script: self.script.clone(),
            url: self.url.clone(),
            method: self.method.clone(),
            file_path: self.file_path.clone(),
            timeout,
            retries: self.retries,
            priority,
            tags: self.tags.clone(),
            environment: self.environment.clone(),
            ..Job::new(job_type)
        })
    }
}

/// Generate a job ID of the form `job-<unix-seconds>-<random hex>`.
pub fn generate_job_id() -> String {
    let mut suffix = [0u8; JOB_ID_RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut suffix);
    let hex: String = suffix.iter().map(|byte| format!("{:02x}", byte)).collect();
    format!("job-{}-{}", Utc::now().timestamp(), hex)
}
