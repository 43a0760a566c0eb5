use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;

use crate::error::{JobError, Result};
use crate::job::DEFAULT_JOB_TIMEOUT;

pub const DEFAULT_WORKING_DIRECTORY: &str = "/tmp/infinitrain";

/// Settings for a single worker.
///
/// Sourcing these values (environment, files, flags) is left to the caller;
/// the binary maps its command-line arguments onto this struct.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub id: String,
    /// Upper bound on jobs executing at once.
    pub max_concurrent_jobs: usize,
    pub heartbeat_interval: Duration,
    pub job_poll_interval: Duration,
    /// Directory commands run in and scripts are written to.
    pub working_directory: PathBuf,
    /// Timeout given to jobs submitted without one.
    pub default_job_timeout: Duration,
    /// How long `Worker::stop` waits for in-flight jobs to drain.
    pub shutdown_grace_period: Duration,
    /// How often `Worker::stop` re-checks the in-flight count.
    pub shutdown_poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: generate_worker_id(),
            max_concurrent_jobs: 5,
            heartbeat_interval: Duration::from_secs(30),
            job_poll_interval: Duration::from_secs(5),
            working_directory: PathBuf::from(DEFAULT_WORKING_DIRECTORY),
            default_job_timeout: DEFAULT_JOB_TIMEOUT,
            shutdown_grace_period: Duration::from_secs(30),
            shutdown_poll_interval: Duration::from_secs(1),
        }
    }
}

impl WorkerConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_max_concurrent_jobs(mut self, max_concurrent_jobs: usize) -> Self {
        self.max_concurrent_jobs = max_concurrent_jobs;
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = dir.into();
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_job_poll_interval(mut self, interval: Duration) -> Self {
        self.job_poll_interval = interval;
        self
    }

    pub fn with_default_job_timeout(mut self, timeout: Duration) -> Self {
        self.default_job_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace_period(mut self, grace: Duration) -> Self {
        self.shutdown_grace_period = grace;
        self
    }

    pub fn with_shutdown_poll_interval(mut self, interval: Duration) -> Self {
        self.shutdown_poll_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(JobError::validation("worker id cannot be empty"));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(JobError::validation(
                "worker max concurrent jobs must be positive",
            ));
        }
        let intervals = [
            ("heartbeat interval", self.heartbeat_interval),
            ("job poll interval", self.job_poll_interval),
            ("shutdown poll interval", self.shutdown_poll_interval),
            ("shutdown grace period", self.shutdown_grace_period),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(JobError::validation(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    /// Executor settings sharing this worker's working directory.
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            working_directory: self.working_directory.clone(),
            ..Default::default()
        }
    }
}

/// Settings for [`JobExecutor`](crate::worker::JobExecutor).
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub working_directory: PathBuf,
    /// Interpreter used to run script jobs.
    pub shell: String,
    /// Ceiling on any single HTTP job, regardless of the job's own timeout.
    pub http_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            working_directory: PathBuf::from(DEFAULT_WORKING_DIRECTORY),
            shell: "sh".to_string(),
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl ExecutorConfig {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
            ..Default::default()
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }
}

/// `worker-<hostname>-<unix-seconds>`, with `unknown` when `HOSTNAME` is unset.
pub fn generate_worker_id() -> String {
    let hostname = std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    format!("worker-{}-{}", hostname, Utc::now().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_config_default() {
        let cfg = WorkerConfig::default();
        assert!(cfg.id.starts_with("worker-"));
        assert_eq!(cfg.max_concurrent_jobs, 5);
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(cfg.job_poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.working_directory, PathBuf::from("/tmp/infinitrain"));
        assert_eq!(cfg.default_job_timeout, Duration::from_secs(300));
        assert_eq!(cfg.shutdown_grace_period, Duration::from_secs(30));
        assert_eq!(cfg.shutdown_poll_interval, Duration::from_secs(1));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn worker_config_builders() {
        let cfg = WorkerConfig::new("worker-a")
            .with_max_concurrent_jobs(2)
            .with_working_directory("/var/tmp/jobs")
            .with_shutdown_grace_period(Duration::from_millis(200))
            .with_shutdown_poll_interval(Duration::from_millis(10));
        assert_eq!(cfg.id, "worker-a");
        assert_eq!(cfg.max_concurrent_jobs, 2);
        assert_eq!(cfg.working_directory, PathBuf::from("/var/tmp/jobs"));
        assert_eq!(cfg.shutdown_grace_period, Duration::from_millis(200));
        assert_eq!(cfg.shutdown_poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn worker_config_rejects_zero_capacity() {
        let err = WorkerConfig::new("w").with_max_concurrent_jobs(0).validate();
        assert!(err.unwrap_err().is_validation());
    }

    #[test]
    fn worker_config_rejects_empty_id_and_zero_intervals() {
        assert!(WorkerConfig::new("").validate().is_err());
        assert!(WorkerConfig::new("w")
            .with_heartbeat_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(WorkerConfig::new("w")
            .with_job_poll_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn worker_config_rejects_zero_grace_period() {
        let err = WorkerConfig::new("w")
            .with_shutdown_grace_period(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("shutdown grace period"));
    }

    #[test]
    fn executor_config_follows_worker_directory() {
        let cfg = WorkerConfig::new("w").with_working_directory("/srv/jobs");
        let exec = cfg.executor_config();
        assert_eq!(exec.working_directory, PathBuf::from("/srv/jobs"));
        assert_eq!(exec.shell, "sh");
        assert_eq!(exec.http_timeout, Duration::from_secs(30));
    }
}
