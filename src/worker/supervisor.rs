use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::{JobError, Result};
use crate::job::{Job, JobResult, JobStatus};
use crate::worker::executor::Executor;

/// How [`Worker::stop`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// Every in-flight job finished.
    Drained,
    /// The grace period elapsed with jobs still in flight.
    TimedOut,
    /// The caller's token fired before draining finished.
    Cancelled,
}

/// Point-in-time view of a worker, for health checks and registries.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    pub id: String,
    pub healthy: bool,
    pub running: bool,
    pub capacity: usize,
    pub current_load: usize,
    pub can_accept: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub current_jobs: Vec<String>,
    pub working_dir: PathBuf,
}

/// Capacity-bounded job runner.
///
/// A worker accepts a job only while it is running, healthy and below
/// `max_concurrent_jobs`. It never queues: a job offered to a full worker is
/// rejected and the caller decides where to send it next.
pub struct Worker {
    config: WorkerConfig,
    executor: Arc<dyn Executor>,
    in_flight: Mutex<HashSet<String>>,
    running: AtomicBool,
    healthy: AtomicBool,
    last_heartbeat: Mutex<DateTime<Utc>>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.config.id)
            .field("executor", &self.executor.name())
            .field("capacity", &self.config.max_concurrent_jobs)
            .field("current_load", &self.current_load())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Removes a job from the in-flight set when dropped, including when the
/// `execute_job` future itself is dropped.
struct InFlightGuard<'a> {
    worker: &'a Worker,
    job_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.worker.lock_in_flight().remove(&self.job_id);
    }
}

impl Worker {
    pub fn new(config: WorkerConfig, executor: Arc<dyn Executor>) -> Self {
        Self {
            config,
            executor,
            in_flight: Mutex::new(HashSet::new()),
            running: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            last_heartbeat: Mutex::new(Utc::now()),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Validate the configuration, create the working directory and begin
    /// accepting jobs.
    pub async fn start(&self) -> Result<()> {
        self.config.validate()?;
        tokio::fs::create_dir_all(&self.config.working_directory).await?;
        self.update_heartbeat();
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            worker_id = %self.config.id,
            capacity = self.config.max_concurrent_jobs,
            working_dir = %self.config.working_directory.display(),
            executor = self.executor.name(),
            "Worker started"
        );
        Ok(())
    }

    /// Stop accepting jobs and wait for in-flight ones to finish.
    ///
    /// Waits at most `shutdown_grace_period`, re-checking the load every
    /// `shutdown_poll_interval`. Jobs still running on timeout or
    /// cancellation are left to their own timeouts.
    pub async fn stop(&self, cancel: &CancellationToken) -> StopOutcome {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!(
            worker_id = %self.config.id,
            load = self.current_load(),
            "Worker stopping"
        );

        let grace = tokio::time::sleep(self.config.shutdown_grace_period);
        tokio::pin!(grace);
        let mut poll = tokio::time::interval(self.config.shutdown_poll_interval);

        let outcome = loop {
            // A drained worker wins over an expiry or cancel that is ready at the same time.
            tokio::select! {
                biased;
                _ = poll.tick() => {
                    if self.current_load() == 0 {
                        break StopOutcome::Drained;
                    }
                }
                _ = cancel.cancelled() => break StopOutcome::Cancelled,
                _ = &mut grace => break StopOutcome::TimedOut,
            }
        };

        match outcome {
            StopOutcome::Drained => {
                tracing::info!(worker_id = %self.config.id, "Worker stopped gracefully")
            }
            StopOutcome::TimedOut => tracing::warn!(
                worker_id = %self.config.id,
                remaining = self.current_load(),
                "Worker stopped with timeout, jobs still in flight"
            ),
            StopOutcome::Cancelled => {
                tracing::warn!(worker_id = %self.config.id, "Worker stop cancelled")
            }
        }
        outcome
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Healthy and running.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst) && self.is_running()
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn capacity(&self) -> usize {
        self.config.max_concurrent_jobs
    }

    pub fn current_load(&self) -> usize {
        self.lock_in_flight().len()
    }

    pub fn current_jobs(&self) -> Vec<String> {
        self.lock_in_flight().iter().cloned().collect()
    }

    pub fn can_accept_job(&self) -> bool {
        self.is_healthy() && self.current_load() < self.capacity()
    }

    pub fn update_heartbeat(&self) {
        *self.lock_heartbeat() = Utc::now();
    }

    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        *self.lock_heartbeat()
    }

    pub fn info(&self) -> WorkerInfo {
        let current_jobs = self.current_jobs();
        WorkerInfo {
            id: self.config.id.clone(),
            healthy: self.is_healthy(),
            running: self.is_running(),
            capacity: self.capacity(),
            current_load: current_jobs.len(),
            can_accept: self.can_accept_job(),
            last_heartbeat: self.last_heartbeat(),
            current_jobs,
            working_dir: self.config.working_directory.clone(),
        }
    }

    /// Run `job` on this worker.
    ///
    /// The job must be `queued`. It is claimed by this worker, moved to
    /// `running`, executed, and finally moved to the result's terminal status
    /// with the result's output copied in. The job leaves the in-flight set on
    /// every exit path.
    pub async fn execute_job(
        &self,
        cancel: &CancellationToken,
        job: &mut Job,
    ) -> Result<JobResult> {
        let _guard = self.admit(&job.id)?;

        job.update_status(JobStatus::Running)?;
        job.worker_id = Some(self.config.id.clone());
        tracing::info!(
            worker_id = %self.config.id,
            job_id = %job.id,
            job_type = %job.job_type,
            "Worker executing job"
        );

        let result = match self.executor.execute(cancel, job).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(
                    worker_id = %self.config.id,
                    job_id = %job.id,
                    error = %e,
                    "Worker failed to execute job"
                );
                return Err(e);
            }
        };

        job.apply_result(&result)?;
        tracing::info!(
            worker_id = %self.config.id,
            job_id = %job.id,
            status = %result.status,
            "Worker finished job"
        );
        Ok(result)
    }

    /// Check capacity and register the job in one critical section, so two
    /// concurrent callers can never both take the last slot.
    fn admit(&self, job_id: &str) -> Result<InFlightGuard<'_>> {
        let mut in_flight = self.lock_in_flight();
        if !self.is_healthy() || in_flight.len() >= self.capacity() {
            return Err(JobError::WorkerUnavailable {
                worker_id: self.config.id.clone(),
            });
        }
        if !in_flight.insert(job_id.to_string()) {
            return Err(JobError::validation(format!(
                "job {} is already running on worker {}",
                job_id, self.config.id
            )));
        }
        Ok(InFlightGuard {
            worker: self,
            job_id: job_id.to_string(),
        })
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_heartbeat(&self) -> MutexGuard<'_, DateTime<Utc>> {
        self.last_heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
