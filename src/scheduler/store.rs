use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{JobError, Result};
use crate::job::{Job, JobStatus};
use crate::scheduler::filter::{matches_all, Filter};

/// In-memory job repository keyed by job ID.
///
/// Jobs go in by value and come out as clones, so no caller ever holds a
/// reference into the map. Locks are held only for the map operation and the
/// copy.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new job. Fails if a job with the same ID already exists.
    pub async fn create(&self, job: Job) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(JobError::validation(format!(
                "job already exists: {}",
                job.id
            )));
        }
        tracing::debug!(job_id = %job.id, job_type = %job.job_type, "Job stored");
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    pub async fn get(&self, job_id: &str) -> Result<Job> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| JobError::JobNotFound(job_id.to_string()))
    }

    /// Replace the stored job that has the same ID.
    ///
    /// The new status must equal the stored one or be reachable from it
    /// through the state machine, so terminal jobs cannot change status and
    /// no job moves backwards. `created_at` and any already-recorded
    /// `started_at` / `completed_at` are kept from the stored job.
    pub async fn update(&self, mut job: Job) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let Some(stored) = jobs.get_mut(&job.id) else {
            return Err(JobError::JobNotFound(job.id));
        };

        if job.status != stored.status && !stored.status.can_reach(job.status) {
            return Err(JobError::validation(format!(
                "cannot update job {} from {} to {}",
                job.id, stored.status, job.status
            )));
        }

        job.created_at = stored.created_at;
        job.started_at = stored.started_at.or(job.started_at);
        job.completed_at = stored.completed_at.or(job.completed_at);
        if job.status.is_terminal() && job.completed_at.is_none() {
            job.completed_at = Some(Utc::now());
        }

        *stored = job;
        Ok(())
    }

    pub async fn delete(&self, job_id: &str) -> Result<()> {
        match self.jobs.write().await.remove(job_id) {
            Some(_) => {
                tracing::debug!(job_id, "Job deleted");
                Ok(())
            }
            None => Err(JobError::JobNotFound(job_id.to_string())),
        }
    }

    /// Jobs matching every filter, in no particular order.
    pub async fn list(&self, filters: &[Filter]) -> Vec<Job> {
        self.jobs
            .read()
            .await
            .values()
            .filter(|job| matches_all(job, filters))
            .cloned()
            .collect()
    }

    /// Transition a stored job through the status state machine.
    ///
    /// Returns a copy of the job after the transition.
    pub async fn update_status(&self, job_id: &str, status: JobStatus) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| JobError::JobNotFound(job_id.to_string()))?;
        job.update_status(status)?;
        tracing::debug!(job_id, status = %status, "Job status updated");
        Ok(job.clone())
    }

    pub async fn jobs_by_status(&self, status: JobStatus) -> Vec<Job> {
        self.list(&[Filter::equals("status", status)]).await
    }

    pub async fn jobs_by_worker(&self, worker_id: &str) -> Vec<Job> {
        self.list(&[Filter::equals("worker_id", worker_id)]).await
    }

    pub async fn count(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.jobs.write().await.clear();
    }
}
