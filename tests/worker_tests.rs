
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use infinitrain::job::{Job, JobRequest, JobResult, JobStatus, JobType};
use infinitrain::worker::heartbeat::spawn_background_loops;
use infinitrain::worker::{Executor, JobExecutor, StopOutcome, Worker};
use infinitrain::{JobError, Result};
use test_harness::{queued_job, test_worker_config, wait_until, GatedExecutor};

/// Executor that refuses every job.
struct RefusingExecutor;

#[async_trait]
impl Executor for RefusingExecutor {
    async fn execute(&self, _cancel: &CancellationToken, job: &Job) -> Result<JobResult> {
        Err(JobError::execution(&job.id, "executor offline"))
    }

    fn can_execute(&self, _job_type: JobType) -> bool {
        false
    }

    fn name(&self) -> &str {
        "refusing"
    }
}

async fn gated_worker(capacity: usize, dir: &TempDir) -> (Arc<Worker>, Arc<Semaphore>) {
    let (executor, gate) = GatedExecutor::new();
    let worker = Arc::new(Worker::new(
        test_worker_config("worker-gated", capacity, dir),
        executor,
    ));
    worker.start().await.unwrap();
    (worker, gate)
}

fn spawn_job(worker: &Arc<Worker>, mut job: Job) -> tokio::task::JoinHandle<Result<Job>> {
    let worker = worker.clone();
    tokio::spawn(async move {
        worker
            .execute_job(&CancellationToken::new(), &mut job)
            .await
            .map(|_| job)
    })
}

// =============================================================================
// Admission
// =============================================================================

#[tokio::test]
async fn test_capacity_bounds_concurrent_jobs() {
    let dir = TempDir::new().unwrap();
    let (worker, gate) = gated_worker(2, &dir).await;

    let first = spawn_job(&worker, queued_job(JobRequest::command("one")));
    let second = spawn_job(&worker, queued_job(JobRequest::command("two")));
    assert!(wait_until(Duration::from_secs(2), || worker.current_load() == 2).await);
    assert!(!worker.can_accept_job());

    let mut third = queued_job(JobRequest::command("three"));
    let err = worker
        .execute_job(&CancellationToken::new(), &mut third)
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::WorkerUnavailable { .. }));
    assert_eq!(third.status, JobStatus::Queued);
    assert!(third.worker_id.is_none());

    gate.add_permits(1);
    assert!(wait_until(Duration::from_secs(2), || worker.current_load() == 1).await);
    assert!(worker.can_accept_job());

    let third = spawn_job(&worker, third);
    assert!(wait_until(Duration::from_secs(2), || worker.current_load() == 2).await);

    gate.add_permits(2);
    for handle in [first, second, third] {
        let job = handle.await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.worker_id.as_deref(), Some("worker-gated"));
    }
    assert_eq!(worker.current_load(), 0);
}

#[tokio::test]
async fn test_concurrent_offers_never_exceed_capacity() {
    let dir = TempDir::new().unwrap();
    let (worker, gate) = gated_worker(3, &dir).await;

    let handles: Vec<_> = (0..10)
        .map(|i| spawn_job(&worker, queued_job(JobRequest::command(format!("job {}", i)))))
        .collect();

    assert!(wait_until(Duration::from_secs(2), || worker.current_load() == 3).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(worker.current_load(), 3);

    gate.add_permits(3);
    let mut accepted = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(JobError::WorkerUnavailable { .. }) => rejected += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(accepted, 3);
    assert_eq!(rejected, 7);
}

#[tokio::test]
async fn test_rejects_jobs_before_start() {
    let dir = TempDir::new().unwrap();
    let (executor, _gate) = GatedExecutor::new();
    let worker = Worker::new(test_worker_config("worker-idle", 2, &dir), executor);

    assert!(!worker.is_running());
    assert!(!worker.is_healthy());
    assert!(!worker.can_accept_job());

    let mut job = queued_job(JobRequest::command("x"));
    let err = worker
        .execute_job(&CancellationToken::new(), &mut job)
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::WorkerUnavailable { .. }));
}

#[tokio::test]
async fn test_rejects_jobs_while_unhealthy() {
    let dir = TempDir::new().unwrap();
    let (worker, gate) = gated_worker(2, &dir).await;

    worker.set_healthy(false);
    assert!(!worker.can_accept_job());
    let mut job = queued_job(JobRequest::command("x"));
    let err = worker
        .execute_job(&CancellationToken::new(), &mut job)
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::WorkerUnavailable { .. }));

    worker.set_healthy(true);
    gate.add_permits(1);
    let job = spawn_job(&worker, job).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_rejects_same_job_twice() {
    let dir = TempDir::new().unwrap();
    let (worker, gate) = gated_worker(4, &dir).await;
    let job = queued_job(JobRequest::command("x"));

    let first = spawn_job(&worker, job.clone());
    assert!(wait_until(Duration::from_secs(2), || worker.current_load() == 1).await);

    let mut duplicate = job.clone();
    let err = worker
        .execute_job(&CancellationToken::new(), &mut duplicate)
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(worker.current_load(), 1);

    gate.add_permits(1);
    first.await.unwrap().unwrap();
    assert_eq!(worker.current_load(), 0);
}

#[tokio::test]
async fn test_job_must_be_queued() {
    let dir = TempDir::new().unwrap();
    let (worker, _gate) = gated_worker(1, &dir).await;
    let mut job = JobRequest::command("x").to_job().unwrap();

    let err = worker
        .execute_job(&CancellationToken::new(), &mut job)
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(worker.current_load(), 0);
}

// =============================================================================
// Cleanup
// =============================================================================

#[tokio::test]
async fn test_executor_error_releases_slot() {
    let dir = TempDir::new().unwrap();
    let worker = Worker::new(
        test_worker_config("worker-refusing", 1, &dir),
        Arc::new(RefusingExecutor),
    );
    worker.start().await.unwrap();

    let mut job = queued_job(JobRequest::command("x"));
    let err = worker
        .execute_job(&CancellationToken::new(), &mut job)
        .await
        .unwrap_err();

    assert!(err.is_execution());
    assert_eq!(worker.current_load(), 0);
    assert!(worker.current_jobs().is_empty());
    assert!(worker.can_accept_job());
}

#[tokio::test]
async fn test_aborted_execution_releases_slot() {
    let dir = TempDir::new().unwrap();
    let (worker, _gate) = gated_worker(1, &dir).await;

    let handle = spawn_job(&worker, queued_job(JobRequest::command("x")));
    assert!(wait_until(Duration::from_secs(2), || worker.current_load() == 1).await);

    handle.abort();
    assert!(wait_until(Duration::from_secs(2), || worker.current_load() == 0).await);
    assert!(worker.can_accept_job());
}

#[tokio::test]
async fn test_cancelled_job_is_failed_and_released() {
    let dir = TempDir::new().unwrap();
    let (worker, _gate) = gated_worker(1, &dir).await;
    let cancel = CancellationToken::new();

    let runner = {
        let worker = worker.clone();
        let cancel = cancel.clone();
        let mut job = queued_job(JobRequest::command("x"));
        tokio::spawn(async move {
            let result = worker.execute_job(&cancel, &mut job).await;
            (job, result)
        })
    };
    assert!(wait_until(Duration::from_secs(2), || worker.current_load() == 1).await);

    cancel.cancel();
    let (job, result) = runner.await.unwrap();

    let result = result.unwrap();
    assert_eq!(result.status, JobStatus::Failed);
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.completed_at.is_some());
    assert_eq!(worker.current_load(), 0);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_start_creates_working_directory() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("a").join("b");
    let config = test_worker_config("worker-dir", 1, &dir).with_working_directory(&nested);
    let (executor, _gate) = GatedExecutor::new();
    let worker = Worker::new(config, executor);

    worker.start().await.unwrap();

    assert!(nested.is_dir());
    assert!(worker.is_running());
    assert!(worker.is_healthy());
}

#[tokio::test]
async fn test_start_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let (executor, _gate) = GatedExecutor::new();
    let worker = Worker::new(test_worker_config("worker-zero", 0, &dir), executor);

    let err = worker.start().await.unwrap_err();

    assert!(err.is_validation());
    assert!(!worker.is_running());
}

#[tokio::test]
async fn test_stop_idle_worker_drains_immediately() {
    let dir = TempDir::new().unwrap();
    let (worker, _gate) = gated_worker(2, &dir).await;

    let outcome = worker.stop(&CancellationToken::new()).await;

    assert_eq!(outcome, StopOutcome::Drained);
    assert!(!worker.is_running());
    assert!(!worker.can_accept_job());
}

#[tokio::test]
async fn test_start_rejects_zero_grace_period() {
    let dir = TempDir::new().unwrap();
    let (executor, _gate) = GatedExecutor::new();
    let config =
        test_worker_config("worker-no-grace", 1, &dir).with_shutdown_grace_period(Duration::ZERO);
    let worker = Worker::new(config, executor);

    assert!(worker.start().await.unwrap_err().is_validation());
}

#[tokio::test]
async fn test_idle_stop_drains_even_when_grace_is_already_spent() {
    for _ in 0..50 {
        let dir = TempDir::new().unwrap();
        let (executor, _gate) = GatedExecutor::new();
        let config = test_worker_config("worker-tight", 1, &dir)
            .with_shutdown_grace_period(Duration::from_nanos(1));
        let worker = Worker::new(config, executor);
        worker.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(worker.stop(&cancel).await, StopOutcome::Drained);
    }
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_jobs() {
    let dir = TempDir::new().unwrap();
    let (worker, gate) = gated_worker(2, &dir).await;
    let handle = spawn_job(&worker, queued_job(JobRequest::command("x")));
    assert!(wait_until(Duration::from_secs(2), || worker.current_load() == 1).await);

    let releaser = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        gate.add_permits(1);
    });

    let outcome = worker.stop(&CancellationToken::new()).await;

    assert_eq!(outcome, StopOutcome::Drained);
    assert_eq!(handle.await.unwrap().unwrap().status, JobStatus::Completed);
    releaser.await.unwrap();
}

#[tokio::test]
async fn test_stop_rejects_new_jobs_while_draining() {
    let dir = TempDir::new().unwrap();
    let (worker, gate) = gated_worker(2, &dir).await;
    let handle = spawn_job(&worker, queued_job(JobRequest::command("x")));
    assert!(wait_until(Duration::from_secs(2), || worker.current_load() == 1).await);

    let stopper = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.stop(&CancellationToken::new()).await })
    };
    assert!(wait_until(Duration::from_secs(2), || !worker.is_running()).await);

    let mut late = queued_job(JobRequest::command("late"));
    let err = worker
        .execute_job(&CancellationToken::new(), &mut late)
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::WorkerUnavailable { .. }));

    gate.add_permits(1);
    handle.await.unwrap().unwrap();
    assert_eq!(stopper.await.unwrap(), StopOutcome::Drained);
}

#[tokio::test]
async fn test_stop_times_out_with_stuck_job() {
    let dir = TempDir::new().unwrap();
    let (worker, gate) = gated_worker(1, &dir).await;
    let handle = spawn_job(&worker, queued_job(JobRequest::command("stuck")));
    assert!(wait_until(Duration::from_secs(2), || worker.current_load() == 1).await);

    let start = std::time::Instant::now();
    let outcome = worker.stop(&CancellationToken::new()).await;

    assert_eq!(outcome, StopOutcome::TimedOut);
    assert!(start.elapsed() >= Duration::from_millis(500));
    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(worker.current_load(), 1);

    gate.add_permits(1);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stop_honours_caller_cancellation() {
    let dir = TempDir::new().unwrap();
    let (worker, gate) = gated_worker(1, &dir).await;
    let handle = spawn_job(&worker, queued_job(JobRequest::command("stuck")));
    assert!(wait_until(Duration::from_secs(2), || worker.current_load() == 1).await);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = worker.stop(&cancel).await;

    assert_eq!(outcome, StopOutcome::Cancelled);

    gate.add_permits(1);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_heartbeat_loop_refreshes_until_shutdown() {
    let dir = TempDir::new().unwrap();
    let (worker, _gate) = gated_worker(1, &dir).await;
    let before = worker.last_heartbeat();
    let shutdown = CancellationToken::new();

    let loops = spawn_background_loops(&worker, &shutdown);
    assert!(wait_until(Duration::from_secs(2), || worker.last_heartbeat() > before).await);

    shutdown.cancel();
    for handle in loops {
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn test_background_loops_exit_when_worker_stops() {
    let dir = TempDir::new().unwrap();
    let (worker, _gate) = gated_worker(1, &dir).await;
    let loops = spawn_background_loops(&worker, &CancellationToken::new());

    worker.stop(&CancellationToken::new()).await;

    for handle in loops {
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn test_info_reflects_state() {
    let dir = TempDir::new().unwrap();
    let (worker, gate) = gated_worker(2, &dir).await;
    let job = queued_job(JobRequest::command("x"));
    let job_id = job.id.clone();
    let handle = spawn_job(&worker, job);
    assert!(wait_until(Duration::from_secs(2), || worker.current_load() == 1).await);

    let info = worker.info();
    assert_eq!(info.id, "worker-gated");
    assert!(info.running);
    assert!(info.healthy);
    assert_eq!(info.capacity, 2);
    assert_eq!(info.current_load, 1);
    assert!(info.can_accept);
    assert_eq!(info.current_jobs, vec![job_id]);
    assert_eq!(info.working_dir, dir.path());

    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["capacity"], 2);

    gate.add_permits(1);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_worker_runs_real_executor() {
    let dir = TempDir::new().unwrap();
    let config = test_worker_config("worker-real", 2, &dir);
    let executor = JobExecutor::new(config.executor_config()).unwrap();
    let worker = Worker::new(config, Arc::new(executor));
    worker.start().await.unwrap();

    let mut job = queued_job(JobRequest::command("echo from-worker"));
    let result = worker
        .execute_job(&CancellationToken::new(), &mut job)
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.output.as_deref(), Some("from-worker\n"));
    assert_eq!(job.exit_code, Some(0));
    assert_eq!(job.worker_id.as_deref(), Some("worker-real"));
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
}
