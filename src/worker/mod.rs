//! Job execution on a worker.
//!
//! - [`JobExecutor`]: runs command, script, HTTP and file jobs under a timeout
//! - [`Worker`]: admits jobs up to its capacity and drains on shutdown
//! - [`heartbeat`]: the worker's background heartbeat and poll loops
//!
//! # Execution Flow
//!
//! 1. A caller offers a `queued` job to [`Worker::execute_job`]
//! 2. The worker admits it if healthy, running and below capacity
//! 3. The job moves to `running` and [`Executor::execute`] runs its strategy
//! 4. The returned [`JobResult`](crate::job::JobResult) is applied to the job
//!
//! # Security Note
//!
//! Jobs run with the worker's own privileges. Nothing is sandboxed.

pub mod executor;
pub mod heartbeat;
pub mod supervisor;

pub use executor::{Executor, FileOperation, JobExecutor, StrategyOutput};
pub use supervisor::{StopOutcome, Worker, WorkerInfo};
