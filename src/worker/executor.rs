use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::ExecutorConfig;
use crate::error::{JobError, Result};
use crate::job::{Job, JobResult, JobStatus, JobType};

/// Environment prefix marking entries that become HTTP request headers.
pub const HTTP_HEADER_PREFIX: &str = "HTTP_HEADER_";

/// Environment key selecting the operation of a file job.
pub const FILE_OPERATION_KEY: &str = "FILE_OPERATION";

const STDERR_SEPARATOR: &str = "\n---STDERR---\n";

/// Runs jobs and reports their outcome.
///
/// Strategy failures (non-zero exits, HTTP errors, timeouts) come back as a
/// `JobResult` with status `failed`. `Err` is reserved for jobs the executor
/// cannot run at all.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, cancel: &CancellationToken, job: &Job) -> Result<JobResult>;

    fn can_execute(&self, job_type: JobType) -> bool;

    fn name(&self) -> &str;
}

/// Raw outcome of one strategy, before it is folded into a [`JobResult`].
#[derive(Debug)]
pub struct StrategyOutput {
    pub output: String,
    pub exit_code: i32,
    pub error: Option<JobError>,
}

impl StrategyOutput {
    fn success(output: String) -> Self {
        Self {
            output,
            exit_code: 0,
            error: None,
        }
    }

    fn failure(error: JobError) -> Self {
        Self {
            output: String::new(),
            exit_code: 1,
            error: Some(error),
        }
    }
}

/// Operation performed by a file job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    Read,
    Stat,
    List,
}

impl std::str::FromStr for FileOperation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "read" => Ok(FileOperation::Read),
            "stat" => Ok(FileOperation::Stat),
            "list" => Ok(FileOperation::List),
            other => Err(format!("unsupported file operation: {}", other)),
        }
    }
}

/// Executes command, script, HTTP and file jobs on the local host.
///
/// Commands and scripts run in the configured working directory with the
/// process environment overlaid by the job's `environment`. Nothing is
/// sandboxed: file jobs may reach any path the process can.
#[derive(Debug, Clone)]
pub struct JobExecutor {
    config: ExecutorConfig,
    http: reqwest::Client,
}

impl JobExecutor {
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    async fn dispatch(&self, job: &Job) -> StrategyOutput {
        match job.job_type {
            JobType::Command => self.run_command(job).await,
            JobType::Script => self.run_script(job).await,
            JobType::Http => self.run_http(job).await,
            JobType::File => self.run_file(job).await,
        }
    }

    /// Split `job.command` on whitespace and run it directly, without a shell.
    ///
    /// Quoting is not supported: `echo "a b"` passes `"a` and `b"` as arguments.
    pub async fn run_command(&self, job: &Job) -> StrategyOutput {
        let mut parts = job.command.split_whitespace();
        let Some(program) = parts.next() else {
            return StrategyOutput::failure(JobError::execution(&job.id, "empty command"));
        };

        let mut cmd = Command::new(program);
        cmd.args(parts);
        self.run_process(job, cmd).await
    }

    /// Write `job.script` to a per-job file in the working directory and run it
    /// with the configured shell. The file is removed on every exit path.
    pub async fn run_script(&self, job: &Job) -> StrategyOutput {
        let script_file = match tempfile::Builder::new()
            .prefix(&format!("script_{}_", job.id))
            .suffix(".sh")
            .tempfile_in(&self.config.working_directory)
        {
            Ok(file) => file,
            Err(e) => {
                return StrategyOutput::failure(JobError::execution_with_cause(
                    &job.id,
                    "failed to create script file",
                    e,
                ))
            }
        };

        if let Err(e) = tokio::fs::write(script_file.path(), &job.script).await {
            return StrategyOutput::failure(JobError::execution_with_cause(
                &job.id,
                "failed to write script file",
                e,
            ));
        }

        let mut cmd = Command::new(&self.config.shell);
        cmd.arg(script_file.path());
        let outcome = self.run_process(job, cmd).await;

        if let Err(e) = script_file.close() {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to remove script file");
        }
        outcome
    }

    async fn run_process(&self, job: &Job, mut cmd: Command) -> StrategyOutput {
        cmd.current_dir(&self.config.working_directory)
            .envs(&job.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return StrategyOutput::failure(JobError::execution_with_cause(
                    &job.id,
                    "failed to start process",
                    e,
                ))
            }
        };
        let group = ProcessGroupGuard::new(&job.id, child.id());

        let output = match child.wait_with_output().await {
            Ok(output) => output,
            Err(e) => {
                return StrategyOutput::failure(JobError::execution_with_cause(
                    &job.id,
                    "failed to wait for process",
                    e,
                ))
            }
        };
        group.disarm();

        let combined = combine_output(&output.stdout, &output.stderr);
        if output.status.success() {
            return StrategyOutput::success(combined);
        }

        // No code means the process was killed by a signal.
        let exit_code = output.status.code().unwrap_or(-1);
        StrategyOutput {
            output: combined,
            exit_code,
            error: Some(JobError::execution(
                &job.id,
                format!("process exited with {}", output.status),
            )),
        }
    }

    /// Send a bodiless request using the job's method and URL.
    ///
    /// Responses with status 400 and above fail the job but keep the body as output.
    pub async fn run_http(&self, job: &Job) -> StrategyOutput {
        let method_name = if job.method.is_empty() {
            "GET"
        } else {
            job.method.as_str()
        };
        let method = match reqwest::Method::from_bytes(method_name.as_bytes()) {
            Ok(method) => method,
            Err(e) => {
                return StrategyOutput::failure(JobError::execution_with_cause(
                    &job.id,
                    format!("invalid HTTP method {:?}", method_name),
                    e,
                ))
            }
        };

        let mut request = self.http.request(method, &job.url);
        for (key, value) in &job.environment {
            if let Some(header) = key.strip_prefix(HTTP_HEADER_PREFIX) {
                request = request.header(header, value);
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return StrategyOutput::failure(JobError::execution_with_cause(
                    &job.id,
                    "HTTP request failed",
                    e,
                ))
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return StrategyOutput::failure(JobError::execution_with_cause(
                    &job.id,
                    "failed to read response body",
                    e,
                ))
            }
        };

        let mut output = format!("Status: {}\n", status);
        if !body.is_empty() {
            output.push_str("Body: ");
            output.push_str(&body);
        }

        if status.as_u16() >= 400 {
            return StrategyOutput {
                output,
                exit_code: 1,
                error: Some(JobError::execution(
                    &job.id,
                    format!("HTTP request returned status {}", status.as_u16()),
                )),
            };
        }
        StrategyOutput::success(output)
    }

    /// Read, stat or list `job.file_path` as selected by `FILE_OPERATION`
    /// (default `read`). Relative paths resolve against the working directory.
    pub async fn run_file(&self, job: &Job) -> StrategyOutput {
        let operation = job
            .environment
            .get(FILE_OPERATION_KEY)
            .map(String::as_str)
            .unwrap_or("read");
        let operation = match operation.parse::<FileOperation>() {
            Ok(operation) => operation,
            Err(message) => {
                return StrategyOutput::failure(JobError::execution(&job.id, message))
            }
        };

        let path = self.resolve_path(&job.file_path);
        let (result, action) = match operation {
            FileOperation::Read => (read_file(&path).await, "failed to read file"),
            FileOperation::Stat => (stat_file(&path).await, "failed to stat file"),
            FileOperation::List => (list_directory(&path).await, "failed to read directory"),
        };

        match result {
            Ok(output) => StrategyOutput::success(output),
            Err(e) => {
                StrategyOutput::failure(JobError::execution_with_cause(&job.id, action, e))
            }
        }
    }

    fn resolve_path(&self, file_path: &str) -> PathBuf {
        let path = Path::new(file_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config.working_directory.join(path)
        }
    }

    fn into_result(
        job: &Job,
        outcome: StrategyOutput,
        started_at: DateTime<Utc>,
        clock: Instant,
    ) -> JobResult {
        let duration = clock.elapsed();
        let completed_at = Utc::now();

        let (status, error, exit_code) = match outcome.error {
            None => (JobStatus::Completed, None, 0),
            Some(error) => {
                let exit_code = if outcome.exit_code == 0 {
                    1
                } else {
                    outcome.exit_code
                };
                (JobStatus::Failed, Some(error.to_string()), exit_code)
            }
        };

        JobResult {
            job_id: job.id.clone(),
            status,
            output: outcome.output,
            error,
            exit_code,
            started_at,
            completed_at,
            duration,
        }
    }
}

#[async_trait]
impl Executor for JobExecutor {
    /// Run `job` until it finishes, its timeout elapses or `cancel` fires.
    ///
    /// Dropping the strategy future on timeout or cancellation kills the
    /// child's whole process group and removes any script file.
    async fn execute(&self, cancel: &CancellationToken, job: &Job) -> Result<JobResult> {
        if !self.can_execute(job.job_type) {
            return Err(JobError::validation(format!(
                "unsupported job type: {}",
                job.job_type
            )));
        }

        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            timeout = ?job.timeout,
            "Executing job"
        );

        let started_at = Utc::now();
        let clock = Instant::now();
        let deadline = async {
            if job.timeout.is_zero() {
                std::future::pending::<()>().await
            } else {
                tokio::time::sleep(job.timeout).await
            }
        };

        let outcome = tokio::select! {
            outcome = self.dispatch(job) => outcome,
            _ = deadline => StrategyOutput::failure(JobError::Timeout {
                job_id: job.id.clone(),
                timeout: job.timeout,
            }),
            _ = cancel.cancelled() => StrategyOutput::failure(JobError::Cancelled {
                job_id: job.id.clone(),
            }),
        };

        let result = Self::into_result(job, outcome, started_at, clock);
        match &result.error {
            None => tracing::info!(
                job_id = %job.id,
                status = %result.status,
                duration = ?result.duration,
                "Job completed"
            ),
            Some(error) => tracing::warn!(
                job_id = %job.id,
                status = %result.status,
                exit_code = result.exit_code,
                error = %error,
                "Job failed"
            ),
        }
        Ok(result)
    }

    fn can_execute(&self, job_type: JobType) -> bool {
        JobType::ALL.contains(&job_type)
    }

    fn name(&self) -> &str {
        "default-executor"
    }
}

/// SIGKILLs a child's whole process group when dropped.
///
/// `kill_on_drop` only reaches the direct child; anything a script starts
/// shares its process group and dies here instead. Disarmed once the child
/// has exited on its own.
struct ProcessGroupGuard {
    job_id: String,
    pgid: Option<Pid>,
}

impl ProcessGroupGuard {
    fn new(job_id: &str, pid: Option<u32>) -> Self {
        Self {
            job_id: job_id.to_string(),
            pgid: pid.and_then(|pid| i32::try_from(pid).ok()).map(Pid::from_raw),
        }
    }

    fn disarm(mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {
                tracing::debug!(job_id = %self.job_id, pgid = pgid.as_raw(), "Killed process group")
            }
            Err(e) => tracing::warn!(
                job_id = %self.job_id,
                pgid = pgid.as_raw(),
                error = %e,
                "Failed to kill process group"
            ),
        }
    }
}

fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut output = String::from_utf8_lossy(stdout).into_owned();
    if !stderr.is_empty() {
        if !output.is_empty() {
            output.push_str(STDERR_SEPARATOR);
        }
        output.push_str(&String::from_utf8_lossy(stderr));
    }
    output
}

async fn read_file(path: &Path) -> std::io::Result<String> {
    let content = tokio::fs::read(path).await?;
    Ok(format!(
        "File: {}\nSize: {} bytes\nContent:\n{}",
        path.display(),
        content.len(),
        String::from_utf8_lossy(&content)
    ))
}

async fn stat_file(path: &Path) -> std::io::Result<String> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = tokio::fs::metadata(path).await?;
    let modified = metadata
        .modified()
        .map(|at| DateTime::<Utc>::from(at).to_rfc3339())
        .unwrap_or_else(|_| "unknown".to_string());
    Ok(format!(
        "File: {}\nSize: {} bytes\nMode: {:o}\nModified: {}\nIsDir: {}",
        path.display(),
        metadata.len(),
        metadata.permissions().mode(),
        modified,
        metadata.is_dir()
    ))
}

async fn list_directory(path: &Path) -> std::io::Result<String> {
    let mut reader = tokio::fs::read_dir(path).await?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        // Entries removed between listing and stat are skipped.
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let modified = metadata
            .modified()
            .map(|at| DateTime::<Utc>::from(at).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        entries.push((
            entry.file_name().to_string_lossy().into_owned(),
            metadata.len(),
            modified,
        ));
    }
    entries.sort();

    let mut output = format!("Directory: {}\nEntries:\n", path.display());
    for (name, size, modified) in entries {
        output.push_str(&format!("  {} ({} bytes) {}\n", name, size, modified));
    }
    Ok(output)
}
