use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use infinitrain::config::{WorkerConfig, DEFAULT_WORKING_DIRECTORY};
use infinitrain::job::{parse_duration, Job, JobRequest, JobStatus};
use infinitrain::scheduler::JobStore;
use infinitrain::shutdown::cancel_on_signal;
use infinitrain::worker::heartbeat::spawn_background_loops;
use infinitrain::worker::{JobExecutor, Worker};

#[derive(Parser, Debug)]
#[command(name = "infinitrain")]
#[command(version)]
#[command(about = "Run command, script, HTTP and file jobs on capacity-bounded workers")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a worker and keep it running until SIGINT/SIGTERM
    Worker(WorkerArgs),

    /// Execute a single job request locally and print the finished job
    Run(RunArgs),
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(clap::Args, Debug)]
struct WorkerOptions {
    /// Worker ID (defaults to worker-<hostname>-<unix-seconds>)
    #[arg(long)]
    id: Option<String>,

    /// Maximum number of jobs executing at once
    #[arg(long, default_value = "5")]
    capacity: usize,

    /// Directory jobs run in
    #[arg(long, default_value = DEFAULT_WORKING_DIRECTORY)]
    working_dir: PathBuf,

    /// Timeout for jobs submitted without one (e.g. "5m", "90s")
    #[arg(long, default_value = "5m", value_parser = parse_duration)]
    default_timeout: Duration,
}

#[derive(Parser, Debug)]
struct WorkerArgs {
    #[command(flatten)]
    worker: WorkerOptions,

    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    heartbeat_interval: Duration,

    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    poll_interval: Duration,

    /// How long to wait for in-flight jobs on shutdown
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    shutdown_grace: Duration,
}

#[derive(Parser, Debug)]
struct RunArgs {
    #[command(flatten)]
    worker: WorkerOptions,

    /// Job request as JSON, e.g. '{"type":"command","command":"echo hi"}'
    #[arg(long, conflicts_with = "file")]
    request: Option<String>,

    /// Read the job request from a JSON file (stdin when neither is given)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(options: WorkerOptions) -> WorkerConfig {
    let config = match options.id {
        Some(id) => WorkerConfig::new(id),
        None => WorkerConfig::default(),
    };
    config
        .with_max_concurrent_jobs(options.capacity)
        .with_working_directory(options.working_dir)
        .with_default_job_timeout(options.default_timeout)
}

fn build_worker(config: WorkerConfig) -> Result<Arc<Worker>, Box<dyn std::error::Error>> {
    let executor = JobExecutor::new(config.executor_config())?;
    Ok(Arc::new(Worker::new(config, Arc::new(executor))))
}

async fn read_request(args: &RunArgs) -> Result<JobRequest, Box<dyn std::error::Error>> {
    let raw = match (&args.request, &args.file) {
        (Some(json), _) => json.clone(),
        (None, Some(path)) => tokio::fs::read_to_string(path).await?,
        (None, None) => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };
    Ok(serde_json::from_str(&raw)?)
}

fn print_job(job: &Job, output_format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(job)?),
        OutputFormat::Table => {
            println!("Job ID:     {}", job.id);
            println!("Type:       {}", job.job_type);
            println!("Status:     {}", job.status);
            if let Some(worker_id) = &job.worker_id {
                println!("Worker:     {}", worker_id);
            }
            if let Some(exit_code) = job.exit_code {
                println!("Exit Code:  {}", exit_code);
            }
            println!("Duration:   {:?}", job.duration());
            if let Some(error) = &job.error {
                println!("Error:      {}", error);
            }
            if let Some(output) = job.output.as_deref().filter(|o| !o.is_empty()) {
                println!("Output:");
                for line in output.lines() {
                    println!("  {}", line);
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_worker(args: WorkerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(args.worker)
        .with_heartbeat_interval(args.heartbeat_interval)
        .with_job_poll_interval(args.poll_interval)
        .with_shutdown_grace_period(args.shutdown_grace);
    let worker = build_worker(config)?;
    let shutdown = CancellationToken::new();
    let _signals = cancel_on_signal(&shutdown)?;

    worker.start().await?;
    let loops = spawn_background_loops(&worker, &shutdown);

    shutdown.cancelled().await;
    let outcome = worker.stop(&CancellationToken::new()).await;
    for handle in loops {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Background loop ended abnormally");
        }
    }

    tracing::info!(worker_id = %worker.id(), outcome = ?outcome, "Worker exited");
    Ok(())
}

async fn run_job(args: RunArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let mut request = read_request(&args).await?;
    let config = build_config(args.worker);
    let mut job = request.to_job_with_default_timeout(config.default_job_timeout)?;

    let store = JobStore::new();
    store.create(job.clone()).await?;
    store.update_status(&job.id, JobStatus::Queued).await?;
    job = store.get(&job.id).await?;

    let worker = build_worker(config)?;
    let shutdown = CancellationToken::new();
    let _signals = cancel_on_signal(&shutdown)?;
    worker.start().await?;

    let result = worker.execute_job(&shutdown, &mut job).await;
    store.update(job.clone()).await?;
    worker.stop(&shutdown).await;

    let result = result?;
    print_job(&store.get(&job.id).await?, &args.output)?;
    Ok(if result.is_success() { 0 } else { result.exit_code })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing();

    match args.command {
        Commands::Worker(worker_args) => run_worker(worker_args).await?,
        Commands::Run(run_args) => {
            let code = run_job(run_args).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
    }

    Ok(())
}
