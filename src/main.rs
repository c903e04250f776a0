//! soup CLI - time-balanced test distribution across worker processes.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use soup::config::{self, Config};
use soup::planner::{PlanInputs, Planner};
use soup::queue::{CookOutcome, LockPolicy, SharedQueue, Take};
use soup::worker::{CommandRunner, Worker};

const EXIT_EXHAUSTED: u8 = 2;
const EXIT_NOT_INITIALIZED: u8 = 3;

#[derive(Parser)]
#[command(name = "soup")]
#[command(about = "Balance tests across parallel workers through a shared queue file", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "soup.toml", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct InputArgs {
    /// Directory of test sources to scan
    #[arg(long)]
    src_dir: PathBuf,

    /// Directory of JUnit reports from earlier runs
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// File of `Class#name[#secs]` lines to add to the catalog
    #[arg(long)]
    test_list: Option<PathBuf>,
}

impl InputArgs {
    fn to_inputs(&self) -> PlanInputs {
        PlanInputs {
            src_dir: self.src_dir.clone(),
            report_dir: self.report_dir.clone(),
            test_list: self.test_list.clone(),
        }
    }
}

#[derive(Args, Clone, Copy)]
struct WorkerArgs {
    /// Number of parallel workers
    #[arg(long, visible_alias = "device-num", value_parser = clap::value_parser!(u32).range(1..))]
    workers: u32,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the shared queue unless another worker already has
    Cook {
        #[command(flatten)]
        inputs: InputArgs,

        #[command(flatten)]
        workers: WorkerArgs,

        /// Delete the queue and bucket files first
        #[arg(long)]
        clean: bool,
    },

    /// Claim the next bucket and print its path
    ///
    /// Exits with 2 when the queue is exhausted and 3 when it was never
    /// initialized.
    Take,

    /// Cook, then run a command for every bucket this worker claims
    Work {
        #[command(flatten)]
        inputs: InputArgs,

        #[command(flatten)]
        workers: WorkerArgs,

        /// Shell command run per bucket; `{bucket}` is replaced with its path
        #[arg(long)]
        exec: String,

        /// Per-bucket time limit in seconds
        #[arg(long)]
        bucket_timeout: Option<u64>,
    },

    /// Show the buckets a cook would produce, without touching the queue
    Plan {
        #[command(flatten)]
        inputs: InputArgs,

        #[command(flatten)]
        workers: WorkerArgs,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Discover tests and print them with their estimated durations
    Collect {
        #[command(flatten)]
        inputs: InputArgs,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete the queue file and empty the bucket directory
    Clean,

    /// Write a configuration file with the defaults
    Init,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Set up logging; stdout is reserved for command output
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = if matches!(cli.command, Commands::Init) {
        Config::default()
    } else {
        config::load_config_or_default(&cli.config)
            .with_context(|| format!("Failed to load config from {}", cli.config.display()))?
    };

    match cli.command {
        Commands::Cook {
            inputs,
            workers,
            clean,
        } => cook(&config, &inputs, workers.workers as usize, clean).await,
        Commands::Take => take(&config).await,
        Commands::Work {
            inputs,
            workers,
            exec,
            bucket_timeout,
        } => {
            work(
                &config,
                &inputs,
                workers.workers as usize,
                &exec,
                bucket_timeout,
            )
            .await
        }
        Commands::Plan {
            inputs,
            workers,
            format,
        } => plan(&config, &inputs, workers.workers as usize, &format),
        Commands::Collect { inputs, format } => collect(&config, &inputs, &format),
        Commands::Clean => {
            SharedQueue::clean(&config.queue).context("Failed to clean queue")?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Init => init_config(&cli.config),
    }
}

fn open_queue(config: &Config) -> Result<SharedQueue> {
    SharedQueue::open(config.queue.clone(), LockPolicy::from_config(&config.lock)).with_context(
        || {
            format!(
                "Failed to open queue file {}",
                config.queue.queue_file.display()
            )
        },
    )
}

async fn cook(
    config: &Config,
    inputs: &InputArgs,
    workers: usize,
    clean: bool,
) -> Result<ExitCode> {
    if clean {
        SharedQueue::clean(&config.queue).context("Failed to clean queue")?;
    }

    let planner = Planner::from_config(config, &inputs.to_inputs(), workers);
    let queue = open_queue(config)?;

    match queue.cook(&planner).await.context("Failed to cook queue")? {
        CookOutcome::Initialized { buckets, tests } => {
            println!("Queued {} buckets for {} tests", buckets, tests);
        }
        CookOutcome::AlreadyInitialized => {
            println!("Queue already initialized");
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn take(config: &Config) -> Result<ExitCode> {
    let queue = open_queue(config)?;

    match queue.take().await.context("Failed to take from queue")? {
        Take::Bucket(path) => {
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Take::Exhausted => {
            info!("Queue exhausted");
            Ok(ExitCode::from(EXIT_EXHAUSTED))
        }
        Take::NotInitialized => {
            info!("Queue not initialized");
            Ok(ExitCode::from(EXIT_NOT_INITIALIZED))
        }
    }
}

async fn work(
    config: &Config,
    inputs: &InputArgs,
    workers: usize,
    exec: &str,
    bucket_timeout: Option<u64>,
) -> Result<ExitCode> {
    let planner = Planner::from_config(config, &inputs.to_inputs(), workers);
    let queue = open_queue(config)?;
    queue.cook(&planner).await.context("Failed to cook queue")?;

    let mut runner = CommandRunner::new(exec);
    if let Some(secs) = bucket_timeout {
        runner = runner.with_timeout(Duration::from_secs(secs));
    }

    let summary = Worker::new(&queue, &runner).run().await?;

    println!(
        "Ran {} buckets ({} tests), {} failed",
        summary.buckets,
        summary.tests,
        summary.failed.len()
    );
    for bucket in &summary.failed {
        println!("  failed: {}", bucket.display());
    }

    if summary.success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn plan(config: &Config, inputs: &InputArgs, workers: usize, format: &str) -> Result<ExitCode> {
    let plan = Planner::from_config(config, &inputs.to_inputs(), workers).plan()?;

    match format {
        "json" => {
            let buckets: Vec<_> = plan
                .buckets
                .iter()
                .map(|b| {
                    serde_json::json!({
                        "total_secs": b.total_secs(),
                        "tests": b.tests().iter().map(|t| t.full_method_name()).collect::<Vec<_>>(),
                    })
                })
                .collect();
            let json = serde_json::json!({
                "tests": plan.tests,
                "total_secs": plan.total_secs,
                "buckets": buckets,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        _ => {
            println!(
                "{} tests, {:.3}s total, {} buckets:",
                plan.tests,
                plan.total_secs,
                plan.buckets.len()
            );
            for (i, bucket) in plan.buckets.iter().enumerate() {
                println!(
                    "  {}{}: {} tests, {:.3}s",
                    config.queue.bucket_prefix,
                    i,
                    bucket.len(),
                    bucket.total_secs()
                );
                for test in bucket.tests() {
                    println!("    {}", test.full_method_name());
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn collect(config: &Config, inputs: &InputArgs, format: &str) -> Result<ExitCode> {
    let catalog = Planner::from_config(config, &inputs.to_inputs(), 1).catalog()?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&catalog)?);
        }
        _ => {
            println!(
                "Discovered {} tests ({:.3}s):",
                catalog.len(),
                catalog.total_secs()
            );
            for test in catalog.tests() {
                println!("  {}", test);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

const CONFIG_TEMPLATE: &str = r#"# soup configuration file

[queue]
# Shared queue file: one bucket path per line. Every worker must use the same one.
queue_file = "soup"
# Directory that receives the bucket files
work_dir = "testcase"
bucket_prefix = "testcase-"

[lock]
# Non-blocking attempts before blocking on the queue lock
retry_count = 100
retry_interval_ms = 1000
# Fail instead of blocking forever
# timeout_secs = 600

[discovery]
source_extensions = ["java"]
report_extensions = ["xml"]
# Write the sorted catalog here when initializing
# catalog_log = "tests.log"

[partition]
# Mean duration at or below which timings count as unknown (buckets are doubled)
unknown_threshold_secs = 0.2
# How repeated report entries combine: latest, longest, mean
precedence = "latest"
"#;

fn init_config(path: &Path) -> Result<ExitCode> {
    if path.exists() {
        anyhow::bail!(
            "{} already exists. Remove it first or edit manually.",
            path.display()
        );
    }

    std::fs::write(path, CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Created {}", path.display());
    println!();
    println!("Edit the configuration as needed, then on every worker run:");
    println!("  soup work --src-dir <dir> --workers <n> --exec '<command> {{bucket}}'");

    Ok(ExitCode::SUCCESS)
}
