//! soup: balance tests across parallel workers through a shared on-disk queue.
//!
//! Several independent worker processes on one host (one per device or
//! emulator, say) each run `soup`. The first to take the queue lock
//! discovers the tests, estimates their cost from earlier JUnit reports and
//! splits them into time-balanced buckets. Every worker then claims buckets
//! one at a time until none are left, so each test runs exactly once.
//!
//! # Architecture
//!
//! ```text
//!  discovery ──► report (enrich) ──► partition ──► queue ◄── worker × N
//!  (catalog)     (durations)         (buckets)     (flock)
//!  └──────────────── planner ──────────────────┘
//! ```
//!
//! - **Discovery**: find candidate tests in sources and explicit lists
//! - **Report**: replace default durations with observed ones
//! - **Partition**: sort and cut the catalog into balanced buckets
//! - **Queue**: exactly-once initialization and atomic dequeue across processes
//! - **Worker**: drain the queue through a bucket runner
//!
//! # Example
//!
//! ```no_run
//! use soup::config::load_config_or_default;
//! use soup::planner::{PlanInputs, Planner};
//! use soup::queue::{LockPolicy, SharedQueue, Take};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config_or_default(std::path::Path::new("soup.toml"))?;
//!     let inputs = PlanInputs { src_dir: "app/src/androidTest".into(), ..Default::default() };
//!     let planner = Planner::from_config(&config, &inputs, 4);
//!
//!     let queue = SharedQueue::open(config.queue.clone(), LockPolicy::from_config(&config.lock))?;
//!     queue.cook(&planner).await?;
//!     if let Take::Bucket(path) = queue.take().await? {
//!         println!("{}", path.display());
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod discovery;
pub mod partition;
pub mod planner;
pub mod queue;
pub mod report;
pub mod worker;

// Re-export commonly used types
pub use config::{Config, load_config};
pub use discovery::{Catalog, TestDiscoverer, TestIdentifier};
pub use partition::{Bucket, Partitioner};
pub use planner::{PlanInputs, Planner};
pub use queue::{CookOutcome, QueueError, SharedQueue, Take};
pub use report::{DurationEstimator, Precedence};
pub use worker::{BucketRunner, Worker};
