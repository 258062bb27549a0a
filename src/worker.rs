pub mod poll;
pub mod pool;

use std::time::Duration;

use clap::Parser;

pub use poll::{PollLoop, PollOptions};
pub use pool::WorkerPool;

use crate::util::retry::RetryConfig;

/// Command line flags for the worker process.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Run the quiz generation worker", long_about = None, allow_negative_numbers = true)]
pub struct WorkerArgs {
    /// Concurrent jobs
    #[arg(long, default_value_t = 5)]
    pub max_workers: usize,

    /// Pending fetch size
    #[arg(long, default_value_t = 20)]
    pub batch_size: i64,

    /// Process one batch and exit
    #[arg(long)]
    pub once: bool,

    /// Sleep interval in seconds when no pending jobs
    #[arg(long, default_value_t = 2.0)]
    pub poll_seconds: f64,

    /// Base backoff in seconds when the pending fetch fails
    #[arg(long, default_value_t = 2.0)]
    pub network_retry_base_seconds: f64,

    /// Max backoff in seconds when the pending fetch fails
    #[arg(long, default_value_t = 60.0)]
    pub network_retry_max_seconds: f64,
}

impl WorkerArgs {
    #[must_use]
    pub fn poll_options(&self) -> PollOptions {
        let base = Duration::from_secs_f64(self.network_retry_base_seconds.max(0.1));
        let max = Duration::from_secs_f64(self.network_retry_max_seconds.max(0.1)).max(base);
        PollOptions {
            batch_size: self.batch_size.max(1),
            once: self.once,
            poll_interval: Duration::from_secs_f64(self.poll_seconds.max(0.1)),
            network_retry: RetryConfig::new(usize::MAX, base, Some(max)),
        }
    }
}
