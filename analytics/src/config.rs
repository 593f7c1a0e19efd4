use std::net::SocketAddr;
use std::num::NonZeroUsize;

use envconfig::Envconfig;
use tracing::Level;

use crate::window::DEFAULT_WINDOW_CAPACITY;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:3301")]
    pub address: SocketAddr,

    // Used for integration tests
    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(default = "info")]
    pub log_level: Level,

    #[envconfig(default = "10")]
    pub trending_limit: usize,

    #[envconfig(nested = true)]
    pub pipeline: PipelineConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct PipelineConfig {
    /// Events persisted per bulk write when ingesting a batch.
    #[envconfig(default = "1000")]
    pub batch_size: NonZeroUsize,

    #[envconfig(default = "1000")]
    pub window_capacity: usize,

    /// Width of the pool running fire-and-forget ingestions.
    #[envconfig(default = "1024")]
    pub max_concurrent_jobs: NonZeroUsize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: NonZeroUsize::new(1000).expect("1000 is non-zero"),
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            max_concurrent_jobs: NonZeroUsize::new(1024).expect("1024 is non-zero"),
        }
    }
}
