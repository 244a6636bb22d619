/// Explicit compute context for training and prediction
///
/// Intra-batch arithmetic runs on a rayon pool owned by this value rather
/// than on the process-wide global pool.
use anyhow::{Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Worker threads; 0 lets rayon pick one per core
    pub threads: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig { threads: 0 }
    }
}

pub struct Device {
    pool: rayon::ThreadPool,
}

impl Device {
    pub fn new(config: DeviceConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("hicsr-worker-{i}"))
            .build()
            .context("Failed to build compute thread pool")?;
        log::info!("Using CPU device with {} worker threads", pool.current_num_threads());
        Ok(Device { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `op` with this device's pool as the current rayon pool
    pub fn run<R: Send, F: FnOnce() -> R + Send>(&self, op: F) -> R {
        self.pool.install(op)
    }
}
