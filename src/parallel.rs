//! Parallel processing configuration and management
//!
//! This module configures Rayon's global thread pool and publishes the
//! tuning knobs used by the transform, accumulate and binning engines.

use crate::errors::{Result, RuLaVarError};
use rayon::ThreadPoolBuilder;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default number of elements processed per parallel task.
pub const DEFAULT_GRAIN_SIZE: usize = 4096;

/// Default upper bound on the number of chunks of a parallel reduction.
pub const DEFAULT_MAX_CHUNKS: usize = 24;

/// Output chunks smaller than this are reduced into a private copy.
pub const DEFAULT_SMALL_OUTPUT_VOLUME: usize = 128;

static GRAIN_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_GRAIN_SIZE);
static MAX_CHUNKS: AtomicUsize = AtomicUsize::new(DEFAULT_MAX_CHUNKS);
static SMALL_OUTPUT_VOLUME: AtomicUsize = AtomicUsize::new(DEFAULT_SMALL_OUTPUT_VOLUME);

/// Configuration for parallel processing
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    pub num_threads: Option<usize>,
    pub grain_size: usize,
    pub max_chunks: usize,
    pub small_output_volume: usize,
}

impl ParallelConfig {
    /// Create a new parallel configuration
    pub fn new(num_threads: Option<usize>) -> Self {
        Self {
            num_threads,
            ..Self::new_default()
        }
    }

    /// Set up the global Rayon thread pool with the specified configuration
    pub fn setup_global_pool(&self) -> Result<()> {
        if let Some(num_threads) = self.num_threads {
            ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build_global()
                .map_err(|e| {
                    RuLaVarError::ThreadPoolError(format!(
                        "Failed to initialize thread pool with {} threads: {}",
                        num_threads, e
                    ))
                })?;

            tracing::info!(num_threads, "configured parallel processing");
        } else {
            tracing::info!("using default thread pool configuration");
        }

        Ok(())
    }

    /// Publish the engine tuning knobs process-wide and set up the pool.
    ///
    /// The knobs take effect even if the global pool was already built.
    pub fn install(&self) -> Result<()> {
        self.apply_tuning();
        self.setup_global_pool()
    }

    /// Publish only the engine tuning knobs.
    pub fn apply_tuning(&self) {
        GRAIN_SIZE.store(self.grain_size.max(1), Ordering::Relaxed);
        MAX_CHUNKS.store(self.max_chunks.max(1), Ordering::Relaxed);
        SMALL_OUTPUT_VOLUME.store(self.small_output_volume, Ordering::Relaxed);
    }

    /// Get the current number of threads being used
    pub fn current_threads(&self) -> usize {
        rayon::current_num_threads()
    }

    /// Create a configuration that uses all available CPU cores
    pub fn all_cores() -> Self {
        Self::new(Some(num_cpus::get()))
    }

    /// Create a configuration that uses a specific number of threads
    pub fn with_threads(num_threads: usize) -> Self {
        Self::new(Some(num_threads))
    }

    /// Override the grain size
    pub fn grain_size(mut self, grain_size: usize) -> Self {
        self.grain_size = grain_size;
        self
    }

    /// Override the chunk cap of parallel reductions
    pub fn max_chunks(mut self, max_chunks: usize) -> Self {
        self.max_chunks = max_chunks;
        self
    }

    /// Create a configuration that uses the default thread pool
    pub fn new_default() -> Self {
        Self {
            num_threads: None,
            grain_size: DEFAULT_GRAIN_SIZE,
            max_chunks: DEFAULT_MAX_CHUNKS,
            small_output_volume: DEFAULT_SMALL_OUTPUT_VOLUME,
        }
    }
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self::new_default()
    }
}

/// Number of elements per parallel task currently in effect.
pub fn grain_size() -> usize {
    GRAIN_SIZE.load(Ordering::Relaxed)
}

/// Chunk cap of parallel reductions currently in effect.
pub fn max_chunks() -> usize {
    MAX_CHUNKS.load(Ordering::Relaxed)
}

/// False-sharing threshold of parallel reductions currently in effect.
pub fn small_output_volume() -> usize {
    SMALL_OUTPUT_VOLUME.load(Ordering::Relaxed)
}

/// Split `0..len` into at most `max` contiguous ranges of near-equal size.
pub(crate) fn chunk_ranges(len: usize, max: usize) -> Vec<std::ops::Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let nchunk = max.clamp(1, len);
    let chunk = len.div_ceil(nchunk);
    (0..len)
        .step_by(chunk)
        .map(|begin| begin..(begin + chunk).min(len))
        .collect()
}

/// Get information about the current parallel configuration
pub fn get_parallel_info() -> ParallelInfo {
    ParallelInfo {
        current_threads: rayon::current_num_threads(),
        available_cores: num_cpus::get(),
        available_parallelism: std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(1),
        grain_size: grain_size(),
        max_chunks: max_chunks(),
    }
}

/// Information about the parallel processing environment
#[derive(Debug, Clone)]
pub struct ParallelInfo {
    pub current_threads: usize,
    pub available_cores: usize,
    pub available_parallelism: usize,
    pub grain_size: usize,
    pub max_chunks: usize,
}

impl ParallelInfo {
    /// Log parallel processing information
    pub fn log_info(&self) {
        tracing::info!(
            current_threads = self.current_threads,
            available_cores = self.available_cores,
            available_parallelism = self.available_parallelism,
            grain_size = self.grain_size,
            max_chunks = self.max_chunks,
            "parallel processing information"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallel_config() {
        let default_config = ParallelConfig::new_default();
        assert!(default_config.num_threads.is_none());
        assert_eq!(default_config.max_chunks, DEFAULT_MAX_CHUNKS);

        let config_4 = ParallelConfig::with_threads(4).grain_size(16);
        assert_eq!(config_4.num_threads, Some(4));
        assert_eq!(config_4.grain_size, 16);

        let all_cores_config = ParallelConfig::all_cores();
        assert!(all_cores_config.num_threads.unwrap() > 0);
        assert!(default_config.current_threads() > 0);
    }

    #[test]
    fn test_chunk_ranges() {
        assert!(chunk_ranges(0, 4).is_empty());
        assert_eq!(chunk_ranges(10, 3), vec![0..4, 4..8, 8..10]);
        assert_eq!(chunk_ranges(2, 24), vec![0..1, 1..2]);
        let covered: usize = chunk_ranges(1000, 24).iter().map(|r| r.len()).sum();
        assert_eq!(covered, 1000);
    }

    #[test]
    fn test_parallel_info() {
        let info = get_parallel_info();
        assert!(info.current_threads > 0);
        assert!(info.available_cores > 0);
        assert!(info.available_parallelism > 0);
        info.log_info();
    }
}
