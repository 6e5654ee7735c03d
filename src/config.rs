//! Runtime configuration for the batch engine.
//!
//! Values come from the process environment (optionally seeded from a `.env`
//! file). Anything missing or unparsable falls back to the default.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Lower and upper bound for the worker-slot count.
pub const MIN_CONCURRENT_JOBS: usize = 1;
pub const MAX_CONCURRENT_JOBS: usize = 10;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Directory receiving compressed outputs and batch archives.
    pub output_dir: PathBuf,
    /// Number of jobs allowed to run at the same time.
    pub max_concurrent_jobs: usize,
    /// Interval of the synthetic per-file progress ramp.
    pub progress_tick: Duration,
    /// Age after which finished jobs and their artifacts are purged.
    pub retention: Duration,
    /// How often the cleanup scheduler runs.
    pub cleanup_interval: Duration,
    /// Ghostscript executable name or path.
    pub ghostscript_path: String,
    /// Upper bound for a single native compression run.
    pub file_timeout: Duration,
    /// Delay before a handed-out archive deletes itself.
    pub archive_ttl: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./batch-output"),
            max_concurrent_jobs: 3,
            progress_tick: Duration::from_millis(100),
            retention: Duration::from_secs(24 * 60 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
            ghostscript_path: "gs".to_string(),
            file_timeout: Duration::from_secs(300),
            archive_ttl: Duration::from_secs(60),
        }
    }
}

impl BatchConfig {
    /// Build a configuration from `BATCH_*` / `GHOSTSCRIPT_PATH` variables.
    pub fn from_env() -> Self {
        // A missing .env file is the normal case outside development.
        dotenv::dotenv().ok();

        let defaults = Self::default();
        Self {
            output_dir: env::var("BATCH_OUTPUT_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            max_concurrent_jobs: clamp_concurrency(
                env_parse("BATCH_MAX_CONCURRENT_JOBS").unwrap_or(defaults.max_concurrent_jobs),
            ),
            progress_tick: env_parse("BATCH_PROGRESS_TICK_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.progress_tick),
            retention: env_parse::<u64>("BATCH_RETENTION_HOURS")
                .map(|hours| Duration::from_secs(hours * 60 * 60))
                .unwrap_or(defaults.retention),
            cleanup_interval: env_parse("BATCH_CLEANUP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cleanup_interval),
            ghostscript_path: env::var("GHOSTSCRIPT_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.ghostscript_path),
            file_timeout: env_parse("BATCH_FILE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.file_timeout),
            archive_ttl: env_parse("BATCH_ARCHIVE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.archive_ttl),
        }
    }
}

/// Keep the worker-slot count inside `[MIN_CONCURRENT_JOBS, MAX_CONCURRENT_JOBS]`.
pub fn clamp_concurrency(requested: usize) -> usize {
    requested.clamp(MIN_CONCURRENT_JOBS, MAX_CONCURRENT_JOBS)
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("Ignoring unparsable value for {}: {:?}", key, raw);
                None
            }
        },
        Err(_) => None,
    }
}
