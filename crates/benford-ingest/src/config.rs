//! Pipeline configuration
//!
//! Values come from defaults, then `BENFORD_*` environment variables, then
//! command-line overrides applied by the binary.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Chunk count used when neither the caller nor a checkpoint provides one
pub const DEFAULT_CHUNK_COUNT: usize = 100;
pub const DEFAULT_RETRY_CEILING: u32 = 3;
pub const DEFAULT_WORKER_MEMORY_MB: u64 = 512;

/// What to do when `checkpoint.json` cannot be parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CorruptCheckpointPolicy {
    /// Move the file aside and start over
    #[default]
    StartFresh,
    /// Refuse to run
    Strict,
}

impl FromStr for CorruptCheckpointPolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "start-fresh" | "fresh" => Ok(CorruptCheckpointPolicy::StartFresh),
            "strict" => Ok(CorruptCheckpointPolicy::Strict),
            other => Err(PipelineError::config(format!(
                "Invalid checkpoint policy '{}' (expected start-fresh or strict)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub archive_path: PathBuf,
    pub index_path: PathBuf,

    /// Holds `checkpoint.json`, `run_report.json` and `chunks/`
    pub work_dir: PathBuf,

    pub output_path: PathBuf,
    pub summary_path: PathBuf,

    pub workers: usize,

    /// Requested chunk count; `None` reuses the persisted plan when present
    pub chunks: Option<usize>,

    /// Failures allowed per chunk before it is marked final
    pub retry_ceiling: u32,

    /// Memory budget per worker used to size the default pool
    pub worker_memory_mb: u64,

    pub checkpoint_policy: CorruptCheckpointPolicy,

    /// Discard any existing checkpoint
    pub fresh: bool,

    /// Restrict the plan to the first N index entries
    pub sample: Option<usize>,

    /// Merge what is done when some chunks failed permanently
    pub allow_partial: bool,

    pub show_progress: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            archive_path: PathBuf::from("data/enwiki-latest-pages-articles-multistream.xml.bz2"),
            index_path: PathBuf::from(
                "data/enwiki-latest-pages-articles-multistream-index.txt.bz2",
            ),
            work_dir: PathBuf::from("work"),
            output_path: PathBuf::from("output/numbers.csv"),
            summary_path: PathBuf::from("output/summary.json"),
            workers: default_worker_count(DEFAULT_WORKER_MEMORY_MB),
            chunks: None,
            retry_ceiling: DEFAULT_RETRY_CEILING,
            worker_memory_mb: DEFAULT_WORKER_MEMORY_MB,
            checkpoint_policy: CorruptCheckpointPolicy::default(),
            fresh: false,
            sample: None,
            allow_partial: true,
            show_progress: false,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// - `BENFORD_ARCHIVE`, `BENFORD_INDEX`: input paths
    /// - `BENFORD_WORK_DIR`: checkpoint and artifact directory
    /// - `BENFORD_OUTPUT`, `BENFORD_SUMMARY`: final outputs
    /// - `BENFORD_WORKERS`, `BENFORD_CHUNKS`: pool size and chunk count
    /// - `BENFORD_RETRY_CEILING`: failures allowed per chunk
    /// - `BENFORD_WORKER_MEMORY_MB`: per-worker memory budget
    /// - `BENFORD_CHECKPOINT_POLICY`: start-fresh or strict
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("BENFORD_ARCHIVE") {
            config.archive_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("BENFORD_INDEX") {
            config.index_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("BENFORD_WORK_DIR") {
            config.work_dir = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("BENFORD_OUTPUT") {
            config.output_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("BENFORD_SUMMARY") {
            config.summary_path = PathBuf::from(path);
        }

        if let Some(budget) = env_parse::<u64>("BENFORD_WORKER_MEMORY_MB")? {
            config.worker_memory_mb = budget;
            config.workers = default_worker_count(budget);
        }
        if let Some(workers) = env_parse::<usize>("BENFORD_WORKERS")? {
            config.workers = workers;
        }
        if let Some(chunks) = env_parse::<usize>("BENFORD_CHUNKS")? {
            config.chunks = Some(chunks);
        }
        if let Some(ceiling) = env_parse::<u32>("BENFORD_RETRY_CEILING")? {
            config.retry_ceiling = ceiling;
        }
        if let Some(policy) = env_parse::<CorruptCheckpointPolicy>("BENFORD_CHECKPOINT_POLICY")? {
            config.checkpoint_policy = policy;
        }

        Ok(config)
    }

    /// Reject configurations that cannot run before any work starts
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(PipelineError::config("worker count must be greater than 0"));
        }
        if self.chunks == Some(0) {
            return Err(PipelineError::config("chunk count must be greater than 0"));
        }
        if self.retry_ceiling == 0 {
            return Err(PipelineError::config("retry ceiling must be greater than 0"));
        }
        if self.sample == Some(0) {
            return Err(PipelineError::config("sample size must be greater than 0"));
        }
        if !self.archive_path.is_file() {
            return Err(PipelineError::config(format!(
                "archive not found: {}",
                self.archive_path.display()
            )));
        }
        if !self.index_path.is_file() {
            return Err(PipelineError::config(format!(
                "index not found: {}",
                self.index_path.display()
            )));
        }
        if self.output_path == self.summary_path {
            return Err(PipelineError::config(
                "table and summary outputs must be different files",
            ));
        }
        Ok(())
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.work_dir.join("checkpoint.json")
    }

    pub fn chunk_dir(&self) -> PathBuf {
        self.work_dir.join("chunks")
    }

    pub fn report_path(&self) -> PathBuf {
        self.work_dir.join("run_report.json")
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| PipelineError::config(format!("{} has invalid value '{}': {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}

/// CPU count bounded by available memory divided by the per-worker budget
pub fn default_worker_count(worker_memory_mb: u64) -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    size_pool(cpus, available_memory_bytes(), worker_memory_mb)
}

fn size_pool(cpus: usize, available_bytes: Option<u64>, worker_memory_mb: u64) -> usize {
    let budget = worker_memory_mb.max(1) * 1024 * 1024;
    let by_memory = available_bytes
        .map(|bytes| usize::try_from(bytes / budget).unwrap_or(usize::MAX))
        .unwrap_or(cpus);
    cpus.min(by_memory).max(1)
}

/// `MemAvailable` from /proc/meminfo; `None` where that file does not exist
fn available_memory_bytes() -> Option<u64> {
    let meminfo = std::fs::read_to_string(Path::new("/proc/meminfo")).ok()?;
    meminfo
        .lines()
        .find(|line| line.starts_with("MemAvailable:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn test_size_pool_is_bounded_by_memory() {
        assert_eq!(size_pool(16, Some(2 * GIB), 512), 4);
        assert_eq!(size_pool(2, Some(64 * GIB), 512), 2);
    }

    #[test]
    fn test_size_pool_never_returns_zero() {
        assert_eq!(size_pool(8, Some(100 * 1024 * 1024), 512), 1);
        assert_eq!(size_pool(8, None, 512), 8);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "strict".parse::<CorruptCheckpointPolicy>().unwrap(),
            CorruptCheckpointPolicy::Strict
        );
        assert_eq!(
            "Start-Fresh".parse::<CorruptCheckpointPolicy>().unwrap(),
            CorruptCheckpointPolicy::StartFresh
        );
        assert!("lenient".parse::<CorruptCheckpointPolicy>().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_workers_and_missing_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("dump.xml");
        let index = dir.path().join("index.txt");
        std::fs::write(&archive, "<page></page>").unwrap();
        std::fs::write(&index, "0:1:A\n").unwrap();

        let mut config = PipelineConfig {
            archive_path: archive,
            index_path: index,
            work_dir: dir.path().join("work"),
            workers: 2,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_ok());

        config.workers = 0;
        assert!(matches!(config.validate(), Err(PipelineError::Configuration(_))));

        config.workers = 1;
        config.chunks = Some(0);
        assert!(config.validate().is_err());

        config.chunks = None;
        config.index_path = dir.path().join("missing.txt");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_work_dir_layout() {
        let config = PipelineConfig {
            work_dir: PathBuf::from("/tmp/run"),
            ..PipelineConfig::default()
        };
        assert_eq!(config.checkpoint_path(), PathBuf::from("/tmp/run/checkpoint.json"));
        assert_eq!(config.chunk_dir(), PathBuf::from("/tmp/run/chunks"));
        assert_eq!(config.report_path(), PathBuf::from("/tmp/run/run_report.json"));
    }
}
