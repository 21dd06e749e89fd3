//! Durable chunk state
//!
//! The checkpoint is the single source of truth for resume decisions. All
//! mutations go through [`CheckpointStore`], which holds the state behind a
//! mutex and rewrites `checkpoint.json` before releasing it.
//!
//! Chunk lifecycle:
//!
//! ```text
//! pending -> in_progress -> done
//!                \-> failed -> in_progress (retry)
//!                \-> failed_final (retry ceiling reached)
//! ```

use crate::config::CorruptCheckpointPolicy;
use crate::error::{PipelineError, Result};
use crate::planner::{Chunk, ChunkPlan, PlanFingerprint};
use crate::storage::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    InProgress,
    Done,
    Failed,
    FailedFinal,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Pending => "pending",
            ChunkStatus::InProgress => "in_progress",
            ChunkStatus::Done => "done",
            ChunkStatus::Failed => "failed",
            ChunkStatus::FailedFinal => "failed_final",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChunkStatus::Done | ChunkStatus::FailedFinal)
    }
}

impl std::fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-chunk processing counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkStats {
    /// Pages decoded, of any namespace
    pub records_seen: u64,
    pub articles: u64,
    /// Articles rejected by the byte prefilter
    pub prefiltered: u64,
    /// Malformed pages
    pub skipped: u64,
    pub observations: u64,
}

impl ChunkStats {
    pub fn merge(&mut self, other: &ChunkStats) {
        self.records_seen += other.records_seen;
        self.articles += other.articles;
        self.prefiltered += other.prefiltered;
        self.skipped += other.skipped;
        self.observations += other.observations;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk: Chunk,
    pub status: ChunkStatus,
    pub retries: u32,
    pub last_error: Option<String>,
    pub stats: Option<ChunkStats>,
    pub artifact_sha256: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ChunkRecord {
    fn new(chunk: Chunk) -> Self {
        Self {
            chunk,
            status: ChunkStatus::Pending,
            retries: 0,
            last_error: None,
            stats: None,
            artifact_sha256: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub version: u32,
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub retry_ceiling: u32,
    pub plan: ChunkPlan,
    pub fingerprint: PlanFingerprint,
    pub chunks: Vec<ChunkRecord>,
}

impl CheckpointState {
    pub fn new(plan: ChunkPlan, retry_ceiling: u32) -> Self {
        let now = Utc::now();
        let chunks = plan.chunks.iter().cloned().map(ChunkRecord::new).collect();
        Self {
            version: CHECKPOINT_VERSION,
            run_id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            retry_ceiling,
            fingerprint: plan.fingerprint(),
            plan,
            chunks,
        }
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for record in &self.chunks {
            match record.status {
                ChunkStatus::Pending => counts.pending += 1,
                ChunkStatus::InProgress => counts.in_progress += 1,
                ChunkStatus::Done => counts.done += 1,
                ChunkStatus::Failed => counts.failed += 1,
                ChunkStatus::FailedFinal => counts.failed_final += 1,
            }
        }
        counts
    }

    /// Next chunk a worker may take: pending first, then retryable failures
    pub fn next_claimable(&self) -> Option<usize> {
        self.chunks
            .iter()
            .position(|r| r.status == ChunkStatus::Pending)
            .or_else(|| {
                self.chunks.iter().position(|r| {
                    r.status == ChunkStatus::Failed && r.retries < self.retry_ceiling
                })
            })
    }

    /// Reject files that parse but do not describe their own plan
    fn check_consistency(&self) -> std::result::Result<(), String> {
        if self.version != CHECKPOINT_VERSION {
            return Err(format!("unsupported checkpoint version {}", self.version));
        }
        if self.chunks.len() != self.plan.chunks.len() {
            return Err(format!(
                "{} chunk records for a plan of {} chunks",
                self.chunks.len(),
                self.plan.chunks.len()
            ));
        }
        for (i, (record, planned)) in self.chunks.iter().zip(&self.plan.chunks).enumerate() {
            if record.chunk != *planned || planned.ordinal != i {
                return Err(format!("chunk record {} does not match the plan", i));
            }
        }
        if self.fingerprint != self.plan.fingerprint() {
            return Err("stored fingerprint does not match the stored plan".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
    pub failed: usize,
    pub failed_final: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.done + self.failed + self.failed_final
    }

    pub fn non_terminal(&self) -> usize {
        self.pending + self.in_progress + self.failed
    }

    pub fn all_terminal(&self) -> bool {
        self.non_terminal() == 0
    }
}

/// A requested change to one chunk's status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Claimed,
    Done {
        stats: ChunkStats,
        artifact_sha256: String,
    },
    Failed {
        error: String,
    },
}

impl Transition {
    fn target(&self) -> &'static str {
        match self {
            Transition::Claimed => "in_progress",
            Transition::Done { .. } => "done",
            Transition::Failed { .. } => "failed",
        }
    }
}

/// Read a checkpoint file, applying the corruption policy
///
/// Returns `None` when there is nothing to resume from.
pub fn load_state(path: &Path, policy: CorruptCheckpointPolicy) -> Result<Option<CheckpointState>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let reason = match serde_json::from_slice::<CheckpointState>(&bytes) {
        Ok(state) => match state.check_consistency() {
            Ok(()) => return Ok(Some(state)),
            Err(reason) => reason,
        },
        Err(e) => e.to_string(),
    };

    match policy {
        CorruptCheckpointPolicy::Strict => Err(PipelineError::CheckpointCorruption {
            path: path.to_path_buf(),
            reason,
        }),
        CorruptCheckpointPolicy::StartFresh => {
            let aside = corrupt_path(path);
            std::fs::rename(path, &aside)?;
            warn!(
                path = %path.display(),
                moved_to = %aside.display(),
                reason = %reason,
                "Checkpoint is corrupt, starting fresh"
            );
            Ok(None)
        },
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%.3f")));
    path.with_file_name(name)
}

/// Remove any existing checkpoint for an explicit fresh start
pub fn discard_state(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "Discarded existing checkpoint");
            Ok(true)
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub struct CheckpointStore {
    path: PathBuf,
    state: Mutex<CheckpointState>,
}

impl CheckpointStore {
    /// Start a new run from a plan and persist it immediately
    pub fn create(path: impl Into<PathBuf>, plan: ChunkPlan, retry_ceiling: u32) -> Result<Self> {
        let state = CheckpointState::new(plan, retry_ceiling);
        let store = Self {
            path: path.into(),
            state: Mutex::new(state),
        };
        store.persist(&store.lock())?;
        info!(path = %store.path.display(), "Created checkpoint");
        Ok(store)
    }

    /// Continue from persisted state, reclaiming chunks left in progress
    pub fn resume(path: impl Into<PathBuf>, mut state: CheckpointState) -> Result<Self> {
        let mut reclaimed = 0usize;
        for record in state.chunks.iter_mut() {
            if record.status == ChunkStatus::InProgress {
                record.status = ChunkStatus::Pending;
                reclaimed += 1;
                info!(ordinal = record.chunk.ordinal, "Reclaimed chunk left in progress");
            }
        }

        let store = Self {
            path: path.into(),
            state: Mutex::new(state),
        };
        if reclaimed > 0 {
            store.persist(&store.lock())?;
        }

        let counts = store.counts();
        info!(
            run_id = %store.run_id(),
            done = counts.done,
            pending = counts.pending,
            failed = counts.failed,
            failed_final = counts.failed_final,
            reclaimed,
            "Resumed from checkpoint"
        );
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, CheckpointState> {
        // State is only replaced wholesale after a successful write, so a
        // poisoned lock still guards consistent data
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &CheckpointState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.path, &bytes)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> Uuid {
        self.lock().run_id
    }

    pub fn next_claimable(&self) -> Option<usize> {
        self.lock().next_claimable()
    }

    /// Take the next claimable chunk, marking it in progress
    pub fn claim(&self) -> Result<Option<Chunk>> {
        let mut state = self.lock();
        let Some(ordinal) = state.next_claimable() else {
            return Ok(None);
        };
        self.apply(&mut state, ordinal, Transition::Claimed)?;
        Ok(Some(state.chunks[ordinal].chunk.clone()))
    }

    /// Apply one transition and persist it
    pub fn record(&self, ordinal: usize, transition: Transition) -> Result<ChunkStatus> {
        let mut state = self.lock();
        self.apply(&mut state, ordinal, transition)
    }

    fn apply(
        &self,
        state: &mut CheckpointState,
        ordinal: usize,
        transition: Transition,
    ) -> Result<ChunkStatus> {
        let ceiling = state.retry_ceiling;
        let record = state
            .chunks
            .get_mut(ordinal)
            .ok_or(PipelineError::UnknownChunk(ordinal))?;
        let before = record.clone();

        match (record.status, &transition) {
            (ChunkStatus::Pending, Transition::Claimed) => {
                record.status = ChunkStatus::InProgress;
            },
            (ChunkStatus::Failed, Transition::Claimed) if record.retries < ceiling => {
                record.status = ChunkStatus::InProgress;
            },
            (ChunkStatus::InProgress, Transition::Done { stats, artifact_sha256 }) => {
                record.status = ChunkStatus::Done;
                record.stats = Some(*stats);
                record.artifact_sha256 = Some(artifact_sha256.clone());
                record.completed_at = Some(Utc::now());
                record.last_error = None;
            },
            (ChunkStatus::Done, Transition::Done { .. }) => {
                debug!(ordinal, "Chunk already done");
                return Ok(ChunkStatus::Done);
            },
            (ChunkStatus::InProgress, Transition::Failed { error }) => {
                record.retries += 1;
                record.last_error = Some(error.clone());
                record.status = if record.retries >= ceiling {
                    ChunkStatus::FailedFinal
                } else {
                    ChunkStatus::Failed
                };
            },
            (from, _) => {
                return Err(PipelineError::InvalidTransition {
                    ordinal,
                    from: from.as_str(),
                    to: transition.target(),
                });
            },
        }

        let status = record.status;
        state.updated_at = Utc::now();

        if let Err(e) = self.persist(state) {
            state.chunks[ordinal] = before;
            return Err(e);
        }

        debug!(ordinal, status = %status, "Recorded chunk transition");
        Ok(status)
    }

    pub fn counts(&self) -> StatusCounts {
        self.lock().counts()
    }

    pub fn snapshot(&self) -> CheckpointState {
        self.lock().clone()
    }
}
