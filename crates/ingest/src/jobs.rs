//! Ingestion job model.
//!
//! One [`IngestionJob`] tracks a single source file from discovery to its
//! terminal state. Transitions are checked: asking for a move the state
//! machine does not allow is a programming error and is reported as
//! [`JobError::IllegalTransition`] rather than silently applied.

use crate::title::{MediaKind, ParsedTitle};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// State of a job in the ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Found in a watched folder.
    Discovered,
    /// Exclusive access confirmed.
    Staged,
    /// Staging folder and metadata written, streams probed.
    Probed,
    /// An encode plan exists.
    PlanReady,
    /// ffmpeg is running.
    Converting,
    /// In the library; source removed.
    Promoted,
    /// Source moved to Failed/.
    Quarantined,
    /// Source renamed so the user picks an audio stream.
    RenamedForDisambiguation,
}

impl JobState {
    /// Whether `next` may follow this state.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Discovered, Staged)
                | (Staged, Probed)
                | (Staged, Quarantined)
                | (Probed, PlanReady)
                | (Probed, Quarantined)
                | (Probed, RenamedForDisambiguation)
                | (PlanReady, Converting)
                | (PlanReady, Quarantined)
                | (Converting, Promoted)
                | (Converting, Quarantined)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Promoted | JobState::Quarantined | JobState::RenamedForDisambiguation
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Discovered => write!(f, "discovered"),
            JobState::Staged => write!(f, "staged"),
            JobState::Probed => write!(f, "probed"),
            JobState::PlanReady => write!(f, "plan_ready"),
            JobState::Converting => write!(f, "converting"),
            JobState::Promoted => write!(f, "promoted"),
            JobState::Quarantined => write!(f, "quarantined"),
            JobState::RenamedForDisambiguation => write!(f, "renamed_for_disambiguation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("illegal job transition {from} -> {to}")]
    IllegalTransition { from: JobState, to: JobState },
}

/// One source file on its way through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestionJob {
    /// Unique job identifier (UUID).
    pub id: String,
    pub source_path: PathBuf,
    pub kind: MediaKind,
    /// Set once the file name has been parsed.
    pub title: Option<ParsedTitle>,
    /// Set once the staging folder exists.
    pub staging_dir: Option<PathBuf>,
    pub state: JobState,
    pub last_error: Option<String>,
    /// Unix timestamp (milliseconds) when the job was created.
    pub created_at: i64,
    /// Unix timestamp (milliseconds) of the last transition.
    pub updated_at: i64,
}

impl IngestionJob {
    pub fn new(source_path: PathBuf, kind: MediaKind) -> Self {
        let now = current_timestamp_ms();
        Self {
            id: Uuid::new_v4().to_string(),
            source_path,
            kind,
            title: None,
            staging_dir: None,
            state: JobState::Discovered,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, or refuse if the state machine forbids it.
    pub fn transition(&mut self, next: JobState) -> Result<(), JobError> {
        if !self.state.can_transition_to(next) {
            return Err(JobError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(job = %self.id, from = %self.state, to = %next, "Job transition");
        self.state = next;
        self.updated_at = current_timestamp_ms();
        Ok(())
    }

    /// Record the failure reason and move to `Quarantined`.
    pub fn quarantine(&mut self, reason: impl Into<String>) -> Result<(), JobError> {
        self.transition(JobState::Quarantined)?;
        self.last_error = Some(reason.into());
        Ok(())
    }
}

/// Get current Unix timestamp in milliseconds.
fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
