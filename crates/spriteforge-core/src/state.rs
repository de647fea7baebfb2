//! Run, frame, and attempt state.
//!
//! `RunState` is the single persisted source of truth for a run. The
//! orchestrator is its only mutator; everything else gets a read-only view.
//! Every mutation keeps the accounting invariants:
//! - `frames[i].attempts == frame_attempts[i].len()`
//! - `approved + failed + pending == frame_count` (in_progress counts as pending)
//! - an approved frame never records another attempt

use serde::{Deserialize, Serialize};

use crate::clock;
use crate::error::CoreError;
use crate::reason::ReasonCode;

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Initialized,
    Running,
    Completed,
    Stopped,
    Failed,
}

/// Per-frame lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameStatus {
    Pending,
    InProgress,
    Approved,
    Failed,
}

/// One generation attempt, recorded append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_number: u32,
    pub seed: u32,
    pub prompt_hash: String,
    pub reason_codes: Vec<ReasonCode>,
    pub score: f64,
    /// Ladder strategy wire name ("default" for the first attempt).
    pub strategy: String,
    pub timestamp: String,
    pub duration_ms: u64,
}

/// Per-frame state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameState {
    pub index: u32,
    pub status: FrameStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_candidate_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Frame accounting snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameAccounting {
    pub approved: u32,
    pub failed: u32,
    pub pending: u32,
}

/// The persisted run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub manifest_hash: String,
    pub status: RunStatus,
    pub current_frame: u32,
    pub current_attempt: u32,
    pub frames: Vec<FrameState>,
    pub frame_attempts: Vec<Vec<AttemptRecord>>,
    pub created_at: String,
    pub updated_at: String,
}

impl RunState {
    /// Fresh state for a new run: all frames pending, no attempts.
    #[must_use]
    pub fn new(run_id: impl Into<String>, manifest_hash: impl Into<String>, frames: u32) -> Self {
        let now = clock::now_utc();
        Self {
            run_id: run_id.into(),
            manifest_hash: manifest_hash.into(),
            status: RunStatus::Initialized,
            current_frame: 0,
            current_attempt: 0,
            frames: (0..frames)
                .map(|index| FrameState {
                    index,
                    status: FrameStatus::Pending,
                    attempts: 0,
                    approved_path: None,
                    last_candidate_path: None,
                    last_error: None,
                })
                .collect(),
            frame_attempts: (0..frames).map(|_| Vec::new()).collect(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[must_use]
    pub fn frame_count(&self) -> u32 {
        self.frames.len() as u32
    }

    /// Approved / failed / pending counts (in_progress counts as pending).
    #[must_use]
    pub fn accounting(&self) -> FrameAccounting {
        let mut acc = FrameAccounting {
            approved: 0,
            failed: 0,
            pending: 0,
        };
        for frame in &self.frames {
            match frame.status {
                FrameStatus::Approved => acc.approved += 1,
                FrameStatus::Failed => acc.failed += 1,
                FrameStatus::Pending | FrameStatus::InProgress => acc.pending += 1,
            }
        }
        acc
    }

    /// Frames that have at least one recorded attempt.
    #[must_use]
    pub fn attempted_frames(&self) -> u32 {
        self.frame_attempts.iter().filter(|a| !a.is_empty()).count() as u32
    }

    /// Frames that needed more than one attempt.
    #[must_use]
    pub fn retried_frames(&self) -> u32 {
        self.frame_attempts.iter().filter(|a| a.len() > 1).count() as u32
    }

    /// Total attempts recorded across all frames.
    #[must_use]
    pub fn total_attempts(&self) -> u32 {
        self.frame_attempts.iter().map(|a| a.len() as u32).sum()
    }

    /// Length of the trailing run of failed frames among resolved frames,
    /// in index order. Drives the consecutive-fails stop condition.
    #[must_use]
    pub fn consecutive_failed_frames(&self) -> u32 {
        let mut streak = 0;
        for frame in &self.frames {
            match frame.status {
                FrameStatus::Failed => streak += 1,
                FrameStatus::Approved => streak = 0,
                FrameStatus::Pending | FrameStatus::InProgress => break,
            }
        }
        streak
    }

    /// Record an attempt against a frame, moving it to in_progress.
    pub fn record_attempt(&mut self, index: u32, record: AttemptRecord) -> Result<(), CoreError> {
        let i = index as usize;
        let frame = self
            .frames
            .get_mut(i)
            .ok_or_else(|| CoreError::CorruptState(format!("frame {index} out of range")))?;
        if frame.status == FrameStatus::Approved {
            return Err(CoreError::CorruptState(format!(
                "attempt recorded against approved frame {index}"
            )));
        }
        frame.status = FrameStatus::InProgress;
        frame.attempts += 1;
        self.current_frame = index;
        self.current_attempt = record.attempt_number;
        self.frame_attempts[i].push(record);
        self.touch();
        Ok(())
    }

    /// Attach the latest candidate path to a frame.
    pub fn set_last_candidate(&mut self, index: u32, path: impl Into<String>) {
        if let Some(frame) = self.frames.get_mut(index as usize) {
            frame.last_candidate_path = Some(path.into());
        }
        self.touch();
    }

    /// Approve a frame. The approved image is immutable from here on.
    pub fn approve_frame(&mut self, index: u32, path: impl Into<String>) -> Result<(), CoreError> {
        let frame = self
            .frames
            .get_mut(index as usize)
            .ok_or_else(|| CoreError::CorruptState(format!("frame {index} out of range")))?;
        if frame.status == FrameStatus::Approved {
            return Err(CoreError::CorruptState(format!(
                "frame {index} approved twice"
            )));
        }
        frame.status = FrameStatus::Approved;
        frame.approved_path = Some(path.into());
        frame.last_error = None;
        self.touch();
        Ok(())
    }

    /// Mark a frame failed with a terminal error description.
    pub fn fail_frame(&mut self, index: u32, error: impl Into<String>) -> Result<(), CoreError> {
        let frame = self
            .frames
            .get_mut(index as usize)
            .ok_or_else(|| CoreError::CorruptState(format!("frame {index} out of range")))?;
        if frame.status == FrameStatus::Approved {
            return Err(CoreError::CorruptState(format!(
                "approved frame {index} cannot fail"
            )));
        }
        frame.status = FrameStatus::Failed;
        frame.last_error = Some(error.into());
        self.touch();
        Ok(())
    }

    /// First frame that is not yet approved, if any. Resume starts here.
    #[must_use]
    pub fn first_unapproved_frame(&self) -> Option<u32> {
        self.frames
            .iter()
            .find(|f| f.status != FrameStatus::Approved)
            .map(|f| f.index)
    }

    /// Next frame still awaiting resolution (failed frames are terminal).
    #[must_use]
    pub fn next_pending_frame(&self) -> Option<u32> {
        self.frames
            .iter()
            .find(|f| matches!(f.status, FrameStatus::Pending | FrameStatus::InProgress))
            .map(|f| f.index)
    }

    /// True when every frame reached approved or failed.
    #[must_use]
    pub fn all_frames_resolved(&self) -> bool {
        self.accounting().pending == 0
    }

    pub fn set_status(&mut self, status: RunStatus) {
        self.status = status;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = clock::now_utc();
    }

    /// Cross-check the persisted structure against its invariants.
    pub fn verify_invariants(&self) -> Result<(), CoreError> {
        if self.frames.len() != self.frame_attempts.len() {
            return Err(CoreError::CorruptState(format!(
                "frames ({}) and frame_attempts ({}) length mismatch",
                self.frames.len(),
                self.frame_attempts.len()
            )));
        }
        for (i, frame) in self.frames.iter().enumerate() {
            if frame.index as usize != i {
                return Err(CoreError::CorruptState(format!(
                    "frame at position {i} carries index {}",
                    frame.index
                )));
            }
            let recorded = self.frame_attempts[i].len() as u32;
            if frame.attempts != recorded {
                return Err(CoreError::CorruptState(format!(
                    "frame {i} attempts counter {} != recorded attempts {recorded}",
                    frame.attempts
                )));
            }
            if frame.status == FrameStatus::Approved && frame.approved_path.is_none() {
                return Err(CoreError::CorruptState(format!(
                    "approved frame {i} has no approved_path"
                )));
            }
        }
        let acc = self.accounting();
        if acc.approved + acc.failed + acc.pending != self.frame_count() {
            return Err(CoreError::CorruptState(
                "frame accounting does not sum to frame_count".into(),
            ));
        }
        Ok(())
    }
}
