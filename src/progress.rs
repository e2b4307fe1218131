//! Per-challenge attempt tracking and experience awards.
//!
//! Persisting progress belongs to the game's state system; this module only
//! decides transitions and how much experience a completion is worth.

use crate::challenge::Difficulty;
use crate::errors::{Result, SandboxError};
use crate::metrics::RunMetrics;
use crate::session::ExecutionResult;
use serde::{Deserialize, Serialize};

/// Runs faster than this earn a bonus.
pub const FAST_RUN_THRESHOLD_MS: u64 = 50;
pub const FAST_RUN_BONUS: u32 = 20;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

/// Base experience for completing a challenge of the given difficulty, plus
/// the fast-run bonus.
pub fn experience_award(difficulty: Difficulty, metrics: &RunMetrics) -> u32 {
    let base = match difficulty {
        Difficulty::Beginner => 100,
        Difficulty::Intermediate => 200,
        Difficulty::Advanced => 300,
        Difficulty::Expert => 500,
    };
    if metrics.execution_time < FAST_RUN_THRESHOLD_MS {
        base + FAST_RUN_BONUS
    } else {
        base
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub challenge_id: String,
    pub state: AttemptState,
    /// Number of times the player has started this challenge
    pub attempts: u32,
    /// Experience granted on first completion
    pub experience: u32,
}

impl Attempt {
    pub fn new(challenge_id: impl Into<String>) -> Self {
        Self {
            challenge_id: challenge_id.into(),
            state: AttemptState::NotStarted,
            attempts: 0,
            experience: 0,
        }
    }

    /// Begin a new attempt. Allowed from any state except `InProgress`;
    /// replaying a completed challenge never awards experience twice.
    pub fn start(&mut self) -> Result<()> {
        if self.state == AttemptState::InProgress {
            return Err(SandboxError::InvalidTransition(format!(
                "{} is already in progress",
                self.challenge_id
            )));
        }
        self.state = AttemptState::InProgress;
        self.attempts += 1;
        Ok(())
    }

    /// Record the outcome of a run. Returns the experience awarded, which is
    /// non-zero only the first time the challenge is solved.
    pub fn finish(&mut self, difficulty: Difficulty, result: &ExecutionResult) -> Result<u32> {
        if self.state != AttemptState::InProgress {
            return Err(SandboxError::InvalidTransition(format!(
                "{} has no attempt in progress",
                self.challenge_id
            )));
        }
        if !result.solved() {
            self.state = AttemptState::Failed;
            return Ok(0);
        }

        let first_completion = self.experience == 0;
        self.state = AttemptState::Completed;
        if first_completion {
            self.experience = experience_award(difficulty, &result.metrics);
            Ok(self.experience)
        } else {
            Ok(0)
        }
    }

    pub fn is_completed(&self) -> bool {
        self.experience > 0
    }
}
