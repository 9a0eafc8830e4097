use thiserror::Error;

use super::ExerciseStep;

#[derive(Debug, Error)]
pub enum ExerciseError {
    #[error("cannot {action} during {from}")]
    InvalidTransition {
        from: ExerciseStep,
        action: &'static str,
    },

    #[error("an exercise session is already in progress")]
    SessionAlreadyActive,

    #[error("no exercise session is in progress")]
    NoActiveSession,

    #[error("there is no previous control pause to reuse")]
    NoLastKnownCp,

    #[error("initial control pause must be a positive number of seconds, got {0}")]
    InvalidInitialCp(f64),

    #[error("failed to persist exercise data: {0:#}")]
    Persistence(#[from] anyhow::Error),
}
