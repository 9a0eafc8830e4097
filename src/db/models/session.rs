//! Exercise session models.
//!
//! A session owns its loops; deleting the session removes them through the
//! `exercise_loops.session_id` cascade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseSession {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub note: Option<String>,
}

/// One persisted repetition of measure, breathe, recover, measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseLoop {
    pub id: i64,
    pub session_id: i64,
    pub timestamp: DateTime<Utc>,
    pub initial_cp: f64,
    pub breathing_duration_seconds: u64,
    pub final_cp: f64,
}

/// Loop values before the database assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewExerciseLoop {
    pub session_id: i64,
    pub timestamp: DateTime<Utc>,
    pub initial_cp: f64,
    pub breathing_duration_seconds: u64,
    pub final_cp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionWithLoops {
    pub session: ExerciseSession,
    /// Ordered by loop timestamp, oldest first.
    pub loops: Vec<ExerciseLoop>,
}
