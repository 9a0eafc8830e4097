use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A standalone breath-hold measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPauseRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: f64,
}
