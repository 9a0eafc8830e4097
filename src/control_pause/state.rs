use serde::{Deserialize, Serialize};

use crate::db::ControlPauseRecord;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPauseState {
    pub is_running: bool,
    pub elapsed_seconds: f64,
    /// Newest first, at most `Settings::recent_records_limit` entries.
    pub recent_records: Vec<ControlPauseRecord>,
    pub best_record: Option<ControlPauseRecord>,
    /// Set right after a measurement is saved so an accidental stop can be
    /// undone; cleared by the next start, reset or delete.
    pub can_delete_last: bool,
}
