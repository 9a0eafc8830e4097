use std::{fmt::Display, time::Duration};

use anyhow::Result;
use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{
    query_fn, ControlPauseRecord, Database, ExerciseLoop, SessionWithLoops, SharedQuery,
    Subscription, Table,
};

use super::RecordKind;

const DISPLAY_FORMAT: &str = "%a, %b %-d • %H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopSummary {
    pub initial_cp: f64,
    pub breathing_duration_seconds: u64,
    pub final_cp: f64,
}

impl From<&ExerciseLoop> for LoopSummary {
    fn from(value: &ExerciseLoop) -> Self {
        Self {
            initial_cp: value.initial_cp,
            breathing_duration_seconds: value.breathing_duration_seconds,
            final_cp: value.final_cp,
        }
    }
}

/// One row of the history list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HistoryItem {
    #[serde(rename_all = "camelCase")]
    StandaloneCp {
        id: i64,
        timestamp: DateTime<Utc>,
        duration_seconds: f64,
    },
    #[serde(rename_all = "camelCase")]
    Session {
        id: i64,
        timestamp: DateTime<Utc>,
        note: Option<String>,
        loops: Vec<LoopSummary>,
    },
}

impl HistoryItem {
    pub fn id(&self) -> i64 {
        match self {
            HistoryItem::StandaloneCp { id, .. } | HistoryItem::Session { id, .. } => *id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            HistoryItem::StandaloneCp { timestamp, .. } | HistoryItem::Session { timestamp, .. } => {
                *timestamp
            }
        }
    }

    /// The kind to pass to [`super::HistoryDetail::load`] for this row.
    pub fn kind(&self) -> RecordKind {
        match self {
            HistoryItem::StandaloneCp { .. } => RecordKind::ControlPause,
            HistoryItem::Session { .. } => RecordKind::Session,
        }
    }

    /// Local time, e.g. `Mon, Jan 5 • 14:03`.
    pub fn display_time(&self) -> String {
        self.display_time_in(&Local)
    }

    pub fn display_time_in<Tz>(&self, zone: &Tz) -> String
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        self.timestamp()
            .with_timezone(zone)
            .format(DISPLAY_FORMAT)
            .to_string()
    }
}

impl From<ControlPauseRecord> for HistoryItem {
    fn from(record: ControlPauseRecord) -> Self {
        HistoryItem::StandaloneCp {
            id: record.id,
            timestamp: record.timestamp,
            duration_seconds: record.duration_seconds,
        }
    }
}

impl From<SessionWithLoops> for HistoryItem {
    fn from(value: SessionWithLoops) -> Self {
        HistoryItem::Session {
            id: value.session.id,
            timestamp: value.session.timestamp,
            note: value.session.note,
            loops: value.loops.iter().map(LoopSummary::from).collect(),
        }
    }
}

/// Interleaves standalone measurements and sessions, newest first.
pub fn merge_history(
    records: Vec<ControlPauseRecord>,
    sessions: Vec<SessionWithLoops>,
) -> Vec<HistoryItem> {
    let mut items: Vec<HistoryItem> = records
        .into_iter()
        .map(HistoryItem::from)
        .chain(sessions.into_iter().map(HistoryItem::from))
        .collect();
    items.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
    items
}

async fn load_history(db: Database) -> Result<Vec<HistoryItem>> {
    let records = db.list_control_pauses().await?;
    let sessions = db.list_sessions_with_loops().await?;
    Ok(merge_history(records, sessions))
}

/// The merged history list, recomputed whenever a measurement, session or
/// loop is written.
#[derive(Clone)]
pub struct HistoryFeed {
    query: SharedQuery<Vec<HistoryItem>>,
}

impl HistoryFeed {
    pub fn new(db: Database, grace: Duration) -> Self {
        Self {
            query: SharedQuery::new(
                db,
                &[Table::ControlPauses, Table::Sessions, Table::Loops],
                query_fn(load_history),
                grace,
            ),
        }
    }

    pub async fn subscribe(&self) -> Result<Subscription<Vec<HistoryItem>>> {
        self.query.subscribe().await
    }

    pub async fn is_active(&self) -> bool {
        self.query.is_active().await
    }
}
