use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{query_fn, ControlPauseRecord, Database, SharedQuery, Subscription, Table};

/// Headroom above the best measurement on the y axis.
const Y_HEADROOM: f64 = 1.1;
const Y_TICKS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartPoint {
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: f64,
    /// Position along the time range, `0.0..=1.0`.
    pub x: f64,
    /// Height relative to the top of the y axis, `0.0..=1.0`.
    pub y: f64,
}

/// Control pause progress over time, scaled to a unit square so the
/// renderer only has to map it onto its canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpChart {
    pub points: Vec<ChartPoint>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub y_max: f64,
}

impl CpChart {
    /// Returns `None` when there are fewer than two measurements to draw a
    /// line through.
    pub fn from_records(records: &[ControlPauseRecord]) -> Option<Self> {
        if records.len() < 2 {
            return None;
        }

        let mut sorted: Vec<&ControlPauseRecord> = records.iter().collect();
        sorted.sort_by_key(|record| (record.timestamp, record.id));

        let start = sorted.first()?.timestamp;
        let end = sorted.last()?.timestamp;
        let range_ms = (end - start).num_milliseconds().max(1) as f64;

        let max_cp = sorted
            .iter()
            .map(|record| record.duration_seconds)
            .fold(0.0_f64, f64::max);
        let y_max = max_cp * Y_HEADROOM;

        let points = sorted
            .into_iter()
            .map(|record| ChartPoint {
                timestamp: record.timestamp,
                duration_seconds: record.duration_seconds,
                x: (record.timestamp - start).num_milliseconds() as f64 / range_ms,
                y: if y_max > 0.0 {
                    record.duration_seconds / y_max
                } else {
                    0.0
                },
            })
            .collect();

        Some(Self {
            points,
            start,
            end,
            y_max,
        })
    }

    /// Evenly spaced y axis labels from zero to `y_max`.
    pub fn y_ticks(&self) -> Vec<f64> {
        (0..=Y_TICKS)
            .map(|step| self.y_max / Y_TICKS as f64 * step as f64)
            .collect()
    }
}

/// All standalone measurements, kept current for the chart screen.
#[derive(Clone)]
pub struct ChartsFeed {
    query: SharedQuery<Vec<ControlPauseRecord>>,
}

impl ChartsFeed {
    pub fn new(db: Database, grace: Duration) -> Self {
        Self {
            query: SharedQuery::new(
                db,
                &[Table::ControlPauses],
                query_fn(|db: Database| async move { db.list_control_pauses().await }),
                grace,
            ),
        }
    }

    pub async fn subscribe(&self) -> Result<Subscription<Vec<ControlPauseRecord>>> {
        self.query.subscribe().await
    }

    pub async fn is_active(&self) -> bool {
        self.query.is_active().await
    }
}
