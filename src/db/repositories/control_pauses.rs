use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{ensure_seconds, format_datetime, parse_datetime, stored_precision},
    live::Table,
    models::ControlPauseRecord,
};

const SELECT_COLUMNS: &str = "SELECT id, timestamp, duration_seconds FROM control_pauses";

fn row_to_control_pause(row: &Row) -> Result<ControlPauseRecord> {
    let timestamp: String = row.get("timestamp")?;

    Ok(ControlPauseRecord {
        id: row.get("id")?,
        timestamp: parse_datetime(&timestamp, "timestamp")?,
        duration_seconds: row.get("duration_seconds")?,
    })
}

fn collect_control_pauses(
    conn: &rusqlite::Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<ControlPauseRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(row_to_control_pause(row)?);
    }
    Ok(records)
}

impl Database {
    pub async fn insert_control_pause(
        &self,
        timestamp: DateTime<Utc>,
        duration_seconds: f64,
    ) -> Result<ControlPauseRecord> {
        let duration_seconds = ensure_seconds(duration_seconds, "duration_seconds")?;
        let timestamp = stored_precision(timestamp);
        let record = self
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO control_pauses (timestamp, duration_seconds) VALUES (?1, ?2)",
                    params![format_datetime(&timestamp), duration_seconds],
                )
                .context("failed to insert control pause")?;

                Ok(ControlPauseRecord {
                    id: conn.last_insert_rowid(),
                    timestamp,
                    duration_seconds,
                })
            })
            .await?;

        self.notify(&[Table::ControlPauses]);
        Ok(record)
    }

    pub async fn get_control_pause(&self, id: i64) -> Result<Option<ControlPauseRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
            let record = stmt
                .query_row(params![id], |row| Ok(row_to_control_pause(row)))
                .optional()?
                .transpose()?;
            Ok(record)
        })
        .await
    }

    /// Every record, newest first.
    pub async fn list_control_pauses(&self) -> Result<Vec<ControlPauseRecord>> {
        self.execute(|conn| {
            collect_control_pauses(
                conn,
                &format!("{SELECT_COLUMNS} ORDER BY timestamp DESC, id DESC"),
                [],
            )
        })
        .await
    }

    pub async fn recent_control_pauses(&self, limit: usize) -> Result<Vec<ControlPauseRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.execute(move |conn| {
            collect_control_pauses(
                conn,
                &format!("{SELECT_COLUMNS} ORDER BY timestamp DESC, id DESC LIMIT ?1"),
                params![limit],
            )
        })
        .await
    }

    pub async fn latest_control_pause(&self) -> Result<Option<ControlPauseRecord>> {
        Ok(self.recent_control_pauses(1).await?.into_iter().next())
    }

    /// The longest hold on record. Ties go to the earliest measurement.
    pub async fn best_control_pause(&self) -> Result<Option<ControlPauseRecord>> {
        self.execute(|conn| {
            let records = collect_control_pauses(
                conn,
                &format!("{SELECT_COLUMNS} ORDER BY duration_seconds DESC, id ASC LIMIT 1"),
                [],
            )?;
            Ok(records.into_iter().next())
        })
        .await
    }

    pub async fn delete_control_pause(&self, id: i64) -> Result<bool> {
        let rows_affected = self
            .execute(move |conn| {
                conn.execute("DELETE FROM control_pauses WHERE id = ?1", params![id])
                    .context("failed to delete control pause")
            })
            .await?;

        if rows_affected > 0 {
            self.notify(&[Table::ControlPauses]);
        }
        Ok(rows_affected > 0)
    }

    /// Removes the most recently inserted record (highest id), returning its
    /// id, or `None` when the table is empty.
    pub async fn delete_last_control_pause(&self) -> Result<Option<i64>> {
        let deleted = self
            .execute(|conn| {
                let tx = conn.transaction()?;
                let last_id: Option<i64> =
                    tx.query_row("SELECT MAX(id) FROM control_pauses", [], |row| row.get(0))?;

                if let Some(id) = last_id {
                    tx.execute("DELETE FROM control_pauses WHERE id = ?1", params![id])
                        .context("failed to delete last control pause")?;
                }

                tx.commit()?;
                Ok(last_id)
            })
            .await?;

        if deleted.is_some() {
            self.notify(&[Table::ControlPauses]);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 7, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn insert_assigns_increasing_ids() {
        let db = Database::open_in_memory().unwrap();
        let first = db.insert_control_pause(at(0), 21.5).await.unwrap();
        let second = db.insert_control_pause(at(1), 23.0).await.unwrap();

        assert!(second.id > first.id);
        assert_eq!(db.get_control_pause(first.id).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn rejects_negative_duration() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.insert_control_pause(at(0), -1.0).await.is_err());
        assert!(db.list_control_pauses().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recent_records_are_newest_first_and_limited() {
        let db = Database::open_in_memory().unwrap();
        for (minute, duration) in [(3, 30.0), (0, 10.0), (2, 25.0), (1, 15.0)] {
            db.insert_control_pause(at(minute), duration).await.unwrap();
        }

        let recent = db.recent_control_pauses(3).await.unwrap();
        let durations: Vec<f64> = recent.iter().map(|r| r.duration_seconds).collect();
        assert_eq!(durations, vec![30.0, 25.0, 15.0]);

        let latest = db.latest_control_pause().await.unwrap().unwrap();
        assert_eq!(latest.timestamp, at(3));
    }

    #[tokio::test]
    async fn best_record_is_the_longest_hold() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.best_control_pause().await.unwrap(), None);

        db.insert_control_pause(at(0), 18.0).await.unwrap();
        let best = db.insert_control_pause(at(1), 42.25).await.unwrap();
        db.insert_control_pause(at(2), 30.0).await.unwrap();

        assert_eq!(db.best_control_pause().await.unwrap(), Some(best));
    }

    #[tokio::test]
    async fn delete_last_removes_highest_id_not_latest_timestamp() {
        let db = Database::open_in_memory().unwrap();
        let newer = db.insert_control_pause(at(10), 20.0).await.unwrap();
        let inserted_last = db
            .insert_control_pause(at(10) - Duration::hours(1), 25.0)
            .await
            .unwrap();

        let deleted = db.delete_last_control_pause().await.unwrap();
        assert_eq!(deleted, Some(inserted_last.id));

        let remaining = db.list_control_pauses().await.unwrap();
        assert_eq!(remaining, vec![newer]);
    }

    #[tokio::test]
    async fn delete_last_on_empty_table_is_a_no_op() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.delete_last_control_pause().await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_by_id_reports_missing_rows() {
        let db = Database::open_in_memory().unwrap();
        let record = db.insert_control_pause(at(0), 12.0).await.unwrap();

        assert!(db.delete_control_pause(record.id).await.unwrap());
        assert!(!db.delete_control_pause(record.id).await.unwrap());
    }
}
