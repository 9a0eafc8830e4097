use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{ensure_seconds, format_datetime, parse_datetime, stored_precision, to_i64, to_u64},
    live::Table,
    models::{ExerciseLoop, ExerciseSession, NewExerciseLoop, SessionWithLoops},
};

fn row_to_session(row: &Row) -> Result<ExerciseSession> {
    let timestamp: String = row.get("timestamp")?;

    Ok(ExerciseSession {
        id: row.get("id")?,
        timestamp: parse_datetime(&timestamp, "timestamp")?,
        note: row.get("note")?,
    })
}

fn row_to_loop(row: &Row) -> Result<ExerciseLoop> {
    let timestamp: String = row.get("timestamp")?;
    let breathing: i64 = row.get("breathing_duration_seconds")?;

    Ok(ExerciseLoop {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        timestamp: parse_datetime(&timestamp, "timestamp")?,
        initial_cp: row.get("initial_cp")?,
        breathing_duration_seconds: to_u64(breathing, "breathing_duration_seconds")?,
        final_cp: row.get("final_cp")?,
    })
}

fn loops_for_session(conn: &Connection, session_id: i64) -> Result<Vec<ExerciseLoop>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, timestamp, initial_cp, breathing_duration_seconds, final_cp
         FROM exercise_loops
         WHERE session_id = ?1
         ORDER BY timestamp ASC, id ASC",
    )?;

    let mut rows = stmt.query(params![session_id])?;
    let mut loops = Vec::new();
    while let Some(row) = rows.next()? {
        loops.push(row_to_loop(row)?);
    }
    Ok(loops)
}

impl Database {
    pub async fn insert_session(&self, timestamp: DateTime<Utc>) -> Result<ExerciseSession> {
        let timestamp = stored_precision(timestamp);
        let session = self
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO exercise_sessions (timestamp, note) VALUES (?1, NULL)",
                    params![format_datetime(&timestamp)],
                )
                .context("failed to insert exercise session")?;

                Ok(ExerciseSession {
                    id: conn.last_insert_rowid(),
                    timestamp,
                    note: None,
                })
            })
            .await?;

        self.notify(&[Table::Sessions]);
        Ok(session)
    }

    pub async fn update_session_note(&self, session_id: i64, note: Option<String>) -> Result<()> {
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE exercise_sessions SET note = ?1 WHERE id = ?2",
                params![note, session_id],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("Session {session_id} not found"));
            }

            Ok(())
        })
        .await?;

        self.notify(&[Table::Sessions]);
        Ok(())
    }

    pub async fn insert_loop(&self, new_loop: &NewExerciseLoop) -> Result<ExerciseLoop> {
        let record = NewExerciseLoop {
            timestamp: stored_precision(new_loop.timestamp),
            ..new_loop.clone()
        };
        ensure_seconds(record.initial_cp, "initial_cp")?;
        ensure_seconds(record.final_cp, "final_cp")?;

        let stored = self
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO exercise_loops
                         (session_id, timestamp, initial_cp, breathing_duration_seconds, final_cp)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        record.session_id,
                        format_datetime(&record.timestamp),
                        record.initial_cp,
                        to_i64(record.breathing_duration_seconds)?,
                        record.final_cp,
                    ],
                )
                .with_context(|| format!("failed to insert loop for session {}", record.session_id))?;

                Ok(ExerciseLoop {
                    id: conn.last_insert_rowid(),
                    session_id: record.session_id,
                    timestamp: record.timestamp,
                    initial_cp: record.initial_cp,
                    breathing_duration_seconds: record.breathing_duration_seconds,
                    final_cp: record.final_cp,
                })
            })
            .await?;

        self.notify(&[Table::Loops]);
        Ok(stored)
    }

    pub async fn get_session_with_loops(&self, session_id: i64) -> Result<Option<SessionWithLoops>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, note FROM exercise_sessions WHERE id = ?1",
            )?;
            let session = stmt
                .query_row(params![session_id], |row| Ok(row_to_session(row)))
                .optional()?
                .transpose()?;

            match session {
                Some(session) => {
                    let loops = loops_for_session(conn, session.id)?;
                    Ok(Some(SessionWithLoops { session, loops }))
                }
                None => Ok(None),
            }
        })
        .await
    }

    /// All sessions newest first, each with its loops oldest first.
    pub async fn list_sessions_with_loops(&self) -> Result<Vec<SessionWithLoops>> {
        self.execute(|conn| {
            let tx = conn.transaction()?;

            let mut loops_by_session: HashMap<i64, Vec<ExerciseLoop>> = HashMap::new();
            {
                let mut stmt = tx.prepare(
                    "SELECT id, session_id, timestamp, initial_cp, breathing_duration_seconds, final_cp
                     FROM exercise_loops
                     ORDER BY session_id ASC, timestamp ASC, id ASC",
                )?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    let exercise_loop = row_to_loop(row)?;
                    loops_by_session
                        .entry(exercise_loop.session_id)
                        .or_default()
                        .push(exercise_loop);
                }
            }

            let mut sessions = Vec::new();
            {
                let mut stmt = tx.prepare(
                    "SELECT id, timestamp, note
                     FROM exercise_sessions
                     ORDER BY timestamp DESC, id DESC",
                )?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    let session = row_to_session(row)?;
                    let loops = loops_by_session.remove(&session.id).unwrap_or_default();
                    sessions.push(SessionWithLoops { session, loops });
                }
            }

            tx.commit()?;
            Ok(sessions)
        })
        .await
    }

    /// Removes sessions that never completed a loop. Such rows only survive
    /// when the process stops mid-way through a first loop.
    pub async fn delete_empty_sessions(&self) -> Result<usize> {
        let removed = self
            .execute(|conn| {
                conn.execute(
                    "DELETE FROM exercise_sessions
                     WHERE NOT EXISTS (
                         SELECT 1 FROM exercise_loops WHERE exercise_loops.session_id = exercise_sessions.id
                     )",
                    [],
                )
                .context("failed to delete empty exercise sessions")
            })
            .await?;

        if removed > 0 {
            self.notify(&[Table::Sessions]);
        }
        Ok(removed)
    }

    /// Deletes a session; its loops go with it via ON DELETE CASCADE.
    pub async fn delete_session(&self, session_id: i64) -> Result<bool> {
        let rows_affected = self
            .execute(move |conn| {
                conn.execute(
                    "DELETE FROM exercise_sessions WHERE id = ?1",
                    params![session_id],
                )
                .context("failed to delete exercise session")
            })
            .await?;

        if rows_affected > 0 {
            self.notify(&[Table::Sessions, Table::Loops]);
        }
        Ok(rows_affected > 0)
    }
}
