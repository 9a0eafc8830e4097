use std::{fmt, str::FromStr};

use log::{error, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::db::{ControlPauseRecord, Database, SessionWithLoops};

const NOT_FOUND_MESSAGE: &str = "Record not found";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("record not found")]
    NotFound,

    #[error("failed to access history: {0:#}")]
    Persistence(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    #[serde(rename = "CP")]
    ControlPause,
    #[serde(rename = "SESSION")]
    Session,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::ControlPause => "CP",
            RecordKind::Session => "SESSION",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = HistoryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "CP" => Ok(RecordKind::ControlPause),
            "SESSION" => Ok(RecordKind::Session),
            _ => Err(HistoryError::NotFound),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "camelCase")]
pub enum DetailState {
    Loading,
    ControlPause(ControlPauseRecord),
    Session(SessionWithLoops),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailEvent {
    Deleted { kind: RecordKind, id: i64 },
}

/// Detail view for one history row, addressed by the `(kind, id)` pair the
/// list hands out. A pair that is missing, unparsable or points at a row
/// that no longer exists is shown as [`DetailState::Error`].
pub struct HistoryDetail {
    db: Database,
    target: Option<(RecordKind, i64)>,
    state: watch::Sender<DetailState>,
    events: mpsc::UnboundedSender<DetailEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<DetailEvent>>,
}

impl HistoryDetail {
    /// Resolves the record and returns the view with its first state.
    pub async fn load(db: Database, kind: Option<&str>, id: Option<i64>) -> Self {
        let target = match (kind.map(RecordKind::from_str), id) {
            (Some(Ok(kind)), Some(id)) => Some((kind, id)),
            _ => None,
        };
        let (state, _) = watch::channel(DetailState::Loading);
        let (events, events_rx) = mpsc::unbounded_channel();

        let detail = Self {
            db,
            target,
            state,
            events,
            events_rx: Some(events_rx),
        };
        detail.reload().await;
        detail
    }

    pub async fn reload(&self) -> DetailState {
        self.state.send_replace(DetailState::Loading);

        let resolved = match self.fetch().await {
            Ok(state) => state,
            Err(HistoryError::NotFound) => DetailState::Error(NOT_FOUND_MESSAGE.to_string()),
            Err(err) => {
                error!("Failed to load history record {:?}: {err}", self.target);
                DetailState::Error(err.to_string())
            }
        };
        self.state.send_replace(resolved.clone());
        resolved
    }

    async fn fetch(&self) -> Result<DetailState, HistoryError> {
        let (kind, id) = self.target.ok_or(HistoryError::NotFound)?;
        match kind {
            RecordKind::ControlPause => self
                .db
                .get_control_pause(id)
                .await?
                .map(DetailState::ControlPause)
                .ok_or(HistoryError::NotFound),
            RecordKind::Session => self
                .db
                .get_session_with_loops(id)
                .await?
                .map(DetailState::Session)
                .ok_or(HistoryError::NotFound),
        }
    }

    pub fn state(&self) -> DetailState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DetailState> {
        self.state.subscribe()
    }

    /// Hands out the receiver for [`DetailEvent`]s. Only the first call
    /// gets it.
    pub fn take_deleted_events(&mut self) -> Option<mpsc::UnboundedReceiver<DetailEvent>> {
        self.events_rx.take()
    }

    /// Deletes the record this view points at. A session takes its loops
    /// with it. Emits one [`DetailEvent::Deleted`] per row actually removed.
    pub async fn delete_record(&self) -> Result<(), HistoryError> {
        let (kind, id) = self.target.ok_or(HistoryError::NotFound)?;

        let deleted = match kind {
            RecordKind::ControlPause => self.db.delete_control_pause(id).await?,
            RecordKind::Session => self.db.delete_session(id).await?,
        };
        if !deleted {
            return Err(HistoryError::NotFound);
        }

        info!("Deleted {kind} record {id} from history");
        // The receiver may already be gone; the delete itself still stands.
        let _ = self.events.send(DetailEvent::Deleted { kind, id });
        Ok(())
    }
}
