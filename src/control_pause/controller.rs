use std::sync::{Arc, Weak};

use anyhow::Result;
use chrono::Utc;
use log::info;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::{
    db::{query_fn, ControlPauseRecord, Database, LiveQuery, Table},
    settings::Settings,
    timer::{every, PeriodicTask, Stopwatch},
};

use super::ControlPauseState;

struct ControlPauseCore {
    state: ControlPauseState,
    stopwatch: Stopwatch,
    ticker: PeriodicTask,
}

/// Start/stop stopwatch for standalone control pause measurements.
///
/// Every completed stop writes one record. The recent and best records are
/// kept current by a background task fed from two live queries, so they
/// follow every write to the store, including ones made elsewhere.
#[derive(Clone)]
pub struct ControlPauseController {
    core: Arc<Mutex<ControlPauseCore>>,
    updates: Arc<watch::Sender<ControlPauseState>>,
    db: Database,
    settings: Settings,
    _records_task: Arc<DropGuard>,
}

impl ControlPauseController {
    pub async fn new(db: Database, settings: Settings) -> Result<Self> {
        let limit = settings.recent_records_limit;
        let recent = db
            .observe(
                &[Table::ControlPauses],
                query_fn(move |db: Database| async move { db.recent_control_pauses(limit).await }),
            )
            .await?;
        let best = db
            .observe(
                &[Table::ControlPauses],
                query_fn(|db: Database| async move { db.best_control_pause().await }),
            )
            .await?;

        let state = ControlPauseState {
            recent_records: recent.current(),
            best_record: best.current(),
            ..ControlPauseState::default()
        };
        let (updates, _) = watch::channel(state.clone());

        let core = Arc::new(Mutex::new(ControlPauseCore {
            state,
            stopwatch: Stopwatch::new(),
            ticker: PeriodicTask::new(),
        }));
        let updates = Arc::new(updates);

        let stop = CancellationToken::new();
        tokio::spawn(merge_records(
            Arc::downgrade(&core),
            updates.clone(),
            recent,
            best,
            stop.clone(),
        ));

        Ok(Self {
            core,
            updates,
            db,
            settings,
            _records_task: Arc::new(stop.drop_guard()),
        })
    }

    pub async fn snapshot(&self) -> ControlPauseState {
        self.core.lock().await.state.clone()
    }

    /// Receives every state change, starting with the current state.
    pub fn subscribe(&self) -> watch::Receiver<ControlPauseState> {
        self.updates.subscribe()
    }

    /// Stops a running measurement (returning the saved record) or starts a
    /// new one.
    pub async fn toggle(&self) -> Result<Option<ControlPauseRecord>> {
        let running = self.core.lock().await.state.is_running;
        if running {
            self.stop().await
        } else {
            self.start().await;
            Ok(None)
        }
    }

    /// Starts measuring from zero. Restarts if already running.
    pub async fn start(&self) {
        let mut core = self.core.lock().await;
        core.stopwatch.restart();
        core.state.is_running = true;
        core.state.elapsed_seconds = 0.0;
        core.state.can_delete_last = false;

        let handle = tokio::spawn(tick(
            Arc::downgrade(&self.core),
            self.updates.clone(),
            self.settings.cp_tick(),
        ));
        core.ticker.replace(handle);
        self.updates.send_replace(core.state.clone());
    }

    /// Stops the measurement and saves it. Returns `None` if nothing was
    /// running.
    pub async fn stop(&self) -> Result<Option<ControlPauseRecord>> {
        let duration_seconds = {
            let mut core = self.core.lock().await;
            if !core.state.is_running {
                return Ok(None);
            }
            core.ticker.cancel();
            let elapsed = core.stopwatch.pause().as_secs_f64();
            core.state.is_running = false;
            core.state.elapsed_seconds = elapsed;
            self.updates.send_replace(core.state.clone());
            elapsed
        };

        let record = self
            .db
            .insert_control_pause(Utc::now(), duration_seconds)
            .await?;
        info!(
            "Saved control pause {} ({:.2}s)",
            record.id, record.duration_seconds
        );

        let mut core = self.core.lock().await;
        if !core.state.is_running {
            core.state.can_delete_last = true;
            self.updates.send_replace(core.state.clone());
        }

        Ok(Some(record))
    }

    /// Abandons the current measurement without saving anything.
    pub async fn reset(&self) {
        let mut core = self.core.lock().await;
        core.ticker.cancel();
        core.stopwatch.reset();
        core.state.is_running = false;
        core.state.elapsed_seconds = 0.0;
        core.state.can_delete_last = false;
        self.updates.send_replace(core.state.clone());
    }

    /// Undoes the measurement saved by the last stop of this controller.
    ///
    /// Deletes the newest record only while `can_delete_last` is set, which
    /// happens right after a successful stop. On a fresh controller, after a
    /// start or reset, and on every call after the first one following a
    /// stop, nothing is deleted and `Ok(None)` is returned.
    pub async fn delete_last_record(&self) -> Result<Option<i64>> {
        let allowed = self.core.lock().await.state.can_delete_last;

        let deleted = if allowed {
            self.db.delete_last_control_pause().await?
        } else {
            None
        };
        if let Some(id) = deleted {
            info!("Deleted control pause {id} on request");
        }

        let mut core = self.core.lock().await;
        core.state.can_delete_last = false;
        core.state.elapsed_seconds = 0.0;
        self.updates.send_replace(core.state.clone());

        Ok(deleted)
    }
}

async fn tick(
    core: Weak<Mutex<ControlPauseCore>>,
    updates: Arc<watch::Sender<ControlPauseState>>,
    period: tokio::time::Duration,
) {
    let mut interval = every(period);
    loop {
        interval.tick().await;

        let Some(core) = core.upgrade() else {
            break;
        };
        let mut guard = core.lock().await;
        if !guard.state.is_running {
            break;
        }
        guard.state.elapsed_seconds = guard.stopwatch.elapsed_secs_f64();
        updates.send_replace(guard.state.clone());
    }
}

async fn merge_records(
    core: Weak<Mutex<ControlPauseCore>>,
    updates: Arc<watch::Sender<ControlPauseState>>,
    recent: LiveQuery<Vec<ControlPauseRecord>>,
    best: LiveQuery<Option<ControlPauseRecord>>,
    stop: CancellationToken,
) {
    let mut recent_rx = recent.subscribe();
    let mut best_rx = best.subscribe();

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            changed = recent_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = best_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let Some(core) = core.upgrade() else {
            break;
        };
        let mut guard = core.lock().await;
        guard.state.recent_records = recent_rx.borrow_and_update().clone();
        guard.state.best_record = best_rx.borrow_and_update().clone();
        updates.send_replace(guard.state.clone());
    }
}
