use std::sync::{Arc, Weak};

use chrono::Utc;
use log::{info, warn};
use tokio::sync::{watch, Mutex, MutexGuard};

use crate::{
    db::{Database, NewExerciseLoop},
    settings::Settings,
    timer::{every, PeriodicTask, Stopwatch},
};

use super::{CompletedLoop, ExerciseError, ExerciseState, ExerciseStep};

type Result<T> = std::result::Result<T, ExerciseError>;

struct ExerciseCore {
    state: ExerciseState,
    cp_watch: Stopwatch,
    breathing_watch: Stopwatch,
    ticker: PeriodicTask,
}

impl ExerciseCore {
    fn stop_timers(&mut self) {
        self.ticker.cancel();
        self.cp_watch.reset();
    }

    fn enter_post_check(&mut self) {
        self.cp_watch.reset();
        self.state.enter_post_check();
    }
}

/// Drives one exercise flow. Operations are serialized through a single
/// lock, and the controller owns exactly one periodic task at a time: the
/// control pause stopwatch, the breathing timer or the recovery countdown.
///
/// Every database write happens before the state change it backs. When a
/// write fails the operation returns [`ExerciseError::Persistence`] and the
/// state stays in the step the operation started from.
#[derive(Clone)]
pub struct ExerciseController {
    core: Arc<Mutex<ExerciseCore>>,
    updates: Arc<watch::Sender<ExerciseState>>,
    db: Database,
    settings: Settings,
}

impl ExerciseController {
    /// Builds an idle controller, seeding the "use last" suggestion from the
    /// most recent standalone measurement.
    pub async fn new(db: Database, settings: Settings) -> Result<Self> {
        let mut state = ExerciseState::new(settings.recovery_seconds);
        state.last_known_cp = db
            .latest_control_pause()
            .await?
            .map(|record| record.duration_seconds);

        let (updates, _) = watch::channel(state.clone());

        Ok(Self {
            core: Arc::new(Mutex::new(ExerciseCore {
                state,
                cp_watch: Stopwatch::new(),
                breathing_watch: Stopwatch::new(),
                ticker: PeriodicTask::new(),
            })),
            updates: Arc::new(updates),
            db,
            settings,
        })
    }

    /// Like [`ExerciseController::new`], but jumps straight into breathing
    /// when the caller already measured a positive control pause.
    pub async fn launch(db: Database, settings: Settings, initial_cp: Option<f64>) -> Result<Self> {
        let controller = Self::new(db, settings).await?;
        if let Some(cp) = initial_cp.filter(|cp| *cp > 0.0) {
            controller.start_with_initial_cp(cp).await?;
        }
        Ok(controller)
    }

    pub async fn snapshot(&self) -> ExerciseState {
        self.core.lock().await.state.clone()
    }

    /// Receives every state change, starting with the current state.
    pub fn subscribe(&self) -> watch::Receiver<ExerciseState> {
        self.updates.subscribe()
    }

    fn publish(&self, core: &ExerciseCore) {
        self.updates.send_replace(core.state.clone());
    }

    /// Creates the session row and moves to the pre-check measurement.
    pub async fn start_session(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        if core.state.is_session_active() {
            return Err(ExerciseError::SessionAlreadyActive);
        }
        core.state
            .check_transition(ExerciseStep::PreCheckCp, "start a session")?;

        let latest = self.db.latest_control_pause().await?;
        let session = self.db.insert_session(Utc::now()).await?;
        info!("Started exercise session {}", session.id);

        core.stop_timers();
        core.breathing_watch.reset();
        core.state
            .begin_pre_check(session.id, latest.map(|record| record.duration_seconds));
        self.publish(&core);
        Ok(())
    }

    /// Alternate entry: creates the session and starts breathing with a
    /// control pause measured elsewhere.
    pub async fn start_with_initial_cp(&self, initial_cp: f64) -> Result<()> {
        if !initial_cp.is_finite() || initial_cp <= 0.0 {
            return Err(ExerciseError::InvalidInitialCp(initial_cp));
        }

        let mut core = self.core.lock().await;
        if core.state.is_session_active() {
            return Err(ExerciseError::SessionAlreadyActive);
        }
        core.state
            .check_transition(ExerciseStep::Breathing, "start breathing")?;

        let session = self.db.insert_session(Utc::now()).await?;
        info!(
            "Started exercise session {} with initial CP {:.2}s",
            session.id, initial_cp
        );

        core.stop_timers();
        core.state.begin_pre_check(session.id, Some(initial_cp));
        self.start_breathing(&mut core, initial_cp);
        self.publish(&core);
        Ok(())
    }

    pub async fn toggle_cp_timer(&self) -> Result<()> {
        let running = self.core.lock().await.state.is_timer_running;
        if running {
            self.stop_cp_timer().await
        } else {
            self.start_cp_timer().await
        }
    }

    /// Starts (or restarts) the control pause stopwatch in either check step.
    pub async fn start_cp_timer(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        core.state.require(
            &[ExerciseStep::PreCheckCp, ExerciseStep::PostCheckCp],
            "start the control pause timer",
        )?;

        core.cp_watch.restart();
        core.state.cp_timer_seconds = 0.0;
        core.state.is_timer_running = true;

        let handle = tokio::spawn(cp_tick(
            Arc::downgrade(&self.core),
            self.updates.clone(),
            self.settings.cp_tick(),
        ));
        core.ticker.replace(handle);
        self.publish(&core);
        Ok(())
    }

    /// Stops the control pause stopwatch. In the pre-check this starts the
    /// breathing phase; in the post-check it saves the loop and shows the
    /// summary. A stopwatch that is not running is left alone.
    pub async fn stop_cp_timer(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        core.state.require(
            &[ExerciseStep::PreCheckCp, ExerciseStep::PostCheckCp],
            "stop the control pause timer",
        )?;
        if !core.state.is_timer_running {
            return Ok(());
        }

        core.ticker.cancel();
        let measured = core.cp_watch.pause().as_secs_f64();
        core.state.cp_timer_seconds = measured;
        core.state.is_timer_running = false;

        let step = core.state.step;
        match step {
            ExerciseStep::PreCheckCp => {
                core.state.last_known_cp = Some(measured);
                self.start_breathing(&mut core, measured);
                self.publish(&core);
                Ok(())
            }
            ExerciseStep::PostCheckCp => {
                let result = self.save_loop(&mut core, measured).await;
                self.publish(&core);
                result
            }
            other => Err(ExerciseError::InvalidTransition {
                from: other,
                action: "stop the control pause timer",
            }),
        }
    }

    /// Skips the pre-check by reusing the last known control pause.
    pub async fn use_last_cp_for_pre_check(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        core.state
            .require(&[ExerciseStep::PreCheckCp], "reuse the last control pause")?;
        let last = core.state.last_known_cp.ok_or(ExerciseError::NoLastKnownCp)?;

        core.stop_timers();
        core.state.cp_timer_seconds = 0.0;
        self.start_breathing(&mut core, last);
        self.publish(&core);
        Ok(())
    }

    pub async fn pause_breathing(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        core.state
            .check_transition(ExerciseStep::Paused, "pause breathing")?;

        core.ticker.cancel();
        let frozen = core.breathing_watch.pause();
        core.state.breathing_duration_seconds = frozen.as_secs();
        core.state.step = ExerciseStep::Paused;
        core.state.is_timer_running = false;
        self.publish(&core);
        Ok(())
    }

    /// Continues the breathing timer from where it was paused.
    pub async fn resume_breathing(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        core.state
            .require(&[ExerciseStep::Paused], "resume breathing")?;

        core.breathing_watch.resume();
        core.state.step = ExerciseStep::Breathing;
        core.state.is_timer_running = true;
        self.spawn_breathing_ticker(&mut core);
        self.publish(&core);
        Ok(())
    }

    /// Ends breathing and starts the recovery countdown.
    pub async fn finish_breathing(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        core.state
            .check_transition(ExerciseStep::RecoveryCountdown, "finish breathing")?;

        core.ticker.cancel();
        let total = core.breathing_watch.pause();
        core.state.breathing_duration_seconds = total.as_secs();
        core.state.enter_recovery(self.settings.recovery_seconds);

        if self.settings.recovery_seconds == 0 {
            core.enter_post_check();
        } else {
            let handle = tokio::spawn(recovery_tick(
                Arc::downgrade(&self.core),
                self.updates.clone(),
                self.settings.recovery_tick(),
            ));
            core.ticker.replace(handle);
        }
        self.publish(&core);
        Ok(())
    }

    /// Ends the recovery countdown early and moves to the post-check.
    pub async fn skip_recovery(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        core.state
            .check_transition(ExerciseStep::PostCheckCp, "skip recovery")?;

        core.ticker.cancel();
        core.enter_post_check();
        self.publish(&core);
        Ok(())
    }

    /// Clears the per-loop readings and starts another pre-check. Completed
    /// loops and the last known control pause carry over.
    pub async fn start_next_loop(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        core.state
            .require(&[ExerciseStep::Summary], "start the next loop")?;

        core.stop_timers();
        core.breathing_watch.reset();
        core.state.prepare_next_loop(self.settings.recovery_seconds);
        self.publish(&core);
        Ok(())
    }

    /// Saves `comment` as the session note when it is not blank and returns
    /// to idle.
    pub async fn finish_session(&self, comment: &str) -> Result<()> {
        let mut core = self.core.lock().await;
        core.state
            .require(&[ExerciseStep::Summary], "finish the session")?;
        let session_id = core.state.session_id.ok_or(ExerciseError::NoActiveSession)?;

        if !comment.trim().is_empty() {
            self.db
                .update_session_note(session_id, Some(comment.to_string()))
                .await?;
        }
        info!(
            "Finished exercise session {session_id} after {} loop(s)",
            core.state.completed_loops.len()
        );

        self.reset_to_idle(&mut core);
        Ok(())
    }

    /// Gives up on the loop in progress.
    ///
    /// Before any loop has completed the whole session is deleted and the
    /// controller goes back to idle. Otherwise the unsaved loop is dropped
    /// and the summary of the last completed loop is shown again.
    pub async fn abandon_current_loop(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        core.state.require(
            &[ExerciseStep::PreCheckCp, ExerciseStep::PostCheckCp],
            "abandon the loop",
        )?;

        core.stop_timers();
        core.state.is_timer_running = false;

        if core.state.completed_loops.is_empty() {
            if let Some(session_id) = core.state.session_id {
                if let Err(err) = self.db.delete_session(session_id).await {
                    self.publish(&core);
                    return Err(err.into());
                }
                info!("Discarded exercise session {session_id} with no completed loops");
            }
            self.reset_to_idle(&mut core);
        } else {
            core.breathing_watch.reset();
            core.state.revert_to_last_completed();
            self.publish(&core);
        }
        Ok(())
    }

    fn start_breathing(&self, core: &mut MutexGuard<'_, ExerciseCore>, initial_cp: f64) {
        core.state.begin_breathing(initial_cp);
        core.breathing_watch.restart();
        self.spawn_breathing_ticker(core);
    }

    fn spawn_breathing_ticker(&self, core: &mut MutexGuard<'_, ExerciseCore>) {
        let handle = tokio::spawn(breathing_tick(
            Arc::downgrade(&self.core),
            self.updates.clone(),
            self.settings.breathing_tick(),
        ));
        core.ticker.replace(handle);
    }

    async fn save_loop(&self, core: &mut MutexGuard<'_, ExerciseCore>, final_cp: f64) -> Result<()> {
        let session_id = core.state.session_id.ok_or(ExerciseError::NoActiveSession)?;
        let completed: CompletedLoop = core.state.pending_loop(final_cp);

        let stored = self
            .db
            .insert_loop(&NewExerciseLoop {
                session_id,
                timestamp: Utc::now(),
                initial_cp: completed.initial_cp,
                breathing_duration_seconds: completed.breathing_duration_seconds,
                final_cp: completed.final_cp,
            })
            .await
            .map_err(|err| {
                warn!("Loop for session {session_id} was not saved: {err:#}");
                err
            })?;
        info!(
            "Saved loop {} for session {session_id}: {:.2}s -> {}s breathing -> {:.2}s",
            stored.id, completed.initial_cp, completed.breathing_duration_seconds, completed.final_cp
        );

        core.state.complete_loop(completed);
        Ok(())
    }

    fn reset_to_idle(&self, core: &mut MutexGuard<'_, ExerciseCore>) {
        core.stop_timers();
        core.breathing_watch.reset();
        core.state = ExerciseState::new(self.settings.recovery_seconds);
        self.publish(core);
    }
}

async fn cp_tick(
    core: Weak<Mutex<ExerciseCore>>,
    updates: Arc<watch::Sender<ExerciseState>>,
    period: tokio::time::Duration,
) {
    let mut interval = every(period);
    loop {
        interval.tick().await;

        let Some(core) = core.upgrade() else {
            break;
        };
        let mut guard = core.lock().await;
        if !guard.state.step.measures_cp() || !guard.state.is_timer_running {
            break;
        }
        guard.state.cp_timer_seconds = guard.cp_watch.elapsed_secs_f64();
        updates.send_replace(guard.state.clone());
    }
}

async fn breathing_tick(
    core: Weak<Mutex<ExerciseCore>>,
    updates: Arc<watch::Sender<ExerciseState>>,
    period: tokio::time::Duration,
) {
    let mut interval = every(period);
    loop {
        interval.tick().await;

        let Some(core) = core.upgrade() else {
            break;
        };
        let mut guard = core.lock().await;
        if guard.state.step != ExerciseStep::Breathing {
            break;
        }
        let elapsed = guard.breathing_watch.elapsed_whole_secs();
        if elapsed != guard.state.breathing_duration_seconds {
            guard.state.breathing_duration_seconds = elapsed;
            updates.send_replace(guard.state.clone());
        }
    }
}

async fn recovery_tick(
    core: Weak<Mutex<ExerciseCore>>,
    updates: Arc<watch::Sender<ExerciseState>>,
    period: tokio::time::Duration,
) {
    let mut interval = every(period);
    loop {
        interval.tick().await;

        let Some(core) = core.upgrade() else {
            break;
        };
        let mut guard = core.lock().await;
        if guard.state.step != ExerciseStep::RecoveryCountdown {
            break;
        }

        guard.state.recovery_remaining_seconds =
            guard.state.recovery_remaining_seconds.saturating_sub(1);
        if guard.state.recovery_remaining_seconds == 0 {
            guard.enter_post_check();
            updates.send_replace(guard.state.clone());
            break;
        }
        updates.send_replace(guard.state.clone());
    }
}
