use std::fmt;

use serde::{Deserialize, Serialize};

use super::ExerciseError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum ExerciseStep {
    #[default]
    Idle,
    PreCheckCp,
    Breathing,
    Paused,
    RecoveryCountdown,
    PostCheckCp,
    Summary,
}

impl ExerciseStep {
    pub const ALL: [ExerciseStep; 7] = [
        ExerciseStep::Idle,
        ExerciseStep::PreCheckCp,
        ExerciseStep::Breathing,
        ExerciseStep::Paused,
        ExerciseStep::RecoveryCountdown,
        ExerciseStep::PostCheckCp,
        ExerciseStep::Summary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExerciseStep::Idle => "Idle",
            ExerciseStep::PreCheckCp => "PreCheckCp",
            ExerciseStep::Breathing => "Breathing",
            ExerciseStep::Paused => "Paused",
            ExerciseStep::RecoveryCountdown => "RecoveryCountdown",
            ExerciseStep::PostCheckCp => "PostCheckCp",
            ExerciseStep::Summary => "Summary",
        }
    }

    /// Steps reachable in one transition.
    ///
    /// Abandoning a measurement leads to `Idle` when no loop has completed
    /// yet and back to `Summary` otherwise, which is why both check steps
    /// list both.
    pub fn successors(&self) -> &'static [ExerciseStep] {
        use ExerciseStep::*;
        match self {
            Idle => &[PreCheckCp, Breathing],
            PreCheckCp => &[Breathing, Idle, Summary],
            Breathing => &[Paused, RecoveryCountdown],
            Paused => &[Breathing, RecoveryCountdown],
            RecoveryCountdown => &[PostCheckCp],
            PostCheckCp => &[Summary, Idle],
            Summary => &[PreCheckCp, Idle],
        }
    }

    pub fn can_transition_to(&self, next: ExerciseStep) -> bool {
        self.successors().contains(&next)
    }

    /// Steps where the control pause stopwatch is shown.
    pub fn measures_cp(&self) -> bool {
        matches!(self, ExerciseStep::PreCheckCp | ExerciseStep::PostCheckCp)
    }
}

impl fmt::Display for ExerciseStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedLoop {
    pub initial_cp: f64,
    pub breathing_duration_seconds: u64,
    pub final_cp: f64,
}

/// Everything the exercise screen renders. Published after every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseState {
    pub step: ExerciseStep,
    pub session_id: Option<i64>,
    pub initial_cp: f64,
    pub final_cp: f64,
    pub breathing_duration_seconds: u64,
    pub recovery_remaining_seconds: u32,
    pub completed_loops: Vec<CompletedLoop>,
    /// Suggested value for skipping the pre-check measurement.
    pub last_known_cp: Option<f64>,
    pub cp_timer_seconds: f64,
    pub is_timer_running: bool,
}

impl ExerciseState {
    pub fn new(recovery_seconds: u32) -> Self {
        Self {
            step: ExerciseStep::Idle,
            session_id: None,
            initial_cp: 0.0,
            final_cp: 0.0,
            breathing_duration_seconds: 0,
            recovery_remaining_seconds: recovery_seconds,
            completed_loops: Vec::new(),
            last_known_cp: None,
            cp_timer_seconds: 0.0,
            is_timer_running: false,
        }
    }

    pub fn is_session_active(&self) -> bool {
        self.step != ExerciseStep::Idle
    }

    /// Fails unless the current step is one of `allowed`.
    pub(crate) fn require(
        &self,
        allowed: &[ExerciseStep],
        action: &'static str,
    ) -> Result<(), ExerciseError> {
        if allowed.contains(&self.step) {
            Ok(())
        } else {
            Err(ExerciseError::InvalidTransition {
                from: self.step,
                action,
            })
        }
    }

    /// Fails unless `next` is a legal successor of the current step.
    pub(crate) fn check_transition(
        &self,
        next: ExerciseStep,
        action: &'static str,
    ) -> Result<(), ExerciseError> {
        if self.step.can_transition_to(next) {
            Ok(())
        } else {
            Err(ExerciseError::InvalidTransition {
                from: self.step,
                action,
            })
        }
    }

    pub(crate) fn begin_pre_check(&mut self, session_id: i64, last_known_cp: Option<f64>) {
        self.step = ExerciseStep::PreCheckCp;
        self.session_id = Some(session_id);
        self.cp_timer_seconds = 0.0;
        self.is_timer_running = false;
        self.completed_loops.clear();
        if last_known_cp.is_some() {
            self.last_known_cp = last_known_cp;
        }
    }

    pub(crate) fn begin_breathing(&mut self, initial_cp: f64) {
        self.step = ExerciseStep::Breathing;
        self.initial_cp = initial_cp;
        self.breathing_duration_seconds = 0;
        self.is_timer_running = true;
    }

    pub(crate) fn enter_recovery(&mut self, recovery_seconds: u32) {
        self.step = ExerciseStep::RecoveryCountdown;
        self.recovery_remaining_seconds = recovery_seconds;
        self.is_timer_running = true;
    }

    pub(crate) fn enter_post_check(&mut self) {
        self.step = ExerciseStep::PostCheckCp;
        self.cp_timer_seconds = 0.0;
        self.is_timer_running = false;
    }

    /// The loop as it will be persisted once `final_cp` is known.
    pub(crate) fn pending_loop(&self, final_cp: f64) -> CompletedLoop {
        CompletedLoop {
            initial_cp: self.initial_cp,
            breathing_duration_seconds: self.breathing_duration_seconds,
            final_cp,
        }
    }

    pub(crate) fn complete_loop(&mut self, completed: CompletedLoop) {
        self.step = ExerciseStep::Summary;
        self.final_cp = completed.final_cp;
        self.last_known_cp = Some(completed.final_cp);
        self.completed_loops.push(completed);
    }

    pub(crate) fn prepare_next_loop(&mut self, recovery_seconds: u32) {
        self.step = ExerciseStep::PreCheckCp;
        self.cp_timer_seconds = 0.0;
        self.breathing_duration_seconds = 0;
        self.recovery_remaining_seconds = recovery_seconds;
        self.initial_cp = 0.0;
        self.final_cp = 0.0;
        self.is_timer_running = false;
    }

    /// Drops the uncommitted loop and shows the last completed one again.
    /// Returns `false` when there is nothing to go back to.
    pub(crate) fn revert_to_last_completed(&mut self) -> bool {
        let Some(last) = self.completed_loops.last().copied() else {
            return false;
        };

        self.step = ExerciseStep::Summary;
        self.is_timer_running = false;
        self.cp_timer_seconds = 0.0;
        self.initial_cp = last.initial_cp;
        self.breathing_duration_seconds = last.breathing_duration_seconds;
        self.final_cp = last.final_cp;
        self.last_known_cp = Some(last.final_cp);
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashSet, VecDeque};

    use super::*;

    fn reachable_from(start: ExerciseStep) -> HashSet<ExerciseStep> {
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(step) = queue.pop_front() {
            for next in step.successors() {
                if seen.insert(*next) {
                    queue.push_back(*next);
                }
            }
        }
        seen
    }

    #[test]
    fn every_step_has_successors() {
        for step in ExerciseStep::ALL {
            assert!(!step.successors().is_empty(), "{step} is a dead end");
            assert!(
                !step.successors().contains(&step),
                "{step} lists itself as a successor"
            );
        }
    }

    #[test]
    fn every_step_is_reachable_and_can_get_back_to_idle() {
        let from_idle = reachable_from(ExerciseStep::Idle);
        for step in ExerciseStep::ALL {
            assert!(from_idle.contains(&step), "{step} unreachable from Idle");
            assert!(
                reachable_from(step).contains(&ExerciseStep::Idle),
                "{step} cannot return to Idle"
            );
        }
    }

    #[test]
    fn pause_only_reachable_from_breathing() {
        for step in ExerciseStep::ALL {
            let expected = step == ExerciseStep::Breathing;
            assert_eq!(step.can_transition_to(ExerciseStep::Paused), expected, "{step}");
        }
    }

    #[test]
    fn revert_restores_last_completed_loop() {
        let mut state = ExerciseState::new(30);
        state.begin_pre_check(1, Some(18.0));
        state.begin_breathing(20.0);
        state.breathing_duration_seconds = 65;
        let first = state.pending_loop(25.0);
        state.complete_loop(first);

        state.prepare_next_loop(30);
        state.begin_breathing(25.0);
        state.breathing_duration_seconds = 40;
        state.enter_recovery(30);
        state.enter_post_check();
        state.last_known_cp = Some(99.0);

        assert!(state.revert_to_last_completed());
        assert_eq!(state.step, ExerciseStep::Summary);
        assert_eq!(state.initial_cp, 20.0);
        assert_eq!(state.breathing_duration_seconds, 65);
        assert_eq!(state.final_cp, 25.0);
        assert_eq!(state.last_known_cp, Some(25.0));
        assert_eq!(state.completed_loops.len(), 1);
    }

    #[test]
    fn revert_without_completed_loops_does_nothing() {
        let mut state = ExerciseState::new(30);
        state.begin_pre_check(1, None);
        assert!(!state.revert_to_last_completed());
        assert_eq!(state.step, ExerciseStep::PreCheckCp);
    }

    #[test]
    fn require_reports_the_offending_step() {
        let state = ExerciseState::new(30);
        let err = state
            .require(&[ExerciseStep::Breathing], "pause breathing")
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot pause breathing during Idle");
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let value = serde_json::to_value(ExerciseState::new(30)).unwrap();
        assert_eq!(value["step"], "idle");
        assert_eq!(value["recoveryRemainingSeconds"], 30);
        assert!(value["lastKnownCp"].is_null());
    }
}
