use std::time::Duration;

use buteyko_lib::{
    db::Database,
    exercise::{ExerciseController, ExerciseError, ExerciseStep},
    settings::Settings,
    AppState,
};

async fn sleep_secs(secs: f64) {
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn single_loop_session_is_saved_with_note() {
    let db = Database::open_in_memory().unwrap();
    let controller = ExerciseController::new(db.clone(), Settings::default())
        .await
        .unwrap();

    controller.start_session().await.unwrap();
    controller.toggle_cp_timer().await.unwrap();
    sleep_secs(20.0).await;
    controller.toggle_cp_timer().await.unwrap();

    sleep_secs(65.0).await;
    controller.finish_breathing().await.unwrap();
    controller.skip_recovery().await.unwrap();

    controller.toggle_cp_timer().await.unwrap();
    sleep_secs(25.0).await;
    controller.toggle_cp_timer().await.unwrap();

    let summary = controller.snapshot().await;
    assert_eq!(summary.step, ExerciseStep::Summary);
    assert_eq!(summary.initial_cp, 20.0);
    assert_eq!(summary.breathing_duration_seconds, 65);
    assert_eq!(summary.final_cp, 25.0);
    assert_eq!(summary.last_known_cp, Some(25.0));

    controller.finish_session("felt good").await.unwrap();
    assert_eq!(controller.snapshot().await.step, ExerciseStep::Idle);

    let sessions = db.list_sessions_with_loops().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session.note.as_deref(), Some("felt good"));
    assert_eq!(sessions[0].loops.len(), 1);

    let saved = &sessions[0].loops[0];
    assert_eq!(saved.initial_cp, 20.0);
    assert_eq!(saved.breathing_duration_seconds, 65);
    assert_eq!(saved.final_cp, 25.0);
}

#[tokio::test(start_paused = true)]
async fn recovery_runs_out_on_its_own() {
    let db = Database::open_in_memory().unwrap();
    let controller = ExerciseController::launch(db, Settings::default(), Some(22.0))
        .await
        .unwrap();
    let mut updates = controller.subscribe();

    sleep_secs(40.0).await;
    controller.finish_breathing().await.unwrap();

    let mut countdown = Vec::new();
    loop {
        updates.changed().await.unwrap();
        let state = updates.borrow_and_update().clone();
        if state.step == ExerciseStep::RecoveryCountdown {
            countdown.push(state.recovery_remaining_seconds);
        } else if state.step == ExerciseStep::PostCheckCp {
            break;
        }
    }

    // The first value is the full countdown published on entry.
    assert_eq!(countdown.first(), Some(&30));
    assert_eq!(countdown.last(), Some(&1));
    assert!(countdown.windows(2).all(|pair| pair[0] > pair[1]));
}

#[tokio::test(start_paused = true)]
async fn zero_recovery_goes_straight_to_post_check() {
    let db = Database::open_in_memory().unwrap();
    let settings = Settings {
        recovery_seconds: 0,
        ..Settings::default()
    };
    let controller = ExerciseController::launch(db, settings, Some(22.0))
        .await
        .unwrap();

    sleep_secs(12.0).await;
    controller.finish_breathing().await.unwrap();
    assert_eq!(controller.snapshot().await.step, ExerciseStep::PostCheckCp);
}

#[tokio::test(start_paused = true)]
async fn multi_loop_session_keeps_every_loop() {
    let db = Database::open_in_memory().unwrap();
    let controller = ExerciseController::new(db.clone(), Settings::default())
        .await
        .unwrap();
    controller.start_session().await.unwrap();

    for (pre, breathe, post) in [(18.0, 60.0, 21.0), (21.0, 90.0, 26.0)] {
        controller.start_cp_timer().await.unwrap();
        sleep_secs(pre).await;
        controller.stop_cp_timer().await.unwrap();
        sleep_secs(breathe).await;
        controller.finish_breathing().await.unwrap();
        controller.skip_recovery().await.unwrap();
        controller.start_cp_timer().await.unwrap();
        sleep_secs(post).await;
        controller.stop_cp_timer().await.unwrap();

        if controller.snapshot().await.completed_loops.len() < 2 {
            controller.start_next_loop().await.unwrap();
        }
    }
    controller.finish_session("").await.unwrap();

    let sessions = db.list_sessions_with_loops().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session.note, None);
    let finals: Vec<f64> = sessions[0].loops.iter().map(|l| l.final_cp).collect();
    assert_eq!(finals, vec![21.0, 26.0]);
}

#[tokio::test(start_paused = true)]
async fn finishing_outside_summary_is_rejected() {
    let db = Database::open_in_memory().unwrap();
    let controller = ExerciseController::new(db, Settings::default())
        .await
        .unwrap();

    let err = controller.finish_session("early").await.unwrap_err();
    assert!(matches!(
        err,
        ExerciseError::InvalidTransition {
            from: ExerciseStep::Idle,
            ..
        }
    ));
    assert!(matches!(
        controller.start_with_initial_cp(-3.0).await,
        Err(ExerciseError::InvalidInitialCp(_))
    ));
}

#[tokio::test]
async fn app_state_sweeps_unfinished_sessions_on_open() {
    let dir = tempfile::tempdir().unwrap();
    {
        let app = AppState::open(dir.path()).await.unwrap();
        assert_eq!(app.db.path(), Some(dir.path().join("buteyko.sqlite3").as_path()));
        let exercise = app.exercise(None).await.unwrap();
        exercise.start_session().await.unwrap();
        assert_eq!(app.db.list_sessions_with_loops().await.unwrap().len(), 1);
    }

    let reopened = AppState::open(dir.path()).await.unwrap();
    assert!(reopened.db.list_sessions_with_loops().await.unwrap().is_empty());
    assert!(dir.path().join("buteyko.sqlite3").exists());
}
