//! Local persistence: standalone control pauses, exercise sessions and their
//! loops, all stored in one SQLite file owned by a dedicated worker thread.

mod connection;
mod helpers;
pub mod live;
mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;
pub use live::{query_fn, LiveQuery, QueryFn, SharedQuery, Subscription, Table};
pub use models::{
    ControlPauseRecord, ExerciseLoop, ExerciseSession, NewExerciseLoop, SessionWithLoops,
};
