//! Guided multi-loop breathing exercise.
//!
//! One loop is: measure the control pause, breathe reduced for as long as the
//! user likes (pausable), recover with normal breathing for a fixed countdown,
//! measure again. Loops accumulate in a session until the user finishes it.

pub mod controller;
pub mod error;
pub mod state;

pub use controller::ExerciseController;
pub use error::ExerciseError;
pub use state::{CompletedLoop, ExerciseState, ExerciseStep};
