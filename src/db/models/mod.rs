pub mod control_pause;
pub mod session;

pub use control_pause::ControlPauseRecord;
pub use session::{ExerciseLoop, ExerciseSession, NewExerciseLoop, SessionWithLoops};
