pub mod controller;
pub mod state;

pub use controller::ControlPauseController;
pub use state::ControlPauseState;
