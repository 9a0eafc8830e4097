pub mod stopwatch;
pub mod ticker;

pub use stopwatch::Stopwatch;
pub use ticker::{every, PeriodicTask};
