pub mod break_timer;
pub mod controller;
pub mod state;

pub use break_timer::{BreakEvent, BreakOutcome, BreakTimer};
pub use controller::{Collaborators, SessionController, MAX_BREAK_MINUTES};
pub use state::{Mode, SessionSnapshot, SessionState};
