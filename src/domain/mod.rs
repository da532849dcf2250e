//! Domain models for Reviewmaster

mod context;
mod job;
mod progress;
mod state;

pub use context::*;
pub use job::*;
pub use progress::*;
pub use state::*;
