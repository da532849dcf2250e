//! Merge request lifecycle state machine

mod machine;
mod tracked;
mod transitions;

pub use machine::*;
pub use tracked::*;
pub use transitions::*;
