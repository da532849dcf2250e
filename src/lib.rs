//! Reviewmaster - review job orchestration for AI code-review agents

pub mod config;
pub mod context;
pub mod domain;
pub mod events;
pub mod lifecycle;
pub mod orchestrator;
pub mod progress;
pub mod queue;
pub mod tools;
pub mod watcher;
