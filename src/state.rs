//! Lifecycle state of the engine.
//!
//! ```text
//! NotStarted --start--> Running <--pause/unpause--> Paused
//!                          \                          /
//!                           `------stop-----> Stopped <'
//! ```
//!
//! `Stopped` is terminal.

use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EngineState {
    #[default]
    NotStarted,
    Running,
    Paused,
    Stopped,
}

impl EngineState {
    /// Running or paused.
    pub fn is_active(&self) -> bool {
        matches!(self, EngineState::Running | EngineState::Paused)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::NotStarted => "not started",
            EngineState::Running => "running",
            EngineState::Paused => "paused",
            EngineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
