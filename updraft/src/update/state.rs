//! Update run state machine.
//!
//! ```text
//! Idle → Checking → NoUpdates
//!                 → UpdatesAvailable → Preparing → Prepared → Applying → Applied
//!                                                                      → Failed → RolledBack
//! (any non-terminal state) → Aborted
//! ```

use std::fmt;

/// Where an update run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpdateState {
    #[default]
    Idle,
    Checking,
    NoUpdates,
    UpdatesAvailable,
    Preparing,
    Prepared,
    Applying,
    Applied,
    Failed,
    RolledBack,
    Aborted,
}

impl UpdateState {
    pub fn name(&self) -> &'static str {
        match self {
            UpdateState::Idle => "idle",
            UpdateState::Checking => "checking",
            UpdateState::NoUpdates => "no updates",
            UpdateState::UpdatesAvailable => "updates available",
            UpdateState::Preparing => "preparing",
            UpdateState::Prepared => "prepared",
            UpdateState::Applying => "applying",
            UpdateState::Applied => "applied",
            UpdateState::Failed => "failed",
            UpdateState::RolledBack => "rolled back",
            UpdateState::Aborted => "aborted",
        }
    }

    /// Whether the run has finished. Abort cannot leave a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpdateState::NoUpdates
                | UpdateState::Applied
                | UpdateState::RolledBack
                | UpdateState::Aborted
        )
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        let terminal = [
            UpdateState::NoUpdates,
            UpdateState::Applied,
            UpdateState::RolledBack,
            UpdateState::Aborted,
        ];
        for state in terminal {
            assert!(state.is_terminal(), "{} should be terminal", state);
        }
        for state in [
            UpdateState::Idle,
            UpdateState::Checking,
            UpdateState::UpdatesAvailable,
            UpdateState::Preparing,
            UpdateState::Prepared,
            UpdateState::Applying,
            UpdateState::Failed,
        ] {
            assert!(!state.is_terminal(), "{} should not be terminal", state);
        }
    }

    #[test]
    fn test_default_is_idle() {
        assert_eq!(UpdateState::default(), UpdateState::Idle);
        assert_eq!(UpdateState::UpdatesAvailable.to_string(), "updates available");
    }
}
