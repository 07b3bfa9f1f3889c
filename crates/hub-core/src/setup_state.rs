//! Device setup state machine
//!
//! Enforces valid transitions for a device's lifecycle:
//!
//! ```text
//! Unconfigured → SettingUp → Configured
//!                          ↘ SetupFailed
//!
//! Configured/SetupFailed → Reconfiguring → Configured
//!                                        ↘ SetupFailed
//!
//! any non-terminal state → Removed (terminal)
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of one configured device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupState {
    #[default]
    Unconfigured,
    SettingUp,
    Configured,
    Reconfiguring,
    SetupFailed,
    Removed,
}

/// Error when an invalid state transition is attempted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid setup transition from {from:?} to {to:?}: {reason}")]
pub struct InvalidTransition {
    pub from: SetupState,
    pub to: SetupState,
    pub reason: &'static str,
}

impl SetupState {
    /// Attempt a transition to a new state.
    pub fn try_transition(self, to: SetupState) -> Result<SetupState, InvalidTransition> {
        use SetupState::*;

        let valid = match (self, to) {
            (Removed, _) => false,
            (_, Removed) => true,

            (Unconfigured, SettingUp) => true,

            (SettingUp, Configured) => true,
            (SettingUp, SetupFailed) => true,

            (Configured, Reconfiguring) => true,
            (SetupFailed, Reconfiguring) => true,

            (Reconfiguring, Configured) => true,
            (Reconfiguring, SetupFailed) => true,

            _ => false,
        };

        if valid {
            Ok(to)
        } else {
            Err(InvalidTransition {
                from: self,
                to,
                reason: Self::transition_error_reason(self, to),
            })
        }
    }

    /// Check if a transition is valid without performing it
    pub fn can_transition_to(self, to: SetupState) -> bool {
        self.try_transition(to).is_ok()
    }

    /// A setup or reconfiguration is in flight
    pub fn is_busy(self) -> bool {
        matches!(self, SetupState::SettingUp | SetupState::Reconfiguring)
    }

    pub fn is_configured(self) -> bool {
        self == SetupState::Configured
    }

    fn transition_error_reason(from: SetupState, to: SetupState) -> &'static str {
        use SetupState::*;

        match (from, to) {
            (Removed, _) => "Removed is terminal - device cannot come back",
            (SettingUp, Reconfiguring) | (Reconfiguring, Reconfiguring) => {
                "Setup in progress - must finish before reconfiguring"
            }
            (SettingUp, SettingUp) => "Setup already in progress",
            (Unconfigured, Configured) => {
                "Cannot jump to Configured - must go through SettingUp"
            }
            (Configured, SettingUp) => "Already configured - reconfigure instead",
            _ => "Invalid setup transition",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SetupState::*;

    // ==================== Valid Transitions ====================

    #[test]
    fn test_unconfigured_to_setting_up() {
        assert_eq!(Unconfigured.try_transition(SettingUp), Ok(SettingUp));
    }

    #[test]
    fn test_setting_up_outcomes() {
        assert!(SettingUp.can_transition_to(Configured));
        assert!(SettingUp.can_transition_to(SetupFailed));
    }

    #[test]
    fn test_reconfigure_paths() {
        assert!(Configured.can_transition_to(Reconfiguring));
        assert!(SetupFailed.can_transition_to(Reconfiguring));
        assert!(Reconfiguring.can_transition_to(Configured));
        assert!(Reconfiguring.can_transition_to(SetupFailed));
    }

    #[test]
    fn test_any_state_can_be_removed() {
        for state in [Unconfigured, SettingUp, Configured, Reconfiguring, SetupFailed] {
            assert!(state.can_transition_to(Removed), "{:?}", state);
        }
    }

    // ==================== Invalid Transitions ====================

    #[test]
    fn test_removed_is_terminal() {
        let err = Removed.try_transition(SettingUp).unwrap_err();
        assert!(err.reason.contains("terminal"));
        assert!(!Removed.can_transition_to(Removed));
    }

    #[test]
    fn test_busy_states_reject_new_setup() {
        assert!(!SettingUp.can_transition_to(SettingUp));
        assert!(!SettingUp.can_transition_to(Reconfiguring));
        assert!(!Reconfiguring.can_transition_to(Reconfiguring));
    }

    #[test]
    fn test_cannot_skip_setting_up() {
        let err = Unconfigured.try_transition(Configured).unwrap_err();
        assert_eq!(err.from, Unconfigured);
        assert_eq!(err.to, Configured);
    }

    #[test]
    fn test_is_busy() {
        assert!(SettingUp.is_busy());
        assert!(Reconfiguring.is_busy());
        assert!(!Configured.is_busy());
        assert!(!SetupFailed.is_busy());
    }
}
