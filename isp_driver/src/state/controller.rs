//! Controller lifecycle.
//!
//! ```text
//! Created ──Enable──► Enabled ──StartContinuous──► Continuous
//!    ▲                 │  ▲ ◄──────StopContinuous──────┘
//!    │                 │  └──EndOneshot── OneshotPending ◄─BeginOneshot─┘
//!    │              Disable
//!    │                 ▼
//!    └──(Delete)── Disabled ──Enable──► Enabled
//! ```
//!
//! Deletion is legal from `Created` and `Disabled` only. Continuous and
//! oneshot statistics are mutually exclusive.

use super::TransitionResult;

/// Controller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerState {
    /// Allocated, never enabled.
    Created,
    /// Enabled, no statistics requested.
    Enabled,
    /// Continuous statistics armed; results go to the callback.
    Continuous,
    /// A oneshot request is waiting for its result.
    OneshotPending,
    /// Disabled after having been enabled.
    Disabled,
    /// Slot released.
    Deleted,
}

impl ControllerState {
    /// True while any statistics mode is active.
    #[inline]
    pub const fn statistics_running(self) -> bool {
        matches!(self, ControllerState::Continuous | ControllerState::OneshotPending)
    }

    /// True for states in which the hardware unit is enabled.
    #[inline]
    pub const fn is_enabled(self) -> bool {
        matches!(
            self,
            ControllerState::Enabled | ControllerState::Continuous | ControllerState::OneshotPending
        )
    }
}

/// Event that can trigger a controller transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerEvent {
    /// Enable the hardware unit.
    Enable {
        /// Parent processor is enabled.
        parent_enabled: bool,
    },
    /// Disable the hardware unit.
    Disable,
    /// Arm continuous statistics.
    StartContinuous {
        /// Parent processor is enabled.
        parent_enabled: bool,
    },
    /// Disarm continuous statistics (explicit or callback-requested).
    StopContinuous,
    /// Arm a single measurement.
    BeginOneshot {
        /// Parent processor is enabled.
        parent_enabled: bool,
    },
    /// Oneshot completed or timed out.
    EndOneshot,
    /// Release the slot.
    Delete,
}

/// Controller state machine.
#[derive(Debug, Clone)]
pub struct ControllerStateMachine {
    state: ControllerState,
}

impl ControllerStateMachine {
    /// Create a machine in `Created`.
    pub const fn new() -> Self {
        Self {
            state: ControllerState::Created,
        }
    }

    /// Current state.
    #[inline]
    pub const fn state(&self) -> ControllerState {
        self.state
    }

    /// Callbacks may only be (re)registered while the unit is not enabled.
    #[inline]
    pub const fn allows_registration(&self) -> bool {
        matches!(self.state, ControllerState::Created | ControllerState::Disabled)
    }

    /// Check an event without applying it.
    pub fn check(&self, event: ControllerEvent) -> TransitionResult<ControllerState> {
        use ControllerEvent::*;
        use ControllerState::*;

        let next = match (self.state, event) {
            (Deleted, _) => return TransitionResult::Rejected("controller deleted"),

            (Created | Disabled, Enable { parent_enabled: true }) => Enabled,
            (Created | Disabled, Enable { parent_enabled: false }) => {
                return TransitionResult::Rejected("parent processor not enabled");
            }
            (_, Enable { .. }) => return TransitionResult::Rejected("controller already enabled"),

            (Enabled, Disable) => Disabled,
            (Continuous | OneshotPending, Disable) => {
                return TransitionResult::Rejected("statistics still running");
            }
            (Created | Disabled, Disable) => {
                return TransitionResult::Rejected("controller not enabled");
            }

            (Enabled, StartContinuous { parent_enabled: true }) => Continuous,
            (Enabled, StartContinuous { parent_enabled: false })
            | (Enabled, BeginOneshot { parent_enabled: false }) => {
                return TransitionResult::Rejected("parent processor not enabled");
            }
            (Continuous, StartContinuous { .. }) => {
                return TransitionResult::Rejected("continuous statistics already running");
            }
            (Continuous, BeginOneshot { .. }) => {
                return TransitionResult::Rejected("continuous statistics running");
            }
            (OneshotPending, StartContinuous { .. }) | (OneshotPending, BeginOneshot { .. }) => {
                return TransitionResult::Rejected("oneshot statistics pending");
            }
            (Enabled, BeginOneshot { parent_enabled: true }) => OneshotPending,
            (Created | Disabled, StartContinuous { .. } | BeginOneshot { .. }) => {
                return TransitionResult::Rejected("controller not enabled");
            }

            (Continuous, StopContinuous) => Enabled,
            (_, StopContinuous) => {
                return TransitionResult::Rejected("continuous statistics not running");
            }

            (OneshotPending, EndOneshot) => Enabled,
            (_, EndOneshot) => return TransitionResult::Rejected("no oneshot pending"),

            (Created | Disabled, Delete) => Deleted,
            (Continuous | OneshotPending, Delete) => {
                return TransitionResult::Rejected("statistics still running");
            }
            (Enabled, Delete) => return TransitionResult::Rejected("controller still enabled"),
        };
        TransitionResult::Ok(next)
    }

    /// Attempt a transition given an event.
    pub fn handle_event(&mut self, event: ControllerEvent) -> TransitionResult<ControllerState> {
        let result = self.check(event);
        if let TransitionResult::Ok(next) = result {
            self.state = next;
        }
        result
    }
}

impl Default for ControllerStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
