//! Processor lifecycle: Configured → Enabled ⇄ Disabled → Deleted.

use super::TransitionResult;

/// Processor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorState {
    /// Allocated and configured, never enabled.
    Configured,
    /// Pipeline running.
    Enabled,
    /// Pipeline stopped after having been enabled.
    Disabled,
    /// Slot released.
    Deleted,
}

/// Event that can trigger a processor transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorEvent {
    /// Start the pipeline.
    Enable,
    /// Stop the pipeline.
    Disable {
        /// Any child controller has statistics running.
        statistics_running: bool,
    },
    /// Release the slot.
    Delete {
        /// Number of live child controllers.
        children: usize,
        /// The CCM block is still enabled.
        ccm_enabled: bool,
    },
}

/// Processor state machine.
#[derive(Debug, Clone)]
pub struct ProcessorStateMachine {
    state: ProcessorState,
}

impl ProcessorStateMachine {
    /// Create a machine in `Configured`.
    pub const fn new() -> Self {
        Self {
            state: ProcessorState::Configured,
        }
    }

    /// Current state.
    #[inline]
    pub const fn state(&self) -> ProcessorState {
        self.state
    }

    /// True while the pipeline runs.
    #[inline]
    pub const fn is_enabled(&self) -> bool {
        matches!(self.state, ProcessorState::Enabled)
    }

    /// Check an event without applying it.
    pub fn check(&self, event: ProcessorEvent) -> TransitionResult<ProcessorState> {
        use ProcessorEvent::*;
        use ProcessorState::*;

        match (self.state, event) {
            (Deleted, _) => TransitionResult::Rejected("processor deleted"),

            (Configured | Disabled, Enable) => TransitionResult::Ok(Enabled),
            (Enabled, Enable) => TransitionResult::Rejected("processor already enabled"),

            (Enabled, Disable { statistics_running: false }) => TransitionResult::Ok(Disabled),
            (Enabled, Disable { statistics_running: true }) => {
                TransitionResult::Rejected("controller statistics still running")
            }
            (Configured | Disabled, Disable { .. }) => {
                TransitionResult::Rejected("processor not enabled")
            }

            (Enabled, Delete { .. }) => TransitionResult::Rejected("processor still enabled"),
            (_, Delete { children, .. }) if children > 0 => {
                TransitionResult::Rejected("controllers still allocated")
            }
            (_, Delete { ccm_enabled: true, .. }) => TransitionResult::Rejected("CCM still enabled"),
            (Configured | Disabled, Delete { .. }) => TransitionResult::Ok(Deleted),
        }
    }

    /// Attempt a transition given an event.
    pub fn handle_event(&mut self, event: ProcessorEvent) -> TransitionResult<ProcessorState> {
        let result = self.check(event);
        if let TransitionResult::Ok(next) = result {
            self.state = next;
        }
        result
    }
}

impl Default for ProcessorStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ProcessorEvent::*;
    use ProcessorState::*;

    const IDLE_DISABLE: ProcessorEvent = Disable {
        statistics_running: false,
    };
    const FREE: ProcessorEvent = Delete {
        children: 0,
        ccm_enabled: false,
    };

    #[test]
    fn initial_state_is_configured() {
        assert_eq!(ProcessorStateMachine::new().state(), Configured);
    }

    #[test]
    fn enable_disable_is_reentrant() {
        let mut sm = ProcessorStateMachine::new();
        assert_eq!(sm.handle_event(Enable), TransitionResult::Ok(Enabled));
        assert_eq!(sm.handle_event(IDLE_DISABLE), TransitionResult::Ok(Disabled));
        assert_eq!(sm.handle_event(Enable), TransitionResult::Ok(Enabled));
        assert_eq!(sm.handle_event(IDLE_DISABLE), TransitionResult::Ok(Disabled));
        assert_eq!(sm.handle_event(FREE), TransitionResult::Ok(Deleted));
    }

    #[test]
    fn double_enable_rejected() {
        let mut sm = ProcessorStateMachine::new();
        sm.handle_event(Enable);
        assert!(matches!(sm.handle_event(Enable), TransitionResult::Rejected(_)));
        assert_eq!(sm.state(), Enabled);
    }

    #[test]
    fn disable_with_running_statistics_rejected() {
        let mut sm = ProcessorStateMachine::new();
        sm.handle_event(Enable);
        let result = sm.handle_event(Disable {
            statistics_running: true,
        });
        assert_eq!(
            result,
            TransitionResult::Rejected("controller statistics still running")
        );
        assert!(sm.is_enabled());
    }

    #[test]
    fn disable_when_configured_rejected() {
        let mut sm = ProcessorStateMachine::new();
        assert!(matches!(sm.handle_event(IDLE_DISABLE), TransitionResult::Rejected(_)));
    }

    #[test]
    fn delete_guards() {
        let mut sm = ProcessorStateMachine::new();
        assert_eq!(
            sm.check(Delete {
                children: 1,
                ccm_enabled: false
            }),
            TransitionResult::Rejected("controllers still allocated")
        );
        assert_eq!(
            sm.check(Delete {
                children: 0,
                ccm_enabled: true
            }),
            TransitionResult::Rejected("CCM still enabled")
        );

        sm.handle_event(Enable);
        assert_eq!(sm.check(FREE), TransitionResult::Rejected("processor still enabled"));
    }

    #[test]
    fn deleted_is_terminal() {
        let mut sm = ProcessorStateMachine::new();
        sm.handle_event(FREE);
        assert!(matches!(sm.handle_event(Enable), TransitionResult::Rejected(_)));
        assert!(matches!(sm.handle_event(FREE), TransitionResult::Rejected(_)));
    }
}
