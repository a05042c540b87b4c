//! State machine module root.
//!
//! Every processor and controller owns a state machine that decides whether
//! an operation is legal. The machines are pure: guards that depend on other
//! entities (children, parent state) are passed in with the event.

pub mod controller;
pub mod processor;

/// Result of a transition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult<S> {
    /// Transition succeeded, carrying the new state.
    Ok(S),
    /// Transition rejected, carrying the reason.
    Rejected(&'static str),
}

impl<S> TransitionResult<S> {
    /// Convert to a driver result, naming the rejected operation.
    pub fn or_invalid(self, op: &'static str) -> isp_common::isp::error::IspResult<S> {
        match self {
            TransitionResult::Ok(state) => Ok(state),
            TransitionResult::Rejected(reason) => {
                Err(isp_common::isp::error::IspError::invalid_state(op, reason))
            }
        }
    }
}
