//! Driver error taxonomy.
//!
//! Every public driver operation returns `Result<T, IspError>`. Each error
//! maps onto one of four result codes via [`IspError::code`]:
//!
//! | Code | Meaning | Recovery |
//! |------|---------|----------|
//! | `Exhausted` | Pool capacity reached | Free another entity first |
//! | `InvalidState` | Illegal lifecycle transition | Programmer error, never retried |
//! | `InvalidArg` | Configuration failed validation | Fix the config |
//! | `Timeout` | Oneshot deadline exceeded | Retry with a longer bound |

use crate::isp::hal::HalError;
use std::time::Duration;
use thiserror::Error;

/// Result code surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Pool full.
    Exhausted,
    /// Illegal transition.
    InvalidState,
    /// Validation failure.
    InvalidArg,
    /// Oneshot deadline exceeded.
    Timeout,
}

/// Error types for driver operations.
#[derive(Debug, Clone, Error)]
pub enum IspError {
    /// No free slot left in a pool.
    #[error("No free {resource} slot (capacity {capacity})")]
    Exhausted {
        /// Pool name, e.g. "processor" or "awb controller".
        resource: &'static str,
        /// Pool capacity.
        capacity: usize,
    },

    /// Operation not legal in the entity's current state.
    #[error("Cannot {op}: {state}")]
    InvalidState {
        /// Rejected operation.
        op: &'static str,
        /// Why the current state forbids it.
        state: &'static str,
    },

    /// Handle refers to an entity that has been deleted.
    #[error("Stale handle: {0}")]
    StaleHandle(String),

    /// Configuration failed validation.
    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    /// No measurement completed within the requested bound.
    #[error("Timed out after {0:?} waiting for statistics")]
    Timeout(Duration),

    /// Backend failed to apply a request.
    #[error(transparent)]
    Hardware(#[from] HalError),
}

impl IspError {
    /// Result code for this error.
    pub const fn code(&self) -> ErrorCode {
        match self {
            IspError::Exhausted { .. } => ErrorCode::Exhausted,
            IspError::InvalidState { .. } | IspError::StaleHandle(_) => ErrorCode::InvalidState,
            IspError::InvalidArg(_) => ErrorCode::InvalidArg,
            IspError::Timeout(_) => ErrorCode::Timeout,
            IspError::Hardware(_) => ErrorCode::InvalidState,
        }
    }

    /// Shorthand for an `InvalidState` error.
    pub const fn invalid_state(op: &'static str, state: &'static str) -> Self {
        IspError::InvalidState { op, state }
    }
}

/// Result alias for driver operations.
pub type IspResult<T> = Result<T, IspError>;
