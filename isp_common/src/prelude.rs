//! Prelude module for common re-exports.
//!
//! ```rust
//! use isp_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, DriverConfig, HardwareConfig, SharedConfig};

// ─── Types ──────────────────────────────────────────────────────────
pub use crate::isp::types::{
    AeConfig, AfConfig, AwbConfig, CcmConfig, ColorFormat, ControllerConfig, ControllerHandle,
    ControllerKind, InputSource, ProcessorConfig, ProcessorHandle, Statistics, StatsMode, Window,
};

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::isp::error::{ErrorCode, IspError, IspResult};

// ─── Hardware ───────────────────────────────────────────────────────
pub use crate::isp::hal::{ArmToken, Completion, HalError, HalFactory, IspHal};
