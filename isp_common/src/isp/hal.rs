//! Hardware capability trait and backend error types.
//!
//! This module defines:
//! - `IspHal` trait - Interface for pluggable ISP backends
//! - `HalError` enum - Error types for backend operations
//! - `ArmToken` / `Completion` - Statistics arm/complete hand-off
//! - `HalFactory` type alias - Factory function type

use crate::config::DriverConfig;
use crate::isp::types::{
    CcmRegisters, ControllerConfig, ControllerHandle, ProcessorConfig, Statistics, StatsMode,
};
use std::sync::mpsc::Sender;
use thiserror::Error;

/// Error types for backend operations.
#[derive(Debug, Clone, Error)]
pub enum HalError {
    /// Backend initialization failed
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    /// Hardware communication error
    #[error("Hardware communication error: {0}")]
    CommunicationError(String),

    /// Backend not found in the registry
    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    /// Request refers to a slot the backend does not have
    #[error("No such hardware slot: {0}")]
    NoSuchSlot(String),
}

/// Identifies one arming of a controller's statistics unit.
///
/// The driver bumps `epoch` on every arm, so a completion raised for an
/// earlier arming is recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArmToken {
    /// Controller whose statistics unit was armed.
    pub target: ControllerHandle,
    /// Arm sequence number.
    pub epoch: u64,
}

/// Statistics completion raised by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Token passed to [`IspHal::arm`].
    pub token: ArmToken,
    /// Payload read from the statistics registers.
    pub stats: Statistics,
}

/// Factory function type for creating backend instances.
///
/// Receives the full driver configuration so backends can read their own
/// section (e.g. `[simulation]`).
pub type HalFactory = fn(&DriverConfig) -> Result<Box<dyn IspHal>, HalError>;

/// Trait defining the capability surface of an ISP backend.
///
/// The driver core owns all lifecycle and state decisions; a backend only
/// commits register state, arms interrupt sources and raises completions.
/// All methods take `&self`; backends synchronize internally because
/// completions are produced from their own interrupt context.
///
/// # Lifecycle
///
/// 1. `attach()` - Called once when the driver is created
/// 2. `commit_*()` / `arm()` / `disarm()` - Called under the driver lock
/// 3. `shutdown()` - Called when the driver is dropped
///
/// # Contracts
///
/// | Operation | Blocking | Notes |
/// |-----------|----------|-------|
/// | `commit_*()` | No | Register writes only |
/// | `arm()` | No | Completion arrives later via the attached sender |
/// | `disarm()` | No | No completion for the target may be raised afterwards |
pub trait IspHal: Send + Sync {
    /// Returns the backend's unique identifier (e.g., "simulation").
    fn name(&self) -> &'static str;

    /// Returns the backend's semantic version.
    fn version(&self) -> &'static str;

    /// Number of processor blocks the backend exposes.
    fn processor_count(&self) -> usize;

    /// Hand the backend the channel it raises completions on.
    fn attach(&self, completions: Sender<Completion>) -> Result<(), HalError>;

    /// Commit processor pipeline configuration and enable bit.
    fn commit_processor(&self, slot: u8, config: &ProcessorConfig, enable: bool) -> Result<(), HalError>;

    /// Commit the CCM register image and enable bit of a processor.
    fn commit_ccm(&self, slot: u8, matrix: &CcmRegisters, enable: bool) -> Result<(), HalError>;

    /// Commit a controller's configuration and enable bit.
    fn commit_controller(
        &self,
        target: ControllerHandle,
        config: &ControllerConfig,
        enable: bool,
    ) -> Result<(), HalError>;

    /// Arm the statistics interrupt for a controller.
    fn arm(&self, token: ArmToken, mode: StatsMode) -> Result<(), HalError>;

    /// Disarm the statistics interrupt for a controller.
    fn disarm(&self, target: ControllerHandle);

    /// Release backend resources.
    /// Default: no-op
    fn shutdown(&self) -> Result<(), HalError> {
        Ok(())
    }
}
