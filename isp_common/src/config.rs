//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load the TOML driver
//! configuration and the hardware capacities it declares.
//!
//! # Usage
//!
//! ```rust,no_run
//! use isp_common::config::{ConfigLoader, DriverConfig, ConfigError};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = DriverConfig::load(Path::new("driver.toml"))?;
//!     config.validate()?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use crate::consts::{
    DEFAULT_AE_CONTROLLERS, DEFAULT_AF_CONTROLLERS, DEFAULT_AWB_CONTROLLERS,
    DEFAULT_FRAME_INTERVAL_US, DEFAULT_PROCESSORS, ISP_SERVICE_NAME, MAX_CONTROLLERS_PER_KIND,
    MAX_PROCESSORS,
};
use crate::isp::types::{ControllerKind, ProcessorConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Filter directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

fn default_service_name() -> String {
    ISP_SERVICE_NAME.to_string()
}

/// Common configuration fields.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "isp-sim-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            service_name: default_service_name(),
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_processors() -> usize {
    DEFAULT_PROCESSORS
}

fn default_af() -> usize {
    DEFAULT_AF_CONTROLLERS
}

fn default_awb() -> usize {
    DEFAULT_AWB_CONTROLLERS
}

fn default_ae() -> usize {
    DEFAULT_AE_CONTROLLERS
}

/// Hardware capacities: processor count and per-kind controller pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HardwareConfig {
    /// Number of processor blocks.
    #[serde(default = "default_processors")]
    pub processors: usize,
    /// AF controllers per processor.
    #[serde(default = "default_af")]
    pub af_controllers: usize,
    /// AWB controllers per processor.
    #[serde(default = "default_awb")]
    pub awb_controllers: usize,
    /// AE controllers per processor.
    #[serde(default = "default_ae")]
    pub ae_controllers: usize,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            processors: DEFAULT_PROCESSORS,
            af_controllers: DEFAULT_AF_CONTROLLERS,
            awb_controllers: DEFAULT_AWB_CONTROLLERS,
            ae_controllers: DEFAULT_AE_CONTROLLERS,
        }
    }
}

impl HardwareConfig {
    /// Per-processor pool capacity for a controller kind.
    pub const fn capacity(&self, kind: ControllerKind) -> usize {
        match kind {
            ControllerKind::Af => self.af_controllers,
            ControllerKind::Awb => self.awb_controllers,
            ControllerKind::Ae => self.ae_controllers,
        }
    }

    /// Validate capacities against the compile-time maxima.
    ///
    /// # Validation Rules
    /// 1. `0 < processors <= MAX_PROCESSORS`
    /// 2. `0 < capacity <= MAX_CONTROLLERS_PER_KIND` for each controller kind
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processors == 0 || self.processors > MAX_PROCESSORS {
            return Err(ConfigError::ValidationError(format!(
                "processors must be in 1..={} (got {})",
                MAX_PROCESSORS, self.processors
            )));
        }
        for kind in ControllerKind::ALL {
            let capacity = self.capacity(kind);
            if capacity == 0 || capacity > MAX_CONTROLLERS_PER_KIND {
                return Err(ConfigError::ValidationError(format!(
                    "{}_controllers must be in 1..={} (got {})",
                    kind, MAX_CONTROLLERS_PER_KIND, capacity
                )));
            }
        }
        Ok(())
    }
}

fn default_frame_interval_us() -> u64 {
    DEFAULT_FRAME_INTERVAL_US
}

fn default_seed() -> u64 {
    0x15B0_15B0
}

/// Simulation backend settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    /// Interval between simulated frames when the pump runs.
    #[serde(default = "default_frame_interval_us")]
    pub frame_interval_us: u64,
    /// Start a background thread producing frames.
    #[serde(default)]
    pub auto_frames: bool,
    /// Seed for the synthetic scene.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            frame_interval_us: DEFAULT_FRAME_INTERVAL_US,
            auto_frames: false,
            seed: default_seed(),
        }
    }
}

fn default_backend() -> String {
    "simulation".to_string()
}

/// Top-level driver configuration (`driver.toml`).
///
/// # TOML Example
///
/// ```toml
/// backend = "simulation"
///
/// [shared]
/// service_name = "isp-sim-01"
///
/// [hardware]
/// processors = 2
/// awb_controllers = 2
///
/// [simulation]
/// auto_frames = true
/// frame_interval_us = 16666
///
/// [processor]
/// clk_hz = 80000000
/// input_data_color_type = "raw8"
/// output_data_color_type = "rgb565"
/// h_res = 800
/// v_res = 600
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Backend name in the registry.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Shared fields.
    #[serde(default)]
    pub shared: SharedConfig,
    /// Hardware capacities.
    #[serde(default)]
    pub hardware: HardwareConfig,
    /// Simulation backend settings.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Processor configuration used by the CLI session.
    #[serde(default)]
    pub processor: ProcessorConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            shared: SharedConfig::default(),
            hardware: HardwareConfig::default(),
            simulation: SimulationConfig::default(),
            processor: ProcessorConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Validate all sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.hardware.validate()?;
        if self.backend.is_empty() {
            return Err(ConfigError::ValidationError(
                "backend cannot be empty".to_string(),
            ));
        }
        if self.simulation.frame_interval_us == 0 {
            return Err(ConfigError::ValidationError(
                "simulation.frame_interval_us must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        let parsed = toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(parsed)
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
