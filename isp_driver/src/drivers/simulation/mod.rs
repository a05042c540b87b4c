//! Simulation backend module.
//!
//! Software ISP for development and testing without camera hardware.

mod driver;
mod scene;

pub use driver::{IntrStatus, RegisterWrite, SimulatedIsp};
pub use scene::Scene;

use isp_common::config::DriverConfig;
use isp_common::isp::hal::{HalError, IspHal};

/// Factory function to create a simulation backend instance.
///
/// The backend exposes exactly as many processors as `[hardware]` declares.
pub fn create_backend(config: &DriverConfig) -> Result<Box<dyn IspHal>, HalError> {
    Ok(Box::new(SimulatedIsp::new(
        config.hardware.processors,
        config.simulation,
    )))
}
