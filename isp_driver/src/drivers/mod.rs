//! ISP backend implementations.
//!
//! - [`simulation`] - Software ISP for development and testing
//!
//! # Adding New Backends
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement the `IspHal` trait from `isp_common::isp::hal`
//! 3. Register its factory in [`register_builtin`]

pub mod simulation;

use crate::driver_registry::BackendRegistry;

/// Register all built-in backends.
pub fn register_builtin(registry: &mut BackendRegistry) {
    registry.register("simulation", simulation::create_backend);
}
