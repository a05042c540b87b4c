//! # ISP Driver Library
//!
//! Control plane for an image signal processor: processor and statistics
//! controller allocation, lifecycle state machines, register commit and
//! statistics acquisition over pluggable hardware backends.
//!
//! Backends implement the `IspHal` trait defined in `isp_common::isp::hal`.
//!
//! # Module Structure
//!
//! - [`core`] - `IspDriver`, the public API and the shared registry
//! - [`pool`] - Fixed-capacity slot allocator with generation counters
//! - [`state`] - Processor and controller state machines
//! - [`validate`] - Configuration validation
//! - [`commit`] - CCM fixed-point encoding and staging
//! - [`stats`] - Statistics dispatcher and callback delivery
//! - [`driver_registry`] - Backend factory registration
//! - [`drivers`] - Backend implementations
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      isp_driver (single crate)                   │
//! │  ┌─────────────┐    ┌──────────────┐    ┌─────────────────────┐  │
//! │  │  Clients    │───►│  IspDriver   │◄───│  Backend Registry   │  │
//! │  │ (any thread)│    │  (registry   │    │                     │  │
//! │  └──────▲──────┘    │   + states)  │    └─────────────────────┘  │
//! │         │           └──────┬───────┘                             │
//! │         │ callbacks        │ commit / arm / disarm               │
//! │  ┌──────┴──────┐    ┌──────▼───────┐                             │
//! │  │ isp-stats   │◄───│   IspHal     │ (trait object)              │
//! │  │ dispatcher  │mpsc│   backend    │                             │
//! │  └─────────────┘    └──────────────┘                             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod commit;
pub mod core;
pub mod driver_registry;
pub mod drivers;
pub mod pool;
pub mod state;
pub mod stats;
pub mod validate;

// Re-export key types for convenience
pub use crate::core::IspDriver;
pub use crate::driver_registry::BackendRegistry;
pub use crate::drivers::simulation::SimulatedIsp;
pub use crate::stats::StatsCallback;
