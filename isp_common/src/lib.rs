//! ISP Common Library
//!
//! This crate provides the types, constants, configuration loading and the
//! hardware capability trait shared by all ISP workspace crates.
//!
//! # Module Structure
//!
//! - [`consts`] - Hardware capacities and default paths
//! - [`config`] - Configuration loading traits and types
//! - [`isp`] - Processor/controller types, errors and the `IspHal` trait
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use isp_common::prelude::*;
//!
//! let caps = HardwareConfig::default();
//! assert_eq!(caps.capacity(ControllerKind::Awb), 1);
//! ```

pub mod config;
pub mod consts;
pub mod isp;
pub mod prelude;
