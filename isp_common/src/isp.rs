//! ISP processor and controller definitions.
//!
//! This module contains the data model shared between the driver core and
//! hardware backends:
//! - [`types`] - Handles, configuration structs and statistics payloads
//! - [`error`] - Driver error taxonomy and result codes
//! - [`hal`] - The `IspHal` capability trait implemented by backends

pub mod error;
pub mod hal;
pub mod types;
