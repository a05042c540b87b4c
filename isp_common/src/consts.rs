//! System-wide constants for the ISP workspace.
//!
//! Single source of truth for hardware capacities and default paths.
//! Runtime capacities come from `[hardware]` in the driver config and are
//! bounded by the compile-time maxima below.

use static_assertions::const_assert;

/// Canonical service name (used for logging).
pub const ISP_SERVICE_NAME: &str = "isp";

/// Upper bound for the number of processor blocks a backend may expose.
pub const MAX_PROCESSORS: usize = 8;

/// Upper bound for the number of controllers of a single kind per processor.
pub const MAX_CONTROLLERS_PER_KIND: usize = 8;

/// Processor blocks on the reference chip.
pub const DEFAULT_PROCESSORS: usize = 1;

/// AF controllers per processor on the reference chip.
pub const DEFAULT_AF_CONTROLLERS: usize = 1;

/// AWB controllers per processor on the reference chip.
pub const DEFAULT_AWB_CONTROLLERS: usize = 1;

/// AE controllers per processor on the reference chip.
pub const DEFAULT_AE_CONTROLLERS: usize = 1;

/// Number of AF measurement windows.
pub const AF_WINDOW_NUM: usize = 3;

/// AE statistics grid is `AE_GRID_SIZE x AE_GRID_SIZE` blocks.
pub const AE_GRID_SIZE: usize = 5;

/// Integer bits of a CCM coefficient (sign is stored separately).
pub const CCM_INT_BITS: u32 = 2;

/// Fraction bits of a CCM coefficient.
pub const CCM_FRAC_BITS: u32 = 10;

/// Largest representable CCM coefficient magnitude.
pub const CCM_MAX_COEFF: f32 =
    (1u32 << CCM_INT_BITS) as f32 - 1.0 / (1u32 << CCM_FRAC_BITS) as f32;

/// Upper bound for AWB red/green and blue/green ratio thresholds (exclusive).
pub const AWB_MAX_RATIO: f32 = 4.0;

/// Largest supported horizontal/vertical resolution.
pub const MAX_RESOLUTION: u32 = 4095;

/// Default simulated frame interval (30 fps).
pub const DEFAULT_FRAME_INTERVAL_US: u64 = 33_333;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/isp/driver.toml";

// Slot pools index free slots with a `u32` bitmap.
const_assert!(MAX_PROCESSORS <= 32);
const_assert!(MAX_CONTROLLERS_PER_KIND <= 32);
const_assert!(DEFAULT_PROCESSORS <= MAX_PROCESSORS);
