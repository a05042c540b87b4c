//! ISP handle, configuration and statistics types.
//!
//! This module defines the data structures exchanged between clients, the
//! driver core and hardware backends:
//! - `ProcessorHandle` / `ControllerHandle` - Generation-tagged slot handles
//! - `ProcessorConfig` - Per-processor pipeline configuration
//! - `AfConfig` / `AwbConfig` / `AeConfig` - Controller configurations
//! - `CcmConfig` - Color correction matrix request
//! - `Statistics` - Completed measurement payloads

use crate::consts::{AE_GRID_SIZE, AF_WINDOW_NUM};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle to an allocated processor block.
///
/// The generation changes every time the slot is freed, so a handle kept
/// past `del_processor` is detected even after the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessorHandle {
    slot: u8,
    generation: u32,
}

impl ProcessorHandle {
    /// Create a handle from a slot index and generation.
    pub const fn new(slot: u8, generation: u32) -> Self {
        Self { slot, generation }
    }

    /// Hardware slot index (`0..N`).
    #[inline]
    pub const fn slot(&self) -> u8 {
        self.slot
    }

    /// Slot generation at allocation time.
    #[inline]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ProcessorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "isp{}#{}", self.slot, self.generation)
    }
}

/// Controller kinds with a dedicated per-processor slot pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    /// Auto focus.
    Af,
    /// Auto white balance.
    Awb,
    /// Auto exposure.
    Ae,
}

impl ControllerKind {
    /// All controller kinds, in pool order.
    pub const ALL: [ControllerKind; 3] = [ControllerKind::Af, ControllerKind::Awb, ControllerKind::Ae];

    /// Index of this kind's pool.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            ControllerKind::Af => 0,
            ControllerKind::Awb => 1,
            ControllerKind::Ae => 2,
        }
    }

    /// Short lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            ControllerKind::Af => "af",
            ControllerKind::Awb => "awb",
            ControllerKind::Ae => "ae",
        }
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque handle to an allocated controller.
///
/// Carries a back-reference to the owning processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControllerHandle {
    processor: ProcessorHandle,
    kind: ControllerKind,
    slot: u8,
    generation: u32,
}

impl ControllerHandle {
    /// Create a controller handle.
    pub const fn new(processor: ProcessorHandle, kind: ControllerKind, slot: u8, generation: u32) -> Self {
        Self {
            processor,
            kind,
            slot,
            generation,
        }
    }

    /// Owning processor.
    #[inline]
    pub const fn processor(&self) -> ProcessorHandle {
        self.processor
    }

    /// Controller kind.
    #[inline]
    pub const fn kind(&self) -> ControllerKind {
        self.kind
    }

    /// Slot index within the kind's pool.
    #[inline]
    pub const fn slot(&self) -> u8 {
        self.slot
    }

    /// Slot generation at allocation time.
    #[inline]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ControllerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}{}#{}",
            self.processor, self.kind, self.slot, self.generation
        )
    }
}

/// Source of pixel data entering the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InputSource {
    /// MIPI CSI camera interface.
    #[default]
    Csi,
    /// Parallel DVP camera interface.
    Dvp,
    /// Memory via the 2D DMA engine.
    Dwgdma,
}

/// Pixel color formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorFormat {
    /// 8-bit Bayer raw.
    Raw8,
    /// 10-bit Bayer raw.
    Raw10,
    /// 12-bit Bayer raw.
    Raw12,
    /// 16-bit RGB.
    Rgb565,
    /// 24-bit RGB.
    Rgb888,
    /// YUV 4:2:2.
    Yuv422,
    /// YUV 4:2:0.
    Yuv420,
}

impl ColorFormat {
    /// True for Bayer raw formats (valid processor inputs).
    pub const fn is_raw(self) -> bool {
        matches!(self, ColorFormat::Raw8 | ColorFormat::Raw10 | ColorFormat::Raw12)
    }
}

/// Processor pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Processor clock in Hz.
    pub clk_hz: u32,
    /// Input data source.
    #[serde(default)]
    pub input_data_source: InputSource,
    /// Input color format (raw).
    pub input_data_color_type: ColorFormat,
    /// Output color format.
    pub output_data_color_type: ColorFormat,
    /// Horizontal resolution in pixels.
    pub h_res: u32,
    /// Vertical resolution in pixels.
    pub v_res: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            clk_hz: 80_000_000,
            input_data_source: InputSource::Csi,
            input_data_color_type: ColorFormat::Raw8,
            output_data_color_type: ColorFormat::Rgb565,
            h_res: 800,
            v_res: 600,
        }
    }
}

/// Pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
}

/// Rectangular measurement window (inclusive corners).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Window {
    /// Top-left corner.
    pub top_left: Point,
    /// Bottom-right corner.
    pub btm_right: Point,
}

impl Window {
    /// Window covering the central `ratio` share of an image, as used by the
    /// default controller configs.
    pub fn centered(h_res: u32, v_res: u32, ratio: f32) -> Self {
        let margin = (1.0 - ratio) / 2.0;
        Self {
            top_left: Point {
                x: (h_res as f32 * margin) as u32,
                y: (v_res as f32 * margin) as u32,
            },
            btm_right: Point {
                x: (h_res as f32 * (1.0 - margin)) as u32,
                y: (v_res as f32 * (1.0 - margin)) as u32,
            },
        }
    }

    /// Number of pixels covered by the window.
    pub fn area(&self) -> u64 {
        let w = self.btm_right.x.saturating_sub(self.top_left.x) as u64 + 1;
        let h = self.btm_right.y.saturating_sub(self.top_left.y) as u64 + 1;
        w * h
    }
}

/// Closed value range.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ValueRange<T> {
    /// Lower bound.
    pub min: T,
    /// Upper bound.
    pub max: T,
}

/// AF controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AfConfig {
    /// Measurement windows (1..=AF_WINDOW_NUM).
    pub windows: heapless::Vec<Window, AF_WINDOW_NUM>,
    /// Edge threshold for the definition metric. Must be non-zero.
    pub edge_thresh: u32,
}

impl AfConfig {
    /// Default config: three nested windows centred in an `h_res x v_res` image.
    pub fn for_resolution(h_res: u32, v_res: u32) -> Self {
        let mut windows = heapless::Vec::new();
        for ratio in [0.6f32, 0.4, 0.2] {
            // AF_WINDOW_NUM is 3, so every push fits.
            let _ = windows.push(Window::centered(h_res, v_res, ratio));
        }
        Self {
            windows,
            edge_thresh: 128,
        }
    }
}

/// Where the AWB statistics tap the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AwbSamplePoint {
    /// Before the color correction matrix.
    BeforeCcm,
    /// After the color correction matrix.
    #[default]
    AfterCcm,
}

/// White patch thresholds for AWB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WhitePatch {
    /// Luminance range (R+G+B) of a white patch.
    pub luminance: ValueRange<u32>,
    /// Acceptable R/G ratio range.
    pub red_green_ratio: ValueRange<f32>,
    /// Acceptable B/G ratio range.
    pub blue_green_ratio: ValueRange<f32>,
}

/// AWB controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwbConfig {
    /// Statistics tap point.
    #[serde(default)]
    pub sample_point: AwbSamplePoint,
    /// Measurement window.
    pub window: Window,
    /// White patch thresholds.
    pub white_patch: WhitePatch,
}

impl AwbConfig {
    /// Default config: central 60% window, full-range white patch.
    pub fn for_resolution(h_res: u32, v_res: u32) -> Self {
        Self {
            sample_point: AwbSamplePoint::AfterCcm,
            window: Window::centered(h_res, v_res, 0.6),
            white_patch: WhitePatch {
                luminance: ValueRange { min: 0, max: 220 * 3 },
                red_green_ratio: ValueRange { min: 0.0, max: 3.999 },
                blue_green_ratio: ValueRange { min: 0.0, max: 3.999 },
            },
        }
    }
}

/// Where the AE statistics tap the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AeSamplePoint {
    /// After demosaicing.
    #[default]
    AfterDemosaic,
    /// After gamma correction.
    AfterGamma,
}

/// AE controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AeConfig {
    /// Statistics tap point.
    #[serde(default)]
    pub sample_point: AeSamplePoint,
    /// Measurement window, split into an AE_GRID_SIZE^2 grid.
    pub window: Window,
}

impl AeConfig {
    /// Default config: central 80% window.
    pub fn for_resolution(h_res: u32, v_res: u32) -> Self {
        Self {
            sample_point: AeSamplePoint::AfterDemosaic,
            window: Window::centered(h_res, v_res, 0.8),
        }
    }
}

/// Kind-specific controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ControllerConfig {
    /// AF configuration.
    Af(AfConfig),
    /// AWB configuration.
    Awb(AwbConfig),
    /// AE configuration.
    Ae(AeConfig),
}

impl ControllerConfig {
    /// Controller kind this config applies to.
    pub const fn kind(&self) -> ControllerKind {
        match self {
            ControllerConfig::Af(_) => ControllerKind::Af,
            ControllerConfig::Awb(_) => ControllerKind::Awb,
            ControllerConfig::Ae(_) => ControllerKind::Ae,
        }
    }

    /// Default config of the given kind for an image size.
    pub fn default_for(kind: ControllerKind, h_res: u32, v_res: u32) -> Self {
        match kind {
            ControllerKind::Af => ControllerConfig::Af(AfConfig::for_resolution(h_res, v_res)),
            ControllerKind::Awb => ControllerConfig::Awb(AwbConfig::for_resolution(h_res, v_res)),
            ControllerKind::Ae => ControllerConfig::Ae(AeConfig::for_resolution(h_res, v_res)),
        }
    }
}

/// Color correction matrix request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CcmConfig {
    /// Row-major 3x3 coefficients.
    pub matrix: [[f32; 3]; 3],
    /// Clamp out-of-range coefficients instead of rejecting them.
    #[serde(default)]
    pub saturation: bool,
}

impl Default for CcmConfig {
    fn default() -> Self {
        Self {
            matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            saturation: false,
        }
    }
}

/// Encoded CCM register image: sign-magnitude fixed point per coefficient.
pub type CcmRegisters = [[u16; 3]; 3];

/// Statistics delivery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsMode {
    /// Hardware measures every frame; each result goes to the callback.
    Continuous,
    /// Hardware measures one frame; the caller blocks for the result.
    Oneshot,
}

/// AF measurement result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AfStats {
    /// Definition (sharpness) per window.
    pub definition: [u32; AF_WINDOW_NUM],
    /// Luminance per window.
    pub luminance: [u32; AF_WINDOW_NUM],
}

/// AWB measurement result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AwbStats {
    /// Number of pixels classified as white patch.
    pub white_patch_num: u32,
    /// Sum of R over white patch pixels.
    pub sum_r: u32,
    /// Sum of G over white patch pixels.
    pub sum_g: u32,
    /// Sum of B over white patch pixels.
    pub sum_b: u32,
}

/// AE measurement result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AeStats {
    /// Average luminance per grid block.
    pub luminance: [[u32; AE_GRID_SIZE]; AE_GRID_SIZE],
}

/// Completed measurement payload read from hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Statistics {
    /// AF result.
    Af(AfStats),
    /// AWB result.
    Awb(AwbStats),
    /// AE result.
    Ae(AeStats),
}

impl Statistics {
    /// Controller kind that produced this payload.
    pub const fn kind(&self) -> ControllerKind {
        match self {
            Statistics::Af(_) => ControllerKind::Af,
            Statistics::Awb(_) => ControllerKind::Awb,
            Statistics::Ae(_) => ControllerKind::Ae,
        }
    }
}
