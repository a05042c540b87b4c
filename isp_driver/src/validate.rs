//! Configuration validation.
//!
//! Pure functions run before anything is allocated or committed, so a
//! rejected configuration never leaves partial state behind.

use isp_common::consts::{AWB_MAX_RATIO, CCM_MAX_COEFF, MAX_RESOLUTION};
use isp_common::isp::error::{IspError, IspResult};
use isp_common::isp::types::{
    AeConfig, AfConfig, AwbConfig, CcmConfig, ControllerConfig, ProcessorConfig, ValueRange,
    Window,
};

fn invalid(msg: impl Into<String>) -> IspError {
    IspError::InvalidArg(msg.into())
}

/// Validate a processor configuration.
///
/// # Validation Rules
/// 1. `clk_hz` > 0
/// 2. Input color is a raw Bayer format
/// 3. Output color is not raw
/// 4. `0 < h_res, v_res <= MAX_RESOLUTION`
pub fn validate_processor(config: &ProcessorConfig) -> IspResult<()> {
    if config.clk_hz == 0 {
        return Err(invalid("clk_hz must be greater than 0"));
    }
    if !config.input_data_color_type.is_raw() {
        return Err(invalid(format!(
            "input color {:?} is not a raw format",
            config.input_data_color_type
        )));
    }
    if config.output_data_color_type.is_raw() {
        return Err(invalid(format!(
            "output color {:?} must be RGB or YUV",
            config.output_data_color_type
        )));
    }
    if config.h_res == 0 || config.v_res == 0 {
        return Err(invalid("resolution must be non-zero"));
    }
    if config.h_res > MAX_RESOLUTION || config.v_res > MAX_RESOLUTION {
        return Err(invalid(format!(
            "resolution {}x{} exceeds {}x{}",
            config.h_res, config.v_res, MAX_RESOLUTION, MAX_RESOLUTION
        )));
    }
    Ok(())
}

/// Window corners must be ordered and lie inside the image.
pub fn validate_window(window: &Window, h_res: u32, v_res: u32) -> IspResult<()> {
    let Window { top_left, btm_right } = window;
    if top_left.x > btm_right.x || top_left.y > btm_right.y {
        return Err(invalid(format!(
            "window corners out of order: ({}, {}) .. ({}, {})",
            top_left.x, top_left.y, btm_right.x, btm_right.y
        )));
    }
    if btm_right.x >= h_res || btm_right.y >= v_res {
        return Err(invalid(format!(
            "window ({}, {}) .. ({}, {}) exceeds {}x{} image",
            top_left.x, top_left.y, btm_right.x, btm_right.y, h_res, v_res
        )));
    }
    Ok(())
}

/// AF: 1..=AF_WINDOW_NUM windows inside the image, non-zero edge threshold.
pub fn validate_af(config: &AfConfig, h_res: u32, v_res: u32) -> IspResult<()> {
    if config.windows.is_empty() {
        return Err(invalid("AF needs at least one window"));
    }
    if config.edge_thresh == 0 {
        return Err(invalid("AF edge_thresh must be greater than 0"));
    }
    for window in config.windows.iter() {
        validate_window(window, h_res, v_res)?;
    }
    Ok(())
}

fn validate_ratio(name: &str, range: &ValueRange<f32>) -> IspResult<()> {
    let ok = range.min.is_finite()
        && range.max.is_finite()
        && range.min >= 0.0
        && range.min <= range.max
        && range.max < AWB_MAX_RATIO;
    if !ok {
        return Err(invalid(format!(
            "{} range [{}, {}] must satisfy 0 <= min <= max < {}",
            name, range.min, range.max, AWB_MAX_RATIO
        )));
    }
    Ok(())
}

/// AWB: window inside the image, ordered luminance range, ratios in `[0, 4)`.
pub fn validate_awb(config: &AwbConfig, h_res: u32, v_res: u32) -> IspResult<()> {
    validate_window(&config.window, h_res, v_res)?;
    let lum = &config.white_patch.luminance;
    if lum.min > lum.max {
        return Err(invalid(format!(
            "white patch luminance min {} exceeds max {}",
            lum.min, lum.max
        )));
    }
    validate_ratio("red_green_ratio", &config.white_patch.red_green_ratio)?;
    validate_ratio("blue_green_ratio", &config.white_patch.blue_green_ratio)?;
    Ok(())
}

/// AE: window inside the image.
pub fn validate_ae(config: &AeConfig, h_res: u32, v_res: u32) -> IspResult<()> {
    validate_window(&config.window, h_res, v_res)
}

/// Validate a controller configuration against its processor's image size.
pub fn validate_controller(config: &ControllerConfig, processor: &ProcessorConfig) -> IspResult<()> {
    let (h, v) = (processor.h_res, processor.v_res);
    match config {
        ControllerConfig::Af(af) => validate_af(af, h, v),
        ControllerConfig::Awb(awb) => validate_awb(awb, h, v),
        ControllerConfig::Ae(ae) => validate_ae(ae, h, v),
    }
}

/// Validate a color correction matrix.
///
/// Non-finite coefficients are always rejected. Without saturation every
/// coefficient must be representable (`|c| <= CCM_MAX_COEFF`); with
/// saturation the hardware clamps, so any finite value is accepted.
pub fn validate_ccm(config: &CcmConfig) -> IspResult<()> {
    for (row, coeffs) in config.matrix.iter().enumerate() {
        for (col, &c) in coeffs.iter().enumerate() {
            if !c.is_finite() {
                return Err(invalid(format!("CCM[{row}][{col}] is not finite")));
            }
            if !config.saturation && c.abs() > CCM_MAX_COEFF {
                return Err(invalid(format!(
                    "CCM[{row}][{col}] = {c} outside ±{CCM_MAX_COEFF} (enable saturation to clamp)"
                )));
            }
        }
    }
    Ok(())
}
