//! Configuration commit path.
//!
//! Converts validated configuration into register images and tracks what
//! is staged versus what the hardware currently holds. A processor that is
//! not enabled only stages changes; `enable_processor` flushes them.

use crate::validate::validate_ccm;
use isp_common::consts::{CCM_FRAC_BITS, CCM_INT_BITS, CCM_MAX_COEFF};
use isp_common::isp::error::IspResult;
use isp_common::isp::types::{CcmConfig, CcmRegisters};

/// Sign bit of an encoded CCM coefficient.
pub const CCM_SIGN_BIT: u16 = 1 << (CCM_INT_BITS + CCM_FRAC_BITS);

/// Encode one coefficient as sign-magnitude fixed point, clamping to the
/// representable range.
pub fn encode_coeff(value: f32) -> u16 {
    let magnitude = value.abs().min(CCM_MAX_COEFF);
    let raw = (magnitude * (1u32 << CCM_FRAC_BITS) as f32).round() as u16;
    if value.is_sign_negative() && raw != 0 {
        raw | CCM_SIGN_BIT
    } else {
        raw
    }
}

/// Decode a sign-magnitude fixed point coefficient.
pub fn decode_coeff(raw: u16) -> f32 {
    let magnitude = (raw & (CCM_SIGN_BIT - 1)) as f32 / (1u32 << CCM_FRAC_BITS) as f32;
    if raw & CCM_SIGN_BIT != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Validate and encode a CCM request.
///
/// With saturation enabled out-of-range coefficients are clamped here, the
/// way the hardware would clamp them at output.
pub fn encode_ccm(config: &CcmConfig) -> IspResult<CcmRegisters> {
    validate_ccm(config)?;
    let mut regs = [[0u16; 3]; 3];
    for (row, coeffs) in config.matrix.iter().enumerate() {
        for (col, &c) in coeffs.iter().enumerate() {
            regs[row][col] = encode_coeff(c);
        }
    }
    Ok(regs)
}

/// Decode a register image back to coefficients.
pub fn decode_ccm(regs: &CcmRegisters) -> [[f32; 3]; 3] {
    let mut matrix = [[0.0f32; 3]; 3];
    for (row, coeffs) in regs.iter().enumerate() {
        for (col, &raw) in coeffs.iter().enumerate() {
            matrix[row][col] = decode_coeff(raw);
        }
    }
    matrix
}

/// Per-processor CCM block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CcmBlock {
    /// Last accepted register image
    pub matrix: CcmRegisters,
    /// Requested enable bit
    pub enabled: bool,
    /// Hardware does not yet hold `matrix`/`enabled`
    pub staged: bool,
}

impl CcmBlock {
    /// Identity matrix, disabled, nothing staged.
    pub fn new() -> Self {
        let identity = CcmConfig::default();
        let matrix = [
            [encode_coeff(identity.matrix[0][0]), 0, 0],
            [0, encode_coeff(identity.matrix[1][1]), 0],
            [0, 0, encode_coeff(identity.matrix[2][2])],
        ];
        Self {
            matrix,
            enabled: false,
            staged: false,
        }
    }
}

impl Default for CcmBlock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_known_values() {
        assert_eq!(encode_coeff(1.0), 1024);
        assert_eq!(encode_coeff(0.0), 0);
        assert_eq!(encode_coeff(-0.0), 0);
        assert_eq!(encode_coeff(-1.0), 1024 | CCM_SIGN_BIT);
        // 4 - 2^-10 is the largest magnitude.
        assert_eq!(encode_coeff(3.999_023_4), 4095);
    }

    #[test]
    fn saturation_clamps_to_max() {
        assert_eq!(encode_coeff(5.0), 4095);
        assert_eq!(encode_coeff(-7.5), 4095 | CCM_SIGN_BIT);
        assert!((decode_coeff(encode_coeff(5.0)) - CCM_MAX_COEFF).abs() < 1e-6);
    }

    #[test]
    fn decode_preserves_sign_and_quantizes() {
        let v = decode_coeff(encode_coeff(-1.1));
        assert!(v < 0.0);
        assert!((v + 1.1).abs() < 1.0 / 1024.0);
    }

    #[test]
    fn encode_ccm_rejects_without_saturation() {
        let ccm = CcmConfig {
            matrix: [[5.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            saturation: false,
        };
        assert!(encode_ccm(&ccm).is_err());

        let regs = encode_ccm(&CcmConfig {
            saturation: true,
            ..ccm
        })
        .unwrap();
        assert_eq!(regs[0][0], 4095);
        assert_eq!(regs[1][1], 1024);
    }

    #[test]
    fn new_block_holds_identity() {
        let block = CcmBlock::new();
        assert_eq!(decode_ccm(&block.matrix), CcmConfig::default().matrix);
        assert!(!block.enabled);
        assert!(!block.staged);
    }
}
