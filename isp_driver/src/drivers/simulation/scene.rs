//! Synthetic scene for the simulation backend.
//!
//! Produces plausible statistics for a static, evenly lit scene with a
//! little per-frame noise. A fixed seed makes runs reproducible.

use crate::commit::decode_ccm;
use isp_common::consts::AE_GRID_SIZE;
use isp_common::isp::types::{
    AeConfig, AeSamplePoint, AeStats, AfConfig, AfStats, AwbConfig, AwbSamplePoint, AwbStats,
    CcmRegisters,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Mean raw pixel value per channel (R, G, B).
const ILLUMINANT: [f64; 3] = [150.0, 172.0, 118.0];

/// Fraction of sampled pixels classified as white patches.
const WHITE_FRACTION: f64 = 0.3;

/// Edge energy per pixel at `edge_thresh == 1`.
const SHARPNESS: f64 = 48.0;

/// Gamma applied for the `AfterGamma` AE tap.
const GAMMA: f64 = 1.0 / 2.2;

/// Seeded scene generator.
pub struct Scene {
    rng: StdRng,
    /// Brightness ramp across the frame, left to right.
    vignette: f64,
}

impl Scene {
    /// Create a scene from a seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            vignette: 0.2,
        }
    }

    fn jitter(&mut self) -> f64 {
        self.rng.gen_range(0.97..1.03)
    }

    fn luma(rgb: [f64; 3]) -> f64 {
        0.299 * rgb[0] + 0.587 * rgb[1] + 0.114 * rgb[2]
    }

    /// AF statistics for each configured window.
    pub fn af(&mut self, config: &AfConfig) -> AfStats {
        let mut stats = AfStats::default();
        let luma = Self::luma(ILLUMINANT);
        let thresh = f64::from(config.edge_thresh.max(1));
        for (i, window) in config.windows.iter().enumerate() {
            let area = window.area() as f64;
            stats.luminance[i] = (area * luma * self.jitter()) as u32;
            stats.definition[i] = (area * SHARPNESS / thresh * self.jitter()) as u32;
        }
        stats
    }

    /// AWB statistics. `ccm` is the active matrix, if the CCM is enabled.
    pub fn awb(&mut self, config: &AwbConfig, ccm: Option<&CcmRegisters>) -> AwbStats {
        let mut rgb = ILLUMINANT.map(|c| c * self.jitter());
        if let (AwbSamplePoint::AfterCcm, Some(regs)) = (config.sample_point, ccm) {
            let m = decode_ccm(regs);
            let input = rgb;
            for (row, out) in rgb.iter_mut().enumerate() {
                *out = (0..3)
                    .map(|col| f64::from(m[row][col]) * input[col])
                    .sum::<f64>()
                    .clamp(0.0, 255.0);
            }
        }

        let patch = &config.white_patch;
        let sum = rgb.iter().sum::<f64>();
        let g = rgb[1].max(1.0);
        let (rg, bg) = (rgb[0] / g, rgb[2] / g);
        let is_white = sum >= f64::from(patch.luminance.min)
            && sum <= f64::from(patch.luminance.max)
            && rg >= f64::from(patch.red_green_ratio.min)
            && rg <= f64::from(patch.red_green_ratio.max)
            && bg >= f64::from(patch.blue_green_ratio.min)
            && bg <= f64::from(patch.blue_green_ratio.max);
        if !is_white {
            return AwbStats::default();
        }

        let count = (config.window.area() as f64 * WHITE_FRACTION).round();
        AwbStats {
            white_patch_num: count as u32,
            sum_r: (count * rgb[0]) as u32,
            sum_g: (count * rgb[1]) as u32,
            sum_b: (count * rgb[2]) as u32,
        }
    }

    /// AE luminance per grid block of the window.
    pub fn ae(&mut self, config: &AeConfig) -> AeStats {
        let mut stats = AeStats::default();
        let base = Self::luma(ILLUMINANT);
        for row in stats.luminance.iter_mut() {
            for (col, cell) in row.iter_mut().enumerate() {
                let ramp = 1.0 - self.vignette * (col as f64 / (AE_GRID_SIZE - 1) as f64);
                let mut y = (base * ramp * self.jitter()).clamp(0.0, 255.0);
                if config.sample_point == AeSamplePoint::AfterGamma {
                    y = 255.0 * (y / 255.0).powf(GAMMA);
                }
                *cell = y.round() as u32;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::encode_ccm;
    use isp_common::isp::types::CcmConfig;

    #[test]
    fn same_seed_same_statistics() {
        let cfg = AfConfig::for_resolution(800, 600);
        let mut a = Scene::new(7);
        let mut b = Scene::new(7);
        assert_eq!(a.af(&cfg), b.af(&cfg));
    }

    #[test]
    fn af_unused_windows_are_zero() {
        let mut cfg = AfConfig::for_resolution(800, 600);
        cfg.windows.truncate(1);
        let stats = Scene::new(1).af(&cfg);
        assert!(stats.definition[0] > 0);
        assert_eq!(stats.definition[1], 0);
        assert_eq!(stats.luminance[2], 0);
    }

    #[test]
    fn awb_counts_white_patches() {
        let cfg = AwbConfig::for_resolution(800, 600);
        let stats = Scene::new(1).awb(&cfg, None);
        assert!(stats.white_patch_num > 0);
        assert!(stats.sum_g > stats.sum_b);
    }

    #[test]
    fn awb_after_ccm_sees_matrix() {
        let cfg = AwbConfig::for_resolution(800, 600);
        let swap = encode_ccm(&CcmConfig {
            matrix: [[0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]],
            saturation: false,
        })
        .unwrap();
        let plain = Scene::new(3).awb(&cfg, None);
        let swapped = Scene::new(3).awb(&cfg, Some(&swap));
        assert!(plain.sum_r > plain.sum_b);
        assert!(swapped.sum_b > swapped.sum_r);
    }

    #[test]
    fn awb_rejects_out_of_range_patches() {
        let mut cfg = AwbConfig::for_resolution(800, 600);
        cfg.white_patch.luminance.max = 10;
        let stats = Scene::new(1).awb(&cfg, None);
        assert_eq!(stats, AwbStats::default());
    }

    #[test]
    fn ae_grid_is_brighter_on_the_left() {
        let stats = Scene::new(1).ae(&AeConfig::for_resolution(800, 600));
        for row in stats.luminance {
            assert!(row[0] > row[AE_GRID_SIZE - 1]);
        }
    }
}
