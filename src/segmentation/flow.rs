use super::types::{FlowEstimator, GrayFrame, MotionField};
use crate::error::{Error, Result};
use ndarray::{s, Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

/// Small penalty per pixel of displacement so that equal-cost candidates
/// resolve to the shortest motion (static scenes give zero flow)
const MOTION_LAMBDA: f32 = 0.25;

/// Speed/accuracy trade-off for dense flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowPreset {
    #[default]
    UltraFast,
    Fast,
    Medium,
}

impl FlowPreset {
    /// Matching block edge length in pixels (odd)
    pub fn block_size(&self) -> usize {
        match self {
            FlowPreset::UltraFast => 5,
            FlowPreset::Fast => 7,
            FlowPreset::Medium => 9,
        }
    }

    /// Maximum displacement searched at the matching scale
    pub fn search_range(&self) -> usize {
        match self {
            FlowPreset::UltraFast => 2,
            FlowPreset::Fast => 3,
            FlowPreset::Medium => 4,
        }
    }
}

/// Dense optical flow by block matching on a downscaled frame
///
/// The matching scale depends on frame size: small frames are matched at full
/// resolution, medium ones at half, larger ones at quarter resolution. The
/// coarse field is then bilinearly upsampled back to frame size.
#[derive(Debug, Clone, Default)]
pub struct BlockMatchFlow {
    preset: FlowPreset,
}

impl BlockMatchFlow {
    pub fn new(preset: FlowPreset) -> Self {
        Self { preset }
    }

    pub fn preset(&self) -> FlowPreset {
        self.preset
    }
}

/// Downscale factor used to match frames of the given size
pub fn finest_scale_factor(height: usize, width: usize) -> usize {
    if height <= 64 || width <= 64 {
        1
    } else if height <= 160 || width <= 160 {
        2
    } else {
        4
    }
}

impl FlowEstimator for BlockMatchFlow {
    fn estimate(&self, prev: &GrayFrame, curr: &GrayFrame) -> Result<MotionField> {
        let _span = tracing::debug_span!("optical_flow", preset = ?self.preset).entered();

        if prev.dim() != curr.dim() {
            return Err(Error::InvalidInput(format!(
                "flow frames differ in shape: {:?} vs {:?}",
                prev.dim(),
                curr.dim()
            )));
        }
        let (height, width) = prev.dim();
        if height == 0 || width == 0 {
            return Err(Error::InvalidInput("empty gray frame".to_string()));
        }

        let factor = finest_scale_factor(height, width);
        let prev_coarse = downsample(&prev.view(), factor);
        let curr_coarse = downsample(&curr.view(), factor);

        let coarse = block_match(
            &prev_coarse,
            &curr_coarse,
            self.preset.block_size(),
            self.preset.search_range(),
        );

        if factor == 1 {
            return Ok(coarse);
        }
        Ok(upsample(&coarse, height, width, factor))
    }
}

/// Box-average downscale by an integer factor
fn downsample(frame: &ArrayView2<u8>, factor: usize) -> Array2<f32> {
    let (height, width) = frame.dim();
    let out_h = height.div_ceil(factor);
    let out_w = width.div_ceil(factor);

    Array2::from_shape_fn((out_h, out_w), |(y, x)| {
        let block = frame.slice(s![
            y * factor..((y + 1) * factor).min(height),
            x * factor..((x + 1) * factor).min(width)
        ]);
        block.iter().map(|&v| v as f32).sum::<f32>() / block.len() as f32
    })
}

/// Per-pixel block matching from `prev` into `curr`
fn block_match(prev: &Array2<f32>, curr: &Array2<f32>, block_size: usize, search_range: usize) -> MotionField {
    let (height, width) = prev.dim();
    let radius = block_size / 2;
    let range = search_range as isize;
    let mut motion = MotionField::zeros(height, width);

    for y in 0..height {
        for x in 0..width {
            let y0 = y.saturating_sub(radius);
            let y1 = (y + radius + 1).min(height);
            let x0 = x.saturating_sub(radius);
            let x1 = (x + radius + 1).min(width);
            let block = prev.slice(s![y0..y1, x0..x1]);

            let mut best_cost = f32::MAX;
            let mut best = (0isize, 0isize);

            for dy in -range..=range {
                for dx in -range..=range {
                    let ty0 = y0 as isize + dy;
                    let tx0 = x0 as isize + dx;
                    let ty1 = y1 as isize + dy;
                    let tx1 = x1 as isize + dx;
                    if ty0 < 0 || tx0 < 0 || ty1 > height as isize || tx1 > width as isize {
                        continue;
                    }

                    let target = curr.slice(s![ty0..ty1, tx0..tx1]);
                    let cost = mean_abs_diff(&block, &target)
                        + (((dx * dx + dy * dy) as f32).sqrt()) * MOTION_LAMBDA;

                    if cost < best_cost {
                        best_cost = cost;
                        best = (dx, dy);
                    }
                }
            }

            motion.dx[[y, x]] = best.0 as f32;
            motion.dy[[y, x]] = best.1 as f32;
        }
    }

    motion
}

fn mean_abs_diff(a: &ArrayView2<f32>, b: &ArrayView2<f32>) -> f32 {
    let mut sum = 0.0f32;
    Zip::from(a).and(b).for_each(|&p, &q| sum += (p - q).abs());
    sum / a.len().max(1) as f32
}

/// Bilinear upsample of a coarse field, scaling displacements by `factor`
fn upsample(coarse: &MotionField, height: usize, width: usize, factor: usize) -> MotionField {
    let scale = factor as f32;
    let (coarse_h, coarse_w) = coarse.dim();
    let mut motion = MotionField::zeros(height, width);

    for y in 0..height {
        let cy = ((y as f32 + 0.5) / scale - 0.5).clamp(0.0, (coarse_h - 1) as f32);
        for x in 0..width {
            let cx = ((x as f32 + 0.5) / scale - 0.5).clamp(0.0, (coarse_w - 1) as f32);
            motion.dx[[y, x]] = sample_bilinear(&coarse.dx, cx, cy).unwrap_or(0.0) * scale;
            motion.dy[[y, x]] = sample_bilinear(&coarse.dy, cx, cy).unwrap_or(0.0) * scale;
        }
    }

    motion
}

/// Bilinear sample at a fractional position; `None` outside the grid
pub(crate) fn sample_bilinear(map: &Array2<f32>, x: f32, y: f32) -> Option<f32> {
    let (height, width) = map.dim();
    if !x.is_finite() || !y.is_finite() || x < 0.0 || y < 0.0 {
        return None;
    }
    if x > (width - 1) as f32 || y > (height - 1) as f32 {
        return None;
    }

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let top = map[[y0, x0]] * (1.0 - fx) + map[[y0, x1]] * fx;
    let bottom = map[[y1, x0]] * (1.0 - fx) + map[[y1, x1]] * fx;
    Some(top * (1.0 - fy) + bottom * fy)
}
