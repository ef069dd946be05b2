//! Temporal fusion of per-frame confidence maps.
//!
//! Each frame's raw network confidence is blended with the previous frame's
//! fused confidence, warped into the current frame along the optical flow.
//! Pixels that barely move trust the warped history; fast-moving or
//! inconsistently tracked pixels fall back to the current frame.

use super::flow::sample_bilinear;
use super::types::{ConfidenceMap, FlowEstimator, GrayFrame, MotionField};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Upper bound of the confidence scale
pub const CONFIDENCE_MAX: f32 = 255.0;

/// State carried from one frame to the next
///
/// Owned by the caller and replaced whole after every frame. Independent
/// streams must each hold their own state.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionState {
    pub prev_gray: GrayFrame,
    pub prev_fused: ConfidenceMap,
}

impl FusionState {
    /// All-zero state for the start of a sequence
    pub fn zeros(width: u32, height: u32) -> Self {
        let shape = (height as usize, width as usize);
        Self {
            prev_gray: GrayFrame::zeros(shape),
            prev_fused: ConfidenceMap::zeros(shape),
        }
    }

    /// (height, width)
    pub fn dim(&self) -> (usize, usize) {
        self.prev_gray.dim()
    }

    /// True when no previous confidence has been recorded
    pub fn is_blank(&self) -> bool {
        self.prev_fused.iter().all(|&v| v == 0.0)
    }
}

/// Tuning of the motion-adaptive blend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionParams {
    /// Weight given to the warped history at zero motion
    pub max_trust: f32,

    /// Motion magnitude (pixels) at which trust drops to `max_trust / e`
    pub motion_scale: f32,

    /// Squared forward/backward disagreement (pixels²) above which a pixel is
    /// considered untracked
    pub consistency_threshold: f32,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            max_trust: 0.95,
            motion_scale: 4.0,
            consistency_threshold: 8.0,
        }
    }
}

impl FusionParams {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.max_trust) {
            return Err(Error::InvalidConfiguration(format!(
                "max_trust must be within [0, 1], got {}",
                self.max_trust
            )));
        }
        if !self.motion_scale.is_finite() || self.motion_scale <= 0.0 {
            return Err(Error::InvalidConfiguration(format!(
                "motion_scale must be positive, got {}",
                self.motion_scale
            )));
        }
        if self.consistency_threshold.is_nan() || self.consistency_threshold <= 0.0 {
            return Err(Error::InvalidConfiguration(format!(
                "consistency_threshold must be positive, got {}",
                self.consistency_threshold
            )));
        }
        Ok(())
    }

    /// Trust in the warped history for a given motion magnitude
    ///
    /// Smooth, non-increasing in `magnitude`, always within [0, 1].
    pub fn motion_weight(&self, magnitude: f32) -> f32 {
        if !magnitude.is_finite() {
            return 0.0;
        }
        let ratio = magnitude.abs() / self.motion_scale;
        (self.max_trust * (-ratio * ratio).exp()).clamp(0.0, 1.0)
    }
}

/// Motion-adaptive temporal fusion
pub struct TemporalFusionEngine<F> {
    flow: F,
    params: FusionParams,
}

impl<F: FlowEstimator> TemporalFusionEngine<F> {
    pub fn new(flow: F, params: FusionParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { flow, params })
    }

    pub fn params(&self) -> &FusionParams {
        &self.params
    }

    /// Fuse the current confidence with the carried state
    ///
    /// With `is_init`, or when the state holds no confidence yet, the current
    /// map passes through unchanged. The caller's state is never modified;
    /// the replacement state is returned alongside the fused map.
    pub fn fuse(
        &self,
        current: &ConfidenceMap,
        current_gray: &GrayFrame,
        state: &FusionState,
        is_init: bool,
    ) -> Result<(ConfidenceMap, FusionState)> {
        let _span = tracing::debug_span!("fuse", is_init).entered();

        validate_inputs(current, current_gray, state)?;

        if is_init || state.is_blank() {
            tracing::debug!("Sequence start, passing current confidence through");
            return Ok(next_state(clamp_confidence(current), current_gray));
        }

        let forward = self.flow.estimate(&state.prev_gray, current_gray)?;
        let backward = self.flow.estimate(current_gray, &state.prev_gray)?;

        self.blend(current, current_gray, state, &forward, &backward)
    }

    /// Fuse using caller-supplied motion fields
    ///
    /// `forward` maps previous-frame pixels into the current frame, `backward`
    /// maps current-frame pixels into the previous frame.
    pub fn fuse_with_flow(
        &self,
        current: &ConfidenceMap,
        current_gray: &GrayFrame,
        state: &FusionState,
        forward: &MotionField,
        backward: &MotionField,
    ) -> Result<(ConfidenceMap, FusionState)> {
        validate_inputs(current, current_gray, state)?;
        self.blend(current, current_gray, state, forward, backward)
    }

    fn blend(
        &self,
        current: &ConfidenceMap,
        current_gray: &GrayFrame,
        state: &FusionState,
        forward: &MotionField,
        backward: &MotionField,
    ) -> Result<(ConfidenceMap, FusionState)> {
        let shape = current.dim();
        if forward.dim() != shape || backward.dim() != shape {
            return Err(Error::InvalidInput(format!(
                "motion fields {:?}/{:?} do not match confidence map {:?}",
                forward.dim(),
                backward.dim(),
                shape
            )));
        }

        let (height, width) = shape;
        let mut fused = ConfidenceMap::zeros(shape);
        let mut tracked = 0usize;

        for y in 0..height {
            for x in 0..width {
                let cur = current[[y, x]];
                let bx = backward.dx[[y, x]];
                let by = backward.dy[[y, x]];
                let px = x as f32 + bx;
                let py = y as f32 + by;

                fused[[y, x]] = match sample_bilinear(&state.prev_fused, px, py) {
                    Some(warped) if self.is_consistent(forward, px, py, bx, by) => {
                        tracked += 1;
                        let w = self.params.motion_weight((bx * bx + by * by).sqrt());
                        w * warped + (1.0 - w) * cur
                    }
                    _ => cur,
                };
            }
        }

        tracing::debug!("Tracked {} of {} pixels", tracked, height * width);

        Ok(next_state(clamp_confidence(&fused), current_gray))
    }

    /// Forward flow at the warped position should point back to `(x, y)`
    fn is_consistent(&self, forward: &MotionField, px: f32, py: f32, bx: f32, by: f32) -> bool {
        let fx = sample_bilinear(&forward.dx, px, py);
        let fy = sample_bilinear(&forward.dy, px, py);
        match (fx, fy) {
            (Some(fx), Some(fy)) => {
                let ex = fx + bx;
                let ey = fy + by;
                ex * ex + ey * ey < self.params.consistency_threshold
            }
            _ => false,
        }
    }
}

fn validate_inputs(current: &ConfidenceMap, current_gray: &GrayFrame, state: &FusionState) -> Result<()> {
    let shape = current.dim();
    if shape.0 == 0 || shape.1 == 0 {
        return Err(Error::InvalidInput("empty confidence map".to_string()));
    }
    if current_gray.dim() != shape {
        return Err(Error::InvalidInput(format!(
            "gray frame {:?} does not match confidence map {:?}",
            current_gray.dim(),
            shape
        )));
    }
    if state.prev_gray.dim() != shape || state.prev_fused.dim() != shape {
        return Err(Error::InvalidInput(format!(
            "fusion state {:?}/{:?} does not match current frame {:?}",
            state.prev_gray.dim(),
            state.prev_fused.dim(),
            shape
        )));
    }
    if current.iter().any(|v| !v.is_finite()) {
        return Err(Error::InvalidInput("confidence map contains non-finite values".to_string()));
    }
    // A non-finite value would survive clamping and persist in every later state
    if state.prev_fused.iter().any(|v| !v.is_finite()) {
        return Err(Error::InvalidInput("fusion state contains non-finite values".to_string()));
    }
    Ok(())
}

fn clamp_confidence(map: &ConfidenceMap) -> ConfidenceMap {
    map.mapv(|v| v.clamp(0.0, CONFIDENCE_MAX))
}

fn next_state(fused: ConfidenceMap, current_gray: &GrayFrame) -> (ConfidenceMap, FusionState) {
    let state = FusionState {
        prev_gray: current_gray.clone(),
        prev_fused: fused.clone(),
    };
    (fused, state)
}
