use serde::{Deserialize, Serialize};

use crate::error::{DetectError, Result};

/// Letterbox fill value (mid-gray).
pub const DEFAULT_PAD_VALUE: u8 = 114;

/// Maximum source frame pixel count (100 megapixels).
pub const DEFAULT_MAX_IMAGE_PIXELS: u64 = 100_000_000;

/// Maximum candidates entering NMS to bound CPU time.
pub const DEFAULT_MAX_NMS_INPUTS: usize = 30_000;

/// Maximum elements accepted from one output tensor.
pub const DEFAULT_MAX_OUTPUT_ELEMENTS: usize = 50_000_000;

// ============================================================================
// Thresholds
// ============================================================================

/// Per-call decision thresholds, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Objectness cut-off (layout A only, `>=` keeps).
    pub confidence: f32,
    /// Class score cut-off (`>` keeps).
    pub score: f32,
    /// IoU at or above which a lower-confidence box is suppressed.
    pub nms: f32,
}

impl Thresholds {
    pub fn new(confidence: f32, score: f32, nms: f32) -> Self {
        Self {
            confidence,
            score,
            nms,
        }
    }

    /// Clamps every threshold into `[0, 1]`.
    ///
    /// # Errors
    ///
    /// NaN cannot be clamped meaningfully and is rejected.
    pub fn clamped(self) -> Result<Self> {
        Ok(Self {
            confidence: clamp_unit("confidence threshold", self.confidence)?,
            score: clamp_unit("score threshold", self.score)?,
            nms: clamp_unit("nms threshold", self.nms)?,
        })
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confidence: 0.25,
            score: 0.25,
            nms: 0.45,
        }
    }
}

fn clamp_unit(name: &str, value: f32) -> Result<f32> {
    if value.is_nan() {
        return Err(DetectError::invalid(format!("{name} is NaN")));
    }
    Ok(value.clamp(0.0, 1.0))
}

// ============================================================================
// Pipeline configuration
// ============================================================================

/// Coordinate space of reported boxes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxSpace {
    /// Input-tensor pixels, i.e. the padded square canvas after any final resize.
    #[default]
    Letterboxed,
    /// Source frame pixels, undoing padding and scaling.
    Source,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub pad_value: u8,
    /// Treat 3/4-channel frames as BGR(A) and swap to RGB.
    pub swap_rb: bool,
    pub max_image_pixels: u64,
    pub max_nms_inputs: usize,
    pub max_output_elements: usize,
    pub box_space: BoxSpace,
    pub intra_threads: Option<usize>,
    pub allow_gpu: bool,
    pub allow_npu: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pad_value: DEFAULT_PAD_VALUE,
            swap_rb: true,
            max_image_pixels: DEFAULT_MAX_IMAGE_PIXELS,
            max_nms_inputs: DEFAULT_MAX_NMS_INPUTS,
            max_output_elements: DEFAULT_MAX_OUTPUT_ELEMENTS,
            box_space: BoxSpace::default(),
            intra_threads: None,
            allow_gpu: true,
            allow_npu: true,
        }
    }
}

impl PipelineConfig {
    /// Parses a host-supplied JSON config; missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DetectError::invalid(format!("pipeline config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_image_pixels == 0 {
            return Err(DetectError::invalid("max_image_pixels must be positive"));
        }
        if self.max_nms_inputs == 0 {
            return Err(DetectError::invalid("max_nms_inputs must be positive"));
        }
        if self.max_output_elements == 0 {
            return Err(DetectError::invalid("max_output_elements must be positive"));
        }
        if self.intra_threads == Some(0) {
            return Err(DetectError::invalid("intra_threads must be positive"));
        }
        Ok(())
    }
}
