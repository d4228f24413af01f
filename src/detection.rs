use serde::{Deserialize, Serialize};

use crate::decode::DetectionCandidate;
use crate::error::{DetectError, Result};

/// Name reported for class ids outside the caller's class table.
pub const UNKNOWN_CLASS: &str = "unknown";

/// A final, host-visible detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct Detection {
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
    /// Top-left `[x, y, w, h]`.
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
}

/// Maps surviving candidate indices to detections, preserving their order.
pub fn build_detections(
    candidates: &[DetectionCandidate],
    keep: &[usize],
    class_names: &[String],
) -> Vec<Detection> {
    keep.iter()
        .filter_map(|&i| candidates.get(i))
        .map(|c| Detection {
            class_id: c.class_id as u32,
            class_name: class_names
                .get(c.class_id)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_CLASS.to_string()),
            confidence: c.confidence,
            bbox: c.bbox,
        })
        .collect()
}

/// Serializes detections as a JSON array of records.
pub fn detections_to_json(detections: &[Detection]) -> Result<String> {
    serde_json::to_string(detections)
        .map_err(|e| DetectError::inference(format!("detection serialization failed: {e}")))
}
