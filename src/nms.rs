use tracing::debug;

use crate::decode::DetectionCandidate;

/// Intersection-over-union of two top-left `[x, y, w, h]` boxes.
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_x1 = a[0].max(b[0]);
    let inter_y1 = a[1].max(b[1]);
    let inter_x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let inter_y2 = (a[1] + a[3]).min(b[1] + b[3]);

    let inter_w = (inter_x2 - inter_x1).max(0.0);
    let inter_h = (inter_y2 - inter_y1).max(0.0);
    let inter_area = inter_w * inter_h;

    let union = a[2].max(0.0) * a[3].max(0.0) + b[2].max(0.0) * b[3].max(0.0) - inter_area;
    if union > f32::EPSILON {
        inter_area / union
    } else {
        0.0
    }
}

/// Greedy class-agnostic non-max suppression.
///
/// Candidates at or below `score_threshold` are dropped first. Returns the
/// surviving indices into `candidates`, highest confidence first; ties keep
/// input order.
pub fn suppress(
    candidates: &[DetectionCandidate],
    score_threshold: f32,
    iou_threshold: f32,
) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len())
        .filter(|&i| candidates[i].confidence > score_threshold)
        .collect();
    order.sort_by(|&a, &b| {
        candidates[b]
            .confidence
            .total_cmp(&candidates[a].confidence)
    });

    let mut suppressed = vec![false; order.len()];
    let mut keep = Vec::with_capacity(order.len().min(100));

    for i in 0..order.len() {
        if suppressed[i] {
            continue;
        }
        let kept = &candidates[order[i]].bbox;
        keep.push(order[i]);

        for j in (i + 1)..order.len() {
            if !suppressed[j] && iou(kept, &candidates[order[j]].bbox) >= iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    debug!(input = candidates.len(), kept = keep.len(), "NMS complete");
    keep
}
