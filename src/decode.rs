//! Raw output tensor -> per-row detection candidates.
//!
//! Two logical shapes exist: `[rows, attributes]` and the transposed
//! `[attributes, rows]`. A tensor whose last dimension exceeds its second is
//! treated as transposed. Each row is `cx, cy, w, h`, then either an
//! objectness score and `C` class scores (layout A) or just `C` class scores
//! (layout B).

use ndarray::{Array2, ArrayView2};
use tracing::{debug, instrument, warn};

use crate::backend::OutputTensor;
use crate::config::Thresholds;
use crate::error::{DetectError, Result};

/// Number of leading box attributes in every row.
const BOX_ATTRS: usize = 4;

/// A decoded row that passed thresholding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionCandidate {
    pub class_id: usize,
    pub confidence: f32,
    /// Top-left `[x, y, w, h]` in input-tensor pixels.
    pub bbox: [f32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Explicit objectness at offset 4, class scores from offset 5.
    Objectness,
    /// Class scores from offset 4.
    ClassScores,
}

/// Row-major `[rows, attributes]` view of an output, after any transpose.
#[derive(Debug)]
pub struct DecodedShape {
    pub rows: usize,
    pub attributes: usize,
    pub transposed: bool,
}

/// Reads the logical `(second, last)` dimensions, ignoring leading batch axes.
fn logical_dims(shape: &[usize]) -> Result<(usize, usize)> {
    match shape {
        [rows, attrs] => Ok((*rows, *attrs)),
        [lead @ .., rows, attrs] if lead.iter().all(|&d| d == 1) => Ok((*rows, *attrs)),
        _ => Err(DetectError::inference(format!(
            "expected output shape [1, rows, attributes], got {shape:?}"
        ))),
    }
}

/// Normalizes `tensor` into `[rows, attributes]`.
pub fn normalize(tensor: &OutputTensor) -> Result<(Array2<f32>, DecodedShape)> {
    let (second, last) = logical_dims(&tensor.shape)?;
    let view = ArrayView2::from_shape((second, last), &tensor.data)
        .map_err(|e| DetectError::inference(format!("output reshape failed: {e}")))?;

    if second == last {
        warn!(
            dim = second,
            "Output rows equal attribute count; layout is ambiguous, decoding as rows-first"
        );
    }

    if last > second {
        Ok((
            view.t().as_standard_layout().into_owned(),
            DecodedShape {
                rows: last,
                attributes: second,
                transposed: true,
            },
        ))
    } else {
        Ok((
            view.to_owned(),
            DecodedShape {
                rows: second,
                attributes: last,
                transposed: false,
            },
        ))
    }
}

/// Picks the row layout from the attribute count, falling back to orientation.
pub fn detect_layout(shape: &DecodedShape, class_count: usize) -> Result<Layout> {
    if shape.attributes < BOX_ATTRS + class_count {
        return Err(DetectError::inference(format!(
            "output rows have {} attributes, need at least {} for {class_count} classes",
            shape.attributes,
            BOX_ATTRS + class_count
        )));
    }
    if shape.attributes == BOX_ATTRS + class_count {
        Ok(Layout::ClassScores)
    } else if shape.attributes == BOX_ATTRS + 1 + class_count {
        Ok(Layout::Objectness)
    } else if shape.transposed {
        Ok(Layout::ClassScores)
    } else {
        Ok(Layout::Objectness)
    }
}

/// Decodes every row of `tensor` that clears the thresholds.
///
/// Objectness uses `>=`; class scores use strict `>`.
#[instrument(skip(tensor, thresholds), fields(output = %tensor.name, shape = ?tensor.shape))]
pub fn decode(
    tensor: &OutputTensor,
    class_count: usize,
    thresholds: &Thresholds,
) -> Result<Vec<DetectionCandidate>> {
    if class_count == 0 {
        return Err(DetectError::invalid("class count must be positive"));
    }

    let (rows, shape) = normalize(tensor)?;
    let layout = detect_layout(&shape, class_count)?;
    debug!(rows = shape.rows, attributes = shape.attributes, transposed = shape.transposed, ?layout, "Output layout resolved");

    let mut candidates = Vec::new();
    for row in rows.rows() {
        let Some(row) = row.as_slice() else {
            continue;
        };
        if let Some(candidate) = decode_row(row, layout, class_count, thresholds) {
            candidates.push(candidate);
        }
    }

    debug!(candidates = candidates.len(), "Rows decoded");
    Ok(candidates)
}

fn decode_row(
    row: &[f32],
    layout: Layout,
    class_count: usize,
    thresholds: &Thresholds,
) -> Option<DetectionCandidate> {
    let (confidence, class_id) = match layout {
        Layout::Objectness => {
            let objectness = row[BOX_ATTRS];
            if !(objectness >= thresholds.confidence) {
                return None;
            }
            let (class_id, max_score) = argmax(&row[BOX_ATTRS + 1..BOX_ATTRS + 1 + class_count]);
            if !(max_score > thresholds.score) {
                return None;
            }
            (objectness, class_id)
        }
        Layout::ClassScores => {
            let (class_id, max_score) = argmax(&row[BOX_ATTRS..BOX_ATTRS + class_count]);
            if !(max_score > thresholds.score) {
                return None;
            }
            (max_score, class_id)
        }
    };

    let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
    if !(cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite()) {
        return None;
    }

    Some(DetectionCandidate {
        class_id,
        confidence,
        bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
    })
}

/// First index of the maximum score.
fn argmax(scores: &[f32]) -> (usize, f32) {
    scores
        .iter()
        .enumerate()
        .fold((0usize, f32::NEG_INFINITY), |(best_idx, best), (idx, &score)| {
            if score > best {
                (idx, score)
            } else {
                (best_idx, best)
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn thresholds(confidence: f32, score: f32) -> Thresholds {
        Thresholds::new(confidence, score, 0.45)
    }

    fn tensor(shape: Vec<usize>, data: Vec<f32>) -> OutputTensor {
        OutputTensor::new("output0", shape, data).unwrap()
    }

    /// Lays out `rows` as `[1, N, attrs]`, padding with zero rows so the
    /// tensor is not mistaken for the transposed layout.
    fn direct(rows: &[Vec<f32>]) -> OutputTensor {
        let attrs = rows[0].len();
        let mut data = rows.concat();
        let n = rows.len().max(attrs + 1);
        data.resize(n * attrs, 0.0);
        tensor(vec![1, n, attrs], data)
    }

    /// Lays out `rows` as `[1, attrs, N]`.
    fn transposed(rows: &[Vec<f32>]) -> OutputTensor {
        let attrs = rows[0].len();
        let mut data = vec![0.0; attrs * rows.len()];
        for (r, row) in rows.iter().enumerate() {
            for (a, &v) in row.iter().enumerate() {
                data[a * rows.len() + r] = v;
            }
        }
        tensor(vec![1, attrs, rows.len()], data)
    }

    #[test]
    fn class_score_layout_decodes_center_boxes() {
        // 2 classes, layout B, rows-first
        let t = direct(&[vec![100.0, 50.0, 20.0, 10.0, 0.1, 0.9]]);
        let got = decode(&t, 2, &thresholds(0.25, 0.25)).unwrap();
        assert_eq!(
            got,
            vec![DetectionCandidate {
                class_id: 1,
                confidence: 0.9,
                bbox: [90.0, 45.0, 20.0, 10.0],
            }]
        );
    }

    #[test]
    fn objectness_layout_uses_objectness_as_confidence() {
        let t = direct(&[
            vec![10.0, 10.0, 4.0, 4.0, 0.8, 0.3, 0.6],
            // objectness too low
            vec![10.0, 10.0, 4.0, 4.0, 0.1, 0.9, 0.9],
        ]);
        let got = decode(&t, 2, &thresholds(0.5, 0.5)).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].confidence, 0.8);
        assert_eq!(got[0].class_id, 1);
    }

    #[test]
    fn score_equal_to_threshold_is_rejected() {
        let t = direct(&[vec![1.0, 1.0, 1.0, 1.0, 0.5, 0.2]]);
        assert!(decode(&t, 2, &thresholds(0.0, 0.5)).unwrap().is_empty());
    }

    #[test]
    fn objectness_equal_to_threshold_is_accepted() {
        let t = direct(&[vec![1.0, 1.0, 1.0, 1.0, 0.5, 0.9, 0.1]]);
        let got = decode(&t, 2, &thresholds(0.5, 0.25)).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].confidence, 0.5);
    }

    #[test]
    fn transposed_tensor_matches_direct_tensor() {
        let rows: Vec<Vec<f32>> = (0..8)
            .map(|i| {
                let i = i as f32;
                vec![10.0 * i, 5.0 * i, 4.0, 6.0, 0.1 * i, 0.9 - 0.1 * i]
            })
            .collect();
        let direct = tensor(vec![1, 8, 6], rows.concat());
        let flipped = transposed(&rows);
        assert_eq!(flipped.shape, vec![1, 6, 8]);

        let t = thresholds(0.25, 0.3);
        let a = decode(&direct, 2, &t).unwrap();
        let b = decode(&flipped, 2, &t).unwrap();
        assert!(!a.is_empty());
        assert_eq!(a, b);
    }

    #[test]
    fn wide_tensor_is_transposed() {
        let (_, shape) = normalize(&tensor(vec![1, 6, 8400], vec![0.0; 6 * 8400])).unwrap();
        assert!(shape.transposed);
        assert_eq!((shape.rows, shape.attributes), (8400, 6));
    }

    #[test]
    fn tie_decodes_rows_first() {
        let (_, shape) = normalize(&tensor(vec![6, 6], vec![0.0; 36])).unwrap();
        assert!(!shape.transposed);
    }

    #[test]
    fn layout_follows_attribute_count() {
        let shape = |attributes, transposed| DecodedShape {
            rows: 100,
            attributes,
            transposed,
        };
        assert_eq!(detect_layout(&shape(84, false), 80).unwrap(), Layout::ClassScores);
        assert_eq!(detect_layout(&shape(85, true), 80).unwrap(), Layout::Objectness);
        // More attributes than either layout: orientation decides
        assert_eq!(detect_layout(&shape(90, true), 80).unwrap(), Layout::ClassScores);
        assert_eq!(detect_layout(&shape(90, false), 80).unwrap(), Layout::Objectness);
        assert!(detect_layout(&shape(83, false), 80).is_err());
    }

    #[test]
    fn rejects_unexpected_rank() {
        let t = tensor(vec![2, 3, 4], vec![0.0; 24]);
        assert!(matches!(decode(&t, 1, &thresholds(0.1, 0.1)), Err(DetectError::Inference(_))));
    }

    #[test]
    fn argmax_prefers_first_maximum() {
        assert_eq!(argmax(&[0.2, 0.7, 0.7]), (1, 0.7));
    }

    proptest! {
        #[test]
        fn decoded_class_ids_are_in_range(
            scores in proptest::collection::vec(0.0f32..1.0, 3 * 12),
        ) {
            let data: Vec<f32> = scores
                .chunks(3)
                .flat_map(|s| [1.0, 1.0, 2.0, 2.0, s[0], s[1], s[2]])
                .collect();
            let t = tensor(vec![1, 12, 7], data);
            for c in decode(&t, 3, &thresholds(0.0, 0.0)).unwrap() {
                prop_assert!(c.class_id < 3);
                prop_assert!(c.confidence > 0.0);
            }
        }
    }
}
