use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::cache::ModelCache;
use crate::config::{BoxSpace, PipelineConfig, Thresholds};
use crate::decode::{decode, DetectionCandidate};
use crate::detection::{build_detections, Detection};
use crate::error::{DetectError, Result};
use crate::frame::{Image, PixelType};
use crate::letterbox::letterbox;
use crate::model::ModelDescriptor;
use crate::nms::suppress;

/// Everything one frame-processing call needs.
#[derive(Debug, Clone)]
pub struct FrameRequest<'a> {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub pixel_type: PixelType,
    pub pixels: &'a [u8],
    pub model: ModelDescriptor,
    pub thresholds: Thresholds,
    pub class_names: &'a [String],
}

/// Detections plus per-stage accounting for one frame.
#[derive(Debug, Clone, Serialize)]
#[must_use]
pub struct FrameReport {
    pub detections: Vec<Detection>,
    /// Number of candidates before NMS
    pub candidates_before_nms: usize,
    /// True if candidates were truncated before NMS
    pub truncated: bool,
    pub preprocess_ms: f64,
    pub inference_ms: f64,
    pub postprocess_ms: f64,
}

/// The synchronous frame pipeline: letterbox, forward, decode, suppress, build.
///
/// # Thread Safety
///
/// `detect` may be called from several threads. Model loads and swaps are
/// serialized inside the cache; forward passes on one model are serialized
/// by its handle.
pub struct FramePipeline {
    cache: ModelCache,
    config: PipelineConfig,
}

impl FramePipeline {
    pub fn new(cache: ModelCache, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { cache, config })
    }

    /// Pipeline with the built-in engines and default configuration.
    pub fn with_defaults() -> Self {
        let config = PipelineConfig::default();
        Self {
            cache: ModelCache::from_config(&config),
            config,
        }
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs detection on one frame.
    ///
    /// # Errors
    ///
    /// See [`DetectError`]; argument errors are raised before any backend work.
    pub fn detect(&self, request: &FrameRequest<'_>) -> Result<Vec<Detection>> {
        Ok(self.detect_with_report(request)?.detections)
    }

    #[instrument(skip(self, request), fields(width = request.width, height = request.height, model = %request.model.path.display()))]
    pub fn detect_with_report(&self, request: &FrameRequest<'_>) -> Result<FrameReport> {
        counter!("framesight.frames").increment(1);
        let result = self.run(request);
        if let Err(e) = &result {
            counter!("framesight.frame_errors", "kind" => e.kind().code()).increment(1);
            warn!(error = %e, "Frame processing failed");
        }
        result
    }

    fn run(&self, request: &FrameRequest<'_>) -> Result<FrameReport> {
        let thresholds = request.thresholds.clamped()?;
        if request.class_names.is_empty() {
            return Err(DetectError::invalid("class name table must not be empty"));
        }

        // Preprocessing
        let preprocess_start = Instant::now();
        let image = Image::from_raw(
            request.width,
            request.height,
            request.channels,
            request.pixel_type,
            request.pixels,
        )?;
        let (blob, params) = letterbox(&image, request.model.input_size, &self.config)?;
        drop(image);
        let preprocess_ms = elapsed_ms(preprocess_start);

        // Inference
        let inference_start = Instant::now();
        let outputs = self.cache.forward(&request.model, blob)?;
        let inference_ms = elapsed_ms(inference_start);

        // Postprocessing
        let postprocess_start = Instant::now();
        let output = &outputs[0];
        // Built-in engines check before copying; this covers injected backends
        if output.data.len() > self.config.max_output_elements {
            return Err(DetectError::inference(format!(
                "output {} has {} elements (max {})",
                output.name,
                output.data.len(),
                self.config.max_output_elements
            )));
        }

        let mut candidates = decode(output, request.class_names.len(), &thresholds)?;
        let candidates_before_nms = candidates.len();
        let truncated = truncate_candidates(&mut candidates, self.config.max_nms_inputs);

        let keep = suppress(&candidates, thresholds.score, thresholds.nms);
        let mut detections = build_detections(&candidates, &keep, request.class_names);
        if self.config.box_space == BoxSpace::Source {
            for detection in &mut detections {
                detection.bbox = params.to_source(detection.bbox);
            }
        }
        let postprocess_ms = elapsed_ms(postprocess_start);

        histogram!("framesight.preprocess_ms").record(preprocess_ms);
        histogram!("framesight.inference_ms").record(inference_ms);
        histogram!("framesight.postprocess_ms").record(postprocess_ms);

        debug!(
            detections = detections.len(),
            candidates_before_nms,
            truncated,
            preprocess_ms,
            inference_ms,
            postprocess_ms,
            "Detection completed"
        );

        Ok(FrameReport {
            detections,
            candidates_before_nms,
            truncated,
            preprocess_ms,
            inference_ms,
            postprocess_ms,
        })
    }
}

/// Keeps the `limit` most confident candidates. Returns whether any were cut.
fn truncate_candidates(candidates: &mut Vec<DetectionCandidate>, limit: usize) -> bool {
    if candidates.len() <= limit {
        return false;
    }
    warn!(original = candidates.len(), limit, "NMS input truncated");
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    candidates.truncate(limit);
    true
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
