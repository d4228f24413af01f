// lib.rs - on-device object detection core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]

//! Single-frame object detection for mobile host runtimes.
//!
//! A frame is letterboxed into a square NCHW tensor, run through an ONNX or
//! TFLite network, decoded into per-row candidates, reduced by greedy
//! class-agnostic NMS and returned as [`Detection`] records. One model is
//! cached at a time; see [`ModelCache`].
//!
//! ```no_run
//! use framesight::{FramePipeline, FrameRequest, ModelDescriptor, ModelFormat, PixelType, Thresholds};
//!
//! let pipeline = FramePipeline::with_defaults();
//! let pixels = vec![0u8; 640 * 480 * 3];
//! let names = vec!["person".to_string(), "bicycle".to_string()];
//! let detections = pipeline.detect(&FrameRequest {
//!     width: 640,
//!     height: 480,
//!     channels: 3,
//!     pixel_type: PixelType::U8,
//!     pixels: &pixels,
//!     model: ModelDescriptor::new("/data/models/detector.onnx", ModelFormat::Onnx),
//!     thresholds: Thresholds::default(),
//!     class_names: &names,
//! })?;
//! # Ok::<(), framesight::DetectError>(())
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod decode;
pub mod detection;
pub mod entry;
pub mod error;
pub mod frame;
pub mod letterbox;
pub mod model;
pub mod nms;
pub mod pipeline;

pub use backend::{Backend, BackendFactory, DeviceProbe, EngineRegistry, OutputTensor};
pub use cache::{CacheStatus, ModelCache, ModelHandle};
pub use config::{BoxSpace, PipelineConfig, Thresholds};
pub use detection::{detections_to_json, Detection};
pub use entry::{process_frame, ArgValue};
pub use error::{DetectError, ErrorKind, Result};
pub use frame::{Image, PixelType};
pub use letterbox::{letterbox, Blob, LetterboxParams};
pub use model::{Acceleration, InputSize, ModelDescriptor, ModelFormat, ModelInfo};
pub use pipeline::{FramePipeline, FrameReport, FrameRequest};
