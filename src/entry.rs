//! Positional entry point for host-runtime adapters.
//!
//! Argument order:
//!
//! | # | value |
//! |---|-------|
//! | 0 | image height |
//! | 1 | image width |
//! | 2 | channel count (1, 3 or 4) |
//! | 3 | pixel buffer (`Bytes` for 8-bit, `Floats` for normalized `f32`) |
//! | 4 | model file path |
//! | 5 | confidence threshold |
//! | 6 | NMS/IoU threshold |
//! | 7 | score threshold |
//! | 8 | class-name table |
//! | 9 | model format tag |
//! | 10 | declared input width (optional) |
//! | 11 | declared input height (optional, defaults to the width) |

use std::borrow::Cow;

use crate::config::Thresholds;
use crate::detection::Detection;
use crate::error::{DetectError, Result};
use crate::frame::PixelType;
use crate::model::{InputSize, ModelDescriptor, ModelFormat};
use crate::pipeline::{FramePipeline, FrameRequest};

const MIN_ARGS: usize = 10;
const MAX_ARGS: usize = 12;

/// A host value as marshalled by the runtime adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Undefined,
    Bool(bool),
    Number(f64),
    String(String),
    Bytes(Vec<u8>),
    Floats(Vec<f32>),
    List(Vec<ArgValue>),
}

impl ArgValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Bytes(_) => "byte array",
            Self::Floats(_) => "float array",
            Self::List(_) => "array",
        }
    }
}

impl From<&serde_json::Value> for ArgValue {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Undefined,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => n.as_f64().map_or(Self::Undefined, Self::Number),
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => Self::List(items.iter().map(Self::from).collect()),
            Value::Object(_) => Self::Undefined,
        }
    }
}

/// Validated, owned form of the positional arguments.
#[derive(Debug, Clone)]
pub struct FrameArgs<'a> {
    pub height: u32,
    pub width: u32,
    pub channels: u8,
    pub pixel_type: PixelType,
    pub pixels: Cow<'a, [u8]>,
    pub model: ModelDescriptor,
    pub thresholds: Thresholds,
    pub class_names: Vec<String>,
}

impl FrameArgs<'_> {
    pub fn request(&self) -> FrameRequest<'_> {
        FrameRequest {
            width: self.width,
            height: self.height,
            channels: self.channels,
            pixel_type: self.pixel_type,
            pixels: &self.pixels,
            model: self.model.clone(),
            thresholds: self.thresholds,
            class_names: &self.class_names,
        }
    }
}

/// Validates positional arguments without touching any model.
pub fn parse_args(args: &[ArgValue]) -> Result<FrameArgs<'_>> {
    if !(MIN_ARGS..=MAX_ARGS).contains(&args.len()) {
        return Err(DetectError::invalid(format!(
            "expected {MIN_ARGS} to {MAX_ARGS} arguments, received {}",
            args.len()
        )));
    }

    let height = positive_int(&args[0], "image height")?;
    let width = positive_int(&args[1], "image width")?;
    let channels = positive_int(&args[2], "channel count")?;
    let channels = u8::try_from(channels)
        .ok()
        .filter(|c| matches!(c, 1 | 3 | 4))
        .ok_or_else(|| {
            DetectError::invalid(format!("channel count must be 1, 3 or 4, got {channels}"))
        })?;
    let (pixel_type, pixels) = pixel_buffer(&args[3])?;

    let path = string(&args[4], "model path")?;
    if path.is_empty() {
        return Err(DetectError::invalid("model path is empty"));
    }
    let thresholds = Thresholds::new(
        number(&args[5], "confidence threshold")? as f32,
        number(&args[7], "score threshold")? as f32,
        number(&args[6], "nms threshold")? as f32,
    );
    let class_names = class_table(&args[8])?;
    let format: ModelFormat = string(&args[9], "model format")?.parse()?;

    let mut model = ModelDescriptor::new(path, format);
    match args.get(10) {
        None | Some(ArgValue::Undefined) => {
            if !matches!(args.get(11), None | Some(ArgValue::Undefined)) {
                return Err(DetectError::invalid(
                    "input height given without an input width",
                ));
            }
        }
        Some(w) => {
            let input_width = positive_int(w, "input width")?;
            let input_height = match args.get(11) {
                None | Some(ArgValue::Undefined) => input_width,
                Some(h) => positive_int(h, "input height")?,
            };
            model = model.with_input_size(InputSize::new(input_width, input_height)?);
        }
    }

    Ok(FrameArgs {
        height,
        width,
        channels,
        pixel_type,
        pixels,
        model,
        thresholds,
        class_names,
    })
}

/// Parses positional arguments and runs the pipeline.
pub fn process_frame(pipeline: &FramePipeline, args: &[ArgValue]) -> Result<Vec<Detection>> {
    let parsed = parse_args(args)?;
    pipeline.detect(&parsed.request())
}

fn number(value: &ArgValue, name: &str) -> Result<f64> {
    match value {
        ArgValue::Number(n) if n.is_finite() => Ok(*n),
        other => Err(DetectError::invalid(format!(
            "{name} must be a finite number, got {}",
            other.type_name()
        ))),
    }
}

fn positive_int(value: &ArgValue, name: &str) -> Result<u32> {
    let n = number(value, name)?;
    if n.fract() != 0.0 || n < 1.0 || n > u32::MAX as f64 {
        return Err(DetectError::invalid(format!(
            "{name} must be a positive integer, got {n}"
        )));
    }
    Ok(n as u32)
}

fn string<'a>(value: &'a ArgValue, name: &str) -> Result<&'a str> {
    match value {
        ArgValue::String(s) => Ok(s),
        other => Err(DetectError::invalid(format!(
            "{name} must be a string, got {}",
            other.type_name()
        ))),
    }
}

fn pixel_buffer(value: &ArgValue) -> Result<(PixelType, Cow<'_, [u8]>)> {
    match value {
        ArgValue::Bytes(bytes) => Ok((PixelType::U8, Cow::Borrowed(bytes.as_slice()))),
        ArgValue::Floats(floats) => Ok((
            PixelType::F32,
            Cow::Owned(floats.iter().flat_map(|v| v.to_le_bytes()).collect()),
        )),
        ArgValue::List(items) => items
            .iter()
            .map(|item| match item {
                ArgValue::Number(n) if n.fract() == 0.0 && (0.0..=255.0).contains(n) => {
                    Ok(*n as u8)
                }
                _ => Err(DetectError::invalid("pixel list must contain bytes")),
            })
            .collect::<Result<Vec<u8>>>()
            .map(|bytes| (PixelType::U8, Cow::Owned(bytes))),
        other => Err(DetectError::invalid(format!(
            "pixel buffer must be a byte array, got {}",
            other.type_name()
        ))),
    }
}

fn class_table(value: &ArgValue) -> Result<Vec<String>> {
    let ArgValue::List(items) = value else {
        return Err(DetectError::invalid(format!(
            "class names must be an array, got {}",
            value.type_name()
        )));
    };
    if items.is_empty() {
        return Err(DetectError::invalid("class names array cannot be empty"));
    }
    items
        .iter()
        .map(|item| match item {
            ArgValue::String(s) => Ok(s.clone()),
            _ => Err(DetectError::invalid(
                "class names array must contain only strings",
            )),
        })
        .collect()
}
