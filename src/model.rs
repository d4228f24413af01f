use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, str::FromStr};

use crate::error::{DetectError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    Onnx,
    Tflite,
}

impl ModelFormat {
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Onnx => "onnx",
            Self::Tflite => "tflite",
        }
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ModelFormat {
    type Err = DetectError;

    fn from_str(tag: &str) -> Result<Self> {
        match tag {
            "onnx" => Ok(Self::Onnx),
            "tflite" => Ok(Self::Tflite),
            other => Err(DetectError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Network input dimensions in pixels.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputSize {
    pub width: u32,
    pub height: u32,
}

impl InputSize {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(DetectError::invalid(format!(
                "declared input dimensions must be positive, got {width}x{height}"
            )));
        }
        Ok(Self { width, height })
    }
}

/// Identity of a loaded model; compared by value for cache hits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub path: PathBuf,
    pub format: ModelFormat,
    pub input_size: Option<InputSize>,
}

impl ModelDescriptor {
    pub fn new(path: impl Into<PathBuf>, format: ModelFormat) -> Self {
        Self {
            path: path.into(),
            format,
            input_size: None,
        }
    }

    pub fn with_input_size(mut self, size: InputSize) -> Self {
        self.input_size = Some(size);
        self
    }
}

/// Hardware execution mode chosen once per model load.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Acceleration {
    /// General accelerator path (OpenCL-class GPU).
    Gpu,
    /// Dedicated neural accelerator.
    Npu,
    Cpu,
}

/// Static facts about a loaded network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub input_count: usize,
    pub output_count: usize,
    pub output_names: Vec<String>,
}
