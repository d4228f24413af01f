//! Pluggable network-execution engines.
//!
//! An engine is a capability set: [`BackendFactory::load`] turns a
//! [`ModelDescriptor`] into a live [`Backend`], and [`Backend::forward`] runs
//! one pass. Concrete engines are picked by format tag in [`EngineRegistry`].

#[cfg(feature = "graph")]
mod graph;
#[cfg(feature = "onnxruntime")]
mod onnxruntime;

#[cfg(feature = "graph")]
pub use self::graph::{GraphBackend, GraphEngine};
#[cfg(feature = "onnxruntime")]
pub use self::onnxruntime::{OrtBackend, OrtEngine};

use tracing::warn;

use crate::config::DEFAULT_MAX_OUTPUT_ELEMENTS;
use crate::error::{DetectError, Result};
use crate::letterbox::Blob;
use crate::model::{Acceleration, ModelDescriptor, ModelFormat, ModelInfo};

/// One named output of a forward pass, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl OutputTensor {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(DetectError::inference(format!(
                "output shape {shape:?} needs {expected} values, got {}",
                data.len()
            )));
        }
        Ok(Self {
            name: name.into(),
            shape,
            data,
        })
    }
}

/// A loaded network. Implementations need not be reentrant; callers hold
/// exclusive access for the duration of `forward`.
pub trait Backend: Send {
    fn forward(&mut self, blob: Blob) -> Result<Vec<OutputTensor>>;

    fn info(&self) -> ModelInfo;

    /// Whether this engine can execute on `target`.
    fn supports(&self, target: Acceleration) -> bool {
        target == Acceleration::Cpu
    }

    /// Pins execution to `target`; only called with supported targets.
    fn set_acceleration(&mut self, _target: Acceleration) -> Result<()> {
        Ok(())
    }
}

/// Constructs backends; the model cache owns one of these.
pub trait BackendFactory: Send + Sync {
    fn load(&self, descriptor: &ModelDescriptor) -> Result<Box<dyn Backend>>;
}

/// Probe for hardware execution paths available on this device.
pub trait DeviceProbe: Send + Sync {
    fn has_gpu(&self) -> bool;
    fn has_npu(&self) -> bool;
}

/// Probe for the running platform. No portable OpenCL query exists here, so
/// the GPU path is reported unavailable; NPU means Android NNAPI.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl DeviceProbe for SystemProbe {
    fn has_gpu(&self) -> bool {
        false
    }

    fn has_npu(&self) -> bool {
        cfg!(target_os = "android")
    }
}

/// Fixed answers, for hosts that probe themselves and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticProbe {
    pub gpu: bool,
    pub npu: bool,
}

impl DeviceProbe for StaticProbe {
    fn has_gpu(&self) -> bool {
        self.gpu
    }

    fn has_npu(&self) -> bool {
        self.npu
    }
}

/// Picks the execution target: GPU, then NPU (tflite only), then CPU.
pub fn select_acceleration(
    backend: &dyn Backend,
    format: ModelFormat,
    probe: &dyn DeviceProbe,
    allow_gpu: bool,
    allow_npu: bool,
) -> Acceleration {
    if allow_gpu && probe.has_gpu() && backend.supports(Acceleration::Gpu) {
        return Acceleration::Gpu;
    }
    if allow_npu
        && format == ModelFormat::Tflite
        && probe.has_npu()
        && backend.supports(Acceleration::Npu)
    {
        return Acceleration::Npu;
    }
    Acceleration::Cpu
}

/// Default factory: routes each format tag to a compiled-in engine.
///
/// `onnx` prefers the dedicated ONNX Runtime engine and falls back to the
/// graph engine; `tflite` always uses the graph engine.
#[derive(Debug, Clone)]
pub struct EngineRegistry {
    intra_threads: Option<usize>,
    max_output_elements: usize,
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl EngineRegistry {
    pub fn new(intra_threads: Option<usize>) -> Self {
        Self {
            intra_threads,
            max_output_elements: DEFAULT_MAX_OUTPUT_ELEMENTS,
        }
    }

    /// Caps the element count an engine copies out of one output tensor.
    pub fn with_max_output_elements(mut self, limit: usize) -> Self {
        self.max_output_elements = limit;
        self
    }
}

impl BackendFactory for EngineRegistry {
    fn load(&self, descriptor: &ModelDescriptor) -> Result<Box<dyn Backend>> {
        match descriptor.format {
            #[cfg(feature = "onnxruntime")]
            ModelFormat::Onnx => OrtEngine::new(self.intra_threads)
                .with_max_output_elements(self.max_output_elements)
                .load(descriptor),
            #[cfg(all(feature = "graph", not(feature = "onnxruntime")))]
            ModelFormat::Onnx => GraphEngine::new(self.intra_threads)
                .with_max_output_elements(self.max_output_elements)
                .load(descriptor),
            #[cfg(feature = "graph")]
            ModelFormat::Tflite => GraphEngine::new(self.intra_threads)
                .with_max_output_elements(self.max_output_elements)
                .load(descriptor),
            #[allow(unreachable_patterns)]
            _ => Err(load_error(descriptor, "no engine for this format was compiled in")),
        }
    }
}

/// Rejects an output whose element count exceeds `limit`, before any copy.
pub(crate) fn check_output_size(name: &str, dims: &[usize], limit: usize) -> Result<()> {
    let elements = dims
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .filter(|&n| n <= limit);
    match elements {
        Some(_) => Ok(()),
        None => Err(DetectError::inference(format!(
            "output {name} with shape {dims:?} exceeds {limit} elements"
        ))),
    }
}

/// A declared output absent from the run results.
pub(crate) fn missing_output(name: &str) -> DetectError {
    warn!(output = %name, "Declared output missing from forward pass");
    DetectError::inference(format!("output {name} missing from forward pass"))
}

pub(crate) fn load_error(descriptor: &ModelDescriptor, reason: impl std::fmt::Display) -> DetectError {
    DetectError::ModelLoad {
        path: descriptor.path.display().to_string(),
        format: descriptor.format.to_string(),
        reason: reason.to_string(),
    }
}
