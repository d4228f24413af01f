use ort::session::Session;
use tracing::{debug, error, info, instrument};

use super::{
    check_output_size, load_error, missing_output, Backend, BackendFactory, OutputTensor,
};
use crate::config::DEFAULT_MAX_OUTPUT_ELEMENTS;
use crate::error::{DetectError, Result};
use crate::letterbox::Blob;
use crate::model::{ModelDescriptor, ModelFormat, ModelInfo};

/// Dedicated ONNX engine backed by ONNX Runtime.
#[derive(Debug, Clone)]
pub struct OrtEngine {
    intra_threads: Option<usize>,
    max_output_elements: usize,
}

impl Default for OrtEngine {
    fn default() -> Self {
        Self::new(None)
    }
}

impl OrtEngine {
    pub fn new(intra_threads: Option<usize>) -> Self {
        Self {
            intra_threads,
            max_output_elements: DEFAULT_MAX_OUTPUT_ELEMENTS,
        }
    }

    pub fn with_max_output_elements(mut self, limit: usize) -> Self {
        self.max_output_elements = limit;
        self
    }
}

impl BackendFactory for OrtEngine {
    #[instrument(skip(self), fields(path = %descriptor.path.display()))]
    fn load(&self, descriptor: &ModelDescriptor) -> Result<Box<dyn Backend>> {
        if descriptor.format != ModelFormat::Onnx {
            return Err(load_error(descriptor, "ONNX Runtime only loads onnx models"));
        }

        let mut builder = Session::builder().map_err(|e| ort_load_error(descriptor, e))?;
        if let Some(threads) = self.intra_threads {
            builder = builder
                .with_intra_threads(threads)
                .map_err(|e| ort_load_error(descriptor, e))?;
        }
        let session = builder
            .commit_from_file(&descriptor.path)
            .map_err(|e| ort_load_error(descriptor, e))?;

        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        if output_names.is_empty() {
            return Err(load_error(descriptor, "model has no outputs"));
        }
        let input_count = session.inputs.len();

        info!(inputs = input_count, outputs = output_names.len(), "ONNX Runtime session ready");

        Ok(Box::new(OrtBackend {
            session,
            input_count,
            output_names,
            max_output_elements: self.max_output_elements,
        }))
    }
}

pub struct OrtBackend {
    session: Session,
    input_count: usize,
    output_names: Vec<String>,
    max_output_elements: usize,
}

impl Backend for OrtBackend {
    fn forward(&mut self, blob: Blob) -> Result<Vec<OutputTensor>> {
        let input_value = ort::value::Tensor::from_array(blob.tensor).map_err(ort_run_error)?;
        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(ort_run_error)?;

        let mut tensors = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let value = outputs
                .get(name.as_str())
                .ok_or_else(|| missing_output(name))?;
            let (shape, data) = value.try_extract_tensor::<f32>().map_err(ort_run_error)?;

            let mut dims = Vec::with_capacity(shape.len());
            for &dim in shape.iter() {
                let dim = usize::try_from(dim).map_err(|_| {
                    DetectError::inference(format!("output {name} has negative dimension"))
                })?;
                dims.push(dim);
            }
            check_output_size(name, &dims, self.max_output_elements)?;
            debug!(output = %name, shape = ?dims, "Extracted output tensor");
            tensors.push(OutputTensor::new(name.clone(), dims, data.to_vec())?);
        }
        Ok(tensors)
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            input_count: self.input_count,
            output_count: self.output_names.len(),
            output_names: self.output_names.clone(),
        }
    }
}

// Log full engine errors internally, return a sanitized version externally
fn ort_load_error(descriptor: &ModelDescriptor, e: impl std::fmt::Display) -> DetectError {
    error!(error = %e, path = %descriptor.path.display(), "ONNX Runtime load error");
    load_error(descriptor, "ONNX Runtime could not build a session")
}

fn ort_run_error(e: impl std::fmt::Display) -> DetectError {
    error!(error = %e, "ONNX Runtime inference error");
    DetectError::inference("ONNX Runtime forward pass failed")
}
