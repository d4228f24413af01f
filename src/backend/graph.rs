use tract_onnx::prelude::*;
use tracing::{debug, error, info, instrument};

use super::{
    check_output_size, load_error, missing_output, Backend, BackendFactory, OutputTensor,
};
use crate::config::DEFAULT_MAX_OUTPUT_ELEMENTS;
use crate::error::{DetectError, Result};
use crate::letterbox::Blob;
use crate::model::{ModelDescriptor, ModelFormat, ModelInfo};

type Plan = RunnableModel<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// General graph engine (pure Rust, via tract); loads both onnx and tflite.
#[derive(Debug, Clone)]
pub struct GraphEngine {
    intra_threads: Option<usize>,
    max_output_elements: usize,
}

impl Default for GraphEngine {
    fn default() -> Self {
        Self::new(None)
    }
}

impl GraphEngine {
    /// tract runs single-threaded; the hint is accepted for symmetry with the
    /// ONNX Runtime engine and logged.
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

    fn build_plan(&self, descriptor: &ModelDescriptor) -> TractResult<Plan> {
        match descriptor.format {
            ModelFormat::Onnx => {
                let mut model = tract_onnx::onnx().model_for_path(&descriptor.path)?;
                if let Some(size) = descriptor.input_size {
                    model = model.with_input_fact(
                        0,
                        InferenceFact::dt_shape(
                            f32::datum_type(),
                            tvec![1, 3, size.height as usize, size.width as usize],
                        ),
                    )?;
                }
                model.into_optimized()?.into_runnable()
            }
            ModelFormat::Tflite => tract_tflite::tflite()
                .model_for_path(&descriptor.path)?
                .into_optimized()?
                .into_runnable(),
        }
    }
}

impl BackendFactory for GraphEngine {
    #[instrument(skip(self), fields(path = %descriptor.path.display(), format = %descriptor.format))]
    fn load(&self, descriptor: &ModelDescriptor) -> Result<Box<dyn Backend>> {
        if let Some(threads) = self.intra_threads {
            debug!(threads, "Graph engine ignores thread hint");
        }

        let plan = self.build_plan(descriptor).map_err(|e| {
            error!(error = %e, "Graph engine load error");
            load_error(descriptor, "graph engine could not build an execution plan")
        })?;

        let model = plan.model();
        let input_count = model.inputs.len();
        let output_names: Vec<String> = model
            .outputs
            .iter()
            .map(|outlet| model.node(outlet.node).name.clone())
            .collect();
        if output_names.is_empty() {
            return Err(load_error(descriptor, "model has no outputs"));
        }

        info!(inputs = input_count, outputs = output_names.len(), "Graph plan ready");

        Ok(Box::new(GraphBackend {
            plan,
            input_count,
            output_names,
            max_output_elements: self.max_output_elements,
        }))
    }
}

pub struct GraphBackend {
    plan: Plan,
    input_count: usize,
    output_names: Vec<String>,
    max_output_elements: usize,
}

impl Backend for GraphBackend {
    fn forward(&mut self, blob: Blob) -> Result<Vec<OutputTensor>> {
        let shape = blob.shape();
        let data: Vec<f32> = blob.tensor.iter().copied().collect();
        let input = Tensor::from_shape(&shape, &data).map_err(graph_run_error)?;

        let outputs = self.plan.run(tvec![input.into()]).map_err(graph_run_error)?;

        let mut tensors = Vec::with_capacity(outputs.len());
        for (i, name) in self.output_names.iter().enumerate() {
            let value = outputs.get(i).ok_or_else(|| missing_output(name))?;
            let view = value.to_array_view::<f32>().map_err(graph_run_error)?;
            let dims = view.shape().to_vec();
            check_output_size(name, &dims, self.max_output_elements)?;
            debug!(output = %name, shape = ?dims, "Extracted output tensor");
            tensors.push(OutputTensor::new(
                name.clone(),
                dims,
                view.iter().copied().collect(),
            )?);
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

fn graph_run_error(e: impl std::fmt::Display) -> DetectError {
    error!(error = %e, "Graph engine inference error");
    DetectError::inference("graph engine forward pass failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn garbage_model_file_fails_to_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"definitely not a protobuf graph").unwrap();

        let descriptor = ModelDescriptor::new(file.path(), ModelFormat::Onnx);
        let err = GraphEngine::default().load(&descriptor).err().unwrap();
        assert!(matches!(err, DetectError::ModelLoad { .. }));
    }

    #[test]
    fn missing_tflite_file_fails_to_load() {
        let descriptor = ModelDescriptor::new("/nonexistent/model.tflite", ModelFormat::Tflite);
        let err = GraphEngine::default().load(&descriptor).err().unwrap();
        assert!(err.to_string().contains("tflite"));
    }
}
