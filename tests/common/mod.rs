#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use framesight::{
    Backend, BackendFactory, Blob, DetectError, ModelCache, ModelDescriptor, ModelInfo,
    OutputTensor, PipelineConfig, FramePipeline, Result,
};

pub const ROWS: usize = 8400;

/// Shared observations from a stub engine.
#[derive(Default)]
pub struct Probe {
    pub loads: AtomicUsize,
    pub drops: AtomicUsize,
    pub forwards: AtomicUsize,
    pub last_blob_shape: Mutex<Option<[usize; 4]>>,
}

impl Probe {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn drops(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }

    pub fn forwards(&self) -> usize {
        self.forwards.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub enum Script {
    Output(OutputTensor),
    FailForward,
    FailLoad,
}

pub struct StubBackend {
    probe: Arc<Probe>,
    script: Script,
}

impl Drop for StubBackend {
    fn drop(&mut self) {
        self.probe.drops.fetch_add(1, Ordering::SeqCst);
    }
}

impl Backend for StubBackend {
    fn forward(&mut self, blob: Blob) -> Result<Vec<OutputTensor>> {
        self.probe.forwards.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut shape) = self.probe.last_blob_shape.lock() {
            *shape = Some(blob.shape());
        }
        match &self.script {
            Script::Output(out) => Ok(vec![out.clone()]),
            _ => Err(DetectError::inference("stub forward failure")),
        }
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            input_count: 1,
            output_count: 1,
            output_names: vec!["output0".to_string()],
        }
    }
}

pub struct StubFactory {
    pub probe: Arc<Probe>,
    pub script: Script,
}

impl BackendFactory for StubFactory {
    fn load(&self, descriptor: &ModelDescriptor) -> Result<Box<dyn Backend>> {
        self.probe.loads.fetch_add(1, Ordering::SeqCst);
        if matches!(self.script, Script::FailLoad) {
            return Err(DetectError::ModelLoad {
                path: descriptor.path.display().to_string(),
                format: descriptor.format.to_string(),
                reason: "stub load failure".to_string(),
            });
        }
        Ok(Box::new(StubBackend {
            probe: Arc::clone(&self.probe),
            script: self.script.clone(),
        }))
    }
}

pub fn pipeline_with(script: Script, config: PipelineConfig) -> (FramePipeline, Arc<Probe>) {
    let probe = Arc::new(Probe::default());
    let factory = StubFactory {
        probe: Arc::clone(&probe),
        script,
    };
    let pipeline = FramePipeline::new(ModelCache::new(factory), config)
        .expect("default config is valid");
    (pipeline, probe)
}

pub fn pipeline(script: Script) -> (FramePipeline, Arc<Probe>) {
    pipeline_with(script, PipelineConfig::default())
}

/// One box at `(cx, cy, w, h)` with its class scores, attribute-major.
pub struct Row {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
    pub scores: Vec<f32>,
}

/// Builds a `[1, 4 + C, ROWS]` class-score output; unlisted rows are zero.
pub fn transposed_output(class_count: usize, rows: &[Row]) -> OutputTensor {
    let attrs = 4 + class_count;
    let mut data = vec![0.0f32; attrs * ROWS];
    for (r, row) in rows.iter().enumerate() {
        let values = [row.cx, row.cy, row.w, row.h]
            .into_iter()
            .chain(row.scores.iter().copied());
        for (a, v) in values.enumerate() {
            data[a * ROWS + r] = v;
        }
    }
    OutputTensor::new("output0", vec![1, attrs, ROWS], data).expect("shape matches data")
}

/// A dominant class-1 box plus nine lower-confidence near-duplicates.
pub fn clustered_output() -> OutputTensor {
    let mut rows = vec![Row {
        cx: 320.0,
        cy: 320.0,
        w: 100.0,
        h: 80.0,
        scores: vec![0.05, 0.92],
    }];
    for i in 1..10 {
        let shift = i as f32;
        rows.push(Row {
            cx: 320.0 + shift,
            cy: 320.0 - shift,
            w: 100.0,
            h: 80.0,
            scores: vec![0.02, 0.9 - shift * 0.05],
        });
    }
    transposed_output(2, &rows)
}

pub fn class_names() -> Vec<String> {
    vec!["person".to_string(), "bicycle".to_string()]
}

pub fn frame(width: u32, height: u32, channels: u8) -> Vec<u8> {
    vec![127u8; width as usize * height as usize * channels as usize]
}
