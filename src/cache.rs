//! Single-slot model cache.
//!
//! Holds at most one live backend. Loads, swaps and resets all happen inside
//! one exclusive region, so a caller never starts inference until the cache
//! has converged on its descriptor. Forward passes are serialized per model
//! because engines are not assumed reentrant.
//!
//! A swap tears the previous engine down before the next load starts: it waits
//! for any in-flight forward pass on the old model, then drops the backend.
//! Handles to the replaced model stay valid as values but fail on `forward`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use metrics::counter;
use tracing::{debug, info, instrument, warn};

use crate::backend::{
    select_acceleration, Backend, BackendFactory, DeviceProbe, EngineRegistry, OutputTensor,
    SystemProbe,
};
use crate::config::PipelineConfig;
use crate::error::{DetectError, Result};
use crate::letterbox::Blob;
use crate::model::{Acceleration, ModelDescriptor, ModelInfo};

/// Observable cache state. Loads run under the cache lock, so an in-progress
/// load is never observed from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheStatus {
    Unloaded,
    Loaded {
        descriptor: ModelDescriptor,
        acceleration: Acceleration,
    },
}

enum CacheState {
    Unloaded,
    Loading(ModelDescriptor),
    Loaded(Arc<LoadedModel>),
}

struct LoadedModel {
    descriptor: ModelDescriptor,
    acceleration: Acceleration,
    info: ModelInfo,
    /// `None` once the model has been torn down.
    backend: Mutex<Option<Box<dyn Backend>>>,
}

impl LoadedModel {
    fn lock_backend(&self) -> Result<MutexGuard<'_, Option<Box<dyn Backend>>>> {
        self.backend
            .lock()
            .map_err(|_| DetectError::inference("backend lock poisoned"))
    }

    /// Drops the engine, waiting for an in-flight forward pass to finish.
    fn teardown(&self) {
        let backend = self
            .backend
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(backend) = backend {
            drop(backend);
            info!(path = %self.descriptor.path.display(), "Model released");
        }
    }
}

/// Call-scoped access to the cached model. Exposes forward passes only; the
/// backend itself never leaves the cache.
#[derive(Clone)]
pub struct ModelHandle {
    model: Arc<LoadedModel>,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("descriptor", &self.model.descriptor)
            .field("acceleration", &self.model.acceleration)
            .finish()
    }
}

impl ModelHandle {
    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.model.descriptor
    }

    pub fn acceleration(&self) -> Acceleration {
        self.model.acceleration
    }

    pub fn info(&self) -> &ModelInfo {
        &self.model.info
    }

    /// Runs one forward pass.
    ///
    /// # Errors
    ///
    /// `InferenceFailure` if the engine fails, returns no outputs, or the
    /// model was replaced since this handle was issued. The cached model is
    /// left in place.
    pub fn forward(&self, blob: Blob) -> Result<Vec<OutputTensor>> {
        let mut backend = self.model.lock_backend()?;
        run_forward(&mut backend, blob)
    }
}

fn run_forward(backend: &mut Option<Box<dyn Backend>>, blob: Blob) -> Result<Vec<OutputTensor>> {
    let backend = backend
        .as_mut()
        .ok_or_else(|| DetectError::inference("model was replaced"))?;
    let outputs = backend.forward(blob)?;
    if outputs.is_empty() {
        return Err(DetectError::inference("model produced no output tensors"));
    }
    Ok(outputs)
}

pub struct ModelCache {
    factory: Box<dyn BackendFactory>,
    probe: Box<dyn DeviceProbe>,
    allow_gpu: bool,
    allow_npu: bool,
    state: Mutex<CacheState>,
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new(EngineRegistry::default())
    }
}

impl ModelCache {
    pub fn new(factory: impl BackendFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            probe: Box::new(SystemProbe),
            allow_gpu: true,
            allow_npu: true,
            state: Mutex::new(CacheState::Unloaded),
        }
    }

    /// Cache with the built-in engines, configured from `config`.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let registry = EngineRegistry::new(config.intra_threads)
            .with_max_output_elements(config.max_output_elements);
        Self::new(registry)
            .with_acceleration_policy(config.allow_gpu, config.allow_npu)
    }

    pub fn with_probe(mut self, probe: impl DeviceProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn with_acceleration_policy(mut self, allow_gpu: bool, allow_npu: bool) -> Self {
        self.allow_gpu = allow_gpu;
        self.allow_npu = allow_npu;
        self
    }

    /// Returns the cached model if it matches `descriptor`, loading it otherwise.
    ///
    /// # Errors
    ///
    /// `ModelLoadFailure` if the engine cannot build the model; the cache is
    /// then left unloaded so the next call retries from scratch.
    pub fn ensure_loaded(&self, descriptor: &ModelDescriptor) -> Result<ModelHandle> {
        let mut state = self.lock_state();
        let model = self.install(&mut state, descriptor)?;
        Ok(ModelHandle { model })
    }

    /// Ensures `descriptor` is loaded and runs one forward pass on it.
    ///
    /// The model's backend lock is taken before the cache lock is released,
    /// so a concurrent swap waits for this pass instead of tearing the model
    /// down underneath it.
    ///
    /// # Errors
    ///
    /// `ModelLoadFailure` as for [`ensure_loaded`](Self::ensure_loaded);
    /// `InferenceFailure` if the engine fails or returns no outputs.
    pub fn forward(&self, descriptor: &ModelDescriptor, blob: Blob) -> Result<Vec<OutputTensor>> {
        let mut state = self.lock_state();
        let model = self.install(&mut state, descriptor)?;
        let mut backend = model.lock_backend()?;
        drop(state);
        run_forward(&mut backend, blob)
    }

    #[instrument(skip(self, state), fields(path = %descriptor.path.display(), format = %descriptor.format))]
    fn install(
        &self,
        state: &mut CacheState,
        descriptor: &ModelDescriptor,
    ) -> Result<Arc<LoadedModel>> {
        if let CacheState::Loaded(model) = &*state {
            if model.descriptor == *descriptor {
                return Ok(Arc::clone(model));
            }
        }

        let previous = std::mem::replace(state, CacheState::Loading(descriptor.clone()));
        if let CacheState::Loaded(old) = previous {
            debug!(previous = %old.descriptor.path.display(), "Replacing cached model");
            old.teardown();
        }

        match self.load(descriptor) {
            Ok(model) => {
                let model = Arc::new(model);
                *state = CacheState::Loaded(Arc::clone(&model));
                Ok(model)
            }
            Err(e) => {
                *state = CacheState::Unloaded;
                Err(e)
            }
        }
    }

    fn load(&self, descriptor: &ModelDescriptor) -> Result<LoadedModel> {
        let start = Instant::now();
        let mut backend = self.factory.load(descriptor)?;
        counter!("framesight.model_loads").increment(1);

        let mut acceleration = select_acceleration(
            backend.as_ref(),
            descriptor.format,
            self.probe.as_ref(),
            self.allow_gpu,
            self.allow_npu,
        );
        if let Err(e) = backend.set_acceleration(acceleration) {
            warn!(error = %e, ?acceleration, "Acceleration target rejected, falling back to CPU");
            acceleration = Acceleration::Cpu;
        }

        let info = backend.info();
        info!(
            ?acceleration,
            outputs = info.output_count,
            load_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Model loaded"
        );

        Ok(LoadedModel {
            descriptor: descriptor.clone(),
            acceleration,
            info,
            backend: Mutex::new(Some(backend)),
        })
    }

    /// Drops the cached model, if any.
    pub fn reset(&self) {
        let mut state = self.lock_state();
        if let CacheState::Loaded(old) = std::mem::replace(&mut *state, CacheState::Unloaded) {
            debug!(path = %old.descriptor.path.display(), "Cache reset");
            old.teardown();
        }
    }

    /// Loads `descriptor` into the cache if needed and reports its static
    /// facts. A different cached model is replaced.
    ///
    /// # Errors
    ///
    /// `ModelLoadFailure` if the file cannot be loaded.
    pub fn inspect(&self, descriptor: &ModelDescriptor) -> Result<ModelInfo> {
        Ok(self.ensure_loaded(descriptor)?.info().clone())
    }

    pub fn status(&self) -> CacheStatus {
        match &*self.lock_state() {
            CacheState::Unloaded | CacheState::Loading(_) => CacheStatus::Unloaded,
            CacheState::Loaded(model) => CacheStatus::Loaded {
                descriptor: model.descriptor.clone(),
                acceleration: model.acceleration,
            },
        }
    }

    /// Static facts about the loaded model, if one is cached.
    pub fn info(&self) -> Option<ModelInfo> {
        match &*self.lock_state() {
            CacheState::Loaded(model) => Some(model.info.clone()),
            _ => None,
        }
    }

    /// A panic mid-load poisons the lock and strands the state in `Loading`;
    /// that half-built model is discarded.
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Model cache lock poisoned, recovering");
            poisoned.into_inner()
        });
        if matches!(*state, CacheState::Loading(_)) {
            *state = CacheState::Unloaded;
        }
        state
    }
}
