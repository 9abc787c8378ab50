use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::detection::domain::detection_failure::DetectionFailure;
use crate::detection::infrastructure::model_loader::{
    load_happy_detection_models_with, HappyModels, LoadOptions, ModelLoadError,
};
use crate::shared::config::{DetectionParams, ModelConfig};
use crate::shared::image::Image;

/// Holds the current generation of loaded cascades.
///
/// Loads can run in the background and replace the installed models at any
/// time. Every detection call snapshots one generation up front, so a
/// reload never mixes a face cascade from one generation with a smile
/// cascade from another.
pub struct ModelRegistry {
    state: Mutex<RegistryState>,
    ready: Condvar,
}

#[derive(Default)]
struct RegistryState {
    models: Option<Arc<HappyModels>>,
    generation: u64,
    /// Background loads still running.
    loading: usize,
    last_error: Option<String>,
}

impl ModelRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RegistryState::default()),
            ready: Condvar::new(),
        })
    }

    /// Installs `models` as the next generation and wakes any waiters.
    pub fn install(&self, models: HappyModels) -> u64 {
        let mut state = self.lock();
        let generation = Self::install_locked(&mut state, models);
        drop(state);
        self.ready.notify_all();
        log::info!("Installed detection models, generation {generation}");
        generation
    }

    fn install_locked(state: &mut RegistryState, models: HappyModels) -> u64 {
        state.models = Some(Arc::new(models));
        state.generation += 1;
        state.last_error = None;
        state.generation
    }

    /// 0 until the first install.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn is_ready(&self) -> bool {
        self.lock().models.is_some()
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// The installed models and their generation.
    pub fn current(&self) -> Result<(u64, Arc<HappyModels>), DetectionFailure> {
        let state = self.lock();
        state
            .models
            .clone()
            .map(|models| (state.generation, models))
            .ok_or(DetectionFailure::NotReady)
    }

    /// Loads models on a background thread and installs them on success.
    /// A failed load leaves the previous generation in place.
    pub fn spawn_load(self: &Arc<Self>, config: ModelConfig, options: LoadOptions) -> JoinHandle<()> {
        {
            let mut state = self.lock();
            state.loading += 1;
            state.last_error = None;
        }
        let registry = self.clone();
        thread::spawn(move || {
            let result = load_happy_detection_models_with(&config, &options);
            registry.finish_load(result);
        })
    }

    fn finish_load(&self, result: Result<HappyModels, ModelLoadError>) {
        let mut state = self.lock();
        state.loading = state.loading.saturating_sub(1);
        match result {
            Ok(models) => {
                let generation = Self::install_locked(&mut state, models);
                log::info!("Installed detection models, generation {generation}");
            }
            Err(e) => {
                log::warn!("Model load failed: {e}");
                state.last_error = Some(e.to_string());
            }
        }
        drop(state);
        self.ready.notify_all();
    }

    /// Blocks until a generation is installed, every background load has
    /// failed, or `timeout` elapses. Returns the installed generation.
    pub fn wait_ready(&self, timeout: Duration) -> Result<u64, DetectionFailure> {
        let guard = self.lock();
        let (state, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |s| {
                s.models.is_none() && (s.loading > 0 || s.last_error.is_none())
            })
            .unwrap_or_else(PoisonError::into_inner);
        if state.models.is_some() {
            Ok(state.generation)
        } else {
            Err(DetectionFailure::NotReady)
        }
    }

    /// Runs the happy policy against one snapshot of the installed models.
    pub fn classify(&self, image: &Image, params: &DetectionParams) -> Result<bool, DetectionFailure> {
        let (generation, models) = self.current()?;
        log::debug!("Classifying with model generation {generation}");
        let detector = models
            .detector(params)
            .map_err(|e| DetectionFailure::Locator(e.to_string()))?;
        detector.classify(image)
    }

    /// Fail-closed form of [`classify`](Self::classify).
    pub fn detect_happy(&self, image: &Image, params: &DetectionParams) -> bool {
        match self.classify(image, params) {
            Ok(happy) => happy,
            Err(e) => {
                log::warn!("Happy detection failed ({}): {e}", e.kind());
                false
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
