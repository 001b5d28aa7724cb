use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::utils::truncate_chars;

use super::{CallOptions, ChunkStream, InferenceError, InferenceProvider};

/// Token generation for locally hosted models.
///
/// The provider owns artifact discovery and the loaded-model cache; the
/// backend only turns a prompt into text for an already-loaded model.
#[async_trait]
pub trait LocalBackend: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        options: &CallOptions,
    ) -> Result<String, InferenceError>;
}

/// Deterministic backend for tests and demo deployments.
///
/// Scripted responses are drained per model first; unscripted calls echo a
/// stable digest of the prompt so callers get a repeatable answer.
#[derive(Default)]
pub struct FakeLocalBackend {
    scripted: Mutex<HashMap<String, Vec<String>>>,
}

impl FakeLocalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the given model; responses are returned in
    /// push order.
    pub fn push_response(&self, model: impl Into<String>, response: impl Into<String>) {
        let mut scripted = self.scripted.lock().expect("scripted responses poisoned");
        scripted
            .entry(model.into())
            .or_default()
            .push(response.into());
    }
}

#[async_trait]
impl LocalBackend for FakeLocalBackend {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        _options: &CallOptions,
    ) -> Result<String, InferenceError> {
        let mut scripted = self.scripted.lock().expect("scripted responses poisoned");
        if let Some(queue) = scripted.get_mut(model) {
            if !queue.is_empty() {
                return Ok(queue.remove(0));
            }
        }
        Ok(format!("[{model}] {}", truncate_chars(prompt, 120)))
    }
}

struct ModelCache {
    loaded: Vec<String>,
    max_loaded: usize,
}

impl ModelCache {
    /// Mark `model` most-recently-used, evicting the LRU entry when full.
    /// Returns the evicted model, if any.
    fn touch(&mut self, model: &str) -> Option<String> {
        if let Some(idx) = self.loaded.iter().position(|m| m == model) {
            let entry = self.loaded.remove(idx);
            self.loaded.push(entry);
            return None;
        }

        let evicted = if self.loaded.len() >= self.max_loaded {
            Some(self.loaded.remove(0))
        } else {
            None
        };
        self.loaded.push(model.to_string());
        evicted
    }

    fn unload(&mut self, model: &str) -> bool {
        match self.loaded.iter().position(|m| m == model) {
            Some(idx) => {
                self.loaded.remove(idx);
                true
            }
            None => false,
        }
    }
}

/// Local inference provider backed by on-disk model artifacts.
pub struct LocalProvider {
    model_dir: PathBuf,
    artifacts: HashMap<String, PathBuf>,
    backend: Box<dyn LocalBackend>,
    cache: Mutex<ModelCache>,
}

const DEFAULT_MAX_LOADED: usize = 2;

impl LocalProvider {
    /// Scan `model_dir` for model artifacts (`<name>.gguf`). A model is
    /// served only while its artifact is present.
    pub fn new(model_dir: impl Into<PathBuf>, backend: Box<dyn LocalBackend>) -> Self {
        let model_dir = model_dir.into();
        let artifacts = Self::scan_artifacts(&model_dir);
        Self {
            model_dir,
            artifacts,
            backend,
            cache: Mutex::new(ModelCache {
                loaded: Vec::new(),
                max_loaded: DEFAULT_MAX_LOADED,
            }),
        }
    }

    /// Provider with a fake backend and the given models pre-registered,
    /// bypassing the artifact scan. The standard substitute in tests.
    pub fn fake<S: Into<String>>(models: impl IntoIterator<Item = S>) -> (Self, std::sync::Arc<FakeLocalBackend>) {
        let backend = std::sync::Arc::new(FakeLocalBackend::new());
        let mut provider = Self::new(PathBuf::new(), Box::new(SharedBackend(backend.clone())));
        provider.artifacts = models
            .into_iter()
            .map(|m| (m.into(), PathBuf::new()))
            .collect();
        (provider, backend)
    }

    pub fn with_max_loaded(self, max_loaded: usize) -> Self {
        {
            let mut cache = self.cache.lock().expect("model cache poisoned");
            cache.max_loaded = max_loaded.max(1);
        }
        self
    }

    fn scan_artifacts(model_dir: &Path) -> HashMap<String, PathBuf> {
        let mut artifacts = HashMap::new();
        let Ok(entries) = std::fs::read_dir(model_dir) else {
            return artifacts;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("gguf") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    artifacts.insert(stem.to_string(), path.clone());
                }
            }
        }
        artifacts
    }

    /// Re-scan the model directory, picking up added or removed artifacts.
    pub fn refresh_artifacts(&mut self) {
        self.artifacts = Self::scan_artifacts(&self.model_dir);
    }

    pub fn loaded_models(&self) -> Vec<String> {
        self.cache.lock().expect("model cache poisoned").loaded.clone()
    }

    pub fn unload_model(&self, model: &str) -> bool {
        let unloaded = self.cache.lock().expect("model cache poisoned").unload(model);
        if unloaded {
            log::info!("Unloaded model {model}");
        }
        unloaded
    }

    fn ensure_loaded(&self, model: &str) -> Result<(), InferenceError> {
        if !self.artifacts.contains_key(model) {
            return Err(InferenceError::ModelNotFound(model.to_string()));
        }
        let evicted = self.cache.lock().expect("model cache poisoned").touch(model);
        if let Some(evicted) = evicted {
            log::info!("Evicted model {evicted} to load {model}");
        }
        Ok(())
    }
}

/// Adapter so a shared fake backend can also be handed out to tests.
struct SharedBackend(std::sync::Arc<FakeLocalBackend>);

#[async_trait]
impl LocalBackend for SharedBackend {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        options: &CallOptions,
    ) -> Result<String, InferenceError> {
        self.0.complete(model, prompt, options).await
    }
}

#[async_trait]
impl InferenceProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.artifacts.keys().cloned().collect();
        models.sort();
        models
    }

    fn is_available(&self) -> bool {
        !self.artifacts.is_empty()
    }

    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        options: &CallOptions,
    ) -> Result<String, InferenceError> {
        self.ensure_loaded(model)?;
        self.backend.complete(model, prompt, options).await
    }

    async fn stream(
        &self,
        prompt: &str,
        model: &str,
        options: &CallOptions,
    ) -> Result<ChunkStream, InferenceError> {
        self.ensure_loaded(model)?;
        let text = self.backend.complete(model, prompt, options).await?;

        let stream = async_stream::stream! {
            for chunk in text.split_inclusive(' ') {
                yield Ok(chunk.to_string());
            }
        };
        Ok(Box::pin(stream))
    }
}
