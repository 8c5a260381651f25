use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::detect::result::{ClassifiedDetection, SegmentationMask};
use crate::frame::CameraFrame;
use crate::geometry::NormalizedRect;

use super::backend::{InferenceBackend, InferenceCapability};

/// Thread-safe registry of inference backends.
///
/// Backends are wrapped in `Mutex` because the inference methods take `&mut self`.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<Mutex<dyn InferenceBackend>>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: InferenceBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        log::debug!("registered inference backend '{}'", name);
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_backend(&self) -> Option<Arc<Mutex<dyn InferenceBackend>>> {
        self.default_name
            .as_ref()
            .and_then(|name| self.backends.get(name).cloned())
    }

    /// Select a backend that supports the requested capability.
    ///
    /// Prefers the default backend when it supports the capability.
    pub fn backend_for_capability(
        &self,
        capability: InferenceCapability,
    ) -> Result<Arc<Mutex<dyn InferenceBackend>>> {
        if let Some(default_backend) = self.default_backend() {
            let supports = {
                let guard = default_backend
                    .lock()
                    .map_err(|_| anyhow!("default backend lock poisoned"))?;
                guard.supports(capability)
            };
            if supports {
                return Ok(default_backend);
            }
        }

        let mut names: Vec<&String> = self.backends.keys().collect();
        names.sort();
        for name in names {
            let backend = &self.backends[name];
            let supports = {
                let guard = backend
                    .lock()
                    .map_err(|_| anyhow!("backend lock poisoned"))?;
                guard.supports(capability)
            };
            if supports {
                return Ok(backend.clone());
            }
        }

        Err(anyhow!(
            "no registered backend supports capability {:?}",
            capability
        ))
    }

    /// Run object detection on the backend selected for that capability.
    pub fn detect_objects(&self, frame: &CameraFrame) -> Result<Vec<ClassifiedDetection>> {
        let backend = self.backend_for_capability(InferenceCapability::ObjectDetection)?;
        let mut guard = backend
            .lock()
            .map_err(|_| anyhow!("backend lock poisoned"))?;
        guard.detect_objects(frame)
    }

    /// Run segmentation on the backend selected for that capability.
    pub fn segment(
        &self,
        frame: &CameraFrame,
        region: Option<NormalizedRect>,
    ) -> Result<SegmentationMask> {
        let backend = self.backend_for_capability(InferenceCapability::Segmentation)?;
        let mut guard = backend
            .lock()
            .map_err(|_| anyhow!("backend lock poisoned"))?;
        guard.segment(frame, region)
    }

    /// Warm up every registered backend.
    pub fn warm_up_all(&self) -> Result<()> {
        for (name, backend) in &self.backends {
            let mut guard = backend
                .lock()
                .map_err(|_| anyhow!("backend '{}' lock poisoned", name))?;
            guard.warm_up()?;
        }
        Ok(())
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
