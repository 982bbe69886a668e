use crate::engine::{spawn_engine, Detector, EngineHandle};
use emoscope_core::{load_analyzer, BundleNames, ModelLoadError};
use std::future::Future;
use std::path::PathBuf;

/// Source of a ready detector. One call is one load attempt.
pub trait ModelProvider {
    type Detector: Detector;

    fn load(&self) -> impl Future<Output = Result<Self::Detector, ModelLoadError>>;
}

/// ONNX bundles from a local directory, served by an engine thread.
#[derive(Debug, Clone)]
pub struct OnnxModels {
    base_dir: PathBuf,
    names: BundleNames,
}

impl OnnxModels {
    pub fn new(base_dir: PathBuf, names: BundleNames) -> Self {
        Self { base_dir, names }
    }
}

impl ModelProvider for OnnxModels {
    type Detector = EngineHandle;

    async fn load(&self) -> Result<EngineHandle, ModelLoadError> {
        let base_dir = self.base_dir.clone();
        let names = self.names.clone();
        tracing::info!(base_dir = %base_dir.display(), detector = %names.detector, expression = %names.expression, "loading models");

        let analyzer = tokio::task::spawn_blocking(move || load_analyzer(&base_dir, &names))
            .await
            .map_err(|e| ModelLoadError::Worker(e.to_string()))??;

        spawn_engine(analyzer).map_err(|e| ModelLoadError::Worker(format!("failed to spawn engine thread: {e}")))
    }
}
