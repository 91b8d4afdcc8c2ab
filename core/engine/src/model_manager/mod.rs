use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;

use crate::error::{EngineError, EngineResult};
use crate::onnx_utils::init_onnx_runtime;
use crate::proofread_t5::session::{InferenceSession, OnnxSession};
use crate::proofread_t5::tokenizer::T5Tokenizer;

/// Session construction seam. Production code goes through ONNX Runtime;
/// tests substitute scripted sessions.
pub trait SessionLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn InferenceSession>>;
}

pub struct OnnxSessionLoader;

impl SessionLoader for OnnxSessionLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn InferenceSession>> {
        init_onnx_runtime()?;
        Ok(Box::new(OnnxSession::from_file(path)?))
    }
}

/// Everything one request needs, held together so load and unload are atomic.
pub struct LoadedModel {
    pub encoder: Box<dyn InferenceSession>,
    pub decoder: Option<Box<dyn InferenceSession>>,
    pub tokenizer: T5Tokenizer,
}

struct HolderState {
    model: Option<LoadedModel>,
    /// Source paths the current model was built from, for idempotence.
    loaded_from: Option<(String, Option<String>)>,
}

/// Singleton-style holder for the loaded model pair.
///
/// Loading is idempotent for unchanged paths, replaces the model wholesale
/// for changed ones, and stages artifacts into a private directory first so
/// the runtime never maps caller-owned files directly.
pub struct ModelManager {
    loader: Arc<dyn SessionLoader>,
    cache_dir: PathBuf,
    state: Mutex<HolderState>,
    unload_task: Mutex<Option<JoinHandle<()>>>,
}

impl ModelManager {
    pub fn new(loader: Arc<dyn SessionLoader>, cache_dir: PathBuf) -> Self {
        Self {
            loader,
            cache_dir,
            state: Mutex::new(HolderState {
                model: None,
                loaded_from: None,
            }),
            unload_task: Mutex::new(None),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().unwrap().model.is_some()
    }

    /// Ensure the configured model pair is resident.
    ///
    /// A blank decoder path counts as absent. Tokenizer problems never fail
    /// the load; the codec degrades to its character fallback.
    pub fn load_models(
        &self,
        encoder_path: &str,
        decoder_path: Option<&str>,
        tokenizer_path: Option<&str>,
    ) -> EngineResult<()> {
        self.cancel_scheduled_unload();

        let decoder_path = decoder_path.filter(|p| !p.trim().is_empty());

        let mut state = self.state.lock().unwrap();
        let wanted = (
            encoder_path.to_string(),
            decoder_path.map(|p| p.to_string()),
        );
        if state.model.is_some() && state.loaded_from.as_ref() == Some(&wanted) {
            return Ok(());
        }

        // Paths changed: release the old pair before building the new one.
        state.model = None;
        state.loaded_from = None;

        fs::create_dir_all(&self.cache_dir)
            .map_err(|e| EngineError::load(format!("cannot create staging dir: {e}")))?;

        let staged_encoder = self.stage(Path::new(encoder_path), "encoder.onnx")?;
        let encoder = self
            .loader
            .load(&staged_encoder)
            .map_err(|e| EngineError::load(format!("encoder load failed: {e}")))?;

        let decoder = match decoder_path {
            Some(path) => {
                let staged = self.stage(Path::new(path), "decoder.onnx")?;
                Some(
                    self.loader
                        .load(&staged)
                        .map_err(|e| EngineError::load(format!("decoder load failed: {e}")))?,
                )
            }
            None => None,
        };

        let mut tokenizer = T5Tokenizer::new();
        if let Some(path) = tokenizer_path.filter(|p| !p.trim().is_empty()) {
            match self.stage(Path::new(path), "tokenizer.json") {
                Ok(staged) => {
                    tokenizer.load_vocab(&staged);
                }
                Err(e) => {
                    eprintln!("[ModelManager] tokenizer staging failed: {e}");
                }
            }
        }

        println!(
            "[ModelManager] models loaded (decoder: {})",
            decoder.is_some()
        );
        state.model = Some(LoadedModel {
            encoder,
            decoder,
            tokenizer,
        });
        state.loaded_from = Some(wanted);
        Ok(())
    }

    /// Copy one artifact into the staging directory, overwriting any stale
    /// copy from a previous configuration.
    fn stage(&self, source: &Path, staged_name: &str) -> EngineResult<PathBuf> {
        let target = self.cache_dir.join(staged_name);
        fs::copy(source, &target).map_err(|e| {
            EngineError::load(format!("cannot stage {}: {e}", source.display()))
        })?;
        Ok(target)
    }

    /// Drop all sessions. Safe when nothing is loaded.
    pub fn unload(&self) {
        let mut state = self.state.lock().unwrap();
        if state.model.take().is_some() {
            println!("[ModelManager] models unloaded");
        }
        state.loaded_from = None;
    }

    /// Run one request against the resident model under the holder lock.
    pub fn run_with_model<R>(
        &self,
        f: impl FnOnce(&mut LoadedModel) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let mut state = self.state.lock().unwrap();
        match state.model.as_mut() {
            Some(model) => f(model),
            None => Err(EngineError::configuration("no model loaded")),
        }
    }

    pub fn cancel_scheduled_unload(&self) {
        if let Some(handle) = self.unload_task.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Arm (or re-arm) the idle-unload timer. Each call supersedes the
    /// previous one, so only the latest deadline counts.
    pub fn schedule_idle_unload(self: &Arc<Self>, delay: Duration, keep_loaded: bool) {
        self.cancel_scheduled_unload();
        if keep_loaded {
            return;
        }

        let weak: Weak<ModelManager> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(manager) = weak.upgrade() {
                println!("[ModelManager] idle timeout reached");
                manager.unload();
            }
        });
        *self.unload_task.lock().unwrap() = Some(handle);
    }
}
