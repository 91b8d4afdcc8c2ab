use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::config_manager::{ConfigManager, EngineConfig};
use crate::error::{EngineError, EngineResult};
use crate::model_manager::ModelManager;
use crate::performance_logger::{InferenceLog, PerformanceLogger};
use crate::proofread_t5::decoder::run_decoder_loop;
use crate::proofread_t5::encoder::run_encoder;
use crate::proofread_t5::Proofreader;

/// Task prefix resolution, deferred until the current config is known.
enum PromptSource {
    Proofread(Option<String>),
    Translate,
}

impl PromptSource {
    fn resolve(&self, cfg: &EngineConfig) -> String {
        match self {
            Self::Proofread(Some(prompt)) => prompt.clone(),
            Self::Proofread(None) => cfg.system_prompt.clone(),
            Self::Translate => {
                format!("translate English to {}: ", cfg.target_language)
            }
        }
    }

    fn op(&self) -> &'static str {
        match self {
            Self::Proofread(_) => "proofread",
            Self::Translate => "translate",
        }
    }
}

struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(Arc::clone(flag))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Request orchestrator over the resident model pair.
///
/// Inference runs on the blocking pool; the async surface only sequences
/// config lookup, model residency, and the idle-unload timer around it.
pub struct ProofreadService {
    config: Arc<dyn ConfigManager>,
    manager: Arc<ModelManager>,
    busy: Arc<AtomicBool>,
    /// Cancel flag of the most recently started request. Each request owns
    /// its own flag; a new request swaps the pointer without touching the
    /// previous request's flag.
    current_cancel: Mutex<Arc<AtomicBool>>,
}

impl ProofreadService {
    pub fn new(config: Arc<dyn ConfigManager>, manager: Arc<ModelManager>) -> Self {
        Self {
            config,
            manager,
            busy: Arc::new(AtomicBool::new(false)),
            current_cancel: Mutex::new(Arc::new(AtomicBool::new(false))),
        }
    }

    /// Request that the in-flight decode stop at its next step boundary.
    pub fn cancel_current(&self) {
        self.current_cancel
            .lock()
            .unwrap()
            .store(true, Ordering::SeqCst);
    }

    async fn execute(&self, text: String, source: PromptSource) -> EngineResult<String> {
        let cfg = self.config.current().await?;
        let encoder_path = cfg
            .encoder_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| EngineError::configuration("no encoder model configured"))?
            .to_string();

        let _busy = BusyGuard::acquire(&self.busy);
        let cancel = Arc::new(AtomicBool::new(false));
        *self.current_cancel.lock().unwrap() = Arc::clone(&cancel);
        self.manager.cancel_scheduled_unload();

        let manager = Arc::clone(&self.manager);
        let cfg_for_task = cfg.clone();
        let handle = tokio::task::spawn_blocking(move || {
            run_request(&manager, &cancel, &cfg_for_task, &encoder_path, text, source)
        });
        let result = match handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(EngineError::Cancelled),
            Err(e) => Err(EngineError::inference(format!("inference task failed: {e}"))),
        };

        // The timer restarts after every request, successful or not.
        self.manager.schedule_idle_unload(
            Duration::from_millis(cfg.unload_delay_ms),
            cfg.keep_model_loaded,
        );

        result
    }
}

fn run_request(
    manager: &ModelManager,
    cancel: &AtomicBool,
    cfg: &EngineConfig,
    encoder_path: &str,
    text: String,
    source: PromptSource,
) -> EngineResult<String> {
    manager.load_models(
        encoder_path,
        cfg.decoder_path.as_deref(),
        cfg.tokenizer_path.as_deref(),
    )?;

    let prompt = source.resolve(cfg);
    let input = if prompt.trim().is_empty() {
        text.clone()
    } else {
        format!("{prompt}{text}")
    };

    let started = Instant::now();
    let mut encode_ms = 0u64;
    let mut steps = 0usize;

    let raw = manager.run_with_model(|model| {
        let ids = model.tokenizer.encode(&input, false);
        let eos = model.tokenizer.eos_token_id();

        let encode_start = Instant::now();
        let encoded = run_encoder(model.encoder.as_mut(), &ids)?;
        encode_ms = encode_start.elapsed().as_millis() as u64;

        match model.decoder.as_mut() {
            Some(decoder) => {
                let outcome = run_decoder_loop(
                    decoder.as_mut(),
                    &encoded,
                    eos,
                    cfg.max_generation_steps,
                    cancel,
                )?;
                steps = outcome.steps;
                // Skip the synthetic start token.
                Ok(model.tokenizer.decode(&outcome.token_ids[1..]))
            }
            None => {
                eprintln!("[ProofreadService] no decoder configured, returning input unchanged");
                Ok(text.clone())
            }
        }
    });

    let total_ms = started.elapsed().as_millis() as u64;
    let raw = match raw {
        Ok(raw) => raw,
        Err(e) => {
            let log = InferenceLog::new(
                source.op().to_string(),
                encode_ms,
                total_ms.saturating_sub(encode_ms),
                steps,
                total_ms,
                false,
            );
            PerformanceLogger::default().log(&log);
            return Err(e);
        }
    };

    let stripped = strip_echoed_prefix(&raw, &prompt);
    let output = if stripped.trim().is_empty() {
        text
    } else {
        stripped.to_string()
    };

    let log = InferenceLog::new(
        source.op().to_string(),
        encode_ms,
        total_ms.saturating_sub(encode_ms),
        steps,
        total_ms,
        true,
    )
    .with_lengths(input.chars().count(), output.chars().count());
    PerformanceLogger::default().log(&log);

    Ok(output)
}

/// Remove the task prefix when the model echoed it back, case-insensitively.
fn strip_echoed_prefix<'a>(output: &'a str, prompt: &str) -> &'a str {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return output;
    }

    let mut consumed = 0usize;
    let mut out_chars = output.chars();
    for pc in prompt.chars() {
        match out_chars.next() {
            Some(oc) if oc.to_lowercase().eq(pc.to_lowercase()) => consumed += oc.len_utf8(),
            _ => return output,
        }
    }
    output[consumed..].trim_start()
}

#[async_trait]
impl Proofreader for ProofreadService {
    async fn proofread(&self, text: &str, prompt_override: Option<&str>) -> EngineResult<String> {
        self.execute(
            text.to_string(),
            PromptSource::Proofread(prompt_override.map(|p| p.to_string())),
        )
        .await
    }

    async fn translate(&self, text: &str) -> EngineResult<String> {
        self.execute(text.to_string(), PromptSource::Translate).await
    }

    async fn unload(&self) {
        self.manager.cancel_scheduled_unload();
        self.manager.unload();
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}
