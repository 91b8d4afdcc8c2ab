#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use ndarray::{ArrayD, IxDyn};

use proofread_engine::model_manager::SessionLoader;
use proofread_engine::proofread_t5::session::{InferenceSession, TensorData, TensorHandle};

/// Rendezvous for holding a decoder inside its first step: the stub signals
/// `entered` and then blocks until `release` fires.
pub struct PauseGate {
    pub entered: std::sync::mpsc::Sender<()>,
    pub release: std::sync::mpsc::Receiver<()>,
}

/// What one decoder invocation received, captured for assertions.
#[derive(Debug, Clone)]
pub struct RecordedStep {
    pub fed_inputs: Vec<String>,
    pub ids: Vec<i64>,
    pub use_cache_flag: Option<bool>,
    /// Sequence length (dim 2) of every cache input fed this step.
    pub cache_lens: Vec<(String, usize)>,
}

/// Decoder stand-in that emits a prescripted token per step and fabricates
/// cache outputs matching its declared convention.
pub struct ScriptedDecoder {
    input_names: Vec<String>,
    output_names: Vec<String>,
    input_dims: Vec<(String, Vec<i64>)>,
    cache_slots: Vec<String>,
    script: Vec<i64>,
    vocab: usize,
    num_heads: usize,
    head_dim: usize,
    step: usize,
    pub recorded: Vec<RecordedStep>,
    pub tracker: Option<Arc<AtomicI64>>,
    /// Set this flag once the given step index has run.
    pub cancel_after: Option<(usize, Arc<AtomicBool>)>,
    pub pause_on_first_run: Option<PauseGate>,
}

impl ScriptedDecoder {
    /// No cache inputs: the full prefix must arrive every step.
    pub fn stateless(script: Vec<i64>, vocab: usize) -> Self {
        Self::build(script, vocab, 0, false, 8, 64, None)
    }

    /// Separate past-key-value inputs for `layers` decoder layers.
    pub fn cached(script: Vec<i64>, vocab: usize, layers: usize) -> Self {
        Self::build(script, vocab, layers, false, 8, 64, None)
    }

    /// Cached plus the `use_cache_branch` selector.
    pub fn merged(script: Vec<i64>, vocab: usize, layers: usize) -> Self {
        Self::build(script, vocab, layers, true, 8, 64, None)
    }

    /// Cached, with a fixed head count declared in the graph metadata.
    pub fn cached_with_declared_heads(
        script: Vec<i64>,
        vocab: usize,
        layers: usize,
        num_heads: usize,
        head_dim: usize,
    ) -> Self {
        Self::build(script, vocab, layers, false, num_heads, head_dim, Some(num_heads))
    }

    fn build(
        script: Vec<i64>,
        vocab: usize,
        layers: usize,
        merged: bool,
        num_heads: usize,
        head_dim: usize,
        declared_heads: Option<usize>,
    ) -> Self {
        let mut input_names = vec![
            "input_ids".to_string(),
            "encoder_attention_mask".to_string(),
            "encoder_hidden_states".to_string(),
        ];
        let mut cache_slots = Vec::new();
        for layer in 0..layers {
            for kind in ["decoder.key", "decoder.value", "encoder.key", "encoder.value"] {
                cache_slots.push(format!("past_key_values.{layer}.{kind}"));
            }
        }
        input_names.extend(cache_slots.iter().cloned());
        if merged {
            input_names.push("use_cache_branch".to_string());
        }

        let heads_dim = declared_heads.map(|h| h as i64).unwrap_or(-1);
        let input_dims = cache_slots
            .iter()
            .map(|name| (name.clone(), vec![-1, heads_dim, -1, head_dim as i64]))
            .collect();

        let mut output_names = vec!["logits".to_string()];
        for slot in &cache_slots {
            output_names.push(slot.replacen("past_key_values", "present", 1));
        }

        Self {
            input_names,
            output_names,
            input_dims,
            cache_slots,
            script,
            vocab,
            num_heads,
            head_dim,
            step: 0,
            recorded: Vec::new(),
            tracker: None,
            cancel_after: None,
            pause_on_first_run: None,
        }
    }

    fn make_handle(&self, data: TensorData) -> TensorHandle {
        match &self.tracker {
            Some(tracker) => TensorHandle::tracked(data, Arc::clone(tracker)),
            None => TensorHandle::new(data),
        }
    }

    /// Token this step's logits peak at; EOS once the script is exhausted.
    fn scripted_token(&self) -> i64 {
        self.script.get(self.step).copied().unwrap_or(1)
    }
}

impl InferenceSession for ScriptedDecoder {
    fn input_names(&self) -> &[String] {
        &self.input_names
    }

    fn output_names(&self) -> &[String] {
        &self.output_names
    }

    fn input_dims(&self, name: &str) -> Option<&[i64]> {
        self.input_dims
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, dims)| dims.as_slice())
    }

    fn run(&mut self, inputs: &[(&str, &TensorHandle)]) -> Result<Vec<(String, TensorHandle)>> {
        if self.step == 0 {
            if let Some(gate) = self.pause_on_first_run.take() {
                let _ = gate.entered.send(());
                let _ = gate.release.recv();
            }
        }

        let mut record = RecordedStep {
            fed_inputs: inputs.iter().map(|(n, _)| n.to_string()).collect(),
            ids: Vec::new(),
            use_cache_flag: None,
            cache_lens: Vec::new(),
        };
        let mut ids_len = 1usize;
        for (name, handle) in inputs {
            if *name == "input_ids" {
                let ids = handle.as_i64().expect("input_ids must be i64");
                record.ids = ids.iter().copied().collect();
                ids_len = handle.shape()[1];
            } else if *name == "use_cache_branch" {
                if let TensorData::Bool(flag) = handle.data() {
                    record.use_cache_flag = flag.iter().next().copied();
                }
            } else if name.starts_with("past_key_values") {
                record.cache_lens.push((name.to_string(), handle.shape()[2]));
            }
        }
        self.recorded.push(record);

        let token = self.scripted_token() as usize;
        assert!(token < self.vocab, "scripted token outside vocab");
        let mut logits = vec![0.0f32; ids_len * self.vocab];
        logits[(ids_len - 1) * self.vocab + token] = 10.0;
        let logits = ArrayD::from_shape_vec(IxDyn(&[1, ids_len, self.vocab]), logits)?;

        let mut outputs = vec![(
            "logits".to_string(),
            self.make_handle(TensorData::F32(logits)),
        )];
        for slot in &self.cache_slots {
            let seq = if slot.contains("encoder") { 5 } else { self.step + 1 };
            let present = ArrayD::zeros(IxDyn(&[1, self.num_heads, seq, self.head_dim]));
            outputs.push((
                slot.replacen("past_key_values", "present", 1),
                self.make_handle(TensorData::F32(present)),
            ));
        }

        if let Some((after, flag)) = &self.cancel_after {
            if self.step >= *after {
                flag.store(true, Ordering::SeqCst);
            }
        }
        self.step += 1;
        Ok(outputs)
    }
}

/// Encoder stand-in producing zero hidden states of a fixed width.
pub struct StaticEncoder {
    input_names: Vec<String>,
    output_names: Vec<String>,
    hidden_dim: usize,
    pub seen_ids: Vec<Vec<i64>>,
}

impl StaticEncoder {
    pub fn new(hidden_dim: usize) -> Self {
        Self {
            input_names: vec!["input_ids".to_string(), "attention_mask".to_string()],
            output_names: vec!["last_hidden_state".to_string()],
            hidden_dim,
            seen_ids: Vec::new(),
        }
    }
}

impl InferenceSession for StaticEncoder {
    fn input_names(&self) -> &[String] {
        &self.input_names
    }

    fn output_names(&self) -> &[String] {
        &self.output_names
    }

    fn input_dims(&self, _name: &str) -> Option<&[i64]> {
        None
    }

    fn run(&mut self, inputs: &[(&str, &TensorHandle)]) -> Result<Vec<(String, TensorHandle)>> {
        let ids = inputs
            .iter()
            .find(|(n, _)| *n == "input_ids")
            .map(|(_, h)| h.as_i64().expect("input_ids must be i64"))
            .expect("encoder fed without input_ids");
        self.seen_ids.push(ids.iter().copied().collect());

        let seq_len = ids.shape()[1];
        let hidden = ArrayD::zeros(IxDyn(&[1, seq_len, self.hidden_dim]));
        Ok(vec![(
            "last_hidden_state".to_string(),
            TensorHandle::f32_array(hidden),
        )])
    }
}

/// Loader that counts constructions and dispatches on the staged file name.
pub struct CountingLoader {
    pub loads: AtomicUsize,
    pub decoder_script: Vec<i64>,
    pub vocab: usize,
    pub hidden_dim: usize,
    /// Handed to the first decoder this loader constructs.
    pub decoder_gate: std::sync::Mutex<Option<PauseGate>>,
}

impl CountingLoader {
    pub fn new(decoder_script: Vec<i64>, vocab: usize) -> Self {
        Self {
            loads: AtomicUsize::new(0),
            decoder_script,
            vocab,
            hidden_dim: 512,
            decoder_gate: std::sync::Mutex::new(None),
        }
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl SessionLoader for CountingLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn InferenceSession>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if name == "decoder.onnx" {
            let mut decoder = ScriptedDecoder::stateless(self.decoder_script.clone(), self.vocab);
            decoder.pause_on_first_run = self.decoder_gate.lock().unwrap().take();
            Ok(Box::new(decoder))
        } else {
            Ok(Box::new(StaticEncoder::new(self.hidden_dim)))
        }
    }
}
