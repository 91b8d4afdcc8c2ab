use std::sync::atomic::{AtomicBool, Ordering};

use ndarray::{ArrayD, IxDyn};

use crate::error::{EngineError, EngineResult};
use crate::proofread_t5::decoder_state::{CacheLayout, DecodeOutcome, DecoderConvention};
use crate::proofread_t5::encoder::EncoderOutput;
use crate::proofread_t5::session::{InferenceSession, TensorHandle};

/// Decoder start token; the T5 family reuses `<pad>` for it.
pub const DECODER_START_TOKEN_ID: i64 = 0;

/// Assumed attention-head count when the graph declares a symbolic one.
const DEFAULT_NUM_HEADS: usize = 8;

const CACHE_PREFIXES: [&str; 2] = ["past_key_values", "pkv"];
const USE_CACHE_INPUT: &str = "use_cache_branch";

/// Inspect a decoder graph's inputs and decide how to drive it.
///
/// Cache slots are recognized by name prefix. The head count is read from
/// the second declared cache dimension when the export fixed it; symbolic
/// exports fall back to [`DEFAULT_NUM_HEADS`].
pub fn classify_decoder(
    session: &dyn InferenceSession,
    hidden_dim: usize,
) -> EngineResult<DecoderConvention> {
    let slot_names: Vec<String> = session
        .input_names()
        .iter()
        .filter(|n| CACHE_PREFIXES.iter().any(|p| n.starts_with(p)))
        .cloned()
        .collect();

    if slot_names.is_empty() {
        return Ok(DecoderConvention::Stateless);
    }

    let mut num_heads = DEFAULT_NUM_HEADS;
    if let Some(dims) = session.input_dims(&slot_names[0]) {
        if dims.len() == 4 && dims[1] > 0 {
            num_heads = dims[1] as usize;
        }
    }
    // Truncating division; the head count is a heuristic, not a contract.
    if hidden_dim % num_heads != 0 {
        eprintln!(
            "[Decoder] hidden dim {hidden_dim} not divisible by {num_heads} heads, truncating"
        );
    }
    let layout = CacheLayout {
        slot_names,
        num_heads,
        head_dim: hidden_dim / num_heads,
    };

    let merged = session.input_names().iter().any(|n| n == USE_CACHE_INPUT);
    if merged {
        Ok(DecoderConvention::Merged {
            cache: layout,
            use_cache_input: USE_CACHE_INPUT.to_string(),
        })
    } else {
        Ok(DecoderConvention::Cached(layout))
    }
}

/// Greedy autoregressive decode against one encoder pass.
///
/// The cancel flag is consulted at the top of every step; a set flag aborts
/// with [`EngineError::Cancelled`] and drops any cache tensors held so far.
pub fn run_decoder_loop(
    session: &mut dyn InferenceSession,
    encoder: &EncoderOutput,
    eos_token_id: i64,
    max_steps: usize,
    cancel: &AtomicBool,
) -> EngineResult<DecodeOutcome> {
    let convention = classify_decoder(session, encoder.hidden_dim())?;
    let input_names = session.input_names().to_vec();

    let mut generated: Vec<i64> = vec![DECODER_START_TOKEN_ID];
    let mut cache: Option<Vec<(String, TensorHandle)>> = None;
    let mut steps = 0usize;

    for step in 0..max_steps {
        if cancel.load(Ordering::SeqCst) {
            return Err(EngineError::Cancelled);
        }

        // Stateless graphs see the whole prefix; cached graphs only the
        // newest token once a cache exists.
        let step_ids: Vec<i64> = if cache.is_some() {
            vec![*generated.last().unwrap_or(&DECODER_START_TOKEN_ID)]
        } else {
            generated.clone()
        };
        let ids = TensorHandle::i64_array(
            ArrayD::from_shape_vec(IxDyn(&[1, step_ids.len()]), step_ids)
                .map_err(|e| EngineError::inference(format!("bad decoder input shape: {e}")))?,
        );

        let zero_cache: Vec<(String, TensorHandle)> = match (&convention, &cache) {
            (DecoderConvention::Stateless, _) | (_, Some(_)) => Vec::new(),
            (DecoderConvention::Cached(layout), None)
            | (DecoderConvention::Merged { cache: layout, .. }, None) => {
                build_zero_cache(layout, encoder.seq_len())?
            }
        };
        let use_cache_flag = match &convention {
            DecoderConvention::Merged { use_cache_input, .. } => Some((
                use_cache_input.as_str(),
                TensorHandle::bool_scalar(step > 0),
            )),
            _ => None,
        };

        let outputs = {
            let mut feed: Vec<(&str, &TensorHandle)> = Vec::new();
            for name in &input_names {
                if name.contains("hidden_states") {
                    feed.push((name, &encoder.hidden_states));
                } else if name.contains("attention_mask") {
                    feed.push((name, &encoder.attention_mask));
                } else if name.contains("input_ids") && !name.contains("encoder") {
                    feed.push((name, &ids));
                } else if let Some((flag_name, flag)) = &use_cache_flag {
                    if name.as_str() == *flag_name {
                        feed.push((name, flag));
                    }
                }
            }
            match &cache {
                Some(entries) => {
                    for (name, handle) in entries {
                        feed.push((name, handle));
                    }
                }
                None => {
                    for (name, handle) in &zero_cache {
                        feed.push((name, handle));
                    }
                }
            }

            session
                .run(&feed)
                .map_err(|e| EngineError::inference(format!("decoder step {step} failed: {e}")))?
        };
        steps += 1;

        let logits = outputs
            .iter()
            .find(|(name, _)| name == "logits")
            .or_else(|| outputs.first())
            .ok_or_else(|| EngineError::inference("decoder produced no outputs"))?;
        let logits = logits
            .1
            .as_f32()
            .ok_or_else(|| EngineError::inference("decoder logits are not f32"))?;
        let next_token = argmax_last_position(logits)?;

        if let Some(layout) = convention.cache_layout() {
            let mut next_cache = Vec::with_capacity(layout.slot_names.len());
            for (name, handle) in outputs {
                if let Some(slot) = remap_cache_name(&name, &layout.slot_names) {
                    next_cache.push((slot, handle));
                }
            }
            // New cache replaces the old one; the prior step's tensors are
            // released here, not at loop exit.
            if !next_cache.is_empty() {
                cache = Some(next_cache);
            }
        }

        if next_token == eos_token_id {
            break;
        }
        generated.push(next_token);
    }

    Ok(DecodeOutcome {
        token_ids: generated,
        steps,
    })
}

/// Zero-filled cache tensors for the first cached-decoder step.
///
/// Self-attention slots start at sequence length 0; cross-attention slots
/// are keyed to the encoder output and start at its length.
fn build_zero_cache(
    layout: &CacheLayout,
    encoder_seq_len: usize,
) -> EngineResult<Vec<(String, TensorHandle)>> {
    let total = layout.slot_names.len();
    let mut entries = Vec::with_capacity(total);
    for (position, name) in layout.slot_names.iter().enumerate() {
        let cached_len = if is_encoder_slot(name, position, total) {
            encoder_seq_len
        } else {
            0
        };
        let shape = IxDyn(&[1, layout.num_heads, cached_len, layout.head_dim]);
        entries.push((name.clone(), TensorHandle::f32_array(ArrayD::zeros(shape))));
    }
    Ok(entries)
}

/// Cross-attention slots carry "encoder" in their name in most exports;
/// anonymous layouts put them in the back half of the declaration order.
fn is_encoder_slot(name: &str, position: usize, total: usize) -> bool {
    if name.contains("encoder") {
        return true;
    }
    if name.contains("decoder") {
        return false;
    }
    position >= total / 2
}

/// Map a `present.*` output back to the past-key-value input it refills.
fn remap_cache_name(output_name: &str, slot_names: &[String]) -> Option<String> {
    if !output_name.starts_with("present") {
        return None;
    }
    let direct = output_name.replacen("present", "past_key_values", 1);
    if slot_names.iter().any(|s| s == &direct) {
        return Some(direct);
    }
    // Prefix styles differ between exporters; match on the layer suffix.
    let suffix = output_name.split_once('.').map(|(_, s)| s)?;
    slot_names.iter().find(|s| s.ends_with(suffix)).cloned()
}

/// Highest-scoring vocabulary id at the final sequence position.
fn argmax_last_position(logits: &ArrayD<f32>) -> EngineResult<i64> {
    let shape = logits.shape();
    let (rows, vocab) = match shape.len() {
        3 => (shape[1], shape[2]),
        2 => (shape[0], shape[1]),
        1 => (1, shape[0]),
        _ => {
            return Err(EngineError::inference(format!(
                "unexpected logits rank {shape:?}"
            )))
        }
    };
    if rows == 0 || vocab == 0 {
        return Err(EngineError::inference("empty logits tensor"));
    }
    let offset = (rows - 1) * vocab;
    let flat = logits
        .as_slice()
        .ok_or_else(|| EngineError::inference("non-contiguous logits tensor"))?;
    let row = &flat[offset..offset + vocab];
    let best = row
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(idx, _)| idx as i64)
        .unwrap_or(0);
    Ok(best)
}
