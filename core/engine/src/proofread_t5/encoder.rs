use ndarray::{ArrayD, IxDyn};

use crate::error::{EngineError, EngineResult};
use crate::proofread_t5::session::{InferenceSession, TensorHandle};

/// Encoder pass result carried into every decoder step.
pub struct EncoderOutput {
    /// Hidden states, shape [1, seq_len, hidden_dim].
    pub hidden_states: TensorHandle,
    /// All-ones mask matching the source sequence, shape [1, seq_len].
    pub attention_mask: TensorHandle,
}

impl EncoderOutput {
    pub fn seq_len(&self) -> usize {
        self.hidden_states.shape()[1]
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_states.shape()[2]
    }
}

/// Single forward pass over the source token ids.
///
/// Input roles are matched by substring so exporter naming variants
/// (`input_ids`, `encoder_input_ids`) all resolve; unmatched inputs are
/// not fed.
pub fn run_encoder(
    session: &mut dyn InferenceSession,
    input_ids: &[i64],
) -> EngineResult<EncoderOutput> {
    if input_ids.is_empty() {
        return Err(EngineError::inference("encoder called with no input ids"));
    }

    let seq_len = input_ids.len();
    let ids = TensorHandle::i64_array(
        ArrayD::from_shape_vec(IxDyn(&[1, seq_len]), input_ids.to_vec())
            .map_err(|e| EngineError::inference(format!("bad encoder input shape: {e}")))?,
    );
    let mask = TensorHandle::i64_array(ArrayD::ones(IxDyn(&[1, seq_len])));

    let names = session.input_names().to_vec();
    let mut feed: Vec<(&str, &TensorHandle)> = Vec::new();
    for name in &names {
        if name.contains("input_ids") {
            feed.push((name, &ids));
        } else if name.contains("attention_mask") {
            feed.push((name, &mask));
        }
    }
    if feed.is_empty() {
        return Err(EngineError::inference(
            "encoder exposes no recognizable input_ids input",
        ));
    }

    let mut outputs = session
        .run(&feed)
        .map_err(|e| EngineError::inference(format!("encoder run failed: {e}")))?;

    if outputs.is_empty() {
        return Err(EngineError::inference("encoder produced no outputs"));
    }
    let (_, hidden_states) = outputs.remove(0);

    let shape = hidden_states.shape();
    if shape.len() != 3 || shape[0] != 1 {
        return Err(EngineError::inference(format!(
            "unexpected encoder hidden state shape {shape:?}"
        )));
    }
    if hidden_states.as_f32().is_none() {
        return Err(EngineError::inference(
            "encoder hidden state is not an f32 tensor",
        ));
    }

    Ok(EncoderOutput {
        hidden_states,
        attention_mask: mask,
    })
}
