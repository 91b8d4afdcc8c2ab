//! Encoder/decoder text rewriting over ONNX graphs.
//!
//! The pipeline is tokenizer -> encoder pass -> greedy decoder loop, with
//! the decoder calling convention detected from graph metadata rather than
//! configured.

pub mod decoder;
pub mod decoder_state;
pub mod encoder;
pub mod engine;
pub mod session;
pub mod tokenizer;

use async_trait::async_trait;

use crate::error::EngineResult;

pub use decoder::{classify_decoder, run_decoder_loop, DECODER_START_TOKEN_ID};
pub use decoder_state::{CacheLayout, DecodeOutcome, DecoderConvention};
pub use encoder::{run_encoder, EncoderOutput};
pub use engine::ProofreadService;
pub use session::{InferenceSession, OnnxSession, TensorData, TensorHandle};
pub use tokenizer::T5Tokenizer;

/// Public engine surface.
#[async_trait]
pub trait Proofreader: Send + Sync {
    /// Rewrite `text` under the grammar-correction prompt, or under
    /// `prompt_override` when given.
    async fn proofread(&self, text: &str, prompt_override: Option<&str>) -> EngineResult<String>;

    /// Rewrite `text` under the translation prompt for the configured
    /// target language.
    async fn translate(&self, text: &str) -> EngineResult<String>;

    /// Release the resident model immediately.
    async fn unload(&self);

    /// True while a request is running.
    fn is_busy(&self) -> bool;
}
