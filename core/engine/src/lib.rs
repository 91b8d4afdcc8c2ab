pub mod config_manager;
pub mod error;
pub mod model_manager;
pub mod onnx_utils;
pub mod performance_logger;
pub mod proofread_t5;

pub use config_manager::{ConfigManager, EngineConfig, StaticConfigManager};
pub use error::{EngineError, EngineResult};
pub use model_manager::{LoadedModel, ModelManager, OnnxSessionLoader, SessionLoader};
pub use performance_logger::{InferenceLog, PerformanceLogger};
pub use proofread_t5::{
    DecodeOutcome, DecoderConvention, EncoderOutput, InferenceSession, ProofreadService,
    Proofreader, T5Tokenizer, TensorData, TensorHandle,
};
