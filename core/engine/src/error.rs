use std::borrow::Cow;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Typed failures crossing the engine boundary.
///
/// Vocabulary problems are deliberately absent: a missing or broken
/// vocabulary file degrades the codec to its character fallback and is
/// absorbed where it happens.
#[derive(Debug, Clone)]
pub enum EngineError {
    /// No encoder model reference configured.
    Configuration(Cow<'static, str>),
    /// Artifact staging or session construction failed.
    Load(Cow<'static, str>),
    /// Execution or tensor-shape failure at any inference step.
    Inference(Cow<'static, str>),
    /// The in-flight request was cancelled between decode steps.
    Cancelled,
}

impl EngineError {
    pub fn configuration<T>(message: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        Self::Configuration(message.into())
    }

    pub fn load<T>(message: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        Self::Load(message.into())
    }

    pub fn inference<T>(message: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        Self::Inference(message.into())
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Configuration(m) | Self::Load(m) | Self::Inference(m) => m,
            Self::Cancelled => "operation cancelled",
        }
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl Error for EngineError {}

pub type EngineResult<T> = Result<T, EngineError>;
