use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("feature set is missing required names: {}", .0.join(", "))]
    MissingFeatures(Vec<String>),
    #[error("feature set failed validation: {}", .0.join("; "))]
    InvalidFeatures(Vec<String>),
    #[error("prediction curve is inconsistent: {0}")]
    InconsistentCurve(String),
    #[error("record store failed to load: {0:#}")]
    FatalStartup(anyhow::Error),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// True for the caller-side input errors (as opposed to startup or internal failures).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::MissingFeatures(_) | Self::InvalidFeatures(_)
        )
    }
}
