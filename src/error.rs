//! Error type shared by feature derivation, training, scoring and storage.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoringError {
    /// The request cannot be turned into a usable feature set
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A raw feature required by the frozen schema is absent from the input
    #[error("Missing feature: column '{0}' is required by the model but absent from the input")]
    MissingFeature(String),

    /// A numeric column holds a value that is not a number
    #[error("Invalid value '{value}' in numeric column '{column}' at row {row}")]
    InvalidValue {
        column: String,
        row: usize,
        value: String,
    },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Stored config and artifact do not describe the same model
    #[error("Model mismatch: {0}")]
    ModelMismatch(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Estimator fitting failed
    #[error("Training failed: {0}")]
    Training(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Artifact serialization error: {0}")]
    Artifact(#[from] bincode::Error),

    #[error("Estimator error: {0}")]
    Linfa(#[from] linfa::Error),
}

pub type Result<T> = std::result::Result<T, ScoringError>;

impl ScoringError {
    /// True when the caller sent something unusable, as opposed to a fault on our side
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::MissingFeature(_)
                | Self::InvalidValue { .. }
                | Self::InvalidInput(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ModelNotFound(_) | Self::FileNotFound(_))
    }
}
