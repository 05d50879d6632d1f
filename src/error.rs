use thiserror::Error;

use crate::burnrl::base::EnvError;

/// Construction-time configuration problems.
///
/// These are reported before any training state exists.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be > 0, got {value}")]
    InvalidCount { field: &'static str, value: usize },

    #[error("{field} must be in [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("unknown constraint mode {0:?}, expected one of: none, clip, clip_mod")]
    UnknownConstraint(String),

    #[error(
        "replay buffer capacity {capacity} must exceed one world-model batch ({required} steps)"
    )]
    ReplayTooSmall { capacity: usize, required: usize },

    #[error("rollout horizon {horizon} does not fit in a replay buffer of {capacity} steps")]
    HorizonExceedsReplay { horizon: usize, capacity: usize },

    #[error("population of {population} agents cannot fill {players} player slots")]
    PopulationTooSmall { population: usize, players: usize },

    #[error("model_save_interval is set but model_save_folder is missing")]
    MissingSaveFolder,

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Errors surfaced by the training loop.
#[derive(Debug, Error)]
pub enum PpoError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Environment(#[from] EnvError),

    #[error("loss is not finite (policy {policy}, value {value}, entropy {entropy})")]
    NumericalDivergence { policy: f32, value: f32, entropy: f32 },

    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: &'static str,
        expected: String,
        actual: String,
    },

    #[error("not enough data: {0}")]
    InsufficientData(String),

    #[error("tensor data error: {0}")]
    Tensor(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PpoError {
    pub(crate) fn shape(
        context: &'static str,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        PpoError::ShapeMismatch {
            context,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}
