use thiserror::Error;

/// Unrecoverable configuration problems.
///
/// Running short of input is not an error; see [`crate::dsp::ProcessOutcome::Starved`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("sample rate {0} Hz is too low to form an analysis frame")]
    InvalidSampleRate(f32),

    #[error("invalid setting `{name}`: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    #[error("failed to parse settings: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
