//! Error types for the query engine

use thiserror::Error;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while planning, orchestrating or supervising a run
#[derive(Debug, Error)]
pub enum EngineError {
    /// Language-model call failed or returned an unusable shape
    #[error("Model error: {0}")]
    Model(String),

    /// Retrieval tool call failed
    #[error("Tool error: {0}")]
    Tool(String),

    /// Checkpoint store read or write failed
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Statistics store read or write failed
    #[error("Statistics error: {0}")]
    Statistics(String),

    /// No checkpoint exists for the session
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// Resume requested but the run is not suspended
    #[error("Session '{0}' has no outstanding suspension")]
    NoPendingInterrupt(String),

    /// Resume value does not match the expected shape
    #[error("Invalid resume payload: {0}")]
    InvalidResumePayload(String),

    /// Plan failed validation while validation is enforced
    #[error("Plan validation failed: {}", .0.join("; "))]
    PlanValidation(Vec<String>),

    /// A team reached a terminal failure
    #[error("Team '{team}' failed: {message}")]
    TeamFailed { team: String, message: String },

    /// A team name the executor does not know
    #[error("Unknown team: {0}")]
    UnknownTeam(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create a model error with a message
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    /// Create a tool error with a message
    pub fn tool(msg: impl Into<String>) -> Self {
        Self::Tool(msg.into())
    }

    /// Create a team failure
    pub fn team_failed(team: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TeamFailed {
            team: team.into(),
            message: message.into(),
        }
    }

    /// Whether this error leaves persisted state untouched by contract
    pub fn is_resume_rejection(&self) -> bool {
        matches!(
            self,
            Self::UnknownSession(_) | Self::NoPendingInterrupt(_) | Self::InvalidResumePayload(_)
        )
    }
}
