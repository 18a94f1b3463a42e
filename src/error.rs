//! Error handling for the ServWatch agent.

use crate::metrics::data::MetricCategory;

/// A specialized `Result` type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// The main error type for agent operations.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A single metric category could not be collected
    #[error("Failed to collect {category} metrics: {reason}")]
    Collection {
        category: MetricCategory,
        reason: String,
    },

    /// The wall clock could not produce a timestamp
    #[error("Clock error: {0}")]
    Clock(String),

    /// Transport operation failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// An emit was attempted without a live connection
    #[error("Not connected to the collector")]
    NotConnected,

    /// GPU access failed (only available with gpu feature)
    #[cfg(feature = "gpu")]
    #[error("GPU error: {0}")]
    Gpu(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AgentError {
    /// Create a new collection error for one metric category
    pub fn collection_error(category: MetricCategory, reason: impl Into<String>) -> Self {
        Self::Collection {
            category,
            reason: reason.into(),
        }
    }

    /// Create a new clock error
    pub fn clock_error(msg: impl Into<String>) -> Self {
        Self::Clock(msg.into())
    }

    /// Create a new transport error
    pub fn transport_error(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new GPU error
    #[cfg(feature = "gpu")]
    pub fn gpu_error(msg: impl Into<String>) -> Self {
        Self::Gpu(msg.into())
    }

    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
