// ============================================================================
// Error Handling
// ============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("File error: {0}")]
    File(String),
    #[error("Snapshot error: {0}")]
    Snapshot(String),
    #[error("Geometry error: {0}")]
    Geometry(String),
    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
