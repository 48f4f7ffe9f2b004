//! Error types for scenario runs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Test spec parse error: {0}")]
    SpecParse(String),

    #[error("Step failed: {step} - {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Timed out retrying after {waited_ms}ms: {expectation}")]
    Timeout { waited_ms: u64, expectation: String },

    #[error("Unknown object: {0}")]
    UnknownObject(String),

    #[error("Uncaught {0}")]
    Uncaught(#[from] decoy_core::Thrown),

    #[error(transparent)]
    Decoy(#[from] decoy_core::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;
