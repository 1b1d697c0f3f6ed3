//! Error types for the ergoflow engine.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Malformed rule {rule_id}: {message}")]
    MalformedRule { rule_id: String, message: String },

    #[error("Script parse error at column {position}: {message}")]
    ScriptParse { position: usize, message: String },

    #[error("Script evaluation error: {0}")]
    ScriptEval(String),

    #[error("Invalid transition graph: {0}")]
    InvalidTransitionGraph(String),

    #[error("Unknown state: {0}")]
    UnknownState(String),

    #[error("Invalid logic tree: {0}")]
    InvalidLogicTree(String),

    #[error("Insufficient data: need {required} frames, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    pub fn malformed(rule_id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::MalformedRule {
            rule_id: rule_id.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
