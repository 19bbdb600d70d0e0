use crate::copy::StrategyFailure;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// `depth` is the bound of the last pass; `failures` covers every pass.
    #[error("Copy failed at depth {depth}: every strategy was exhausted ({})", describe_failures(.failures))]
    CopyExhausted {
        depth: usize,
        failures: Vec<StrategyFailure>,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Empty payload: {0}")]
    EmptyPayload(String),

    #[error("Giving up after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: String },

    #[error("Request failed (single attempt, retries disabled): {last}")]
    SingleAttemptFailed { last: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Credential error: {0}")]
    Credential(String),
}

fn describe_failures(failures: &[StrategyFailure]) -> String {
    if failures.is_empty() {
        return "no strategy was applicable".to_string();
    }
    failures
        .iter()
        .map(StrategyFailure::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, EnrichError>;
