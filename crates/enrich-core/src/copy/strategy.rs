use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::value::Value;

/// Whether a value provably came from this process's own computation.
///
/// Only `Trusted` sources may take the binary snapshot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTrust {
    #[default]
    Untrusted,
    Trusted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fidelity {
    /// Full graph, including shared cells and cycles.
    Exact,
    /// May truncate beyond the depth bound or lose types without a text form.
    Approximate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    TrustedBinarySerialization,
    FastMarshal,
    XmlObjectGraph,
    XmlFileRoundtrip,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::TrustedBinarySerialization => write!(f, "trusted-binary"),
            StrategyKind::FastMarshal => write!(f, "json"),
            StrategyKind::XmlObjectGraph => write!(f, "xml-in-memory"),
            StrategyKind::XmlFileRoundtrip => write!(f, "xml-file"),
        }
    }
}

/// A strategy attempt that failed, with the depth bound it ran under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    pub strategy: StrategyKind,
    pub max_depth: usize,
    pub reason: String,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at depth {}: {}", self.strategy, self.max_depth, self.reason)
    }
}

/// Failure of a single strategy. The cascade absorbs these.
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("value is not serializable: {0}")]
    NotSerializable(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("nesting limit of {0} levels exceeded")]
    NestingLimit(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a strategy gets to look at when deciding whether it applies.
#[derive(Debug, Clone, Copy)]
pub struct CopyContext<'a> {
    pub source: &'a Value,
    pub trust: SourceTrust,
}

/// One entry of the copy cascade.
pub trait CopyStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn fidelity(&self) -> Fidelity;

    /// Whether this strategy may be attempted for the given source.
    fn probe(&self, ctx: &CopyContext<'_>) -> bool;

    /// Whether `max_depth` influences the result. Bounded strategies take part
    /// in the retry at the default depth.
    fn depth_bounded(&self) -> bool {
        true
    }

    fn attempt(&self, source: &Value, max_depth: usize) -> Result<Value, StrategyError>;
}
