//! Deep copy of arbitrary row values.
//!
//! [`ObjectCopier`] walks an ordered cascade of [`CopyStrategy`] entries and
//! stops at the first one that succeeds:
//!
//! 1. [`TrustedBinaryStrategy`]: exact, only for values explicitly marked
//!    [`SourceTrust::Trusted`] and serializable.
//! 2. [`JsonMarshalStrategy`]: JSON round trip bounded by `max_depth`.
//! 3. [`XmlObjectGraphStrategy`]: in-memory XML object graph, when the codec
//!    probe succeeds.
//! 4. [`XmlFileRoundtripStrategy`]: the same encoding through a temporary file.
//!
//! If everything fails at a caller-chosen depth other than
//! [`DEFAULT_MAX_DEPTH`], the depth-bounded strategies run once more at the
//! default depth before the copy is reported as failed.

mod binary;
mod json;
mod strategy;
pub mod xml;

pub use binary::TrustedBinaryStrategy;
pub use json::JsonMarshalStrategy;
pub use strategy::{
    CopyContext, CopyStrategy, Fidelity, SourceTrust, StrategyError, StrategyFailure,
    StrategyKind,
};
pub use xml::{XmlFileRoundtripStrategy, XmlObjectGraphStrategy};

use std::path::PathBuf;
use tracing::{debug, warn};

use crate::error::{EnrichError, Result};
use crate::value::Value;

pub const DEFAULT_MAX_DEPTH: usize = 2;

#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub source: Value,
    pub max_depth: usize,
    pub trust: SourceTrust,
}

impl CopyRequest {
    pub fn new(source: Value) -> Self {
        Self {
            source,
            max_depth: DEFAULT_MAX_DEPTH,
            trust: SourceTrust::Untrusted,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Opt in to the binary snapshot path. Only for values produced by this
    /// process; never for anything read from outside.
    pub fn trusted(mut self) -> Self {
        self.trust = SourceTrust::Trusted;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CopyOutcome {
    pub value: Value,
    pub fidelity: Fidelity,
    /// `None` only when a null source short-circuited the cascade.
    pub strategy_used: Option<StrategyKind>,
}

pub struct ObjectCopier {
    strategies: Vec<Box<dyn CopyStrategy>>,
}

impl Default for ObjectCopier {
    fn default() -> Self {
        Self::with_strategies(vec![
            Box::new(TrustedBinaryStrategy),
            Box::new(JsonMarshalStrategy),
            Box::new(XmlObjectGraphStrategy),
            Box::new(XmlFileRoundtripStrategy::default()),
        ])
    }
}

impl ObjectCopier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard cascade with the file fallback writing into `temp_dir`.
    pub fn with_temp_dir(temp_dir: impl Into<PathBuf>) -> Self {
        Self::with_strategies(vec![
            Box::new(TrustedBinaryStrategy),
            Box::new(JsonMarshalStrategy),
            Box::new(XmlObjectGraphStrategy),
            Box::new(XmlFileRoundtripStrategy::in_dir(temp_dir)),
        ])
    }

    /// Custom cascade, tried in the given order.
    pub fn with_strategies(strategies: Vec<Box<dyn CopyStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    pub fn copy(&self, request: &CopyRequest) -> Result<CopyOutcome> {
        if request.source.is_null() {
            return Ok(CopyOutcome {
                value: Value::Null,
                fidelity: Fidelity::Exact,
                strategy_used: None,
            });
        }

        if request.max_depth == 0 {
            return Err(EnrichError::InvalidArgument(
                "max_depth must be at least 1".to_string(),
            ));
        }

        let ctx = CopyContext {
            source: &request.source,
            trust: request.trust,
        };

        let mut failures = Vec::new();
        if let Some(outcome) = self.run_cascade(&ctx, request.max_depth, false, &mut failures) {
            return Ok(outcome);
        }

        if request.max_depth != DEFAULT_MAX_DEPTH {
            warn!(
                "Copy failed at depth {}, retrying at default depth {}",
                request.max_depth, DEFAULT_MAX_DEPTH
            );
            if let Some(outcome) = self.run_cascade(&ctx, DEFAULT_MAX_DEPTH, true, &mut failures) {
                return Ok(outcome);
            }
            return Err(EnrichError::CopyExhausted {
                depth: DEFAULT_MAX_DEPTH,
                failures,
            });
        }

        Err(EnrichError::CopyExhausted {
            depth: request.max_depth,
            failures,
        })
    }

    fn run_cascade(
        &self,
        ctx: &CopyContext<'_>,
        max_depth: usize,
        bounded_only: bool,
        failures: &mut Vec<StrategyFailure>,
    ) -> Option<CopyOutcome> {
        for strategy in &self.strategies {
            let kind = strategy.kind();
            if bounded_only && !strategy.depth_bounded() {
                continue;
            }
            if !strategy.probe(ctx) {
                debug!(strategy = %kind, "Copy strategy not applicable, skipping");
                continue;
            }

            match strategy.attempt(ctx.source, max_depth) {
                Ok(value) => {
                    debug!(strategy = %kind, max_depth, "Copy succeeded");
                    return Some(CopyOutcome {
                        value,
                        fidelity: strategy.fidelity(),
                        strategy_used: Some(kind),
                    });
                }
                Err(e) => {
                    debug!(strategy = %kind, max_depth, error = %e, "Copy strategy failed");
                    failures.push(StrategyFailure {
                        strategy: kind,
                        max_depth,
                        reason: e.to_string(),
                    });
                }
            }
        }
        None
    }
}

/// Copy with the standard cascade.
pub fn deep_copy(request: &CopyRequest) -> Result<CopyOutcome> {
    ObjectCopier::default().copy(request)
}
