pub mod config_manager;
pub mod copy;
pub mod credentials;
pub mod error;
pub mod prompt;
pub mod retry;
pub mod telemetry;
pub mod value;

pub use config_manager::*;
pub use copy::{
    deep_copy, CopyOutcome, CopyRequest, CopyStrategy, Fidelity, ObjectCopier, SourceTrust,
    StrategyFailure, StrategyKind, DEFAULT_MAX_DEPTH,
};
pub use credentials::*;
pub use error::*;
pub use prompt::{build_clustering_prompt, PromptAssembly};
pub use retry::*;
pub use telemetry::init_tracing;
pub use value::*;
