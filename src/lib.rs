//! Capability dispatch between accelerated engines and reference estimators
//!
//! Estimator facades route every patched method through [`dispatch::dispatch`],
//! which evaluates a capability predicate against the current execution
//! target and runs either the accelerated engine or the reference
//! implementation. The [`registry::PatchRegistry`] decides which operations
//! are routed at all.

pub mod config;
pub mod core;
pub mod data;
pub mod dispatch;
pub mod neighbors;
pub mod registry;
pub mod report;
pub mod svm;

// Re-export main types for convenience
pub use crate::config::{config_context, get_config, set_config, Config, ExecutionTarget};
pub use crate::core::traits::*;
pub use crate::core::types::*;
pub use crate::core::{Error, Result};
pub use crate::data::{CsvDataset, LibSvmDataset};
pub use crate::dispatch::{dispatch, CallArgs, CallOutput, DispatchPath, DispatchRecord, Verdict};
pub use crate::neighbors::{KNeighborsClassifier, NearestNeighbors};
pub use crate::registry::{EstimatorKind, Method, Operation, PatchRegistry, Selection};
pub use crate::report::DispatchReport;
pub use crate::svm::NuSvr;

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
