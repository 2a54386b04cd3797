//! Method interceptor: routes each patched call to the accelerated engine
//! or to the reference implementation
//!
//! Per call: discard stale fitted state (fit only), select the target,
//! evaluate the capability predicate, run the accelerated path or the
//! reference, fall back to the reference when the engine rejects the call,
//! and record which path produced the result.

use crate::config::{self, ExecutionTarget};
use crate::core::{Dispatch, InputData, Result};
use crate::neighbors::{KNeighbors, RadiusNeighbors};
use crate::registry::{Method, Operation, Route};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

/// Arguments of a patched call, in the reference calling convention
#[derive(Debug, Clone, Default)]
pub struct CallArgs<'a> {
    pub x: Option<&'a InputData>,
    pub y: Option<&'a [f64]>,
    pub sample_weight: Option<&'a [f64]>,
    pub n_neighbors: Option<usize>,
    pub radius: Option<f64>,
    pub return_distance: bool,
    pub sort_results: bool,
    /// Explicit per-call target; the ambient configuration applies otherwise
    pub target: Option<ExecutionTarget>,
}

impl<'a> CallArgs<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_x(mut self, x: &'a InputData) -> Self {
        self.x = Some(x);
        self
    }

    pub fn with_y(mut self, y: &'a [f64]) -> Self {
        self.y = Some(y);
        self
    }

    pub fn with_target(mut self, target: Option<ExecutionTarget>) -> Self {
        self.target = target;
        self
    }
}

/// Value returned by a patched call
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutput {
    /// The facade was mutated in place
    Fitted,
    Predictions(Vec<f64>),
    Neighbors(KNeighbors),
    RadiusNeighbors(RadiusNeighbors),
}

/// Capability verdict with the rule that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Supported,
    Unsupported(&'static str),
}

impl Verdict {
    /// First failing rule of a conjunction, or `Supported`
    pub fn all(rules: &[(bool, &'static str)]) -> Verdict {
        rules
            .iter()
            .find(|(holds, _)| !holds)
            .map_or(Verdict::Supported, |&(_, reason)| {
                Verdict::Unsupported(reason)
            })
    }

    pub fn is_supported(self) -> bool {
        matches!(self, Verdict::Supported)
    }
}

/// Which implementation produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPath {
    Accelerated,
    /// The predicate rejected the call
    Reference,
    /// The accelerated engine rejected the call at run time
    Fallback,
    /// The operation is not patched
    Unpatched,
}

/// Side-channel record of one dispatched call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub operation: Operation,
    pub target: ExecutionTarget,
    pub path: DispatchPath,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl DispatchRecord {
    pub fn new(
        operation: Operation,
        target: ExecutionTarget,
        path: DispatchPath,
        reason: Option<String>,
    ) -> Self {
        Self {
            operation,
            target,
            path,
            reason,
            at: Utc::now(),
        }
    }
}

/// Route one call of `method` on `estimator`
pub fn dispatch<E: Dispatch>(
    estimator: &mut E,
    method: Method,
    args: &CallArgs<'_>,
) -> Result<CallOutput> {
    let operation = Operation::new(E::KIND, method);
    let route = estimator.registry().route::<E>(operation)?;

    if method.is_fit() {
        estimator.discard_fitted();
    }

    let target = args.target.clone().unwrap_or_else(config::current_target);

    let pair = match route {
        Route::Reverted(reference) => {
            debug!("{operation}: not patched, running reference");
            let output = reference(estimator, args)?;
            estimator.record_dispatch(DispatchRecord::new(
                operation,
                target,
                DispatchPath::Unpatched,
                None,
            ));
            return Ok(output);
        }
        Route::Patched(pair) => pair,
    };

    let verdict = estimator.supports(target.class(), method, args)?;

    let (output, path, reason) = match verdict {
        Verdict::Supported => match (pair.accelerated)(estimator, args, &target) {
            Ok(output) => {
                debug!("{operation}: accelerated on {target}");
                (output, DispatchPath::Accelerated, None)
            }
            Err(err) if err.is_incompatibility() => {
                debug!("{operation}: engine rejected call on {target} ({err}), falling back");
                if method.is_fit() {
                    estimator.discard_fitted();
                }
                let output = (pair.reference)(estimator, args)?;
                (output, DispatchPath::Fallback, Some(err.to_string()))
            }
            Err(err) => return Err(err),
        },
        Verdict::Unsupported(reason) => {
            debug!("{operation}: unsupported on {target} ({reason}), running reference");
            let output = (pair.reference)(estimator, args)?;
            (output, DispatchPath::Reference, Some(reason.to_string()))
        }
    };

    estimator.record_dispatch(DispatchRecord::new(operation, target, path, reason));
    Ok(output)
}
