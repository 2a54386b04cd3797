//! Patch registry: which operations are routed through the dispatcher
//!
//! Each [`Operation`] maps to an [`ImplementationPair`] for one facade type.
//! Applying a patch routes calls through capability checks; reverting it
//! sends every call straight to the reference implementation. Both are
//! idempotent and validate the whole request before touching any entry.

use crate::config::ExecutionTarget;
use crate::core::{Error, Result};
use crate::dispatch::{CallArgs, CallOutput};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Estimator families known to the dispatch core
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EstimatorKind {
    NearestNeighbors,
    KNeighborsClassifier,
    NuSvr,
}

impl EstimatorKind {
    pub const ALL: &'static [EstimatorKind] = &[
        EstimatorKind::NearestNeighbors,
        EstimatorKind::KNeighborsClassifier,
        EstimatorKind::NuSvr,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EstimatorKind::NearestNeighbors => "NearestNeighbors",
            EstimatorKind::KNeighborsClassifier => "KNeighborsClassifier",
            EstimatorKind::NuSvr => "NuSVR",
        }
    }

    /// Module of the reference library the estimator lives in
    pub fn module(self) -> &'static str {
        match self {
            EstimatorKind::NearestNeighbors | EstimatorKind::KNeighborsClassifier => "neighbors",
            EstimatorKind::NuSvr => "svm",
        }
    }
}

impl fmt::Display for EstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EstimatorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EstimatorKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| Error::UnregisteredOperation(s.to_string()))
    }
}

/// Patched method names
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Fit,
    Predict,
    Kneighbors,
    RadiusNeighbors,
}

impl Method {
    pub const ALL: &'static [Method] = &[
        Method::Fit,
        Method::Predict,
        Method::Kneighbors,
        Method::RadiusNeighbors,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Method::Fit => "fit",
            Method::Predict => "predict",
            Method::Kneighbors => "kneighbors",
            Method::RadiusNeighbors => "radius_neighbors",
        }
    }

    /// Fitting methods replace all previously fitted state
    pub fn is_fit(self) -> bool {
        matches!(self, Method::Fit)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Registry key: one method of one estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Operation {
    pub estimator: EstimatorKind,
    pub method: Method,
}

impl Operation {
    pub const fn new(estimator: EstimatorKind, method: Method) -> Self {
        Self { estimator, method }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            self.estimator.module(),
            self.estimator.name(),
            self.method.name()
        )
    }
}

impl FromStr for Operation {
    type Err = Error;

    /// Parse the dotted form, e.g. `neighbors.NearestNeighbors.fit`
    fn from_str(s: &str) -> Result<Self> {
        let unknown = || Error::UnregisteredOperation(s.to_string());
        let mut parts = s.split('.');
        let (module, estimator, method) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(e), Some(f)) if parts.next().is_none() => (m, e, f),
            _ => return Err(unknown()),
        };

        let estimator: EstimatorKind = estimator.parse().map_err(|_| unknown())?;
        if estimator.module() != module {
            return Err(unknown());
        }
        let method = Method::ALL
            .iter()
            .copied()
            .find(|m| m.name() == method)
            .ok_or_else(unknown)?;

        Ok(Operation::new(estimator, method))
    }
}

/// Accelerated implementation: translate, run the engine, adapt the result
pub type AcceleratedFn<E> = fn(&mut E, &CallArgs<'_>, &ExecutionTarget) -> Result<CallOutput>;

/// Reference implementation, invoked with the original arguments
pub type ReferenceFn<E> = fn(&mut E, &CallArgs<'_>) -> Result<CallOutput>;

/// Both implementations of one operation
pub struct ImplementationPair<E> {
    pub accelerated: AcceleratedFn<E>,
    pub reference: ReferenceFn<E>,
}

impl<E> Clone for ImplementationPair<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for ImplementationPair<E> {}

impl<E> fmt::Debug for ImplementationPair<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplementationPair").finish_non_exhaustive()
    }
}

/// How the dispatcher should route an operation right now
#[derive(Debug)]
pub enum Route<E> {
    /// Patched: consult the capability predicate
    Patched(ImplementationPair<E>),
    /// Reverted: always run the reference implementation
    Reverted(ReferenceFn<E>),
}

/// Subset of operations targeted by `apply`/`revert`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Estimator(EstimatorKind),
    Operations(Vec<Operation>),
}

struct RegistryEntry {
    pair: Arc<dyn Any + Send + Sync>,
    applied: AtomicBool,
}

/// Table of patchable operations
///
/// Registration needs `&mut self` and happens before the registry is shared;
/// `apply`/`revert` work through `&self` but must not race live calls.
#[derive(Default)]
pub struct PatchRegistry {
    entries: BTreeMap<Operation, RegistryEntry>,
}

impl PatchRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in operation, none of them applied
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        crate::neighbors::unsupervised::register_builtin(&mut registry);
        crate::neighbors::classifier::register_builtin(&mut registry);
        crate::svm::nusvr::register_builtin(&mut registry);
        registry
    }

    /// Registry holding every built-in operation, all applied
    pub fn patched() -> Self {
        let registry = Self::with_defaults();
        for entry in registry.entries.values() {
            entry.applied.store(true, Ordering::SeqCst);
        }
        registry
    }

    /// Register an implementation pair for an operation
    pub fn register<E: 'static>(
        &mut self,
        operation: Operation,
        accelerated: AcceleratedFn<E>,
        reference: ReferenceFn<E>,
    ) -> Result<()> {
        if self.entries.contains_key(&operation) {
            return Err(Error::DuplicateOperation(operation.to_string()));
        }
        self.insert(operation, ImplementationPair { accelerated, reference });
        Ok(())
    }

    pub(crate) fn insert<E: 'static>(&mut self, operation: Operation, pair: ImplementationPair<E>) {
        self.entries.insert(
            operation,
            RegistryEntry {
                pair: Arc::new(pair),
                applied: AtomicBool::new(false),
            },
        );
    }

    /// Every registered operation, in stable order
    pub fn all_operations(&self) -> Vec<Operation> {
        self.entries.keys().copied().collect()
    }

    pub fn applied_operations(&self) -> Vec<Operation> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.applied.load(Ordering::SeqCst))
            .map(|(op, _)| *op)
            .collect()
    }

    /// Names of estimators with at least one registered operation
    pub fn patch_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.keys().map(|op| op.estimator.name()).collect();
        names.dedup();
        names
    }

    pub fn is_applied(&self, operation: Operation) -> Result<bool> {
        self.entry(operation)
            .map(|entry| entry.applied.load(Ordering::SeqCst))
    }

    /// Route the selection through the dispatcher; returns the operations touched
    pub fn apply(&self, selection: &Selection) -> Result<Vec<Operation>> {
        self.set_applied(selection, true)
    }

    /// Restore reference behaviour for the selection; returns the operations touched
    pub fn revert(&self, selection: &Selection) -> Result<Vec<Operation>> {
        self.set_applied(selection, false)
    }

    fn set_applied(&self, selection: &Selection, applied: bool) -> Result<Vec<Operation>> {
        let operations = self.resolve_selection(selection)?;
        for op in &operations {
            if let Some(entry) = self.entries.get(op) {
                entry.applied.store(applied, Ordering::SeqCst);
            }
        }
        log::debug!(
            "{} {} operation(s)",
            if applied { "applied" } else { "reverted" },
            operations.len()
        );
        Ok(operations)
    }

    fn resolve_selection(&self, selection: &Selection) -> Result<Vec<Operation>> {
        match selection {
            Selection::All => Ok(self.all_operations()),
            Selection::Estimator(kind) => {
                let ops: Vec<_> = self
                    .entries
                    .keys()
                    .filter(|op| op.estimator == *kind)
                    .copied()
                    .collect();
                if ops.is_empty() {
                    Err(Error::UnregisteredOperation(kind.name().to_string()))
                } else {
                    Ok(ops)
                }
            }
            Selection::Operations(ops) => {
                if let Some(missing) = ops.iter().find(|op| !self.entries.contains_key(op)) {
                    return Err(Error::UnregisteredOperation(missing.to_string()));
                }
                Ok(ops.clone())
            }
        }
    }

    fn entry(&self, operation: Operation) -> Result<&RegistryEntry> {
        self.entries
            .get(&operation)
            .ok_or_else(|| Error::UnregisteredOperation(operation.to_string()))
    }

    /// Look up how calls to `operation` on facade type `E` are routed
    pub fn route<E: 'static>(&self, operation: Operation) -> Result<Route<E>> {
        let entry = self.entry(operation)?;
        let pair = entry
            .pair
            .downcast_ref::<ImplementationPair<E>>()
            .copied()
            .ok_or_else(|| Error::RouteMismatch(operation.to_string()))?;

        if entry.applied.load(Ordering::SeqCst) {
            Ok(Route::Patched(pair))
        } else {
            Ok(Route::Reverted(pair.reference))
        }
    }
}

impl fmt::Debug for PatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.entries
                    .iter()
                    .map(|(op, entry)| (op.to_string(), entry.applied.load(Ordering::SeqCst))),
            )
            .finish()
    }
}
