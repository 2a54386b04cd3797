//! Core traits for patched estimator facades

use crate::config::TargetClass;
use crate::core::Result;
use crate::dispatch::{CallArgs, DispatchRecord, Verdict};
use crate::registry::{EstimatorKind, Method, PatchRegistry};

/// Facade contract the dispatcher relies on
///
/// A facade owns its configuration, its fitted state and a handle to the
/// registry it was built with. The dispatcher never looks past this trait.
pub trait Dispatch: Sized + 'static {
    /// Estimator family this facade implements
    const KIND: EstimatorKind;

    /// Registry consulted for routing
    fn registry(&self) -> &PatchRegistry;

    /// Capability predicate for `method` on a target class
    ///
    /// Must be pure. Returns `Error::UnknownMethod` for methods the estimator
    /// does not have; an unsupported combination is `Ok(Verdict::Unsupported)`.
    fn supports(&self, class: TargetClass, method: Method, args: &CallArgs<'_>) -> Result<Verdict>;

    /// Drop all fitted state, including the record of the previous call
    fn discard_fitted(&mut self);

    /// Keep the outcome of the latest dispatched call for introspection
    fn record_dispatch(&mut self, record: DispatchRecord);
}
