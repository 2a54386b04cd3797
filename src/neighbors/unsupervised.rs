//! Unsupervised nearest neighbors facade

use crate::config::{self, ExecutionTarget, TargetClass};
use crate::core::{Dispatch, Error, FitState, InputData, PrebuiltIndex, Result};
use crate::dispatch::{dispatch, CallArgs, CallOutput, DispatchRecord, Verdict};
use crate::neighbors::adapter::{adapt_fit, adapt_kneighbors};
use crate::neighbors::engine::{NeighborsModel, Query};
use crate::neighbors::{
    predicate, translate, Algorithm, BruteForceReference, EffectiveMetric, FitPlan,
    HostNeighborsEngine, KNeighbors, Metric, MetricParams, NeighborsEngine, NeighborsFit,
    NeighborsParams, NeighborsReference, RadiusNeighbors,
};
use crate::registry::{EstimatorKind, ImplementationPair, Method, Operation, PatchRegistry};
use log::debug;
use std::sync::Arc;

pub(crate) type NeighborsState = FitState<NeighborsFit, Box<dyn NeighborsModel>>;

/// Engines a neighbors facade routes to
#[derive(Debug, Clone)]
pub struct NeighborsEngines {
    pub accelerated: Arc<dyn NeighborsEngine>,
    pub reference: Arc<dyn NeighborsReference>,
}

impl Default for NeighborsEngines {
    fn default() -> Self {
        Self {
            accelerated: Arc::new(HostNeighborsEngine::new()),
            reference: Arc::new(BruteForceReference),
        }
    }
}

/// Unsupervised learner for neighbor searches
///
/// ```rust
/// use accelex::core::{DenseMatrix, InputData};
/// use accelex::neighbors::NearestNeighbors;
/// use accelex::registry::PatchRegistry;
/// use std::sync::Arc;
///
/// # fn main() -> accelex::core::Result<()> {
/// let x: InputData = DenseMatrix::from_rows(&[vec![0.0], vec![1.0], vec![5.0]])?.into();
/// let mut nn = NearestNeighbors::new(Arc::new(PatchRegistry::patched())).with_n_neighbors(1);
/// nn.fit(&x)?;
/// let result = nn.kneighbors(None, None, true)?;
/// assert_eq!(result.indices, vec![vec![1], vec![0], vec![1]]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct NearestNeighbors {
    params: NeighborsParams,
    registry: Arc<PatchRegistry>,
    engines: NeighborsEngines,
    plan: Option<FitPlan>,
    state: NeighborsState,
    last_dispatch: Option<DispatchRecord>,
}

impl NearestNeighbors {
    pub fn new(registry: Arc<PatchRegistry>) -> Self {
        Self {
            params: NeighborsParams::default(),
            registry,
            engines: NeighborsEngines::default(),
            plan: None,
            state: FitState::Unfitted,
            last_dispatch: None,
        }
    }

    pub fn with_params(mut self, params: NeighborsParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_n_neighbors(mut self, n_neighbors: usize) -> Self {
        self.params.n_neighbors = n_neighbors;
        self
    }

    pub fn with_radius(mut self, radius: f64) -> Self {
        self.params.radius = radius;
        self
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.params.algorithm = algorithm;
        self
    }

    pub fn with_leaf_size(mut self, leaf_size: usize) -> Self {
        self.params.leaf_size = leaf_size;
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.params.metric = metric;
        self
    }

    pub fn with_p(mut self, p: Option<f64>) -> Self {
        self.params.p = p;
        self
    }

    pub fn with_metric_params(mut self, metric_params: MetricParams) -> Self {
        self.params.metric_params = metric_params;
        self
    }

    pub fn with_engines(mut self, engines: NeighborsEngines) -> Self {
        self.engines = engines;
        self
    }

    /// Fit on the ambient execution target
    pub fn fit(&mut self, x: &InputData) -> Result<()> {
        self.fit_on(x, None)
    }

    /// Fit with an explicit execution target
    pub fn fit_on(&mut self, x: &InputData, target: Option<ExecutionTarget>) -> Result<()> {
        let args = CallArgs::new().with_x(x).with_target(target);
        dispatch(self, Method::Fit, &args).map(|_| ())
    }

    /// Find the `n_neighbors` nearest neighbors of each query row
    ///
    /// Without `x` the training set is queried and each sample is not its own
    /// neighbor.
    pub fn kneighbors(
        &mut self,
        x: Option<&InputData>,
        n_neighbors: Option<usize>,
        return_distance: bool,
    ) -> Result<KNeighbors> {
        self.kneighbors_on(x, n_neighbors, return_distance, None)
    }

    pub fn kneighbors_on(
        &mut self,
        x: Option<&InputData>,
        n_neighbors: Option<usize>,
        return_distance: bool,
        target: Option<ExecutionTarget>,
    ) -> Result<KNeighbors> {
        let args = CallArgs {
            x,
            n_neighbors,
            return_distance,
            target,
            ..CallArgs::default()
        };
        match dispatch(self, Method::Kneighbors, &args)? {
            CallOutput::Neighbors(result) => Ok(result),
            other => Err(unexpected_output(Method::Kneighbors, &other)),
        }
    }

    /// Neighbors within `radius` (the configured radius when `None`)
    pub fn radius_neighbors(
        &mut self,
        x: Option<&InputData>,
        radius: Option<f64>,
        return_distance: bool,
        sort_results: bool,
    ) -> Result<RadiusNeighbors> {
        let args = CallArgs {
            x,
            radius,
            return_distance,
            sort_results,
            ..CallArgs::default()
        };
        match dispatch(self, Method::RadiusNeighbors, &args)? {
            CallOutput::RadiusNeighbors(result) => Ok(result),
            other => Err(unexpected_output(Method::RadiusNeighbors, &other)),
        }
    }

    pub fn params(&self) -> &NeighborsParams {
        &self.params
    }

    /// Fitted attributes, whichever path produced them
    pub fn fit_attrs(&self) -> Option<&NeighborsFit> {
        self.state.attrs()
    }

    pub fn n_samples_fit(&self) -> Option<usize> {
        self.fit_attrs().map(|attrs| attrs.n_samples_fit)
    }

    pub fn n_features_in(&self) -> Option<usize> {
        self.fit_attrs().map(|attrs| attrs.n_features_in)
    }

    pub fn fit_method(&self) -> Option<Algorithm> {
        self.fit_attrs().map(|attrs| attrs.fit_method)
    }

    pub fn effective_metric(&self) -> Option<EffectiveMetric> {
        self.fit_attrs().map(|attrs| attrs.effective)
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_fitted()
    }

    /// Whether the accelerated engine holds the fitted state
    pub fn is_accelerated(&self) -> bool {
        self.state.is_accelerated()
    }

    pub fn last_dispatch(&self) -> Option<&DispatchRecord> {
        self.last_dispatch.as_ref()
    }

    /// Export the fitted data as an index another estimator can be fitted on
    pub fn to_index(&self) -> Result<PrebuiltIndex> {
        let attrs = self
            .fit_attrs()
            .ok_or(Error::NotFitted(EstimatorKind::NearestNeighbors.name()))?;
        match &attrs.fit_x {
            InputData::Dense(data) => Ok(PrebuiltIndex {
                data: data.clone(),
                method: attrs.fit_method,
            }),
            other => Err(Error::InvalidInput(format!(
                "cannot export an index over {} data",
                other.kind()
            ))),
        }
    }
}

impl Dispatch for NearestNeighbors {
    const KIND: EstimatorKind = EstimatorKind::NearestNeighbors;

    fn registry(&self) -> &PatchRegistry {
        &self.registry
    }

    fn supports(&self, class: TargetClass, method: Method, args: &CallArgs<'_>) -> Result<Verdict> {
        match method {
            Method::Fit => Ok(predicate::fit_verdict(class, &self.params, args.x)),
            Method::Kneighbors => Ok(predicate::kneighbors_verdict(
                self.state.attrs(),
                self.state.is_accelerated(),
                args.x,
                args.n_neighbors.unwrap_or(self.params.n_neighbors),
            )),
            Method::RadiusNeighbors => Ok(predicate::radius_verdict()),
            Method::Predict => Err(Error::UnknownMethod {
                estimator: Self::KIND.name().to_string(),
                method: method.name().to_string(),
            }),
        }
    }

    fn discard_fitted(&mut self) {
        self.plan = None;
        self.state = FitState::Unfitted;
        self.last_dispatch = None;
    }

    fn record_dispatch(&mut self, record: DispatchRecord) {
        self.last_dispatch = Some(record);
    }
}

pub(crate) fn unexpected_output(method: Method, output: &CallOutput) -> Error {
    Error::InvalidInput(format!("{method} produced an unexpected result: {output:?}"))
}

pub(crate) fn training_data<'a>(args: &CallArgs<'a>) -> Result<&'a InputData> {
    args.x
        .ok_or_else(|| Error::InvalidInput("fit requires training data".to_string()))
}

/// Build an accelerated model and mirror its attributes
pub(crate) fn fit_engine(
    params: &NeighborsParams,
    engines: &NeighborsEngines,
    x: &InputData,
    y: Option<&[f64]>,
    distance_weighted: bool,
    target: &ExecutionTarget,
) -> Result<(FitPlan, NeighborsState)> {
    let native_x = x.as_native().ok_or_else(|| {
        Error::Incompatible(format!("{} input is not supported by the engine", x.kind()))
    })?;
    let plan = FitPlan::resolve(params, x)?;
    let mut native = translate(params, Some(&plan))?;
    native.distance_weighted = distance_weighted;
    let model = engines.accelerated.fit(&native, native_x, y, target)?;
    let attrs = adapt_fit(model.as_ref(), &plan)?;
    Ok((
        plan,
        FitState::Accelerated {
            attrs,
            handle: model,
        },
    ))
}

/// Fit the reference implementation
pub(crate) fn fit_reference_state(
    params: &NeighborsParams,
    engines: &NeighborsEngines,
    x: &InputData,
) -> Result<(FitPlan, NeighborsState)> {
    let plan = FitPlan::resolve(params, x)?;
    let attrs = engines
        .reference
        .fit(&plan, x, config::get_config().assume_finite)?;
    Ok((plan, FitState::Reference(attrs)))
}

/// Query the accelerated model
pub(crate) fn engine_kneighbors(
    state: &NeighborsState,
    args: &CallArgs<'_>,
    k: usize,
    target: &ExecutionTarget,
) -> Result<KNeighbors> {
    let FitState::Accelerated { attrs, handle } = state else {
        return Err(Error::Incompatible("no accelerated fit".to_string()));
    };
    let (query, exclude_self) = match args.x {
        Some(x) => {
            let query = x.as_native().ok_or_else(|| {
                Error::Incompatible(format!("{} queries are not supported", x.kind()))
            })?;
            (query, false)
        }
        None => (handle.fit_x().ok_or(Error::MissingAttribute("_fit_X"))?, true),
    };
    let requested = if exclude_self { k + 1 } else { k };
    let native = handle.kneighbors(query, requested, target)?;
    let dtype = attrs.dtype().promote(query.dtype());
    adapt_kneighbors(native, dtype, args.return_distance, exclude_self)
}

/// Query the reference implementation
pub(crate) fn reference_kneighbors(
    engines: &NeighborsEngines,
    state: &NeighborsState,
    args: &CallArgs<'_>,
    k: usize,
    estimator: &'static str,
) -> Result<KNeighbors> {
    let attrs = state.attrs().ok_or(Error::NotFitted(estimator))?;
    let query = Query {
        x: args.x,
        return_distance: args.return_distance,
        sort_results: false,
        assume_finite: config::get_config().assume_finite,
    };
    engines.reference.kneighbors(attrs, query, k)
}

fn fit_accelerated(
    this: &mut NearestNeighbors,
    args: &CallArgs<'_>,
    target: &ExecutionTarget,
) -> Result<CallOutput> {
    let x = training_data(args)?;
    let (plan, state) = fit_engine(&this.params, &this.engines, x, None, false, target)?;
    this.plan = Some(plan);
    this.state = state;
    Ok(CallOutput::Fitted)
}

fn fit_reference(this: &mut NearestNeighbors, args: &CallArgs<'_>) -> Result<CallOutput> {
    let x = training_data(args)?;
    let (plan, state) = fit_reference_state(&this.params, &this.engines, x)?;
    this.plan = Some(plan);
    this.state = state;
    Ok(CallOutput::Fitted)
}

fn kneighbors_accelerated(
    this: &mut NearestNeighbors,
    args: &CallArgs<'_>,
    target: &ExecutionTarget,
) -> Result<CallOutput> {
    let k = args.n_neighbors.unwrap_or(this.params.n_neighbors);
    engine_kneighbors(&this.state, args, k, target).map(CallOutput::Neighbors)
}

fn kneighbors_reference(this: &mut NearestNeighbors, args: &CallArgs<'_>) -> Result<CallOutput> {
    let k = args.n_neighbors.unwrap_or(this.params.n_neighbors);
    reference_kneighbors(
        &this.engines,
        &this.state,
        args,
        k,
        EstimatorKind::NearestNeighbors.name(),
    )
    .map(CallOutput::Neighbors)
}

fn radius_accelerated(
    this: &mut NearestNeighbors,
    args: &CallArgs<'_>,
    _target: &ExecutionTarget,
) -> Result<CallOutput> {
    radius_reference(this, args)
}

fn radius_reference(this: &mut NearestNeighbors, args: &CallArgs<'_>) -> Result<CallOutput> {
    // An accelerated authority is replaced by a reference fit over the same data.
    if let FitState::Accelerated { attrs, .. } = &this.state {
        let plan = this.plan.as_ref().ok_or(Error::MissingAttribute("_fit_method"))?;
        let attrs = this.engines.reference.fit(plan, &attrs.fit_x, true)?;
        debug!("radius_neighbors: rebuilding reference fit from accelerated attributes");
        this.state = FitState::Reference(attrs);
    }

    let attrs = this
        .state
        .attrs()
        .ok_or(Error::NotFitted(EstimatorKind::NearestNeighbors.name()))?;
    let query = Query {
        x: args.x,
        return_distance: args.return_distance,
        sort_results: args.sort_results,
        assume_finite: config::get_config().assume_finite,
    };
    let radius = args.radius.unwrap_or(this.params.radius);
    this.engines
        .reference
        .radius_neighbors(attrs, query, radius)
        .map(CallOutput::RadiusNeighbors)
}

/// Register the `NearestNeighbors` operations
pub(crate) fn register_builtin(registry: &mut PatchRegistry) {
    let kind = EstimatorKind::NearestNeighbors;
    registry.insert(
        Operation::new(kind, Method::Fit),
        ImplementationPair::<NearestNeighbors> {
            accelerated: fit_accelerated,
            reference: fit_reference,
        },
    );
    registry.insert(
        Operation::new(kind, Method::Kneighbors),
        ImplementationPair::<NearestNeighbors> {
            accelerated: kneighbors_accelerated,
            reference: kneighbors_reference,
        },
    );
    registry.insert(
        Operation::new(kind, Method::RadiusNeighbors),
        ImplementationPair::<NearestNeighbors> {
            accelerated: radius_accelerated,
            reference: radius_reference,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CsrMatrix, DType, DenseMatrix};
    use crate::dispatch::DispatchPath;
    use crate::registry::Selection;
    use approx::assert_relative_eq;

    fn six_points(dtype: DType) -> InputData {
        DenseMatrix::from_rows(&[
            vec![-1.0, -1.0],
            vec![-2.0, -1.0],
            vec![-3.0, -2.0],
            vec![1.0, 1.0],
            vec![2.0, 1.0],
            vec![3.0, 2.0],
        ])
        .unwrap()
        .to_dtype(dtype)
        .into()
    }

    fn path(nn: &NearestNeighbors) -> DispatchPath {
        nn.last_dispatch().unwrap().path
    }

    #[test]
    fn test_fit_accelerated_on_supported_input() {
        let x = six_points(DType::Float32);
        let mut nn = NearestNeighbors::new(Arc::new(PatchRegistry::patched())).with_n_neighbors(2);
        nn.fit(&x).unwrap();

        assert!(nn.is_accelerated());
        assert_eq!(path(&nn), DispatchPath::Accelerated);
        assert_eq!(nn.fit_method(), Some(Algorithm::KdTree));
        assert_eq!(nn.effective_metric().unwrap().metric, Metric::Euclidean);
        assert_eq!(nn.n_samples_fit(), Some(6));

        let result = nn.kneighbors(Some(&x), None, true).unwrap();
        assert_eq!(path(&nn), DispatchPath::Accelerated);
        let distances = result.distances.unwrap();
        assert_eq!(distances.shape(), (6, 2));
        assert_eq!(distances.dtype(), DType::Float32);
        assert_eq!(result.indices[0], vec![0, 1]);
    }

    #[test]
    fn test_sparse_fit_falls_back() {
        let x = InputData::from(
            CsrMatrix::from_sparse_rows(
                vec![(vec![0], vec![1.0]), (vec![1], vec![1.0]), (vec![0], vec![3.0])],
                2,
            )
            .unwrap(),
        );
        let mut nn = NearestNeighbors::new(Arc::new(PatchRegistry::patched())).with_n_neighbors(1);
        nn.fit(&x).unwrap();

        assert!(!nn.is_accelerated());
        assert_eq!(nn.fit_method(), Some(Algorithm::Brute));
        let record = nn.last_dispatch().unwrap();
        assert_eq!(record.path, DispatchPath::Reference);
        assert_eq!(record.reason.as_deref(), Some("sparse input"));

        let result = nn.kneighbors(None, None, false).unwrap();
        assert_eq!(path(&nn), DispatchPath::Reference);
        assert_eq!(result.indices, vec![vec![1], vec![0], vec![0]]);
    }

    #[test]
    fn test_reverted_registry_runs_reference() {
        let registry = Arc::new(PatchRegistry::patched());
        registry.revert(&Selection::All).unwrap();
        let mut nn = NearestNeighbors::new(registry).with_n_neighbors(2);
        nn.fit(&six_points(DType::Float64)).unwrap();

        assert!(!nn.is_accelerated());
        assert_eq!(path(&nn), DispatchPath::Unpatched);
    }

    #[test]
    fn test_engine_rejection_falls_back() {
        let engines = NeighborsEngines {
            accelerated: Arc::new(HostNeighborsEngine::new().with_max_samples(2)),
            ..NeighborsEngines::default()
        };
        let mut nn = NearestNeighbors::new(Arc::new(PatchRegistry::patched()))
            .with_n_neighbors(2)
            .with_engines(engines);
        nn.fit(&six_points(DType::Float64)).unwrap();

        assert!(!nn.is_accelerated());
        assert!(nn.is_fitted());
        assert_eq!(path(&nn), DispatchPath::Fallback);
    }

    #[test]
    fn test_accelerated_and_reference_agree() {
        let x = six_points(DType::Float64);
        let registry = Arc::new(PatchRegistry::patched());
        let mut accelerated = NearestNeighbors::new(registry.clone()).with_n_neighbors(3);
        accelerated.fit(&x).unwrap();
        let fast = accelerated.kneighbors(None, None, true).unwrap();

        let reverted = Arc::new(PatchRegistry::with_defaults());
        let mut reference = NearestNeighbors::new(reverted).with_n_neighbors(3);
        reference.fit(&x).unwrap();
        let slow = reference.kneighbors(None, None, true).unwrap();

        assert!(accelerated.is_accelerated());
        assert!(!reference.is_accelerated());
        assert_eq!(fast.indices, slow.indices);
        let (a, b) = (fast.distances.unwrap(), slow.distances.unwrap());
        assert_eq!(a.shape(), b.shape());
        for (x, y) in a.as_slice().iter().zip(b.as_slice()) {
            assert_relative_eq!(x, y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_too_many_neighbors_raises_reference_error() {
        let mut nn = NearestNeighbors::new(Arc::new(PatchRegistry::patched())).with_n_neighbors(2);
        let x = six_points(DType::Float64);
        nn.fit(&x).unwrap();

        match nn.kneighbors(Some(&x), Some(7), true) {
            Err(Error::InvalidParameter(msg)) => {
                assert!(msg.contains("n_samples_fit = 6"))
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(nn.is_accelerated());
    }

    #[test]
    fn test_radius_neighbors_demotes_to_reference() {
        let mut nn = NearestNeighbors::new(Arc::new(PatchRegistry::patched()))
            .with_n_neighbors(2)
            .with_radius(1.2);
        nn.fit(&six_points(DType::Float64)).unwrap();
        assert!(nn.is_accelerated());

        let result = nn.radius_neighbors(None, None, true, true).unwrap();
        assert_eq!(result.indices[0], vec![1]);
        assert!(!nn.is_accelerated());
        assert_eq!(path(&nn), DispatchPath::Reference);

        // Later queries are served by the reference fit.
        nn.kneighbors(None, Some(1), false).unwrap();
        assert_eq!(path(&nn), DispatchPath::Reference);
    }

    #[test]
    fn test_prebuilt_index_round_trip() {
        let mut source = NearestNeighbors::new(Arc::new(PatchRegistry::patched())).with_n_neighbors(2);
        source.fit(&six_points(DType::Float64)).unwrap();
        let index = source.to_index().unwrap();
        assert_eq!(index.method, Algorithm::KdTree);

        let mut nn = NearestNeighbors::new(Arc::new(PatchRegistry::patched())).with_n_neighbors(2);
        nn.fit(&InputData::from(index)).unwrap();
        assert!(!nn.is_accelerated());
        assert_eq!(nn.fit_method(), Some(Algorithm::KdTree));
        assert_eq!(nn.n_samples_fit(), Some(6));
    }

    #[test]
    fn test_unfitted_queries_fail() {
        let mut nn = NearestNeighbors::new(Arc::new(PatchRegistry::patched()));
        assert!(matches!(
            nn.kneighbors(None, None, true),
            Err(Error::NotFitted("NearestNeighbors"))
        ));
        assert!(nn.to_index().is_err());
    }
}
