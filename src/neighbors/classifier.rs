//! k-nearest-neighbors classification facade

use crate::config::{self, ExecutionTarget, TargetClass};
use crate::core::{Dispatch, Error, FitState, InputData, Result};
use crate::dispatch::{dispatch, CallArgs, CallOutput, DispatchRecord, Verdict};
use crate::neighbors::adapter::decode_classes;
use crate::neighbors::engine::{weighted_vote, Query};
use crate::neighbors::unsupervised::{
    engine_kneighbors, fit_engine, fit_reference_state, reference_kneighbors, training_data,
    unexpected_output, NeighborsState,
};
use crate::neighbors::{predicate, Algorithm, KNeighbors, Metric, NeighborsEngines, NeighborsFit, NeighborsParams};
use crate::registry::{EstimatorKind, ImplementationPair, Method, Operation, PatchRegistry};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Vote weighting of the neighbors of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Weights {
    #[default]
    Uniform,
    /// Weight by inverse distance
    Distance,
}

impl Weights {
    pub fn name(self) -> &'static str {
        match self {
            Weights::Uniform => "uniform",
            Weights::Distance => "distance",
        }
    }
}

impl fmt::Display for Weights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Weights {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uniform" => Ok(Weights::Uniform),
            "distance" => Ok(Weights::Distance),
            _ => Err(Error::InvalidParameter(format!(
                "weights not recognized: should be 'uniform' or 'distance', got '{s}'"
            ))),
        }
    }
}

/// Sorted distinct labels and each sample's position among them
#[derive(Debug, Clone, PartialEq)]
struct EncodedLabels {
    classes: Vec<f64>,
    codes: Vec<usize>,
}

impl EncodedLabels {
    fn encode(y: &[f64]) -> Result<Self> {
        if !y.iter().all(|v| v.is_finite()) {
            return Err(Error::NonFinite);
        }
        let mut classes = y.to_vec();
        classes.sort_by(f64::total_cmp);
        classes.dedup();

        let codes = y
            .iter()
            .map(|label| {
                classes
                    .binary_search_by(|c| c.total_cmp(label))
                    .map_err(|_| Error::InvalidInput(format!("label {label} not encoded")))
            })
            .collect::<Result<_>>()?;
        Ok(Self { classes, codes })
    }

    fn codes_as_f64(&self) -> Vec<f64> {
        self.codes.iter().map(|&c| c as f64).collect()
    }
}

/// Classifier voting among the k nearest training samples
#[derive(Debug)]
pub struct KNeighborsClassifier {
    params: NeighborsParams,
    weights: Weights,
    registry: Arc<PatchRegistry>,
    engines: NeighborsEngines,
    state: NeighborsState,
    labels: Option<EncodedLabels>,
    last_dispatch: Option<DispatchRecord>,
}

impl KNeighborsClassifier {
    pub fn new(registry: Arc<PatchRegistry>) -> Self {
        Self {
            params: NeighborsParams::default(),
            weights: Weights::default(),
            registry,
            engines: NeighborsEngines::default(),
            state: FitState::Unfitted,
            labels: None,
            last_dispatch: None,
        }
    }

    pub fn with_n_neighbors(mut self, n_neighbors: usize) -> Self {
        self.params.n_neighbors = n_neighbors;
        self
    }

    pub fn with_weights(mut self, weights: Weights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.params.algorithm = algorithm;
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

    pub fn with_engines(mut self, engines: NeighborsEngines) -> Self {
        self.engines = engines;
        self
    }

    pub fn fit(&mut self, x: &InputData, y: &[f64]) -> Result<()> {
        self.fit_on(x, y, None)
    }

    pub fn fit_on(&mut self, x: &InputData, y: &[f64], target: Option<ExecutionTarget>) -> Result<()> {
        let args = CallArgs::new().with_x(x).with_y(y).with_target(target);
        dispatch(self, Method::Fit, &args).map(|_| ())
    }

    /// Predicted class label for each row of `x`
    pub fn predict(&mut self, x: &InputData) -> Result<Vec<f64>> {
        self.predict_on(x, None)
    }

    pub fn predict_on(&mut self, x: &InputData, target: Option<ExecutionTarget>) -> Result<Vec<f64>> {
        let args = CallArgs::new().with_x(x).with_target(target);
        match dispatch(self, Method::Predict, &args)? {
            CallOutput::Predictions(labels) => Ok(labels),
            other => Err(unexpected_output(Method::Predict, &other)),
        }
    }

    pub fn kneighbors(
        &mut self,
        x: Option<&InputData>,
        n_neighbors: Option<usize>,
        return_distance: bool,
    ) -> Result<KNeighbors> {
        let args = CallArgs {
            x,
            n_neighbors,
            return_distance,
            ..CallArgs::default()
        };
        match dispatch(self, Method::Kneighbors, &args)? {
            CallOutput::Neighbors(result) => Ok(result),
            other => Err(unexpected_output(Method::Kneighbors, &other)),
        }
    }

    /// Distinct training labels in sorted order
    pub fn classes(&self) -> Option<&[f64]> {
        self.labels.as_ref().map(|labels| labels.classes.as_slice())
    }

    pub fn fit_attrs(&self) -> Option<&NeighborsFit> {
        self.state.attrs()
    }

    pub fn is_accelerated(&self) -> bool {
        self.state.is_accelerated()
    }

    pub fn last_dispatch(&self) -> Option<&DispatchRecord> {
        self.last_dispatch.as_ref()
    }

    fn distance_weighted(&self) -> bool {
        self.weights == Weights::Distance
    }
}

impl Dispatch for KNeighborsClassifier {
    const KIND: EstimatorKind = EstimatorKind::KNeighborsClassifier;

    fn registry(&self) -> &PatchRegistry {
        &self.registry
    }

    fn supports(&self, class: TargetClass, method: Method, args: &CallArgs<'_>) -> Result<Verdict> {
        let k = args.n_neighbors.unwrap_or(self.params.n_neighbors);
        let query = || {
            predicate::kneighbors_verdict(
                self.state.attrs(),
                self.state.is_accelerated(),
                args.x,
                k,
            )
        };
        match method {
            Method::Fit => {
                let data = predicate::fit_verdict(class, &self.params, args.x);
                if !data.is_supported() {
                    return Ok(data);
                }
                Ok(predicate::labels_verdict(
                    class,
                    args.x,
                    args.y,
                    self.distance_weighted(),
                ))
            }
            Method::Predict if args.x.is_none() => Ok(Verdict::Unsupported("no query data")),
            Method::Predict | Method::Kneighbors => Ok(query()),
            Method::RadiusNeighbors => Err(Error::UnknownMethod {
                estimator: Self::KIND.name().to_string(),
                method: method.name().to_string(),
            }),
        }
    }

    fn discard_fitted(&mut self) {
        self.state = FitState::Unfitted;
        self.labels = None;
        self.last_dispatch = None;
    }

    fn record_dispatch(&mut self, record: DispatchRecord) {
        self.last_dispatch = Some(record);
    }
}

fn labels_arg<'a>(args: &CallArgs<'a>, n_samples: usize) -> Result<&'a [f64]> {
    let y = args
        .y
        .ok_or_else(|| Error::InvalidInput("fit requires labels".to_string()))?;
    if y.len() != n_samples {
        return Err(Error::DimensionMismatch {
            expected: n_samples,
            actual: y.len(),
        });
    }
    Ok(y)
}

fn fit_accelerated(
    this: &mut KNeighborsClassifier,
    args: &CallArgs<'_>,
    target: &ExecutionTarget,
) -> Result<CallOutput> {
    let x = training_data(args)?;
    let labels = EncodedLabels::encode(labels_arg(args, x.n_samples())?)?;
    let codes = labels.codes_as_f64();
    let (_, state) = fit_engine(
        &this.params,
        &this.engines,
        x,
        Some(&codes),
        this.distance_weighted(),
        target,
    )?;
    this.state = state;
    this.labels = Some(labels);
    Ok(CallOutput::Fitted)
}

fn fit_reference(this: &mut KNeighborsClassifier, args: &CallArgs<'_>) -> Result<CallOutput> {
    let x = training_data(args)?;
    let labels = EncodedLabels::encode(labels_arg(args, x.n_samples())?)?;
    let (_, state) = fit_reference_state(&this.params, &this.engines, x)?;
    this.state = state;
    this.labels = Some(labels);
    Ok(CallOutput::Fitted)
}

fn fitted_labels(this: &KNeighborsClassifier) -> Result<&EncodedLabels> {
    this.labels
        .as_ref()
        .ok_or(Error::NotFitted(EstimatorKind::KNeighborsClassifier.name()))
}

fn predict_accelerated(
    this: &mut KNeighborsClassifier,
    args: &CallArgs<'_>,
    target: &ExecutionTarget,
) -> Result<CallOutput> {
    let labels = fitted_labels(this)?;
    let handle = this
        .state
        .handle()
        .ok_or_else(|| Error::Incompatible("no accelerated fit".to_string()))?;
    let query = args
        .x
        .and_then(InputData::as_native)
        .ok_or_else(|| Error::Incompatible("query is not dense floating point".to_string()))?;
    let column = handle.predict(query, target)?;
    decode_classes(column, &labels.classes).map(CallOutput::Predictions)
}

fn predict_reference(this: &mut KNeighborsClassifier, args: &CallArgs<'_>) -> Result<CallOutput> {
    let labels = fitted_labels(this)?;
    let attrs = this
        .state
        .attrs()
        .ok_or(Error::NotFitted(EstimatorKind::KNeighborsClassifier.name()))?;
    let x = args
        .x
        .ok_or_else(|| Error::InvalidInput("predict requires query data".to_string()))?;
    let query = Query {
        x: Some(x),
        return_distance: true,
        sort_results: false,
        assume_finite: config::get_config().assume_finite,
    };
    let neighbors = this
        .engines
        .reference
        .kneighbors(attrs, query, this.params.n_neighbors)?;
    let distances = neighbors
        .distances
        .ok_or(Error::MissingAttribute("distances"))?;

    let predictions = neighbors
        .indices
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let codes: Vec<usize> = row.iter().map(|&j| labels.codes[j]).collect();
            let d = distances.row(i);
            let code = weighted_vote(&codes, d, labels.classes.len(), this.distance_weighted());
            labels.classes[code]
        })
        .collect();
    Ok(CallOutput::Predictions(predictions))
}

fn kneighbors_accelerated(
    this: &mut KNeighborsClassifier,
    args: &CallArgs<'_>,
    target: &ExecutionTarget,
) -> Result<CallOutput> {
    let k = args.n_neighbors.unwrap_or(this.params.n_neighbors);
    engine_kneighbors(&this.state, args, k, target).map(CallOutput::Neighbors)
}

fn kneighbors_reference(this: &mut KNeighborsClassifier, args: &CallArgs<'_>) -> Result<CallOutput> {
    let k = args.n_neighbors.unwrap_or(this.params.n_neighbors);
    reference_kneighbors(
        &this.engines,
        &this.state,
        args,
        k,
        EstimatorKind::KNeighborsClassifier.name(),
    )
    .map(CallOutput::Neighbors)
}

/// Register the `KNeighborsClassifier` operations
pub(crate) fn register_builtin(registry: &mut PatchRegistry) {
    let kind = EstimatorKind::KNeighborsClassifier;
    registry.insert(
        Operation::new(kind, Method::Fit),
        ImplementationPair::<KNeighborsClassifier> {
            accelerated: fit_accelerated,
            reference: fit_reference,
        },
    );
    registry.insert(
        Operation::new(kind, Method::Predict),
        ImplementationPair::<KNeighborsClassifier> {
            accelerated: predict_accelerated,
            reference: predict_reference,
        },
    );
    registry.insert(
        Operation::new(kind, Method::Kneighbors),
        ImplementationPair::<KNeighborsClassifier> {
            accelerated: kneighbors_accelerated,
            reference: kneighbors_reference,
        },
    );
}
