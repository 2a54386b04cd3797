//! Capability rules for the neighbors estimators

use crate::config::TargetClass;
use crate::core::InputData;
use crate::dispatch::Verdict;
use crate::neighbors::engine::NeighborsFit;
use crate::neighbors::{Algorithm, FitPlan, Metric, NeighborsParams};

/// Metrics the accelerated brute-force search implements
pub const BRUTE_METRICS: &[Metric] = &[
    Metric::Manhattan,
    Metric::Minkowski,
    Metric::Euclidean,
    Metric::Chebyshev,
    Metric::Cosine,
];

/// Whether the accelerated engine can fit `x` under `params`
///
/// On the CPU class a kd-tree over euclidean distances or a brute-force
/// search over [`BRUTE_METRICS`] is accepted. Devices only run brute force.
pub fn fit_verdict(class: TargetClass, params: &NeighborsParams, x: Option<&InputData>) -> Verdict {
    let Some(x) = x else {
        return Verdict::Unsupported("no training data");
    };
    let plan = FitPlan::resolve(params, x).ok();
    let combination = plan.as_ref().map_or(false, |plan| {
        let metric = plan.effective.metric;
        match plan.fit_method {
            Algorithm::KdTree => class == TargetClass::Cpu && metric == Metric::Euclidean,
            Algorithm::Brute => BRUTE_METRICS.contains(&metric),
            _ => false,
        }
    });

    Verdict::all(&[
        (!matches!(x, InputData::Index(_)), "pre-built index input"),
        (!x.is_sparse(), "sparse input"),
        (x.as_native().is_some(), "input is not floating point"),
        (plan.is_some(), "invalid neighbors configuration"),
        (combination, "algorithm and metric combination not supported"),
    ])
}

/// Whether the accelerated model can answer a k-neighbors query
///
/// Holds on every target class once an accelerated fit exists; a query on
/// the training set (`x = None`) needs one extra neighbor.
pub fn kneighbors_verdict(
    attrs: Option<&NeighborsFit>,
    accelerated: bool,
    x: Option<&InputData>,
    n_neighbors: usize,
) -> Verdict {
    let n_samples_fit = attrs.map_or(0, |attrs| attrs.n_samples_fit);
    let n_features_in = attrs.map(|attrs| attrs.n_features_in);
    let requested = if x.is_none() {
        n_neighbors + 1
    } else {
        n_neighbors
    };

    Verdict::all(&[
        (accelerated, "no accelerated fit"),
        (
            x.map_or(true, |x| x.as_native().is_some()),
            "query is not dense floating point",
        ),
        (
            x.map_or(true, |x| Some(x.n_features()) == n_features_in),
            "query feature count differs from the fit",
        ),
        (
            n_neighbors > 0 && requested <= n_samples_fit,
            "n_neighbors exceeds the fitted samples",
        ),
    ])
}

/// Radius queries have no accelerated implementation
pub fn radius_verdict() -> Verdict {
    Verdict::Unsupported("radius queries run on the reference")
}

/// Labels the classifier can hand to the engine
pub fn labels_verdict(
    class: TargetClass,
    x: Option<&InputData>,
    y: Option<&[f64]>,
    distance_weighted: bool,
) -> Verdict {
    let n_samples = x.map(InputData::n_samples);
    Verdict::all(&[
        (y.is_some(), "no labels"),
        (
            y.map_or(false, |y| y.iter().all(|v| v.is_finite())),
            "labels contain NaN or infinity",
        ),
        (y.map(<[f64]>::len) == n_samples, "label count differs from sample count"),
        (
            class == TargetClass::Cpu || !distance_weighted,
            "distance weighting on a device",
        ),
    ])
}
