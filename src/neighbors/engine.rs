//! Neighbors engines
//!
//! [`NeighborsEngine`] is the accelerated collaborator: it builds a
//! [`NeighborsModel`] from native parameters and answers queries in the native
//! result layout. [`NeighborsReference`] is the reference implementation whose
//! contract (shapes, dtypes, errors) the dispatcher preserves.

use crate::config::ExecutionTarget;
use crate::core::{DType, DenseMatrix, Error, InputData, Result};
use crate::neighbors::adapter::{drop_self, KNeighbors, RadiusNeighbors};
use crate::neighbors::{Algorithm, EffectiveMetric, FitPlan, Metric, MetricParams, NativeNeighborsParams};
use log::debug;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

/// Raw k-NN result in the engine layout
///
/// Row-major `n_queries x k`; indices are encoded as `f64` the way native
/// engines return them.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeNeighbors {
    pub distances: Vec<f64>,
    pub indices: Vec<f64>,
    pub n_queries: usize,
    pub k: usize,
}

/// Accelerated neighbors engine
pub trait NeighborsEngine: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Build a model over `x`; `y` holds encoded class indices for classifiers
    ///
    /// Inputs the engine cannot handle are reported as `Error::Incompatible`.
    fn fit(
        &self,
        params: &NativeNeighborsParams,
        x: &DenseMatrix,
        y: Option<&[f64]>,
        target: &ExecutionTarget,
    ) -> Result<Box<dyn NeighborsModel>>;
}

/// Fitted engine-side model with named attributes
pub trait NeighborsModel: Send + Sync + fmt::Debug {
    fn kneighbors(
        &self,
        x: &DenseMatrix,
        k: usize,
        target: &ExecutionTarget,
    ) -> Result<NativeNeighbors>;

    /// Column of encoded class indices
    fn predict(&self, x: &DenseMatrix, target: &ExecutionTarget) -> Result<DenseMatrix>;

    fn fit_x(&self) -> Option<&DenseMatrix>;

    fn n_samples_fit(&self) -> Option<usize>;

    fn fit_method(&self) -> Option<Algorithm>;
}

/// Reference-side fitted attributes
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborsFit {
    /// Dense or sparse training data
    pub fit_x: InputData,
    pub n_samples_fit: usize,
    pub n_features_in: usize,
    pub fit_method: Algorithm,
    pub effective: EffectiveMetric,
}

impl NeighborsFit {
    /// Element type of fitted data as seen by results
    pub fn dtype(&self) -> DType {
        match &self.fit_x {
            InputData::Dense(m) => m.dtype(),
            _ => DType::Float64,
        }
    }
}

/// Query side of a reference neighbors call
#[derive(Debug, Clone, Copy, Default)]
pub struct Query<'a> {
    /// `None` queries the training set, excluding each sample itself
    pub x: Option<&'a InputData>,
    pub return_distance: bool,
    pub sort_results: bool,
    pub assume_finite: bool,
}

/// Reference neighbors implementation
pub trait NeighborsReference: Send + Sync + fmt::Debug {
    fn fit(&self, plan: &FitPlan, x: &InputData, assume_finite: bool) -> Result<NeighborsFit>;

    fn kneighbors(&self, fit: &NeighborsFit, query: Query<'_>, k: usize) -> Result<KNeighbors>;

    fn radius_neighbors(
        &self,
        fit: &NeighborsFit,
        query: Query<'_>,
        radius: f64,
    ) -> Result<RadiusNeighbors>;
}

/// Majority vote over neighbor class codes
///
/// With distance weighting a neighbor counts `1 / d`; neighbors at distance
/// zero take all the weight. Ties go to the smallest code.
pub(crate) fn weighted_vote(
    codes: &[usize],
    distances: &[f64],
    n_classes: usize,
    distance_weighted: bool,
) -> usize {
    let mut scores = vec![0.0; n_classes.max(1)];
    let exact = distance_weighted && distances.iter().any(|&d| d == 0.0);

    for (&code, &d) in codes.iter().zip(distances) {
        let weight = if !distance_weighted {
            1.0
        } else if exact {
            if d == 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            1.0 / d
        };
        if let Some(score) = scores.get_mut(code) {
            *score += weight;
        }
    }

    let mut best = 0;
    for (code, &score) in scores.iter().enumerate() {
        if score > scores[best] {
            best = code;
        }
    }
    best
}

fn by_distance(a: &(f64, usize), b: &(f64, usize)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

/// In-process accelerated engine
#[derive(Debug, Clone)]
pub struct HostNeighborsEngine {
    max_samples: usize,
}

impl Default for HostNeighborsEngine {
    fn default() -> Self {
        Self {
            max_samples: 1 << 20,
        }
    }
}

impl HostNeighborsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Largest training set the engine accepts
    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples;
        self
    }
}

impl NeighborsEngine for HostNeighborsEngine {
    fn name(&self) -> &'static str {
        "host"
    }

    fn fit(
        &self,
        params: &NativeNeighborsParams,
        x: &DenseMatrix,
        y: Option<&[f64]>,
        target: &ExecutionTarget,
    ) -> Result<Box<dyn NeighborsModel>> {
        if x.rows() > self.max_samples {
            return Err(Error::Incompatible(format!(
                "{} samples exceed the engine limit of {}",
                x.rows(),
                self.max_samples
            )));
        }
        if !x.is_finite() {
            return Err(Error::Incompatible(
                "input contains NaN or infinity".to_string(),
            ));
        }
        match params.metric {
            Metric::Euclidean
            | Metric::Manhattan
            | Metric::Chebyshev
            | Metric::Minkowski
            | Metric::Cosine => {}
            other => {
                return Err(Error::Incompatible(format!(
                    "metric '{other}' not implemented by the engine"
                )))
            }
        }
        if !matches!(params.algorithm, Algorithm::KdTree | Algorithm::Brute) {
            return Err(Error::Incompatible(format!(
                "algorithm '{}' not implemented by the engine",
                params.algorithm
            )));
        }

        let labels = match y {
            Some(y) if y.len() != x.rows() => {
                return Err(Error::Incompatible(format!(
                    "{} labels for {} samples",
                    y.len(),
                    x.rows()
                )))
            }
            Some(y) => Some(
                y.iter()
                    .map(|&code| {
                        if code >= 0.0 && code.fract() == 0.0 {
                            Ok(code as usize)
                        } else {
                            Err(Error::Incompatible(format!("invalid class code {code}")))
                        }
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };

        debug!(
            "host engine: fitting {} x {} on {target} ({}, {})",
            x.rows(),
            x.cols(),
            params.algorithm,
            params.metric
        );

        let metric = EffectiveMetric {
            metric: params.metric,
            params: MetricParams { p: params.p },
        };
        let n_classes = labels
            .as_ref()
            .and_then(|codes| codes.iter().max())
            .map_or(0, |&max| max + 1);

        Ok(Box::new(HostNeighborsModel {
            params: params.clone(),
            metric,
            fit_x: x.clone(),
            labels,
            n_classes,
        }))
    }
}

#[derive(Debug)]
struct HostNeighborsModel {
    params: NativeNeighborsParams,
    metric: EffectiveMetric,
    fit_x: DenseMatrix,
    labels: Option<Vec<usize>>,
    n_classes: usize,
}

impl HostNeighborsModel {
    fn nearest(&self, query: &[f64], k: usize) -> Vec<(f64, usize)> {
        let mut pairs: Vec<(f64, usize)> = (0..self.fit_x.rows())
            .map(|j| (self.metric.distance(query, self.fit_x.row(j)), j))
            .collect();
        if k < pairs.len() {
            pairs.select_nth_unstable_by(k, by_distance);
            pairs.truncate(k);
        }
        pairs.sort_by(by_distance);
        pairs
    }

    fn check_query(&self, x: &DenseMatrix, k: usize) -> Result<()> {
        if x.cols() != self.fit_x.cols() {
            return Err(Error::Incompatible(format!(
                "query has {} features, model has {}",
                x.cols(),
                self.fit_x.cols()
            )));
        }
        if k == 0 || k > self.fit_x.rows() {
            return Err(Error::Incompatible(format!(
                "cannot return {k} neighbors from {} samples",
                self.fit_x.rows()
            )));
        }
        if !x.is_finite() {
            return Err(Error::Incompatible(
                "query contains NaN or infinity".to_string(),
            ));
        }
        Ok(())
    }
}

impl NeighborsModel for HostNeighborsModel {
    fn kneighbors(
        &self,
        x: &DenseMatrix,
        k: usize,
        target: &ExecutionTarget,
    ) -> Result<NativeNeighbors> {
        self.check_query(x, k)?;
        debug!("host engine: {} queries, k = {k} on {target}", x.rows());

        let mut distances = Vec::with_capacity(x.rows() * k);
        let mut indices = Vec::with_capacity(x.rows() * k);
        for i in 0..x.rows() {
            for (d, j) in self.nearest(x.row(i), k) {
                distances.push(d);
                indices.push(j as f64);
            }
        }

        Ok(NativeNeighbors {
            distances,
            indices,
            n_queries: x.rows(),
            k,
        })
    }

    fn predict(&self, x: &DenseMatrix, target: &ExecutionTarget) -> Result<DenseMatrix> {
        let labels = self
            .labels
            .as_ref()
            .ok_or(Error::MissingAttribute("_y"))?;
        let k = self.params.n_neighbors;
        self.check_query(x, k)?;
        debug!("host engine: predicting {} rows on {target}", x.rows());

        let codes = (0..x.rows())
            .map(|i| {
                let nearest = self.nearest(x.row(i), k);
                let codes: Vec<usize> = nearest.iter().map(|&(_, j)| labels[j]).collect();
                let distances: Vec<f64> = nearest.iter().map(|&(d, _)| d).collect();
                weighted_vote(
                    &codes,
                    &distances,
                    self.n_classes,
                    self.params.distance_weighted,
                ) as f64
            })
            .collect();

        Ok(DenseMatrix::column(codes, DType::Float64))
    }

    fn fit_x(&self) -> Option<&DenseMatrix> {
        Some(&self.fit_x)
    }

    fn n_samples_fit(&self) -> Option<usize> {
        Some(self.fit_x.rows())
    }

    fn fit_method(&self) -> Option<Algorithm> {
        Some(self.params.algorithm)
    }
}

/// Exhaustive reference search over dense or sparse data
#[derive(Debug, Clone, Copy, Default)]
pub struct BruteForceReference;

fn input_row(x: &InputData, i: usize) -> Cow<'_, [f64]> {
    match x {
        InputData::Dense(m) => Cow::Borrowed(m.row(i)),
        InputData::Sparse(m) => Cow::Owned(m.dense_row(i)),
        InputData::Index(index) => Cow::Borrowed(index.data.row(i)),
    }
}

fn input_dtype(x: &InputData) -> DType {
    match x {
        InputData::Dense(m) => m.dtype(),
        InputData::Index(index) => index.data.dtype(),
        InputData::Sparse(_) => DType::Float64,
    }
}

impl BruteForceReference {
    /// Resolve the query set and check it against the fitted data
    fn query_set<'a>(
        &self,
        fit: &'a NeighborsFit,
        query: &Query<'a>,
    ) -> Result<(&'a InputData, bool)> {
        let Some(x) = query.x else {
            return Ok((&fit.fit_x, true));
        };
        if x.n_features() != fit.n_features_in {
            return Err(Error::DimensionMismatch {
                expected: fit.n_features_in,
                actual: x.n_features(),
            });
        }
        if !query.assume_finite && !x.is_finite() {
            return Err(Error::NonFinite);
        }
        Ok((x, false))
    }

    fn distances_from(&self, fit: &NeighborsFit, row: &[f64]) -> Vec<(f64, usize)> {
        (0..fit.n_samples_fit)
            .map(|j| (fit.effective.distance(row, &input_row(&fit.fit_x, j)), j))
            .collect()
    }
}

impl NeighborsReference for BruteForceReference {
    fn fit(&self, plan: &FitPlan, x: &InputData, assume_finite: bool) -> Result<NeighborsFit> {
        let fit_x = match x {
            InputData::Dense(m) if !m.dtype().is_floating() => {
                InputData::Dense(m.to_dtype(DType::Float64))
            }
            InputData::Index(index) => InputData::Dense(index.data.clone()),
            other => other.clone(),
        };

        if fit_x.n_samples() == 0 {
            return Err(Error::EmptyDataset);
        }
        if fit_x.n_features() == 0 {
            return Err(Error::InvalidInput(format!(
                "Found array with 0 feature(s) (shape=({}, 0)) while a minimum of 1 is required",
                fit_x.n_samples()
            )));
        }
        if !assume_finite && !fit_x.is_finite() {
            return Err(Error::NonFinite);
        }

        Ok(NeighborsFit {
            n_samples_fit: fit_x.n_samples(),
            n_features_in: fit_x.n_features(),
            fit_x,
            fit_method: plan.fit_method,
            effective: plan.effective,
        })
    }

    fn kneighbors(&self, fit: &NeighborsFit, query: Query<'_>, k: usize) -> Result<KNeighbors> {
        let (x, is_training_set) = self.query_set(fit, &query)?;
        let requested = if is_training_set { k + 1 } else { k };

        if k == 0 {
            return Err(Error::InvalidParameter(format!(
                "Expected n_neighbors > 0. Got {k}"
            )));
        }
        if requested > fit.n_samples_fit {
            return Err(Error::InvalidParameter(format!(
                "Expected n_neighbors <= n_samples_fit, but n_samples_fit = {}, n_neighbors = {}",
                fit.n_samples_fit, requested
            )));
        }

        let mut rows: Vec<Vec<(f64, usize)>> = (0..x.n_samples())
            .map(|i| {
                let mut pairs = self.distances_from(fit, &input_row(x, i));
                pairs.sort_by(by_distance);
                pairs.truncate(requested);
                pairs
            })
            .collect();

        if is_training_set {
            drop_self(&mut rows);
        }

        let dtype = fit.dtype().promote(input_dtype(x));
        KNeighbors::from_rows(rows, dtype, query.return_distance)
    }

    fn radius_neighbors(
        &self,
        fit: &NeighborsFit,
        query: Query<'_>,
        radius: f64,
    ) -> Result<RadiusNeighbors> {
        if query.sort_results && !query.return_distance {
            return Err(Error::InvalidParameter(
                "return_distance must be True if sort_results is True.".to_string(),
            ));
        }
        if radius.is_nan() || radius < 0.0 {
            return Err(Error::InvalidParameter(format!(
                "radius must be a non-negative number, got {radius}"
            )));
        }
        let (x, is_training_set) = self.query_set(fit, &query)?;
        let dtype = fit.dtype().promote(input_dtype(x));

        let rows: Vec<Vec<(f64, usize)>> = (0..x.n_samples())
            .map(|i| {
                let mut pairs: Vec<_> = self
                    .distances_from(fit, &input_row(x, i))
                    .into_iter()
                    .filter(|&(d, j)| d <= radius && !(is_training_set && j == i))
                    .collect();
                if query.sort_results {
                    pairs.sort_by(by_distance);
                }
                pairs
            })
            .collect();

        Ok(RadiusNeighbors::from_rows(rows, dtype, query.return_distance))
    }
}
