//! Neighbors configuration and its translation to engine parameters

use crate::core::{Error, InputData, Result};
use crate::neighbors::{effective_metric, resolve_algorithm, Algorithm, EffectiveMetric, Metric, MetricParams};

/// User-facing neighbors configuration, fixed for the duration of a call
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborsParams {
    pub n_neighbors: usize,
    pub radius: f64,
    pub algorithm: Algorithm,
    pub leaf_size: usize,
    pub metric: Metric,
    pub p: Option<f64>,
    pub metric_params: MetricParams,
}

impl Default for NeighborsParams {
    fn default() -> Self {
        Self {
            n_neighbors: 5,
            radius: 1.0,
            algorithm: Algorithm::Auto,
            leaf_size: 30,
            metric: Metric::Minkowski,
            p: Some(2.0),
            metric_params: MetricParams::default(),
        }
    }
}

/// Decisions taken once per fit and shared by the predicate and both paths
#[derive(Debug, Clone, PartialEq)]
pub struct FitPlan {
    pub effective: EffectiveMetric,
    pub fit_method: Algorithm,
    pub n_samples: usize,
    pub n_features: usize,
}

impl FitPlan {
    /// Validate the configuration against `x` and resolve metric and strategy
    pub fn resolve(params: &NeighborsParams, x: &InputData) -> Result<Self> {
        if params.n_neighbors == 0 {
            return Err(Error::InvalidParameter(format!(
                "Expected n_neighbors > 0. Got {}",
                params.n_neighbors
            )));
        }

        let effective = effective_metric(params.metric, params.p, &params.metric_params)?;
        let n_samples = x.n_samples();
        let n_features = x.n_features();
        if n_samples == 0 {
            return Err(Error::EmptyDataset);
        }
        if n_features == 0 {
            return Err(Error::InvalidInput(format!(
                "Found array with 0 feature(s) (shape=({n_samples}, 0)) while a minimum of 1 is required"
            )));
        }

        let fit_method = match x {
            InputData::Index(index) => index.method,
            // Trees cannot be built over sparse rows.
            InputData::Sparse(_) => Algorithm::Brute,
            InputData::Dense(_) => resolve_algorithm(
                params.algorithm,
                effective.metric,
                n_samples,
                n_features,
                Some(params.n_neighbors),
            ),
        };

        if !effective.metric.valid_for(fit_method) {
            return Err(Error::InvalidParameter(format!(
                "Metric '{}' not valid for algorithm '{}'",
                effective.metric, fit_method
            )));
        }

        Ok(Self {
            effective,
            fit_method,
            n_samples,
            n_features,
        })
    }
}

/// Parameters in the accelerated engine's vocabulary
#[derive(Debug, Clone, PartialEq)]
pub struct NativeNeighborsParams {
    pub n_neighbors: usize,
    pub algorithm: Algorithm,
    pub metric: Metric,
    /// Only present for a minkowski metric of unusual order
    pub p: Option<f64>,
    pub distance_weighted: bool,
}

/// Build engine parameters; fails when the fit plan has not been resolved
pub fn translate(params: &NeighborsParams, plan: Option<&FitPlan>) -> Result<NativeNeighborsParams> {
    let plan = plan.ok_or(Error::MissingAttribute("effective_metric_"))?;
    Ok(NativeNeighborsParams {
        n_neighbors: params.n_neighbors,
        algorithm: plan.fit_method,
        metric: plan.effective.metric,
        p: plan.effective.p(),
        distance_weighted: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CsrMatrix, DenseMatrix, PrebuiltIndex};

    fn six_points() -> InputData {
        DenseMatrix::from_rows(&[
            vec![-1.0, -1.0],
            vec![-2.0, -1.0],
            vec![-3.0, -2.0],
            vec![1.0, 1.0],
            vec![2.0, 1.0],
            vec![3.0, 2.0],
        ])
        .unwrap()
        .into()
    }

    fn with_p(p: f64) -> NeighborsParams {
        NeighborsParams {
            p: Some(p),
            ..NeighborsParams::default()
        }
    }

    #[test]
    fn test_translate_metric_orders() {
        let x = six_points();
        let cases = [
            (1.0, Metric::Manhattan, None),
            (2.0, Metric::Euclidean, None),
            (f64::INFINITY, Metric::Chebyshev, None),
            (3.0, Metric::Minkowski, Some(3.0)),
        ];
        for (p, metric, native_p) in cases {
            let params = with_p(p);
            let plan = FitPlan::resolve(&params, &x).unwrap();
            let native = translate(&params, Some(&plan)).unwrap();
            assert_eq!(native.metric, metric, "p = {p}");
            assert_eq!(native.p, native_p, "p = {p}");
        }
    }

    #[test]
    fn test_translate_requires_plan() {
        let result = translate(&NeighborsParams::default(), None);
        assert!(matches!(
            result,
            Err(Error::MissingAttribute("effective_metric_"))
        ));
    }

    #[test]
    fn test_plan_for_default_scenario() {
        let params = NeighborsParams {
            n_neighbors: 2,
            ..NeighborsParams::default()
        };
        let plan = FitPlan::resolve(&params, &six_points()).unwrap();
        assert_eq!(plan.fit_method, Algorithm::KdTree);
        assert_eq!(plan.effective.metric, Metric::Euclidean);
        assert_eq!((plan.n_samples, plan.n_features), (6, 2));
    }

    #[test]
    fn test_plan_sparse_forces_brute() {
        let x = InputData::from(
            CsrMatrix::from_sparse_rows(vec![(vec![0], vec![1.0]), (vec![1], vec![2.0])], 2)
                .unwrap(),
        );
        let params = NeighborsParams {
            n_neighbors: 1,
            algorithm: Algorithm::KdTree,
            ..NeighborsParams::default()
        };
        assert_eq!(FitPlan::resolve(&params, &x).unwrap().fit_method, Algorithm::Brute);
    }

    #[test]
    fn test_plan_takes_method_from_index() {
        let data = DenseMatrix::from_rows(&[vec![0.0], vec![1.0]]).unwrap();
        let x = InputData::from(PrebuiltIndex {
            data,
            method: Algorithm::BallTree,
        });
        let plan = FitPlan::resolve(&NeighborsParams::default(), &x).unwrap();
        assert_eq!(plan.fit_method, Algorithm::BallTree);
    }

    #[test]
    fn test_plan_rejects_invalid_configuration() {
        let zero = NeighborsParams {
            n_neighbors: 0,
            ..NeighborsParams::default()
        };
        assert!(matches!(
            FitPlan::resolve(&zero, &six_points()),
            Err(Error::InvalidParameter(_))
        ));

        let cosine_tree = NeighborsParams {
            metric: Metric::Cosine,
            algorithm: Algorithm::KdTree,
            ..NeighborsParams::default()
        };
        assert!(FitPlan::resolve(&cosine_tree, &six_points()).is_err());
    }

    #[test]
    fn test_plan_rejects_featureless_input() {
        let x = InputData::from(DenseMatrix::from_f64(4, 0, vec![]).unwrap());
        match FitPlan::resolve(&NeighborsParams::default(), &x) {
            Err(Error::InvalidInput(msg)) => assert_eq!(
                msg,
                "Found array with 0 feature(s) (shape=(4, 0)) while a minimum of 1 is required"
            ),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
