//! Distance metrics and the minkowski order rewrite
//!
//! A minkowski metric with a special order is rewritten to the dedicated
//! metric (`p = 1` manhattan, `p = 2` euclidean, `p = inf` chebyshev) before
//! any engine sees it. The rewrite never changes which distance is computed.

use crate::core::{Error, Result};
use crate::neighbors::Algorithm;
use log::warn;
use std::fmt;
use std::str::FromStr;

/// Distance metrics understood by the neighbors estimators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Euclidean,
    Manhattan,
    Chebyshev,
    Minkowski,
    Cosine,
    Canberra,
    Hamming,
}

impl Metric {
    pub fn name(self) -> &'static str {
        match self {
            Metric::Euclidean => "euclidean",
            Metric::Manhattan => "manhattan",
            Metric::Chebyshev => "chebyshev",
            Metric::Minkowski => "minkowski",
            Metric::Cosine => "cosine",
            Metric::Canberra => "canberra",
            Metric::Hamming => "hamming",
        }
    }

    /// Whether the reference can build `algorithm` for this metric
    pub fn valid_for(self, algorithm: Algorithm) -> bool {
        match algorithm {
            Algorithm::KdTree => matches!(
                self,
                Metric::Euclidean | Metric::Manhattan | Metric::Chebyshev | Metric::Minkowski
            ),
            Algorithm::BallTree => !matches!(self, Metric::Cosine),
            Algorithm::Brute | Algorithm::Auto => true,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "manhattan" | "cityblock" | "l1" => Ok(Metric::Manhattan),
            "chebyshev" | "infinity" => Ok(Metric::Chebyshev),
            "minkowski" | "p" => Ok(Metric::Minkowski),
            "cosine" => Ok(Metric::Cosine),
            "canberra" => Ok(Metric::Canberra),
            "hamming" => Ok(Metric::Hamming),
            _ => Err(Error::InvalidParameter(format!("Metric '{s}' not valid"))),
        }
    }
}

/// Extra metric arguments (`metric_params`)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MetricParams {
    pub p: Option<f64>,
}

/// Metric actually used after the minkowski rewrite
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveMetric {
    pub metric: Metric,
    pub params: MetricParams,
}

impl EffectiveMetric {
    /// Explicit minkowski order, if the metric still needs one
    pub fn p(&self) -> Option<f64> {
        self.params.p
    }

    /// Distance between two equally sized rows
    pub fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        let pairs = a.iter().zip(b);
        match self.metric {
            Metric::Euclidean => pairs.map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt(),
            Metric::Manhattan => pairs.map(|(x, y)| (x - y).abs()).sum(),
            Metric::Chebyshev => pairs.map(|(x, y)| (x - y).abs()).fold(0.0, f64::max),
            Metric::Minkowski => {
                let p = self.params.p.unwrap_or(2.0);
                pairs
                    .map(|(x, y)| (x - y).abs().powf(p))
                    .sum::<f64>()
                    .powf(1.0 / p)
            }
            Metric::Cosine => {
                let (mut dot, mut na, mut nb) = (0.0, 0.0, 0.0);
                for (x, y) in pairs {
                    dot += x * y;
                    na += x * x;
                    nb += y * y;
                }
                if na == 0.0 || nb == 0.0 {
                    1.0
                } else {
                    1.0 - dot / (na.sqrt() * nb.sqrt())
                }
            }
            Metric::Canberra => pairs
                .map(|(x, y)| {
                    let denom = x.abs() + y.abs();
                    if denom == 0.0 {
                        0.0
                    } else {
                        (x - y).abs() / denom
                    }
                })
                .sum(),
            Metric::Hamming => {
                if a.is_empty() {
                    0.0
                } else {
                    pairs.filter(|(x, y)| x != y).count() as f64 / a.len() as f64
                }
            }
        }
    }
}

/// Resolve the metric a fit will use
///
/// `p` from `metric_params` wins over the constructor `p`. For minkowski the
/// order must be at least one; orders 1, 2 and infinity select the dedicated
/// metric, any other order is kept as an explicit parameter.
pub fn effective_metric(
    metric: Metric,
    p: Option<f64>,
    metric_params: &MetricParams,
) -> Result<EffectiveMetric> {
    let effective_p = match metric_params.p {
        Some(from_params) => {
            if p.is_some() {
                warn!(
                    "Parameter p is found in metric_params. \
                     The corresponding parameter from the constructor is ignored."
                );
            }
            Some(from_params)
        }
        None => p,
    };

    if metric != Metric::Minkowski {
        return Ok(EffectiveMetric {
            metric,
            params: MetricParams::default(),
        });
    }

    let p = effective_p.unwrap_or(2.0);
    if p.is_nan() || p < 1.0 {
        return Err(Error::InvalidParameter(
            "p must be greater or equal to one for minkowski metric".to_string(),
        ));
    }

    let (metric, p) = if p == 1.0 {
        (Metric::Manhattan, None)
    } else if p == 2.0 {
        (Metric::Euclidean, None)
    } else if p == f64::INFINITY {
        (Metric::Chebyshev, None)
    } else {
        (Metric::Minkowski, Some(p))
    };

    Ok(EffectiveMetric {
        metric,
        params: MetricParams { p },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn minkowski(p: f64) -> EffectiveMetric {
        effective_metric(Metric::Minkowski, Some(p), &MetricParams::default()).unwrap()
    }

    #[test]
    fn test_minkowski_order_rewrite() {
        assert_eq!(minkowski(1.0).metric, Metric::Manhattan);
        assert_eq!(minkowski(2.0).metric, Metric::Euclidean);
        assert_eq!(minkowski(f64::INFINITY).metric, Metric::Chebyshev);

        let p3 = minkowski(3.0);
        assert_eq!(p3.metric, Metric::Minkowski);
        assert_eq!(p3.p(), Some(3.0));
        assert_eq!(minkowski(2.0).p(), None);
    }

    #[test]
    fn test_rewrite_preserves_distances() {
        let a = [1.0, -2.0, 0.5];
        let b = [4.0, 2.0, -1.0];
        let explicit = |p: f64| EffectiveMetric {
            metric: Metric::Minkowski,
            params: MetricParams { p: Some(p) },
        };

        assert_relative_eq!(minkowski(1.0).distance(&a, &b), explicit(1.0).distance(&a, &b));
        assert_relative_eq!(
            minkowski(2.0).distance(&a, &b),
            explicit(2.0).distance(&a, &b),
            epsilon = 1e-12
        );
        // Large orders converge on the chebyshev distance.
        assert_relative_eq!(
            minkowski(f64::INFINITY).distance(&a, &b),
            explicit(200.0).distance(&a, &b),
            epsilon = 1e-2
        );
    }

    #[test]
    fn test_order_below_one_rejected() {
        let result = effective_metric(Metric::Minkowski, Some(0.5), &MetricParams::default());
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
        let result = effective_metric(Metric::Minkowski, Some(f64::NAN), &MetricParams::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_metric_params_override_p() {
        let params = MetricParams { p: Some(1.0) };
        let effective = effective_metric(Metric::Minkowski, Some(2.0), &params).unwrap();
        assert_eq!(effective.metric, Metric::Manhattan);
    }

    #[test]
    fn test_non_minkowski_passes_through() {
        let effective =
            effective_metric(Metric::Cosine, Some(0.5), &MetricParams::default()).unwrap();
        assert_eq!(effective.metric, Metric::Cosine);
        assert_eq!(effective.p(), None);
    }

    #[test]
    fn test_metric_aliases() {
        assert_eq!("l2".parse::<Metric>().unwrap(), Metric::Euclidean);
        assert_eq!("cityblock".parse::<Metric>().unwrap(), Metric::Manhattan);
        assert!("wminkowski".parse::<Metric>().is_err());
    }

    #[test]
    fn test_valid_metrics_per_algorithm() {
        assert!(Metric::Euclidean.valid_for(Algorithm::KdTree));
        assert!(!Metric::Cosine.valid_for(Algorithm::KdTree));
        assert!(!Metric::Cosine.valid_for(Algorithm::BallTree));
        assert!(Metric::Canberra.valid_for(Algorithm::BallTree));
        assert!(Metric::Cosine.valid_for(Algorithm::Brute));
    }

    #[test]
    fn test_distances() {
        let plain = |metric| EffectiveMetric {
            metric,
            params: MetricParams::default(),
        };
        let a = [0.0, 0.0];
        let b = [3.0, 4.0];
        assert_relative_eq!(plain(Metric::Euclidean).distance(&a, &b), 5.0);
        assert_relative_eq!(plain(Metric::Manhattan).distance(&a, &b), 7.0);
        assert_relative_eq!(plain(Metric::Chebyshev).distance(&a, &b), 4.0);
        assert_relative_eq!(plain(Metric::Cosine).distance(&a, &b), 1.0);
        assert_relative_eq!(plain(Metric::Canberra).distance(&a, &b), 2.0);
        assert_relative_eq!(plain(Metric::Hamming).distance(&a, &b), 1.0);
        assert_relative_eq!(plain(Metric::Cosine).distance(&[1.0, 0.0], &[2.0, 0.0]), 0.0);
    }
}
