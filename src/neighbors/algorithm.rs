//! Neighbor search strategies and `auto` resolution

use crate::core::Error;
use crate::neighbors::Metric;
use std::fmt;
use std::str::FromStr;

/// Above this many features brute force beats the trees
pub const BRUTE_FEATURE_THRESHOLD: usize = 15;

/// Neighbor search strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Algorithm {
    #[default]
    Auto,
    BallTree,
    KdTree,
    Brute,
}

impl Algorithm {
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Auto => "auto",
            Algorithm::BallTree => "ball_tree",
            Algorithm::KdTree => "kd_tree",
            Algorithm::Brute => "brute",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Algorithm::Auto),
            "ball_tree" => Ok(Algorithm::BallTree),
            "kd_tree" => Ok(Algorithm::KdTree),
            "brute" => Ok(Algorithm::Brute),
            _ => Err(Error::InvalidParameter(format!(
                "algorithm = '{s}' not recognized"
            ))),
        }
    }
}

/// Concrete strategy for a fit
///
/// Explicit requests pass through. `auto` picks brute force for wide data or
/// when the neighbor count is at least half the sample count, otherwise the
/// first tree the metric is valid for.
pub fn resolve_algorithm(
    requested: Algorithm,
    metric: Metric,
    n_samples: usize,
    n_features: usize,
    n_neighbors: Option<usize>,
) -> Algorithm {
    if requested != Algorithm::Auto {
        return requested;
    }

    let many_neighbors = n_neighbors.is_some_and(|k| k >= n_samples / 2);
    if n_features > BRUTE_FEATURE_THRESHOLD || many_neighbors {
        Algorithm::Brute
    } else if metric.valid_for(Algorithm::KdTree) {
        Algorithm::KdTree
    } else if metric.valid_for(Algorithm::BallTree) {
        Algorithm::BallTree
    } else {
        Algorithm::Brute
    }
}
