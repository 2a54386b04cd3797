//! SVM kernels and gamma resolution
//!
//! Kernels supported by the regressors:
//! - linear:  K(x, y) = <x, y>
//! - rbf:     K(x, y) = exp(-γ ||x - y||²)
//! - poly:    K(x, y) = (γ <x, y> + r)^d
//! - sigmoid: K(x, y) = tanh(γ <x, y> + r)
//!
//! `precomputed` is accepted as a configuration value but has no formula;
//! callers hand in a Gram matrix instead of samples.

use crate::core::{DenseMatrix, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kernel family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SvmKernel {
    Linear,
    #[default]
    Rbf,
    Poly,
    Sigmoid,
    Precomputed,
}

impl SvmKernel {
    pub fn name(self) -> &'static str {
        match self {
            SvmKernel::Linear => "linear",
            SvmKernel::Rbf => "rbf",
            SvmKernel::Poly => "poly",
            SvmKernel::Sigmoid => "sigmoid",
            SvmKernel::Precomputed => "precomputed",
        }
    }

    /// Whether gamma enters the kernel formula
    pub fn uses_gamma(self) -> bool {
        matches!(self, SvmKernel::Rbf | SvmKernel::Poly | SvmKernel::Sigmoid)
    }
}

impl fmt::Display for SvmKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SvmKernel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(SvmKernel::Linear),
            "rbf" => Ok(SvmKernel::Rbf),
            "poly" => Ok(SvmKernel::Poly),
            "sigmoid" => Ok(SvmKernel::Sigmoid),
            "precomputed" => Ok(SvmKernel::Precomputed),
            _ => Err(Error::InvalidParameter(format!("kernel '{s}' not recognized"))),
        }
    }
}

/// Kernel coefficient selection
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Gamma {
    /// `1 / (n_features * X.var())`
    #[default]
    Scale,
    /// `1 / n_features`
    Auto,
    Value(f64),
}

impl Gamma {
    /// Concrete gamma for training data `x`
    ///
    /// `scale` falls back to 1.0 when `x` has zero variance.
    pub fn resolve(self, x: &DenseMatrix) -> Result<f64> {
        let n_features = x.cols();
        match self {
            Gamma::Scale => {
                if n_features == 0 {
                    return Err(Error::EmptyDataset);
                }
                let variance = x.variance();
                if variance == 0.0 {
                    Ok(1.0)
                } else {
                    Ok(1.0 / (n_features as f64 * variance))
                }
            }
            Gamma::Auto => {
                if n_features == 0 {
                    return Err(Error::EmptyDataset);
                }
                Ok(1.0 / n_features as f64)
            }
            Gamma::Value(gamma) if gamma.is_finite() && gamma >= 0.0 => Ok(gamma),
            Gamma::Value(gamma) => Err(Error::InvalidParameter(format!(
                "gamma must be a non-negative number, got {gamma}"
            ))),
        }
    }
}

impl fmt::Display for Gamma {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gamma::Scale => f.write_str("scale"),
            Gamma::Auto => f.write_str("auto"),
            Gamma::Value(gamma) => write!(f, "{gamma}"),
        }
    }
}

impl FromStr for Gamma {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scale" => Ok(Gamma::Scale),
            "auto" => Ok(Gamma::Auto),
            _ => s
                .parse::<f64>()
                .map(Gamma::Value)
                .map_err(|_| Error::InvalidParameter(format!("gamma '{s}' not recognized"))),
        }
    }
}

/// Kernel with every coefficient resolved
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KernelFunction {
    pub kernel: SvmKernel,
    pub gamma: f64,
    pub coef0: f64,
    pub degree: u32,
}

impl KernelFunction {
    /// Compute K(x, y) for two equally sized rows
    pub fn compute(&self, x: &[f64], y: &[f64]) -> Result<f64> {
        match self.kernel {
            SvmKernel::Linear => Ok(dot(x, y)),
            SvmKernel::Rbf => Ok((-self.gamma * squared_distance(x, y)).exp()),
            SvmKernel::Poly => Ok((self.gamma * dot(x, y) + self.coef0).powi(self.degree as i32)),
            SvmKernel::Sigmoid => Ok((self.gamma * dot(x, y) + self.coef0).tanh()),
            SvmKernel::Precomputed => Err(Error::InvalidParameter(
                "a precomputed kernel has no formula to evaluate".to_string(),
            )),
        }
    }
}

fn dot(x: &[f64], y: &[f64]) -> f64 {
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

/// ||x - y||² through the norms: ||x||² + ||y||² - 2 <x, y>, clamped at zero
fn squared_distance(x: &[f64], y: &[f64]) -> f64 {
    let norms = dot(x, x) + dot(y, y);
    (norms - 2.0 * dot(x, y)).max(0.0)
}
