//! SVR engine contracts
//!
//! Solvers are supplied by the caller: [`SvrEngine`] is the accelerated
//! collaborator and [`SvrReference`] the reference implementation. Prediction
//! from fitted attributes is plain kernel expansion and ships as the default
//! [`SvrReference::predict`].

use crate::config::ExecutionTarget;
use crate::core::{DenseMatrix, Error, InputData, Result};
use crate::svm::kernel::{KernelFunction, SvmKernel};
use crate::svm::nusvr::NuSvrParams;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// NuSVR parameters in the engine vocabulary
#[derive(Debug, Clone, PartialEq)]
pub struct NativeSvrParams {
    pub kernel: SvmKernel,
    /// Always concrete; `scale`/`auto` are resolved against the training data
    pub gamma: f64,
    pub coef0: f64,
    pub degree: u32,
    pub c: f64,
    pub nu: f64,
    pub tol: f64,
    pub shrinking: bool,
    pub cache_size: f64,
    /// `None` runs until convergence
    pub max_iter: Option<usize>,
}

impl NativeSvrParams {
    pub fn kernel_function(&self) -> KernelFunction {
        KernelFunction {
            kernel: self.kernel,
            gamma: self.gamma,
            coef0: self.coef0,
            degree: self.degree,
        }
    }
}

/// Accelerated SVR engine
pub trait SvrEngine: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Train a model; inputs the engine cannot handle are `Error::Incompatible`
    fn fit(
        &self,
        params: &NativeSvrParams,
        x: &DenseMatrix,
        y: &[f64],
        sample_weight: Option<&[f64]>,
        target: &ExecutionTarget,
    ) -> Result<Box<dyn SvrModel>>;
}

/// Trained engine-side model with named attributes
pub trait SvrModel: Send + Sync + fmt::Debug {
    /// `n x 1` column of predictions
    fn predict(&self, x: &DenseMatrix, target: &ExecutionTarget) -> Result<DenseMatrix>;

    fn support(&self) -> Option<&[usize]>;

    fn support_vectors(&self) -> Option<&DenseMatrix>;

    fn dual_coef(&self) -> Option<&[f64]>;

    fn intercept(&self) -> Option<f64>;

    /// Solver status, 0 on convergence
    fn fit_status(&self) -> i32 {
        0
    }
}

/// Reference-shaped fitted attributes of a support vector regressor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvrFit {
    pub support: Vec<usize>,
    /// Row-major `n_support x n_features`
    pub support_vectors: Vec<f64>,
    pub dual_coef: Vec<f64>,
    pub intercept: f64,
    pub n_support: usize,
    pub shape_fit: (usize, usize),
    pub fit_status: i32,
    pub kernel: KernelFunction,
}

impl SvrFit {
    pub fn gamma(&self) -> f64 {
        self.kernel.gamma
    }

    pub fn n_features_in(&self) -> usize {
        self.shape_fit.1
    }

    /// Row `i` of the support vectors, `None` when the storage is too short
    pub fn support_vector(&self, i: usize) -> Option<&[f64]> {
        let n = self.n_features_in();
        self.support_vectors.get(i * n..(i + 1) * n)
    }

    /// Decision value for one row: Σ dual_coef_i K(sv_i, x) + intercept
    pub fn decision(&self, row: &[f64]) -> Result<f64> {
        let mut value = self.intercept;
        for (i, coef) in self.dual_coef.iter().enumerate() {
            let sv = self.support_vector(i).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "support vector {i} missing: {} values stored for {} coefficients of {} features",
                    self.support_vectors.len(),
                    self.dual_coef.len(),
                    self.n_features_in()
                ))
            })?;
            value += coef * self.kernel.compute(sv, row)?;
        }
        Ok(value)
    }
}

/// Reference SVR implementation
pub trait SvrReference: Send + Sync + fmt::Debug {
    fn fit(
        &self,
        params: &NuSvrParams,
        x: &InputData,
        y: &[f64],
        sample_weight: Option<&[f64]>,
    ) -> Result<SvrFit>;

    /// Kernel expansion over the support vectors
    fn predict(&self, fit: &SvrFit, x: &InputData) -> Result<Vec<f64>> {
        if x.n_features() != fit.n_features_in() {
            return Err(Error::DimensionMismatch {
                expected: fit.n_features_in(),
                actual: x.n_features(),
            });
        }
        if !x.is_finite() {
            return Err(Error::NonFinite);
        }
        (0..x.n_samples())
            .map(|i| {
                let row: Cow<'_, [f64]> = match x {
                    InputData::Dense(m) => Cow::Borrowed(m.row(i)),
                    InputData::Sparse(m) => Cow::Owned(m.dense_row(i)),
                    InputData::Index(index) => Cow::Borrowed(index.data.row(i)),
                };
                fit.decision(&row)
            })
            .collect()
    }
}
