//! Nu support vector regression facade

use crate::config::{ExecutionTarget, TargetClass};
use crate::core::{DenseMatrix, Dispatch, Error, FitState, InputData, Result};
use crate::dispatch::{dispatch, CallArgs, CallOutput, DispatchRecord, Verdict};
use crate::registry::{EstimatorKind, ImplementationPair, Method, Operation, PatchRegistry};
use crate::svm::engine::{NativeSvrParams, SvrEngine, SvrFit, SvrModel, SvrReference};
use crate::svm::kernel::{Gamma, SvmKernel};
use log::debug;
use std::sync::Arc;

/// Kernels the accelerated engine trains
pub const ACCELERATED_KERNELS: &[SvmKernel] = &[
    SvmKernel::Linear,
    SvmKernel::Rbf,
    SvmKernel::Poly,
    SvmKernel::Sigmoid,
];

/// NuSVR hyperparameters
#[derive(Debug, Clone, PartialEq)]
pub struct NuSvrParams {
    pub nu: f64,
    pub c: f64,
    pub kernel: SvmKernel,
    pub degree: u32,
    pub gamma: Gamma,
    pub coef0: f64,
    pub shrinking: bool,
    pub tol: f64,
    /// Kernel cache size in MB
    pub cache_size: f64,
    /// `-1` for no limit
    pub max_iter: i64,
}

impl Default for NuSvrParams {
    fn default() -> Self {
        Self {
            nu: 0.5,
            c: 1.0,
            kernel: SvmKernel::Rbf,
            degree: 3,
            gamma: Gamma::Scale,
            coef0: 0.0,
            shrinking: true,
            tol: 1e-3,
            cache_size: 200.0,
            max_iter: -1,
        }
    }
}

/// Engine parameters for training on `x`
pub fn translate(params: &NuSvrParams, x: &DenseMatrix) -> Result<NativeSvrParams> {
    if params.kernel == SvmKernel::Precomputed {
        return Err(Error::Incompatible(
            "precomputed kernels are not supported by the engine".to_string(),
        ));
    }
    let max_iter = match params.max_iter {
        -1 => None,
        n if n >= 0 => Some(n as usize),
        n => {
            return Err(Error::InvalidParameter(format!(
                "max_iter must be -1 or non-negative, got {n}"
            )))
        }
    };

    Ok(NativeSvrParams {
        kernel: params.kernel,
        gamma: params.gamma.resolve(x)?,
        coef0: params.coef0,
        degree: params.degree,
        c: params.c,
        nu: params.nu,
        tol: params.tol,
        shrinking: params.shrinking,
        cache_size: params.cache_size,
        max_iter,
    })
}

/// Reference-shaped attributes read from an engine model
pub fn adapt_fit(model: &dyn SvrModel, params: &NativeSvrParams, shape_fit: (usize, usize)) -> Result<SvrFit> {
    let support = model.support().ok_or(Error::MissingAttribute("support_"))?;
    let support_vectors = model
        .support_vectors()
        .ok_or(Error::MissingAttribute("support_vectors_"))?;
    let dual_coef = model.dual_coef().ok_or(Error::MissingAttribute("dual_coef_"))?;
    let intercept = model.intercept().ok_or(Error::MissingAttribute("intercept_"))?;

    if dual_coef.len() != support.len()
        || support_vectors.rows() != support.len()
        || support_vectors.cols() != shape_fit.1
    {
        return Err(Error::Incompatible(format!(
            "engine returned {} support indices, {} support vectors of {} features and {} coefficients for {} features",
            support.len(),
            support_vectors.rows(),
            support_vectors.cols(),
            dual_coef.len(),
            shape_fit.1
        )));
    }

    Ok(SvrFit {
        support: support.to_vec(),
        support_vectors: support_vectors.as_slice().to_vec(),
        dual_coef: dual_coef.to_vec(),
        intercept,
        n_support: support.len(),
        shape_fit,
        fit_status: model.fit_status(),
        kernel: params.kernel_function(),
    })
}

/// Engines a NuSVR facade routes to; both are supplied by the caller
#[derive(Debug, Clone)]
pub struct SvrEngines {
    pub accelerated: Arc<dyn SvrEngine>,
    pub reference: Arc<dyn SvrReference>,
}

/// Nu support vector regressor
#[derive(Debug)]
pub struct NuSvr {
    params: NuSvrParams,
    registry: Arc<PatchRegistry>,
    engines: SvrEngines,
    state: FitState<SvrFit, Box<dyn SvrModel>>,
    last_dispatch: Option<DispatchRecord>,
}

impl NuSvr {
    pub fn new(registry: Arc<PatchRegistry>, engines: SvrEngines) -> Self {
        Self {
            params: NuSvrParams::default(),
            registry,
            engines,
            state: FitState::Unfitted,
            last_dispatch: None,
        }
    }

    pub fn with_params(mut self, params: NuSvrParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_nu(mut self, nu: f64) -> Self {
        self.params.nu = nu;
        self
    }

    pub fn with_c(mut self, c: f64) -> Self {
        self.params.c = c;
        self
    }

    pub fn with_kernel(mut self, kernel: SvmKernel) -> Self {
        self.params.kernel = kernel;
        self
    }

    pub fn with_gamma(mut self, gamma: Gamma) -> Self {
        self.params.gamma = gamma;
        self
    }

    pub fn with_max_iter(mut self, max_iter: i64) -> Self {
        self.params.max_iter = max_iter;
        self
    }

    pub fn fit(&mut self, x: &InputData, y: &[f64], sample_weight: Option<&[f64]>) -> Result<()> {
        self.fit_on(x, y, sample_weight, None)
    }

    pub fn fit_on(
        &mut self,
        x: &InputData,
        y: &[f64],
        sample_weight: Option<&[f64]>,
        target: Option<ExecutionTarget>,
    ) -> Result<()> {
        let args = CallArgs {
            x: Some(x),
            y: Some(y),
            sample_weight,
            target,
            ..CallArgs::default()
        };
        dispatch(self, Method::Fit, &args).map(|_| ())
    }

    pub fn predict(&mut self, x: &InputData) -> Result<Vec<f64>> {
        self.predict_on(x, None)
    }

    pub fn predict_on(&mut self, x: &InputData, target: Option<ExecutionTarget>) -> Result<Vec<f64>> {
        let args = CallArgs::new().with_x(x).with_target(target);
        match dispatch(self, Method::Predict, &args)? {
            CallOutput::Predictions(values) => Ok(values),
            other => Err(Error::InvalidInput(format!(
                "predict produced an unexpected result: {other:?}"
            ))),
        }
    }

    pub fn params(&self) -> &NuSvrParams {
        &self.params
    }

    pub fn fit_attrs(&self) -> Option<&SvrFit> {
        self.state.attrs()
    }

    pub fn is_accelerated(&self) -> bool {
        self.state.is_accelerated()
    }

    pub fn last_dispatch(&self) -> Option<&DispatchRecord> {
        self.last_dispatch.as_ref()
    }

    fn fit_verdict(&self, args: &CallArgs<'_>) -> Verdict {
        let n_samples = args.x.map(InputData::n_samples);
        Verdict::all(&[
            (
                args.x.and_then(InputData::as_native).is_some(),
                "input is not dense floating point",
            ),
            (args.y.map(<[f64]>::len) == n_samples, "target length differs from sample count"),
            (ACCELERATED_KERNELS.contains(&self.params.kernel), "kernel not supported"),
            (self.params.nu > 0.0 && self.params.nu <= 1.0, "nu outside (0, 1]"),
            (self.params.c > 0.0, "C must be positive"),
        ])
    }

    fn predict_verdict(&self, args: &CallArgs<'_>) -> Verdict {
        let n_features_in = self.state.attrs().map(SvrFit::n_features_in);
        Verdict::all(&[
            (self.state.is_accelerated(), "no accelerated fit"),
            (
                args.x.and_then(InputData::as_native).is_some(),
                "query is not dense floating point",
            ),
            (
                args.x.map(InputData::n_features) == n_features_in,
                "query feature count differs from the fit",
            ),
        ])
    }
}

impl Dispatch for NuSvr {
    const KIND: EstimatorKind = EstimatorKind::NuSvr;

    fn registry(&self) -> &PatchRegistry {
        &self.registry
    }

    fn supports(&self, class: TargetClass, method: Method, args: &CallArgs<'_>) -> Result<Verdict> {
        match (method, class) {
            (Method::Fit | Method::Predict, TargetClass::Device) => {
                Ok(Verdict::Unsupported("no device implementation"))
            }
            (Method::Fit, TargetClass::Cpu) => Ok(self.fit_verdict(args)),
            (Method::Predict, TargetClass::Cpu) => Ok(self.predict_verdict(args)),
            _ => Err(Error::UnknownMethod {
                estimator: Self::KIND.name().to_string(),
                method: method.name().to_string(),
            }),
        }
    }

    fn discard_fitted(&mut self) {
        self.state = FitState::Unfitted;
        self.last_dispatch = None;
    }

    fn record_dispatch(&mut self, record: DispatchRecord) {
        self.last_dispatch = Some(record);
    }
}

fn fit_accelerated(this: &mut NuSvr, args: &CallArgs<'_>, target: &ExecutionTarget) -> Result<CallOutput> {
    let x = args
        .x
        .and_then(InputData::as_native)
        .ok_or_else(|| Error::Incompatible("input is not dense floating point".to_string()))?;
    let y = args
        .y
        .ok_or_else(|| Error::InvalidInput("fit requires targets".to_string()))?;

    let native = translate(&this.params, x)?;
    debug!(
        "NuSVR: {} kernel, gamma = {}, engine {}",
        native.kernel,
        native.gamma,
        this.engines.accelerated.name()
    );
    let model = this
        .engines
        .accelerated
        .fit(&native, x, y, args.sample_weight, target)?;
    let attrs = adapt_fit(model.as_ref(), &native, x.shape())?;
    this.state = FitState::Accelerated {
        attrs,
        handle: model,
    };
    Ok(CallOutput::Fitted)
}

fn fit_reference(this: &mut NuSvr, args: &CallArgs<'_>) -> Result<CallOutput> {
    let x = args
        .x
        .ok_or_else(|| Error::InvalidInput("fit requires training data".to_string()))?;
    let y = args
        .y
        .ok_or_else(|| Error::InvalidInput("fit requires targets".to_string()))?;
    let attrs = this
        .engines
        .reference
        .fit(&this.params, x, y, args.sample_weight)?;
    this.state = FitState::Reference(attrs);
    Ok(CallOutput::Fitted)
}

fn predict_accelerated(this: &mut NuSvr, args: &CallArgs<'_>, target: &ExecutionTarget) -> Result<CallOutput> {
    let handle = this
        .state
        .handle()
        .ok_or_else(|| Error::Incompatible("no accelerated fit".to_string()))?;
    let x = args
        .x
        .and_then(InputData::as_native)
        .ok_or_else(|| Error::Incompatible("query is not dense floating point".to_string()))?;
    let column = handle.predict(x, target)?;
    column.ravel().map(CallOutput::Predictions)
}

fn predict_reference(this: &mut NuSvr, args: &CallArgs<'_>) -> Result<CallOutput> {
    let attrs = this
        .state
        .attrs()
        .ok_or(Error::NotFitted(EstimatorKind::NuSvr.name()))?;
    let x = args
        .x
        .ok_or_else(|| Error::InvalidInput("predict requires query data".to_string()))?;
    this.engines
        .reference
        .predict(attrs, x)
        .map(CallOutput::Predictions)
}

/// Register the `NuSVR` operations
pub(crate) fn register_builtin(registry: &mut PatchRegistry) {
    let kind = EstimatorKind::NuSvr;
    registry.insert(
        Operation::new(kind, Method::Fit),
        ImplementationPair::<NuSvr> {
            accelerated: fit_accelerated,
            reference: fit_reference,
        },
    );
    registry.insert(
        Operation::new(kind, Method::Predict),
        ImplementationPair::<NuSvr> {
            accelerated: predict_accelerated,
            reference: predict_reference,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceContext;
    use crate::core::{CsrMatrix, DType};
    use crate::dispatch::DispatchPath;
    use crate::svm::kernel::KernelFunction;
    use approx::assert_relative_eq;

    /// Model that predicts the training mean through a single support vector
    #[derive(Debug)]
    struct MeanModel {
        support: Vec<usize>,
        support_vectors: DenseMatrix,
        dual_coef: Vec<f64>,
        intercept: f64,
    }

    impl SvrModel for MeanModel {
        fn predict(&self, x: &DenseMatrix, _: &ExecutionTarget) -> Result<DenseMatrix> {
            Ok(DenseMatrix::column(vec![self.intercept; x.rows()], DType::Float64))
        }

        fn support(&self) -> Option<&[usize]> {
            Some(&self.support)
        }

        fn support_vectors(&self) -> Option<&DenseMatrix> {
            Some(&self.support_vectors)
        }

        fn dual_coef(&self) -> Option<&[f64]> {
            Some(&self.dual_coef)
        }

        fn intercept(&self) -> Option<f64> {
            Some(self.intercept)
        }
    }

    fn mean(y: &[f64]) -> f64 {
        y.iter().sum::<f64>() / y.len() as f64
    }

    #[derive(Debug, Default)]
    struct MeanEngine {
        max_samples: Option<usize>,
    }

    impl SvrEngine for MeanEngine {
        fn name(&self) -> &'static str {
            "mean"
        }

        fn fit(
            &self,
            _: &NativeSvrParams,
            x: &DenseMatrix,
            y: &[f64],
            _: Option<&[f64]>,
            _: &ExecutionTarget,
        ) -> Result<Box<dyn SvrModel>> {
            if self.max_samples.is_some_and(|max| x.rows() > max) {
                return Err(Error::Incompatible("too many samples".into()));
            }
            Ok(Box::new(MeanModel {
                support: vec![0],
                support_vectors: x.select_rows(&[0]),
                dual_coef: vec![0.0],
                intercept: mean(y),
            }))
        }
    }

    /// Returns support vectors with one column fewer than the training data
    #[derive(Debug)]
    struct NarrowEngine;

    impl SvrEngine for NarrowEngine {
        fn name(&self) -> &'static str {
            "narrow"
        }

        fn fit(
            &self,
            _: &NativeSvrParams,
            x: &DenseMatrix,
            y: &[f64],
            _: Option<&[f64]>,
            _: &ExecutionTarget,
        ) -> Result<Box<dyn SvrModel>> {
            let rows = x.rows().min(2);
            let width = x.cols() - 1;
            Ok(Box::new(MeanModel {
                support: (0..rows).collect(),
                support_vectors: DenseMatrix::from_f64(rows, width, vec![1.0; rows * width])?,
                dual_coef: vec![0.5; rows],
                intercept: mean(y),
            }))
        }
    }

    #[derive(Debug)]
    struct MeanReference;

    impl SvrReference for MeanReference {
        fn fit(
            &self,
            params: &NuSvrParams,
            x: &InputData,
            y: &[f64],
            _: Option<&[f64]>,
        ) -> Result<SvrFit> {
            if !(params.nu > 0.0 && params.nu <= 1.0) {
                return Err(Error::InvalidParameter("nu <= 0 or nu > 1".into()));
            }
            let dense = match x {
                InputData::Sparse(m) => m.to_dense(),
                InputData::Dense(m) => m.to_dtype(DType::Float64),
                InputData::Index(index) => index.data.clone(),
            };
            Ok(SvrFit {
                support: vec![0],
                support_vectors: dense.row(0).to_vec(),
                dual_coef: vec![0.0],
                intercept: mean(y),
                n_support: 1,
                shape_fit: dense.shape(),
                fit_status: 0,
                kernel: KernelFunction {
                    kernel: SvmKernel::Linear,
                    gamma: 1.0,
                    coef0: 0.0,
                    degree: 3,
                },
            })
        }
    }

    fn engines(engine: MeanEngine) -> SvrEngines {
        SvrEngines {
            accelerated: Arc::new(engine),
            reference: Arc::new(MeanReference),
        }
    }

    fn regressor() -> NuSvr {
        NuSvr::new(Arc::new(PatchRegistry::patched()), engines(MeanEngine::default()))
    }

    fn data() -> (InputData, Vec<f64>) {
        let x = DenseMatrix::from_rows(&[vec![0.0, 1.0], vec![1.0, 3.0], vec![2.0, 5.0]]).unwrap();
        (x.into(), vec![1.0, 2.0, 6.0])
    }

    #[test]
    fn test_translate_derives_gamma() {
        let x = DenseMatrix::from_rows(&[vec![1.0, 3.0], vec![1.0, 3.0]]).unwrap();
        let native = translate(&NuSvrParams::default(), &x).unwrap();
        assert_relative_eq!(native.gamma, 0.5);
        assert_eq!(native.max_iter, None);

        let params = NuSvrParams {
            gamma: Gamma::Auto,
            max_iter: 100,
            ..NuSvrParams::default()
        };
        let native = translate(&params, &x).unwrap();
        assert_relative_eq!(native.gamma, 0.5);
        assert_eq!(native.max_iter, Some(100));

        let bad = NuSvrParams {
            max_iter: -5,
            ..NuSvrParams::default()
        };
        assert!(matches!(translate(&bad, &x), Err(Error::InvalidParameter(_))));

        let precomputed = NuSvrParams {
            kernel: SvmKernel::Precomputed,
            ..NuSvrParams::default()
        };
        assert!(matches!(translate(&precomputed, &x), Err(Error::Incompatible(_))));
    }

    #[test]
    fn test_accelerated_fit_and_predict() {
        let (x, y) = data();
        let mut svr = regressor();
        svr.fit(&x, &y, None).unwrap();
        assert!(svr.is_accelerated());
        assert_eq!(svr.last_dispatch().unwrap().path, DispatchPath::Accelerated);

        let attrs = svr.fit_attrs().unwrap();
        assert_eq!(attrs.n_support, 1);
        assert_eq!(attrs.shape_fit, (3, 2));
        assert!(attrs.gamma() > 0.0);

        let predictions = svr.predict(&x).unwrap();
        assert_eq!(predictions.len(), 3);
        assert_relative_eq!(predictions[0], 3.0);
        assert_eq!(svr.last_dispatch().unwrap().path, DispatchPath::Accelerated);
    }

    #[test]
    fn test_unsupported_configurations_use_reference() {
        let (x, y) = data();
        let mut svr = regressor().with_kernel(SvmKernel::Precomputed);
        svr.fit(&x, &y, None).unwrap();
        assert!(!svr.is_accelerated());
        assert_eq!(
            svr.last_dispatch().unwrap().reason.as_deref(),
            Some("kernel not supported")
        );

        let mut svr = regressor().with_c(0.0);
        svr.fit(&x, &y, None).unwrap();
        assert_eq!(svr.last_dispatch().unwrap().path, DispatchPath::Reference);
    }

    #[test]
    fn test_invalid_nu_raises_reference_error() {
        let (x, y) = data();
        let mut svr = regressor().with_nu(1.5);
        match svr.fit(&x, &y, None) {
            Err(Error::InvalidParameter(msg)) => assert_eq!(msg, "nu <= 0 or nu > 1"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_device_always_uses_reference() {
        let (x, y) = data();
        let mut svr = regressor();
        let device = Some(ExecutionTarget::Device(DeviceContext::new("gpu:0")));
        svr.fit_on(&x, &y, None, device.clone()).unwrap();
        assert!(!svr.is_accelerated());

        let predictions = svr.predict_on(&x, device).unwrap();
        assert_relative_eq!(predictions[2], 3.0);
        assert_eq!(svr.last_dispatch().unwrap().path, DispatchPath::Reference);
    }

    #[test]
    fn test_sparse_input_and_engine_rejection_fall_back() {
        let (_, y) = data();
        let sparse = InputData::from(
            CsrMatrix::from_sparse_rows(
                vec![(vec![1], vec![1.0]), (vec![0, 1], vec![1.0, 3.0]), (vec![0], vec![2.0])],
                2,
            )
            .unwrap(),
        );
        let mut svr = regressor();
        svr.fit(&sparse, &y, None).unwrap();
        assert_eq!(svr.last_dispatch().unwrap().path, DispatchPath::Reference);

        let (x, _) = data();
        let mut svr = NuSvr::new(
            Arc::new(PatchRegistry::patched()),
            engines(MeanEngine {
                max_samples: Some(2),
            }),
        );
        svr.fit(&x, &y, None).unwrap();
        assert!(!svr.is_accelerated());
        assert_eq!(svr.last_dispatch().unwrap().path, DispatchPath::Fallback);
    }

    #[test]
    fn test_narrow_support_vectors_fall_back() {
        let (x, y) = data();
        let mut svr = NuSvr::new(
            Arc::new(PatchRegistry::patched()),
            SvrEngines {
                accelerated: Arc::new(NarrowEngine),
                reference: Arc::new(MeanReference),
            },
        );
        svr.fit(&x, &y, None).unwrap();
        assert!(!svr.is_accelerated());
        let record = svr.last_dispatch().unwrap();
        assert_eq!(record.path, DispatchPath::Fallback);
        assert!(record.reason.as_deref().unwrap().contains("1 features"));
        assert_eq!(svr.fit_attrs().unwrap().support_vectors.len(), 2);

        let sparse = InputData::from(
            CsrMatrix::from_sparse_rows(vec![(vec![0], vec![1.0]), (vec![1], vec![2.0])], 2).unwrap(),
        );
        let predictions = svr.predict(&sparse).unwrap();
        assert_relative_eq!(predictions[1], 3.0);
        assert_eq!(svr.last_dispatch().unwrap().path, DispatchPath::Reference);
    }

    #[test]
    fn test_predict_paths_agree() {
        let (x, y) = data();
        let mut fast = regressor();
        fast.fit(&x, &y, None).unwrap();

        let mut slow = NuSvr::new(
            Arc::new(PatchRegistry::with_defaults()),
            engines(MeanEngine::default()),
        );
        slow.fit(&x, &y, None).unwrap();
        assert_eq!(slow.last_dispatch().unwrap().path, DispatchPath::Unpatched);

        assert_eq!(fast.predict(&x).unwrap(), slow.predict(&x).unwrap());
    }

    #[test]
    fn test_unfitted_predict() {
        let (x, _) = data();
        assert!(matches!(
            regressor().predict(&x),
            Err(Error::NotFitted("NuSVR"))
        ));
    }
}
