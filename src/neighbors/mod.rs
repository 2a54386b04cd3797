//! Nearest neighbors estimators
//!
//! [`NearestNeighbors`] and [`KNeighborsClassifier`] are facades whose fit and
//! query methods are routed through the dispatcher. The modules below hold the
//! pieces each route is built from: capability rules, parameter translation,
//! engines and result adaptation.

pub mod adapter;
pub mod algorithm;
pub mod classifier;
pub mod engine;
pub mod metric;
pub mod predicate;
pub mod translate;
pub mod unsupervised;

pub use self::adapter::{KNeighbors, RadiusNeighbors};
pub use self::algorithm::{resolve_algorithm, Algorithm, BRUTE_FEATURE_THRESHOLD};
pub use self::classifier::{KNeighborsClassifier, Weights};
pub use self::engine::{
    BruteForceReference, HostNeighborsEngine, NativeNeighbors, NeighborsEngine, NeighborsFit,
    NeighborsModel, NeighborsReference, Query,
};
pub use self::metric::{effective_metric, EffectiveMetric, Metric, MetricParams};
pub use self::translate::{translate, FitPlan, NativeNeighborsParams, NeighborsParams};
pub use self::unsupervised::{NearestNeighbors, NeighborsEngines};
