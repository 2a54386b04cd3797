//! Support vector machine estimators
//!
//! Only the dispatch layer lives here. Training is delegated to the
//! [`SvrEngine`] and [`SvrReference`] implementations handed to [`NuSvr`].

pub mod engine;
pub mod kernel;
pub mod nusvr;

pub use self::engine::{NativeSvrParams, SvrEngine, SvrFit, SvrModel, SvrReference};
pub use self::kernel::{Gamma, KernelFunction, SvmKernel};
pub use self::nusvr::{NuSvr, NuSvrParams, SvrEngines};
