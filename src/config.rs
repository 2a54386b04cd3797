//! Execution targets and ambient dispatch configuration
//!
//! The process-wide configuration selects the default execution target.
//! [`config_context`] overrides it for the current thread until the returned
//! guard is dropped, so scoped overrides never leak into other threads.
//!
//! ```rust
//! use accelex::config::{config_context, get_config, Config, TargetSelector};
//!
//! # fn main() -> accelex::core::Result<()> {
//! let selector: TargetSelector = "gpu:0".parse()?;
//! {
//!     let _guard = config_context(Config::default().with_target_offload(selector.clone()));
//!     assert_eq!(get_config().target_offload, selector);
//! }
//! assert_eq!(get_config().target_offload, TargetSelector::Auto);
//! # Ok(())
//! # }
//! ```

use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

/// Opaque handle naming an accelerator device context
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceContext {
    id: String,
}

impl DeviceContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Where a single call is routed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionTarget {
    /// Host execution without an explicit device context
    Host,
    Cpu,
    Device(DeviceContext),
}

/// Which capability whitelist applies to a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetClass {
    Cpu,
    Device,
}

impl ExecutionTarget {
    pub fn class(&self) -> TargetClass {
        match self {
            ExecutionTarget::Host | ExecutionTarget::Cpu => TargetClass::Cpu,
            ExecutionTarget::Device(_) => TargetClass::Device,
        }
    }
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionTarget::Host => f.write_str("host"),
            ExecutionTarget::Cpu => f.write_str("cpu"),
            ExecutionTarget::Device(ctx) => f.write_str(ctx.id()),
        }
    }
}

/// User-facing target selection, as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TargetSelector {
    #[default]
    Auto,
    Host,
    Cpu,
    /// A device such as `gpu` or `gpu:1`
    Device(String),
}

impl TargetSelector {
    pub fn resolve(&self) -> ExecutionTarget {
        match self {
            TargetSelector::Auto | TargetSelector::Host => ExecutionTarget::Host,
            TargetSelector::Cpu => ExecutionTarget::Cpu,
            TargetSelector::Device(id) => ExecutionTarget::Device(DeviceContext::new(id.clone())),
        }
    }
}

impl FromStr for TargetSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s {
            "auto" => Ok(TargetSelector::Auto),
            "host" => Ok(TargetSelector::Host),
            "cpu" => Ok(TargetSelector::Cpu),
            "gpu" => Ok(TargetSelector::Device(s.to_string())),
            _ => match s.strip_prefix("gpu:") {
                Some(ordinal) if !ordinal.is_empty() && ordinal.parse::<u32>().is_ok() => {
                    Ok(TargetSelector::Device(s.to_string()))
                }
                _ => Err(Error::InvalidTarget(s.to_string())),
            },
        }
    }
}

impl fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSelector::Auto => f.write_str("auto"),
            TargetSelector::Host => f.write_str("host"),
            TargetSelector::Cpu => f.write_str("cpu"),
            TargetSelector::Device(id) => f.write_str(id),
        }
    }
}

/// Ambient dispatch configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    /// Default execution target for calls without an explicit override
    pub target_offload: TargetSelector,
    /// Skip finiteness validation on the reference path
    pub assume_finite: bool,
}

impl Config {
    pub fn with_target_offload(mut self, target_offload: TargetSelector) -> Self {
        self.target_offload = target_offload;
        self
    }

    pub fn with_assume_finite(mut self, assume_finite: bool) -> Self {
        self.assume_finite = assume_finite;
        self
    }
}

static GLOBAL_CONFIG: RwLock<Config> = RwLock::new(Config {
    target_offload: TargetSelector::Auto,
    assume_finite: false,
});

thread_local! {
    static SCOPED: RefCell<Vec<Config>> = const { RefCell::new(Vec::new()) };
}

/// Current configuration: the innermost scoped override, else the global one
pub fn get_config() -> Config {
    SCOPED
        .with(|stack| stack.borrow().last().cloned())
        .unwrap_or_else(|| {
            GLOBAL_CONFIG
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
}

/// Replace the process-wide configuration
pub fn set_config(config: Config) {
    *GLOBAL_CONFIG
        .write()
        .unwrap_or_else(PoisonError::into_inner) = config;
}

/// Default target for the current thread
pub fn current_target() -> ExecutionTarget {
    get_config().target_offload.resolve()
}

/// Restores the previous configuration when dropped
#[must_use = "the override ends as soon as the guard is dropped"]
pub struct ConfigGuard {
    _private: (),
}

/// Override the configuration for the current thread
pub fn config_context(config: Config) -> ConfigGuard {
    SCOPED.with(|stack| stack.borrow_mut().push(config));
    ConfigGuard { _private: () }
}

impl Drop for ConfigGuard {
    fn drop(&mut self) {
        SCOPED.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
