#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod bundler;
pub mod config;
pub mod dev;
pub mod error;

pub use bundler::{BuildResult, Bundler, CancelToken, ModuleCache, ModuleGraph, OutputSet};
pub use config::{Config, Mode};
pub use dev::{DevEvent, DevOrchestrator, RebuildScheduler};
pub use error::{BuildError, BuildWarning, ConfigError, ImportChain};

/// weft version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
