pub mod build;
pub mod dev;

use miette::{IntoDiagnostic, Result};
use std::path::Path;
use weft_core::Config;

/// Load the project config from `cwd`, or from `explicit` when given.
pub fn load_config(cwd: &Path, explicit: Option<&Path>) -> Result<Config> {
    Config::load(cwd, explicit).into_diagnostic()
}
