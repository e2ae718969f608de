//! `weft build` command implementation.
//!
//! Builds every entry point and replaces the output directory on success.

use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use weft_core::bundler::OutputKind;
use weft_core::{BuildError, BuildWarning, Bundler, Config};

/// JSON output for the build command (stable contract).
#[derive(Serialize)]
struct BuildResultJson {
    ok: bool,
    outputs: Vec<OutputJson>,
    warnings: Vec<WarningJson>,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorJson>,
}

#[derive(Serialize)]
struct OutputJson {
    path: String,
    kind: OutputKind,
    size_bytes: usize,
}

#[derive(Serialize)]
struct WarningJson {
    message: String,
    chain: Vec<String>,
}

#[derive(Serialize)]
struct ErrorJson {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    chain: Option<Vec<String>>,
}

impl From<&BuildWarning> for WarningJson {
    fn from(warning: &BuildWarning) -> Self {
        Self {
            message: warning.message.clone(),
            chain: warning.chain.links().to_vec(),
        }
    }
}

impl From<&BuildError> for ErrorJson {
    fn from(err: &BuildError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            chain: err.chain().map(|c| c.links().to_vec()),
        }
    }
}

/// Run the build command.
pub fn run(
    cwd: &Path,
    config_path: Option<&Path>,
    overrides: impl FnOnce(Config) -> Config,
    json: bool,
) -> Result<()> {
    let start = Instant::now();

    let result = Config::load(cwd, config_path)
        .map(overrides)
        .and_then(Bundler::new)
        .map_err(BuildError::from)
        .and_then(|bundler| bundler.build_and_write());
    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(result) => {
            if json {
                let out = BuildResultJson {
                    ok: true,
                    outputs: result
                        .outputs
                        .iter()
                        .map(|f| OutputJson {
                            path: f.path.clone(),
                            kind: f.kind,
                            size_bytes: f.bytes.len(),
                        })
                        .collect(),
                    warnings: result.warnings.iter().map(WarningJson::from).collect(),
                    duration_ms,
                    error: None,
                };
                println!("{}", serde_json::to_string(&out).into_diagnostic()?);
            } else {
                for file in result.outputs.iter() {
                    println!("  {:<48} {:>8.1}KB", file.path, file.bytes.len() as f64 / 1024.0);
                }
                for warning in &result.warnings {
                    eprintln!("  warning: {warning}");
                }
                println!(
                    "  {} modules, {} chunks in {}ms",
                    result.graph.len(),
                    result.plan.chunks().len(),
                    duration_ms
                );
            }
            Ok(())
        }
        Err(err) => {
            if json {
                let out = BuildResultJson {
                    ok: false,
                    outputs: Vec::new(),
                    warnings: Vec::new(),
                    duration_ms,
                    error: Some(ErrorJson::from(&err)),
                };
                println!("{}", serde_json::to_string(&out).into_diagnostic()?);
                std::process::exit(1);
            }
            Err(err).into_diagnostic()
        }
    }
}
