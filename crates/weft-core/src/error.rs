use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::bundler::{ResolveError, TransformError};

/// Errors raised while loading or validating a [`crate::Config`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid rule #{index} pattern '{pattern}': {message}")]
    InvalidPattern {
        index: usize,
        pattern: String,
        message: String,
    },

    #[error("Invalid {field} template '{template}': {message}")]
    InvalidTemplate {
        field: &'static str,
        template: String,
        message: String,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Stable machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "CONFIG_NOT_FOUND",
            Self::Read { .. } => "CONFIG_READ_ERROR",
            Self::Parse { .. } => "CONFIG_PARSE_ERROR",
            Self::InvalidPattern { .. } => "CONFIG_INVALID_PATTERN",
            Self::InvalidTemplate { .. } => "CONFIG_INVALID_TEMPLATE",
            Self::Invalid(_) => "CONFIG_INVALID",
        }
    }
}

/// The import chain that led from an entry point to a module.
///
/// The first element is the entry name, followed by each specifier on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportChain {
    links: Vec<String>,
}

impl ImportChain {
    /// Start a chain at the named entry point.
    #[must_use]
    pub fn entry(name: &str) -> Self {
        Self {
            links: vec![name.to_string()],
        }
    }

    /// Extend the chain by one import edge.
    #[must_use]
    pub fn child(&self, specifier: &str) -> Self {
        let mut links = self.links.clone();
        links.push(specifier.to_string());
        Self { links }
    }

    /// The entry name this chain starts from.
    #[must_use]
    pub fn entry_name(&self) -> &str {
        &self.links[0]
    }

    /// Entry name followed by each specifier.
    #[must_use]
    pub fn links(&self) -> &[String] {
        &self.links
    }
}

impl fmt::Display for ImportChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.links.join(" → "))
    }
}

/// A build failure. The previous output directory is never modified when one
/// of these is returned.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("{source} (import chain: {chain})")]
    Resolution {
        #[source]
        source: ResolveError,
        chain: ImportChain,
    },

    #[error("Failed to transform {} (import chain: {chain}): {source}", path.display())]
    Transform {
        path: PathBuf,
        chain: ImportChain,
        #[source]
        source: TransformError,
    },

    #[error("Failed to read {} (import chain: {chain}): {source}", path.display())]
    Read {
        path: PathBuf,
        chain: ImportChain,
        #[source]
        source: std::io::Error,
    },

    #[error("Two outputs map to the same file '{path}' with different content")]
    OutputConflict { path: String },

    #[error("Output path '{path}' escapes the output directory")]
    OutputPath { path: String },

    #[error("Failed to write output {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Build cancelled: superseded by a newer build")]
    Cancelled,
}

impl BuildError {
    /// Stable machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Resolution { .. } => "BUILD_RESOLUTION_ERROR",
            Self::Transform { .. } => "BUILD_TRANSFORM_ERROR",
            Self::Read { .. } => "BUILD_READ_ERROR",
            Self::OutputConflict { .. } => "BUILD_OUTPUT_CONFLICT",
            Self::OutputPath { .. } => "BUILD_OUTPUT_PATH",
            Self::Write { .. } => "BUILD_WRITE_ERROR",
            Self::Config(e) => e.code(),
            Self::Cancelled => "BUILD_CANCELLED",
        }
    }

    /// Import chain that reached the failing module, if the failure has one.
    #[must_use]
    pub fn chain(&self) -> Option<&ImportChain> {
        match self {
            Self::Resolution { chain, .. }
            | Self::Transform { chain, .. }
            | Self::Read { chain, .. } => Some(chain),
            _ => None,
        }
    }
}

/// A non-fatal problem, e.g. an optional import that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildWarning {
    pub chain: ImportChain,
    pub message: String,
}

impl fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (import chain: {})", self.message, self.chain)
    }
}
