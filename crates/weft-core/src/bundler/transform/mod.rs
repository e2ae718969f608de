//! Transform registry.
//!
//! A closed set of typed steps ([`TransformStep`]) grouped into ordered
//! chains, each guarded by a path predicate. Rules are checked in
//! registration order and the first match wins; there is no fallthrough.
//! Files that match no rule get the identity chain and are emitted as-is.
//!
//! Every step is a pure function of `(content, meta)` plus the read-only
//! [`TransformContext`], so modules can be transformed on any thread.

mod data;
mod script;
mod style;

use crate::config::RuleConfig;
use crate::error::ConfigError;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// One transform step, as written in the `use` list of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "loader", rename_all = "camelCase", deny_unknown_fields)]
pub enum TransformStep {
    /// Lower `import`/`export` to the bundle runtime and collect specifiers.
    Script,
    /// Turn a stylesheet into a module that injects it, or keep it for extraction.
    Style {
        /// Discover and rewrite `url()` references.
        #[serde(default = "enabled")]
        urls: bool,
        /// Emit into the chunk's stylesheet file instead of injecting at runtime.
        #[serde(default)]
        extract: bool,
    },
    /// Validate JSON and export it.
    Json,
    /// Export the file content as a string.
    Text,
    /// Replace configured constants.
    Define,
    /// Treat the file as a binary asset.
    Asset {
        /// Allow inlining below the configured threshold.
        #[serde(default = "enabled")]
        inline: bool,
    },
}

fn enabled() -> bool {
    true
}

impl TransformStep {
    /// Name used in error messages.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Style { .. } => "style",
            Self::Json => "json",
            Self::Text => "text",
            Self::Define => "define",
            Self::Asset { .. } => "asset",
        }
    }
}

/// What a module is after its chain ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ModuleKind {
    /// Code is a module body for the bundle runtime.
    Script,
    /// Code is CSS destined for the chunk's stylesheet file.
    Stylesheet,
    /// Raw bytes are emitted as a file or inlined.
    Asset { inline: bool },
}

/// How a dependency was referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DependencyKind {
    /// `import ... from`, `require()`, re-exports.
    Static,
    /// `import()`. Failing to resolve one is a warning, not an error.
    Dynamic,
    /// Stylesheet `url()`.
    Url,
}

/// A specifier discovered by a transform step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub specifier: String,
    pub kind: DependencyKind,
}

impl Dependency {
    #[must_use]
    pub fn new(specifier: impl Into<String>, kind: DependencyKind) -> Self {
        Self {
            specifier: specifier.into(),
            kind,
        }
    }

    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.kind == DependencyKind::Dynamic
    }
}

/// Metadata threaded through a chain alongside the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformMeta {
    pub kind: ModuleKind,
    /// In discovery order, without duplicates.
    pub dependencies: Vec<Dependency>,
}

impl Default for TransformMeta {
    fn default() -> Self {
        Self {
            kind: ModuleKind::Asset { inline: false },
            dependencies: Vec::new(),
        }
    }
}

impl TransformMeta {
    fn add_dependency(&mut self, dep: Dependency) {
        if let Some(existing) = self
            .dependencies
            .iter_mut()
            .find(|d| d.specifier == dep.specifier)
        {
            // A static reference makes a dynamic one required.
            if existing.kind == DependencyKind::Dynamic {
                existing.kind = dep.kind;
            }
            return;
        }
        self.dependencies.push(dep);
    }
}

/// Read-only inputs shared by every step.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    pub path: &'a Path,
    /// Constant replacements, longest key first.
    pub define: &'a [(String, String)],
}

/// A step rejected its input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("[{step}] {message}")]
pub struct TransformError {
    pub step: &'static str,
    pub message: String,
}

impl TransformError {
    pub(crate) fn new(step: &'static str, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
        }
    }

    /// Stable machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        "TRANSFORM_FAILED"
    }
}

/// Result of running a chain over one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub kind: ModuleKind,
    /// Transformed text. Empty for assets.
    pub code: String,
    pub dependencies: Vec<Dependency>,
}

/// An ordered sequence of steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformChain {
    steps: Vec<TransformStep>,
}

impl TransformChain {
    #[must_use]
    pub fn new(steps: Vec<TransformStep>) -> Self {
        Self { steps }
    }

    /// The chain for files no rule matches.
    #[must_use]
    pub fn identity() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn steps(&self) -> &[TransformStep] {
        &self.steps
    }

    /// Run every step in order over `raw`.
    pub fn apply(
        &self,
        raw: &[u8],
        ctx: &TransformContext<'_>,
    ) -> Result<TransformOutput, TransformError> {
        let mut content: Option<String> = None;
        let mut meta = TransformMeta::default();

        for step in &self.steps {
            let (next, next_meta) = run_step(step, content, meta, raw, ctx)?;
            content = next;
            meta = next_meta;
        }

        let code = match meta.kind {
            ModuleKind::Asset { .. } => String::new(),
            _ => content.unwrap_or_default(),
        };
        Ok(TransformOutput {
            kind: meta.kind,
            code,
            dependencies: meta.dependencies,
        })
    }
}

fn run_step(
    step: &TransformStep,
    content: Option<String>,
    meta: TransformMeta,
    raw: &[u8],
    ctx: &TransformContext<'_>,
) -> Result<(Option<String>, TransformMeta), TransformError> {
    let text = || match &content {
        Some(text) => Ok(text.clone()),
        None => String::from_utf8(raw.to_vec())
            .map_err(|_| TransformError::new(step.name(), "file is not valid UTF-8")),
    };

    let (text, meta) = match step {
        TransformStep::Asset { inline } => {
            let meta = TransformMeta {
                kind: ModuleKind::Asset { inline: *inline },
                ..meta
            };
            return Ok((None, meta));
        }
        TransformStep::Script => script::lower(&text()?, meta)?,
        TransformStep::Style { urls, extract } => style::transform(&text()?, meta, *urls, *extract),
        TransformStep::Json => data::json(&text()?, meta)?,
        TransformStep::Text => data::text(&text()?, meta),
        TransformStep::Define => (data::define(&text()?, ctx.define), meta),
    };
    Ok((Some(text), meta))
}

/// A JavaScript string literal for `s`.
#[must_use]
pub fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// The exact text steps emit for a reference to `specifier`.
///
/// Assembly relies on this form to substitute asset URLs.
#[must_use]
pub fn require_call(specifier: &str) -> String {
    format!("require({})", js_string(specifier))
}

/// A rule: path predicate plus chain.
#[derive(Debug, Clone)]
pub struct TransformRule {
    /// Position in the configured rule list.
    pub index: usize,
    test: Regex,
    exclude: Option<Regex>,
    chain: TransformChain,
}

impl TransformRule {
    /// Whether this rule applies to the `/`-separated path.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.test.is_match(path) && !self.exclude.as_ref().is_some_and(|ex| ex.is_match(path))
    }

    #[must_use]
    pub fn chain(&self) -> &TransformChain {
        &self.chain
    }
}

/// Ordered rule list compiled from configuration.
#[derive(Debug, Clone)]
pub struct TransformRegistry {
    rules: Vec<TransformRule>,
    identity: TransformChain,
}

impl TransformRegistry {
    /// Compile rules in configured order.
    pub fn from_rules(rules: &[RuleConfig]) -> Result<Self, ConfigError> {
        let compile = |index: usize, pattern: &str| {
            Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                index,
                pattern: pattern.to_string(),
                message: e.to_string(),
            })
        };

        let rules = rules
            .iter()
            .enumerate()
            .map(|(index, rule)| {
                Ok(TransformRule {
                    index,
                    test: compile(index, &rule.test)?,
                    exclude: rule
                        .exclude
                        .as_deref()
                        .map(|ex| compile(index, ex))
                        .transpose()?,
                    chain: TransformChain::new(rule.steps.clone()),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            rules,
            identity: TransformChain::identity(),
        })
    }

    /// The first rule matching `path`, if any.
    #[must_use]
    pub fn rule_for(&self, path: &Path) -> Option<&TransformRule> {
        let normalized = path.to_string_lossy().replace('\\', "/");
        self.rules.iter().find(|rule| rule.matches(&normalized))
    }

    /// The chain for `path`: the first matching rule's, or the identity chain.
    #[must_use]
    pub fn chain_for(&self, path: &Path) -> &TransformChain {
        self.rule_for(path)
            .map_or(&self.identity, TransformRule::chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_rules;

    fn ctx(path: &Path) -> TransformContext<'_> {
        TransformContext { path, define: &[] }
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let rules = vec![
            RuleConfig::new(r"\.jsx$", vec![TransformStep::Text]),
            RuleConfig::new(r"\.(js|jsx)$", vec![TransformStep::Script]),
        ];
        let registry = TransformRegistry::from_rules(&rules).unwrap();
        assert_eq!(registry.rule_for(Path::new("/p/a.jsx")).unwrap().index, 0);
        assert_eq!(registry.rule_for(Path::new("/p/a.js")).unwrap().index, 1);

        // Swapping registration order changes the outcome.
        let swapped: Vec<_> = rules.into_iter().rev().collect();
        let registry = TransformRegistry::from_rules(&swapped).unwrap();
        assert_eq!(
            registry.chain_for(Path::new("/p/a.jsx")).steps(),
            &[TransformStep::Script]
        );
    }

    #[test]
    fn test_exclude_skips_rule() {
        let registry = TransformRegistry::from_rules(&default_rules()).unwrap();
        assert_eq!(
            registry.rule_for(Path::new("/p/src/app.js")).unwrap().index,
            1
        );
        assert_eq!(
            registry
                .rule_for(Path::new("/p/node_modules/react/index.js"))
                .unwrap()
                .index,
            2
        );
    }

    #[test]
    fn test_unmatched_file_gets_identity_chain() {
        let registry = TransformRegistry::from_rules(&default_rules()).unwrap();
        let chain = registry.chain_for(Path::new("/p/font.woff2"));
        assert!(chain.is_identity());

        let out = chain
            .apply(&[0, 159, 146, 150], &ctx(Path::new("/p/font.woff2")))
            .unwrap();
        assert_eq!(out.kind, ModuleKind::Asset { inline: false });
        assert!(out.dependencies.is_empty());
    }

    #[test]
    fn test_invalid_pattern() {
        let err = TransformRegistry::from_rules(&[RuleConfig::new("(", vec![TransformStep::Text])])
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID_PATTERN");
    }

    #[test]
    fn test_text_step_rejects_binary() {
        let chain = TransformChain::new(vec![TransformStep::Text]);
        let err = chain
            .apply(&[0xff, 0xfe], &ctx(Path::new("/p/a.txt")))
            .unwrap_err();
        assert_eq!(err.step, "text");
    }

    #[test]
    fn test_chain_runs_steps_in_order() {
        let define = vec![("__DEV__".to_string(), "false".to_string())];
        let chain = TransformChain::new(vec![TransformStep::Define, TransformStep::Script]);
        let out = chain
            .apply(
                b"import x from './x';\nif (__DEV__) { x(); }\n",
                &TransformContext {
                    path: Path::new("/p/a.js"),
                    define: &define,
                },
            )
            .unwrap();
        assert_eq!(out.kind, ModuleKind::Script);
        assert!(out.code.contains("if (false)"));
        assert!(out.code.contains(r#"require("./x")"#));
        assert_eq!(out.dependencies, vec![Dependency::new("./x", DependencyKind::Static)]);
    }

    #[test]
    fn test_step_deserializes_with_defaults() {
        let step: TransformStep = serde_json::from_str(r#"{ "loader": "asset" }"#).unwrap();
        assert_eq!(step, TransformStep::Asset { inline: true });
        assert!(serde_json::from_str::<TransformStep>(r#"{ "loader": "babel" }"#).is_err());
    }
}
