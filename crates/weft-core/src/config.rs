//! Build configuration.
//!
//! Loaded from `weft.config.json` (or `.weft.json`) in the project root.
//! Every recognized option is a field below; unknown keys are rejected.
//!
//! ```json
//! {
//!   "entry": { "main": "./src/index.jsx" },
//!   "output": { "dir": "dist", "assetFilename": "static/media/[name].[hash:8].[ext]" },
//!   "resolve": { "extensions": [".js", ".jsx", ".json", ".css"], "alias": { "@": "src" } },
//!   "rules": [
//!     { "test": "\\.css$", "use": [{ "loader": "style" }] },
//!     { "test": "\\.(jsx|js)$", "exclude": "node_modules", "use": [{ "loader": "define" }, { "loader": "script" }] },
//!     { "test": "\\.(bmp|gif|jpe?g|png)$", "use": [{ "loader": "asset" }] }
//!   ],
//!   "inlineLimit": 10000,
//!   "devServer": { "port": 3004, "compress": true, "liveReload": true }
//! }
//! ```

use crate::bundler::template;
use crate::bundler::TransformStep;
use crate::error::ConfigError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// Config file names in priority order.
pub const CONFIG_FILES: &[&str] = &["weft.config.json", ".weft.json"];

/// Default asset inlining threshold in bytes.
pub const DEFAULT_INLINE_LIMIT: u64 = 10_000;

/// Build mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl Mode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

/// Top-level build configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Project root. Set from the config file location, never deserialized.
    #[serde(skip)]
    pub root: PathBuf,

    /// Entry points: chunk name → specifier (resolved from the root), in
    /// declaration order.
    pub entry: IndexMap<String, String>,

    #[serde(default)]
    pub mode: Mode,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub resolve: ResolveConfig,

    /// Transform rules. First matching rule wins.
    #[serde(default = "default_rules")]
    pub rules: Vec<RuleConfig>,

    /// Inline-eligible assets strictly smaller than this many bytes are embedded.
    #[serde(default = "default_inline_limit")]
    pub inline_limit: u64,

    /// Constant replacements applied by the `define` step.
    #[serde(default)]
    pub define: BTreeMap<String, String>,

    #[serde(default)]
    pub html: HtmlConfig,

    #[serde(default)]
    pub dev_server: DevServerConfig,
}

/// Output location and naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct OutputConfig {
    /// Output directory, relative to the root.
    pub dir: PathBuf,
    /// Chunk file name template. Defaults depend on the mode.
    pub filename: Option<String>,
    /// Extracted stylesheet file name template. Defaults depend on the mode.
    pub css_filename: Option<String>,
    /// Standalone asset file name template.
    pub asset_filename: String,
    /// Prefix for URLs of emitted files.
    pub public_path: String,
    /// Write `manifest.json`.
    pub manifest: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("dist"),
            filename: None,
            css_filename: None,
            asset_filename: "static/media/[name].[hash:8].[ext]".to_string(),
            public_path: String::new(),
            manifest: true,
        }
    }
}

impl OutputConfig {
    /// Chunk file name template for the given mode.
    #[must_use]
    pub fn js_template(&self, mode: Mode) -> &str {
        match (&self.filename, mode) {
            (Some(t), _) => t,
            (None, Mode::Development) => "[name].js",
            (None, Mode::Production) => "[name].[hash:8].js",
        }
    }

    /// Extracted stylesheet file name template for the given mode.
    #[must_use]
    pub fn css_template(&self, mode: Mode) -> &str {
        match (&self.css_filename, mode) {
            (Some(t), _) => t,
            (None, Mode::Development) => "[name].css",
            (None, Mode::Production) => "[name].[hash:8].css",
        }
    }
}

/// Resolution options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolveConfig {
    /// Extensions tried, in order, when a specifier omits one.
    pub extensions: Vec<String>,
    /// Alias prefix → directory (relative to the root).
    pub alias: BTreeMap<String, String>,
    /// Directory names searched upwards for bare specifiers.
    pub modules: Vec<String>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            extensions: [".js", ".jsx", ".json", ".css"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            alias: BTreeMap::new(),
            modules: vec!["node_modules".to_string()],
        }
    }
}

/// One transform rule: a path predicate and the chain applied on match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    /// Regular expression matched against the absolute, `/`-separated path.
    pub test: String,
    /// Paths matching this expression are skipped by the rule.
    #[serde(default)]
    pub exclude: Option<String>,
    /// Steps applied in order.
    #[serde(rename = "use")]
    pub steps: Vec<TransformStep>,
}

impl RuleConfig {
    #[must_use]
    pub fn new(test: &str, steps: Vec<TransformStep>) -> Self {
        Self {
            test: test.to_string(),
            exclude: None,
            steps,
        }
    }

    #[must_use]
    pub fn excluding(mut self, pattern: &str) -> Self {
        self.exclude = Some(pattern.to_string());
        self
    }
}

/// Host document options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HtmlConfig {
    /// Template file (relative to the root). A default document is generated when absent.
    pub template: Option<PathBuf>,
    /// Output file name.
    pub filename: String,
    /// `<title>` of the generated document.
    pub title: String,
}

impl Default for HtmlConfig {
    fn default() -> Self {
        Self {
            template: None,
            filename: "index.html".to_string(),
            title: "weft app".to_string(),
        }
    }
}

/// Dev server options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct DevServerConfig {
    pub port: u16,
    pub host: String,
    /// Inject the reload client and notify browsers after each rebuild.
    pub live_reload: bool,
    /// Gzip responses.
    pub compress: bool,
    /// File events closer together than this are coalesced into one rebuild.
    pub debounce_ms: u64,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            port: 3004,
            host: "127.0.0.1".to_string(),
            live_reload: true,
            compress: true,
            debounce_ms: 50,
        }
    }
}

fn default_inline_limit() -> u64 {
    DEFAULT_INLINE_LIMIT
}

/// Rules used when the config file does not list any.
///
/// Order matters: application scripts get `define` before `script`, while
/// scripts under `node_modules` fall through to the plain script rule.
#[must_use]
pub fn default_rules() -> Vec<RuleConfig> {
    vec![
        RuleConfig::new(
            r"\.css$",
            vec![TransformStep::Style {
                urls: true,
                extract: false,
            }],
        ),
        RuleConfig::new(
            r"\.(jsx|js|mjs)$",
            vec![TransformStep::Define, TransformStep::Script],
        )
        .excluding("node_modules"),
        RuleConfig::new(r"\.(jsx|js|mjs|cjs)$", vec![TransformStep::Script]),
        RuleConfig::new(r"\.json$", vec![TransformStep::Json]),
        RuleConfig::new(
            r"\.(bmp|gif|jpe?g|png|webp|svg)$",
            vec![TransformStep::Asset { inline: true }],
        ),
    ]
}

/// A single path segment that cannot climb out of its directory.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(|c| c == '/' || c == '\\') && !name.contains("..")
}

/// Find a config file in the given root directory.
#[must_use]
pub fn find_config_file(root: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
}

impl Config {
    /// A config rooted at `root` with no entries and default options.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entry: IndexMap::new(),
            mode: Mode::default(),
            output: OutputConfig::default(),
            resolve: ResolveConfig::default(),
            rules: default_rules(),
            inline_limit: DEFAULT_INLINE_LIMIT,
            define: BTreeMap::new(),
            html: HtmlConfig::default(),
            dev_server: DevServerConfig::default(),
        }
    }

    /// Load configuration from `root`.
    ///
    /// If `explicit` is `Some`, that file is used (relative paths are joined to
    /// `root`) and its directory becomes the project root. Otherwise the
    /// [`CONFIG_FILES`] are tried in order.
    pub fn load(root: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(p) => {
                let abs = if p.is_absolute() {
                    p.to_path_buf()
                } else {
                    root.join(p)
                };
                if !abs.is_file() {
                    return Err(ConfigError::NotFound { path: abs });
                }
                abs
            }
            None => find_config_file(root).ok_or_else(|| ConfigError::NotFound {
                path: root.join(CONFIG_FILES[0]),
            })?,
        };

        let source = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        let config_root = path.parent().unwrap_or(root);
        let config_root = dunce::canonicalize(config_root).unwrap_or_else(|_| config_root.to_path_buf());
        Self::from_json(&config_root, &source, &path)
    }

    /// Parse and validate a JSON config. `origin` is only used in error messages.
    pub fn from_json(root: &Path, source: &str, origin: &Path) -> Result<Self, ConfigError> {
        let mut config: Config =
            serde_json::from_str(source).map_err(|source| ConfigError::Parse {
                path: origin.to_path_buf(),
                source,
            })?;
        config.root = root.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Add an entry point.
    #[must_use]
    pub fn with_entry(mut self, name: &str, specifier: &str) -> Self {
        self.entry.insert(name.to_string(), specifier.to_string());
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output.dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_rules(mut self, rules: Vec<RuleConfig>) -> Self {
        self.rules = rules;
        self
    }

    #[must_use]
    pub fn with_inline_limit(mut self, limit: u64) -> Self {
        self.inline_limit = limit;
        self
    }

    /// Check everything that can be checked without touching the file system.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entry.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one entry point is required".to_string(),
            ));
        }
        for (name, specifier) in &self.entry {
            if name.is_empty() || specifier.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "entry '{name}' must have a non-empty name and specifier"
                )));
            }
            // Entry names become `[name]` in output paths.
            if !is_plain_file_name(name) {
                return Err(ConfigError::Invalid(format!(
                    "entry name '{name}' must not contain '/', '\\' or '..'"
                )));
            }
        }
        if !is_plain_file_name(&self.html.filename) {
            return Err(ConfigError::Invalid(format!(
                "html.filename '{}' must be a file name without '/', '\\' or '..'",
                self.html.filename
            )));
        }
        // The output directory is replaced wholesale.
        let out_ok = !self.output.dir.as_os_str().is_empty()
            && self
                .output
                .dir
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::RootDir | Component::Prefix(_)))
            && !(self.output.dir.is_absolute() && self.root.starts_with(&self.output.dir));
        if !out_ok {
            return Err(ConfigError::Invalid(format!(
                "output.dir '{}' must not be empty, contain '.' or '..', or contain the project root",
                self.output.dir.display()
            )));
        }
        for ext in &self.resolve.extensions {
            if !ext.starts_with('.') {
                return Err(ConfigError::Invalid(format!(
                    "resolve extension '{ext}' must start with '.'"
                )));
            }
        }
        for (index, rule) in self.rules.iter().enumerate() {
            if rule.steps.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "rule #{index} ('{}') has no steps",
                    rule.test
                )));
            }
        }

        let templates = [
            ("output.filename", self.output.js_template(self.mode)),
            ("output.cssFilename", self.output.css_template(self.mode)),
            ("output.assetFilename", self.output.asset_filename.as_str()),
        ];
        for (field, value) in templates {
            template::validate(value).map_err(|message| ConfigError::InvalidTemplate {
                field,
                template: value.to_string(),
                message,
            })?;
        }
        Ok(())
    }

    /// Absolute output directory.
    #[must_use]
    pub fn out_dir(&self) -> PathBuf {
        self.root.join(&self.output.dir)
    }

    /// Define table with the implicit `process.env.NODE_ENV`, longest key first.
    #[must_use]
    pub fn effective_define(&self) -> Vec<(String, String)> {
        let mut table = self.define.clone();
        table
            .entry("process.env.NODE_ENV".to_string())
            .or_insert_with(|| format!("\"{}\"", self.mode.as_str()));
        let mut pairs: Vec<(String, String)> = table.into_iter().collect();
        pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        pairs
    }
}
