//! Module-graph bundler.
//!
//! ## Usage
//!
//! ```ignore
//! use weft_core::{Bundler, Config};
//!
//! let config = Config::load(&root, None)?;
//! let bundler = Bundler::new(config)?;
//! let result = bundler.build_and_write()?;
//! for file in result.outputs.iter() {
//!     println!("{}", file.path);
//! }
//! ```
//!
//! ## Architecture
//!
//! 1. **Resolve** - Map specifiers to canonical paths (alias, relative, bare)
//! 2. **Transform** - Run the first matching rule's chain on each module
//! 3. **Graph** - Breadth-first from the entries, one frontier at a time
//! 4. **Assemble** - One chunk per entry, assets inlined or emitted, host document
//! 5. **Write** - Stage every file, then swap the output directory in

mod assets;
mod chunks;
mod emit;
mod graph;
mod html;
mod output;
mod resolve;
pub mod template;
mod transform;

pub use assets::{mime_type, AssetEmission, AssetEmitter, EmittedAsset};
pub use chunks::{Chunk, ChunkPlan};
pub use emit::{render_chunk, ChunkCode};
pub use graph::{
    module_key, GraphBuild, GraphBuilder, ModuleCache, ModuleGraph, ModuleId, ModuleRecord,
};
pub use html::{escape, inject_before, render_host_document};
pub use output::{Manifest, ManifestChunk, OutputFile, OutputKind, OutputSet};
pub use resolve::{ResolveError, Resolver};
pub use transform::{
    js_string, require_call, Dependency, DependencyKind, ModuleKind, TransformChain,
    TransformContext, TransformError, TransformOutput, TransformRegistry, TransformRule,
    TransformStep,
};

use crate::config::Config;
use crate::error::{BuildError, BuildWarning, ConfigError};
use rustc_hash::FxHashMap as HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use template::TemplateVars;
use tracing::{debug, info};

/// Cooperative cancellation shared by the builds of one orchestrator.
///
/// Every token remembers the generation it was created for. Starting a newer
/// build (via [`CancelToken::supersede`]) cancels all older tokens.
#[derive(Debug, Clone)]
pub struct CancelToken {
    latest: Arc<AtomicU64>,
    generation: u64,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self {
            latest: Arc::new(AtomicU64::new(0)),
            generation: 0,
        }
    }

    /// True once a newer generation has started.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.latest.load(Ordering::Acquire) != self.generation
    }

    /// Start a new generation, cancelling this token and every older one.
    #[must_use]
    pub fn supersede(&self) -> CancelToken {
        let generation = self.latest.fetch_add(1, Ordering::AcqRel) + 1;
        Self {
            latest: Arc::clone(&self.latest),
            generation,
        }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything one build produced.
#[derive(Debug)]
pub struct BuildResult {
    pub graph: ModuleGraph,
    pub plan: ChunkPlan,
    pub outputs: OutputSet,
    pub manifest: Manifest,
    pub warnings: Vec<BuildWarning>,
    /// Modules reused from the dev cache.
    pub reused: usize,
}

impl BuildResult {
    /// Output path of the JS file for chunk `name`.
    #[must_use]
    pub fn chunk_file(&self, name: &str) -> Option<&str> {
        self.manifest.chunks.get(name).map(|c| c.js.as_str())
    }
}

/// Per-build state. Created at the start of a build and dropped at its end,
/// so no resolution survives into the next build.
struct BuildContext<'a> {
    config: &'a Config,
    registry: &'a TransformRegistry,
    define: &'a [(String, String)],
    resolver: Resolver,
    cancel: &'a CancelToken,
}

/// Configured bundler. Holds only data derived from the config.
#[derive(Debug)]
pub struct Bundler {
    config: Config,
    registry: TransformRegistry,
    define: Vec<(String, String)>,
}

impl Bundler {
    /// Validate `config` and compile its rules.
    ///
    /// The project root is canonicalized so module ids and resolved paths
    /// share one form.
    pub fn new(mut config: Config) -> Result<Self, ConfigError> {
        config.root = dunce::canonicalize(&config.root).map_err(|e| {
            ConfigError::Invalid(format!(
                "project root {} is not accessible: {e}",
                config.root.display()
            ))
        })?;
        config.validate()?;
        let registry = TransformRegistry::from_rules(&config.rules)?;
        let define = config.effective_define();
        Ok(Self {
            config,
            registry,
            define,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &TransformRegistry {
        &self.registry
    }

    /// Build without writing anything.
    pub fn build(&self) -> Result<BuildResult, BuildError> {
        self.build_with(&CancelToken::new(), None)
    }

    /// Build, reusing unchanged records from `cache` when given.
    pub fn build_with(
        &self,
        cancel: &CancelToken,
        cache: Option<&ModuleCache>,
    ) -> Result<BuildResult, BuildError> {
        let started = Instant::now();
        let ctx = BuildContext {
            config: &self.config,
            registry: &self.registry,
            define: &self.define,
            resolver: Resolver::new(&self.config.resolve, &self.config.root),
            cancel,
        };
        info!(
            mode = self.config.mode.as_str(),
            entries = self.config.entry.len(),
            "build started"
        );

        let GraphBuild {
            graph,
            warnings,
            reused,
        } = GraphBuilder {
            root: &ctx.config.root,
            resolver: &ctx.resolver,
            registry: ctx.registry,
            define: ctx.define,
            cancel: ctx.cancel,
            cache,
        }
        .build(&ctx.config.entry)?;

        let plan = ChunkPlan::per_entry(&graph);
        let (outputs, manifest) = assemble(&ctx, &graph, &plan)?;

        info!(
            modules = graph.len(),
            chunks = plan.chunks().len(),
            files = outputs.len(),
            reused,
            warnings = warnings.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "build finished"
        );
        Ok(BuildResult {
            graph,
            plan,
            outputs,
            manifest,
            warnings,
            reused,
        })
    }

    /// Replace the output directory with the files of `result`.
    ///
    /// Refuses with [`BuildError::Cancelled`] if `cancel` was superseded, so
    /// a stale build never overwrites a newer one.
    pub fn write(&self, result: &BuildResult, cancel: &CancelToken) -> Result<(), BuildError> {
        if cancel.is_cancelled() {
            info!(generation = cancel.generation(), "build superseded before write");
            return Err(BuildError::Cancelled);
        }
        let out_dir = self.config.out_dir();
        result.outputs.write_to(&out_dir)?;
        debug!(dir = %out_dir.display(), "output promoted");
        Ok(())
    }

    /// Build and write in one go.
    pub fn build_and_write(&self) -> Result<BuildResult, BuildError> {
        let cancel = CancelToken::new();
        let result = self.build_with(&cancel, None)?;
        self.write(&result, &cancel)?;
        Ok(result)
    }
}

/// Turn a graph and its chunk plan into output files.
fn assemble(
    ctx: &BuildContext<'_>,
    graph: &ModuleGraph,
    plan: &ChunkPlan,
) -> Result<(OutputSet, Manifest), BuildError> {
    let output = &ctx.config.output;
    let mut files = OutputSet::default();
    let mut manifest = Manifest::default();

    let emitter = AssetEmitter {
        inline_limit: ctx.config.inline_limit,
        template: &output.asset_filename,
        public_path: &output.public_path,
    };
    let mut urls: HashMap<ModuleId, String> = HashMap::default();
    for (id, record) in graph.iter() {
        if !matches!(record.kind, ModuleKind::Asset { .. }) {
            continue;
        }
        let emission = emitter.emit(record)?;
        urls.insert(id, emitter.url(&emission));
        if let AssetEmission::File(asset) = emission {
            debug!(module = %record.key, file = %asset.output_path, "emitted asset");
            manifest
                .assets
                .insert(record.key.clone(), asset.output_path.clone());
            files.add(OutputFile {
                path: asset.output_path,
                kind: OutputKind::Asset,
                bytes: asset.bytes,
            })?;
        }
    }

    let mut scripts = Vec::new();
    let mut styles = Vec::new();
    for chunk in plan.chunks() {
        let code = render_chunk(graph, chunk, &urls);

        let js_path = render_name(
            "output.filename",
            output.js_template(ctx.config.mode),
            &chunk.name,
            "js",
            code.js.as_bytes(),
        )?;
        debug!(chunk = %chunk.name, file = %js_path, modules = chunk.modules.len(), "emitted chunk");
        scripts.push(format!("{}{js_path}", output.public_path));
        files.add(OutputFile {
            path: js_path.clone(),
            kind: OutputKind::Chunk,
            bytes: code.js.into_bytes(),
        })?;

        let css_path = match code.css {
            Some(css) => {
                let path = render_name(
                    "output.cssFilename",
                    output.css_template(ctx.config.mode),
                    &chunk.name,
                    "css",
                    css.as_bytes(),
                )?;
                styles.push(format!("{}{path}", output.public_path));
                files.add(OutputFile {
                    path: path.clone(),
                    kind: OutputKind::Stylesheet,
                    bytes: css.into_bytes(),
                })?;
                Some(path)
            }
            None => None,
        };

        manifest.chunks.insert(
            chunk.name.clone(),
            ManifestChunk {
                js: js_path,
                css: css_path,
            },
        );
    }

    if ctx.cancel.is_cancelled() {
        return Err(BuildError::Cancelled);
    }

    let template = match &ctx.config.html.template {
        Some(path) => {
            let path = ctx.config.root.join(path);
            let source = std::fs::read_to_string(&path).map_err(|e| {
                ConfigError::Invalid(format!(
                    "html.template {} could not be read: {e}",
                    path.display()
                ))
            })?;
            Some(source)
        }
        None => None,
    };
    let document = render_host_document(
        template.as_deref(),
        &ctx.config.html.title,
        &scripts,
        &styles,
    );
    files.add(OutputFile {
        path: ctx.config.html.filename.clone(),
        kind: OutputKind::Document,
        bytes: document.into_bytes(),
    })?;

    if output.manifest {
        files.add(manifest.to_output())?;
    }
    Ok((files, manifest))
}

fn render_name(
    field: &'static str,
    template: &str,
    name: &str,
    ext: &str,
    content: &[u8],
) -> Result<String, BuildError> {
    let hash = weft_util::hash::blake3_bytes(content);
    let vars = TemplateVars {
        name,
        ext,
        hash: &hash,
    };
    template::render(template, &vars).map_err(|message| {
        BuildError::from(ConfigError::InvalidTemplate {
            field,
            template: template.to_string(),
            message,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_cancel_token_generations() {
        let first = CancelToken::new();
        assert!(!first.is_cancelled());

        let second = first.supersede();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(second.generation(), 1);

        let third = first.supersede();
        assert!(second.is_cancelled());
        assert!(!third.is_cancelled());
    }

    #[test]
    fn test_write_refuses_superseded_build() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("main.js"), "console.log(1);\n").unwrap();
        let bundler = Bundler::new(Config::new(dir.path()).with_entry("main", "./main.js")).unwrap();

        let cancel = CancelToken::new();
        let result = bundler.build_with(&cancel, None).unwrap();
        let _newer = cancel.supersede();

        let err = bundler.write(&result, &cancel).unwrap_err();
        assert_eq!(err.code(), "BUILD_CANCELLED");
        assert!(!bundler.config().out_dir().exists());
    }

    #[test]
    fn test_production_names_are_hashed() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("main.js"), "console.log(1);\n").unwrap();
        let bundler = Bundler::new(
            Config::new(dir.path())
                .with_entry("main", "./main.js")
                .with_mode(Mode::Production),
        )
        .unwrap();

        let result = bundler.build().unwrap();
        let js = result.chunk_file("main").unwrap();
        assert!(js.starts_with("main."));
        assert_eq!(js.len(), "main.".len() + 8 + ".js".len());

        let html = result.outputs.get("index.html").unwrap();
        let html = String::from_utf8(html.bytes.clone()).unwrap();
        assert!(html.contains(&format!("<script src=\"{js}\"></script>")));
        assert!(result.outputs.get("manifest.json").is_some());
    }

    #[test]
    fn test_define_reaches_output() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("main.js"),
            "if (process.env.NODE_ENV !== \"production\") console.log(\"dev\");\n",
        )
        .unwrap();
        let bundler = Bundler::new(Config::new(dir.path()).with_entry("main", "./main.js")).unwrap();
        let result = bundler.build().unwrap();
        let js = result.outputs.get("main.js").unwrap();
        let js = String::from_utf8(js.bytes.clone()).unwrap();
        assert!(js.contains("if (\"development\" !== \"production\")"));
    }

    #[test]
    fn test_html_template_injection() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("public")).unwrap();
        fs::write(
            dir.path().join("public/index.html"),
            "<html><head><title>x</title></head><body><main></main></body></html>",
        )
        .unwrap();
        fs::write(dir.path().join("main.js"), "import './app.css';\n").unwrap();
        fs::write(dir.path().join("app.css"), "body { margin: 0; }\n").unwrap();

        let mut config = Config::new(dir.path())
            .with_entry("main", "./main.js")
            .with_rules(vec![
                crate::config::RuleConfig::new(
                    r"\.css$",
                    vec![TransformStep::Style {
                        urls: true,
                        extract: true,
                    }],
                ),
                crate::config::RuleConfig::new(r"\.js$", vec![TransformStep::Script]),
            ]);
        config.html.template = Some("public/index.html".into());
        config.output.public_path = "/".to_string();

        let result = Bundler::new(config).unwrap().build().unwrap();
        assert_eq!(result.manifest.chunks["main"].css.as_deref(), Some("main.css"));

        let html = String::from_utf8(result.outputs.get("index.html").unwrap().bytes.clone()).unwrap();
        let link = html.find(r#"<link rel="stylesheet" href="/main.css">"#).unwrap();
        let script = html.find(r#"<script src="/main.js"></script>"#).unwrap();
        assert!(link < html.find("</head>").unwrap());
        assert!(script > html.find("<main>").unwrap());
    }

    #[test]
    fn test_missing_html_template_is_config_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("main.js"), "").unwrap();
        let mut config = Config::new(dir.path()).with_entry("main", "./main.js");
        config.html.template = Some("nope.html".into());
        let err = Bundler::new(config).unwrap().build().unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");
    }
}
