//! Module dependency graph.
//!
//! The builder walks the import graph breadth-first from the entry points.
//! Each level (frontier) is read, transformed and resolved in parallel on
//! the rayon pool; results are merged into the graph table on the calling
//! thread in frontier order, so module ids are deterministic and only one
//! thread ever inserts. A path is claimed when it is queued, so it is
//! processed at most once per build no matter how many edges reach it.

use super::resolve::Resolver;
use super::transform::{Dependency, ModuleKind, TransformContext, TransformRegistry};
use super::CancelToken;
use crate::error::{BuildError, BuildWarning, ImportChain};
use indexmap::IndexMap;
use rayon::prelude::*;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Index of a module in its graph.
pub type ModuleId = usize;

/// One source file after transformation.
///
/// Immutable once built; graphs and the dev cache share records via `Arc`.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    /// Canonical absolute path.
    pub path: PathBuf,
    /// Root-relative `/`-separated path, used as the runtime module id.
    pub key: String,
    pub raw: Vec<u8>,
    pub kind: ModuleKind,
    /// Transformed code. Empty for assets.
    pub code: String,
    /// Discovered specifiers in discovery order.
    pub dependencies: Vec<Dependency>,
    /// Resolved path per dependency. `None` for optional imports that did not resolve.
    pub resolved: Vec<Option<PathBuf>>,
    /// BLAKE3 hex digest of `raw`.
    pub content_hash: String,
}

impl ModuleRecord {
    /// File stem and extension (without dot), for output naming.
    #[must_use]
    pub fn name_and_ext(&self) -> (&str, &str) {
        let name = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("asset");
        let ext = self
            .path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        (name, ext)
    }
}

/// The module dependency graph of one build.
#[derive(Debug, Default, Clone)]
pub struct ModuleGraph {
    modules: Vec<Arc<ModuleRecord>>,
    /// Per module, the target id of each entry in `dependencies`.
    edges: Vec<Vec<Option<ModuleId>>>,
    path_to_id: HashMap<PathBuf, ModuleId>,
    /// Entry name → module, in declaration order.
    entries: Vec<(String, ModuleId)>,
}

impl ModuleGraph {
    fn add(&mut self, record: Arc<ModuleRecord>) -> ModuleId {
        let id = self.modules.len();
        self.path_to_id.insert(record.path.clone(), id);
        self.modules.push(record);
        id
    }

    /// Get a module by ID.
    #[must_use]
    pub fn get(&self, id: ModuleId) -> Option<&ModuleRecord> {
        self.modules.get(id).map(AsRef::as_ref)
    }

    /// Get module ID by canonical path.
    #[must_use]
    pub fn id_by_path(&self, path: &Path) -> Option<ModuleId> {
        self.path_to_id.get(path).copied()
    }

    /// Number of modules in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Entry points in declaration order.
    #[must_use]
    pub fn entries(&self) -> &[(String, ModuleId)] {
        &self.entries
    }

    #[must_use]
    pub fn is_entry(&self, id: ModuleId) -> bool {
        self.entries.iter().any(|(_, e)| *e == id)
    }

    /// All modules with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (ModuleId, &ModuleRecord)> {
        self.modules.iter().enumerate().map(|(id, m)| (id, m.as_ref()))
    }

    /// Each dependency of `id` with the module it resolved to.
    pub fn dependencies(
        &self,
        id: ModuleId,
    ) -> impl Iterator<Item = (&Dependency, Option<ModuleId>)> {
        let deps = self.modules.get(id).map_or(&[][..], |m| &m.dependencies[..]);
        let edges = self.edges.get(id).map_or(&[][..], |e| &e[..]);
        deps.iter().zip(edges.iter().copied())
    }

    /// Resolved dependency ids of `id` in import order, without duplicates.
    #[must_use]
    pub fn dependency_ids(&self, id: ModuleId) -> Vec<ModuleId> {
        let mut seen = HashSet::default();
        self.dependencies(id)
            .filter_map(|(_, target)| target)
            .filter(|target| seen.insert(*target))
            .collect()
    }

    /// Modules that import `id` directly.
    #[must_use]
    pub fn importers(&self, id: ModuleId) -> Vec<ModuleId> {
        (0..self.modules.len())
            .filter(|&from| self.edges[from].iter().any(|t| *t == Some(id)))
            .collect()
    }

    /// Changed modules plus every module that transitively imports one.
    #[must_use]
    pub fn affected_by(&self, changed: &[PathBuf]) -> Vec<ModuleId> {
        let mut reverse: Vec<Vec<ModuleId>> = vec![Vec::new(); self.modules.len()];
        for (from, targets) in self.edges.iter().enumerate() {
            for target in targets.iter().flatten() {
                reverse[*target].push(from);
            }
        }

        let mut affected = HashSet::default();
        let mut stack: Vec<ModuleId> = changed.iter().filter_map(|p| self.id_by_path(p)).collect();
        while let Some(id) = stack.pop() {
            if affected.insert(id) {
                stack.extend(reverse[id].iter().copied());
            }
        }

        let mut affected: Vec<ModuleId> = affected.into_iter().collect();
        affected.sort_unstable();
        affected
    }

    /// Every source path in the graph.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.modules.iter().map(|m| m.path.as_path())
    }
}

/// Records kept between dev rebuilds, keyed by canonical path.
#[derive(Debug, Default)]
pub struct ModuleCache {
    records: RwLock<HashMap<PathBuf, Arc<ModuleRecord>>>,
}

impl ModuleCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<Arc<ModuleRecord>> {
        self.records.read().ok()?.get(path).cloned()
    }

    /// Drop the records for `paths`.
    pub fn invalidate<'a>(&self, paths: impl IntoIterator<Item = &'a Path>) {
        if let Ok(mut records) = self.records.write() {
            for path in paths {
                records.remove(path);
            }
        }
    }

    /// Replace the cache with the records of a successful build.
    pub fn replace_with(&self, graph: &ModuleGraph) {
        if let Ok(mut records) = self.records.write() {
            records.clear();
            for record in &graph.modules {
                records.insert(record.path.clone(), Arc::clone(record));
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().map_or(0, |r| r.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Output of [`GraphBuilder::build`].
#[derive(Debug)]
pub struct GraphBuild {
    pub graph: ModuleGraph,
    pub warnings: Vec<BuildWarning>,
    /// Modules taken from the cache instead of being re-read.
    pub reused: usize,
}

struct Pending {
    path: PathBuf,
    chain: ImportChain,
}

struct Processed {
    record: Arc<ModuleRecord>,
    reused: bool,
}

/// Builds a [`ModuleGraph`] from entry points.
pub struct GraphBuilder<'a> {
    pub root: &'a Path,
    pub resolver: &'a Resolver,
    pub registry: &'a TransformRegistry,
    pub define: &'a [(String, String)],
    pub cancel: &'a CancelToken,
    pub cache: Option<&'a ModuleCache>,
}

impl GraphBuilder<'_> {
    /// Build the graph reachable from `entries` (name → specifier).
    pub fn build(&self, entries: &IndexMap<String, String>) -> Result<GraphBuild, BuildError> {
        let mut graph = ModuleGraph::default();
        let mut warnings = Vec::new();
        let mut reused = 0;
        let mut queued: HashSet<PathBuf> = HashSet::default();
        let mut frontier: Vec<Pending> = Vec::new();
        let mut entry_paths: Vec<(String, PathBuf)> = Vec::new();

        for (name, specifier) in entries {
            let path = self
                .resolver
                .resolve(specifier, self.root)
                .map_err(|source| BuildError::Resolution {
                    source,
                    chain: ImportChain::entry(name),
                })?;
            if queued.insert(path.clone()) {
                frontier.push(Pending {
                    path: path.clone(),
                    chain: ImportChain::entry(name),
                });
            }
            entry_paths.push((name.clone(), path));
        }

        let mut level = 0;
        while !frontier.is_empty() {
            if self.cancel.is_cancelled() {
                return Err(BuildError::Cancelled);
            }
            debug!(level, modules = frontier.len(), "processing frontier");

            let results: Vec<Result<Processed, BuildError>> =
                frontier.par_iter().map(|pending| self.process(pending)).collect();

            let mut next = Vec::new();
            for (pending, result) in frontier.iter().zip(results) {
                let processed = result?;
                reused += usize::from(processed.reused);
                let record = processed.record;

                for (dep, target) in record.dependencies.iter().zip(&record.resolved) {
                    match target {
                        Some(path) => {
                            if queued.insert(path.clone()) {
                                next.push(Pending {
                                    path: path.clone(),
                                    chain: pending.chain.child(&dep.specifier),
                                });
                            }
                        }
                        None => {
                            let warning = BuildWarning {
                                chain: pending.chain.child(&dep.specifier),
                                message: format!(
                                    "Optional import '{}' in {} could not be resolved",
                                    dep.specifier, record.key
                                ),
                            };
                            warn!("{warning}");
                            warnings.push(warning);
                        }
                    }
                }
                graph.add(record);
            }

            frontier = next;
            level += 1;
        }

        graph.edges = graph
            .modules
            .iter()
            .map(|m| {
                m.resolved
                    .iter()
                    .map(|p| p.as_ref().and_then(|p| graph.path_to_id.get(p).copied()))
                    .collect()
            })
            .collect();
        graph.entries = entry_paths
            .into_iter()
            .filter_map(|(name, path)| graph.id_by_path(&path).map(|id| (name, id)))
            .collect();

        debug!(modules = graph.len(), reused, "module graph built");
        Ok(GraphBuild {
            graph,
            warnings,
            reused,
        })
    }

    /// Read, transform and resolve one module. Runs on a rayon worker.
    fn process(&self, pending: &Pending) -> Result<Processed, BuildError> {
        if let Some(record) = self.cache.and_then(|c| c.get(&pending.path)) {
            return Ok(Processed {
                record,
                reused: true,
            });
        }

        let path = &pending.path;
        let raw = std::fs::read(path).map_err(|source| BuildError::Read {
            path: path.clone(),
            chain: pending.chain.clone(),
            source,
        })?;

        let ctx = TransformContext {
            path,
            define: self.define,
        };
        let output = self
            .registry
            .chain_for(path)
            .apply(&raw, &ctx)
            .map_err(|source| BuildError::Transform {
                path: path.clone(),
                chain: pending.chain.clone(),
                source,
            })?;

        let from_dir = path.parent().unwrap_or(self.root);
        let mut resolved = Vec::with_capacity(output.dependencies.len());
        for dep in &output.dependencies {
            match self.resolver.resolve(&dep.specifier, from_dir) {
                Ok(target) => resolved.push(Some(target)),
                Err(_) if dep.is_optional() => resolved.push(None),
                Err(source) => {
                    return Err(BuildError::Resolution {
                        source,
                        chain: pending.chain.child(&dep.specifier),
                    })
                }
            }
        }

        let record = ModuleRecord {
            key: module_key(self.root, path),
            content_hash: weft_util::hash::blake3_bytes(&raw),
            path: path.clone(),
            raw,
            kind: output.kind,
            code: output.code,
            dependencies: output.dependencies,
            resolved,
        };
        Ok(Processed {
            record: Arc::new(record),
            reused: false,
        })
    }
}

/// Root-relative, `/`-separated id for `path`.
#[must_use]
pub fn module_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_rules, ResolveConfig};
    use std::fs;
    use tempfile::tempdir;

    fn fixture(files: &[(&str, &str)]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        for (name, content) in files {
            let path = root.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        (dir, root)
    }

    fn build(
        root: &Path,
        entries: &[(&str, &str)],
        cache: Option<&ModuleCache>,
    ) -> Result<GraphBuild, BuildError> {
        let resolver = Resolver::new(&ResolveConfig::default(), root);
        let registry = TransformRegistry::from_rules(&default_rules()).unwrap();
        let cancel = CancelToken::new();
        let builder = GraphBuilder {
            root,
            resolver: &resolver,
            registry: &registry,
            define: &[],
            cancel: &cancel,
            cache,
        };
        let entries = entries
            .iter()
            .map(|(n, s)| ((*n).to_string(), (*s).to_string()))
            .collect();
        builder.build(&entries)
    }

    #[test]
    fn test_diamond_is_deduplicated() {
        let (_dir, root) = fixture(&[
            ("main.js", "import './a';\nimport './b';\n"),
            ("a.js", "import './c';\n"),
            ("b.js", "import './c.js';\n"),
            ("c.js", "export const c = 1;\n"),
        ]);
        let built = build(&root, &[("main", "./main.js")], None).unwrap();
        let graph = built.graph;

        assert_eq!(graph.len(), 4);
        let keys: Vec<_> = graph.iter().map(|(_, m)| m.key.as_str()).collect();
        assert_eq!(keys, vec!["main.js", "a.js", "b.js", "c.js"]);

        let c = graph.id_by_path(&root.join("c.js")).unwrap();
        let mut importers = graph.importers(c);
        importers.sort_unstable();
        assert_eq!(importers, vec![1, 2]);
        assert_eq!(graph.entries(), &[("main".to_string(), 0)]);
    }

    #[test]
    fn test_cycle_terminates() {
        let (_dir, root) = fixture(&[
            ("a.js", "import './b';\nexport const a = 1;\n"),
            ("b.js", "import './a';\nexport const b = 2;\n"),
        ]);
        let built = build(&root, &[("main", "./a.js")], None).unwrap();
        assert_eq!(built.graph.len(), 2);
        assert_eq!(built.graph.dependency_ids(1), vec![0]);
    }

    #[test]
    fn test_missing_import_reports_chain() {
        let (_dir, root) = fixture(&[
            ("main.js", "import './a';\n"),
            ("a.js", "import './missing';\n"),
        ]);
        let err = build(&root, &[("main", "./main.js")], None).unwrap_err();
        assert_eq!(err.code(), "BUILD_RESOLUTION_ERROR");
        assert_eq!(err.chain().unwrap().to_string(), "main → ./a → ./missing");
    }

    #[test]
    fn test_optional_import_is_a_warning() {
        let (_dir, root) = fixture(&[("main.js", "import('./lazy');\n")]);
        let built = build(&root, &[("main", "./main.js")], None).unwrap();
        assert_eq!(built.graph.len(), 1);
        assert_eq!(built.warnings.len(), 1);
        assert_eq!(built.warnings[0].chain.to_string(), "main → ./lazy");
    }

    #[test]
    fn test_affected_by_walks_importers() {
        let (_dir, root) = fixture(&[
            ("main.js", "import './a';\nimport './b';\n"),
            ("a.js", "import './c';\n"),
            ("b.js", ""),
            ("c.js", ""),
        ]);
        let graph = build(&root, &[("main", "./main.js")], None).unwrap().graph;
        let affected = graph.affected_by(&[root.join("c.js")]);
        let keys: Vec<_> = affected
            .iter()
            .map(|id| graph.get(*id).unwrap().key.as_str())
            .collect();
        assert_eq!(keys, vec!["main.js", "a.js", "c.js"]);
    }

    #[test]
    fn test_cache_reuses_unchanged_records() {
        let (_dir, root) = fixture(&[("main.js", "import './a';\n"), ("a.js", "")]);
        let cache = ModuleCache::new();
        let first = build(&root, &[("main", "./main.js")], Some(&cache)).unwrap();
        assert_eq!(first.reused, 0);
        cache.replace_with(&first.graph);

        cache.invalidate([root.join("main.js").as_path()]);
        let second = build(&root, &[("main", "./main.js")], Some(&cache)).unwrap();
        assert_eq!(second.reused, 1);
        assert_eq!(second.graph.len(), 2);
    }

    #[test]
    fn test_cancelled_build() {
        let (_dir, root) = fixture(&[("main.js", "")]);
        let resolver = Resolver::new(&ResolveConfig::default(), &root);
        let registry = TransformRegistry::from_rules(&default_rules()).unwrap();
        let cancel = CancelToken::new();
        let _newer = cancel.supersede();
        let builder = GraphBuilder {
            root: &root,
            resolver: &resolver,
            registry: &registry,
            define: &[],
            cancel: &cancel,
            cache: None,
        };
        let entries = [("main".to_string(), "./main.js".to_string())].into_iter().collect();
        assert!(matches!(builder.build(&entries), Err(BuildError::Cancelled)));
    }
}
