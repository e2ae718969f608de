//! Import specifier resolution.
//!
//! Resolves import specifiers to canonical absolute file paths.
//!
//! ## Specifier Types
//!
//! - Aliased: `@/components/App` (longest matching alias prefix wins)
//! - Relative: `./utils`, `../lib/foo`
//! - Absolute: `/src/index.jsx` (falls back to the project root when the
//!   path does not exist on disk)
//! - Bare: `lodash`, `@scope/pkg`, `pkg/sub/path` (looked up in
//!   `resolve.modules` directories, walking up from the importer)

use crate::config::ResolveConfig;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

/// A specifier that could not be mapped to a file.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cannot resolve '{specifier}' from '{}': {reason}", from_dir.display())]
pub struct ResolveError {
    pub specifier: String,
    pub from_dir: PathBuf,
    pub reason: String,
}

impl ResolveError {
    fn new(specifier: &str, from_dir: &Path, reason: impl Into<String>) -> Self {
        Self {
            specifier: specifier.to_string(),
            from_dir: from_dir.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        "RESOLVE_NOT_FOUND"
    }
}

/// Import resolver.
///
/// Configuration is fixed at construction. Successful resolutions are cached
/// per `(specifier, from_dir)`, so a resolver should live no longer than one
/// build.
#[derive(Debug)]
pub struct Resolver {
    root: PathBuf,
    extensions: Vec<String>,
    /// Alias prefix → absolute directory, longest prefix first.
    alias: Vec<(String, PathBuf)>,
    modules: Vec<String>,
    cache: RwLock<FxHashMap<(String, PathBuf), PathBuf>>,
}

impl Resolver {
    /// Create a resolver rooted at `root`.
    #[must_use]
    pub fn new(config: &ResolveConfig, root: &Path) -> Self {
        let mut alias: Vec<(String, PathBuf)> = config
            .alias
            .iter()
            .map(|(prefix, target)| (prefix.clone(), root.join(target)))
            .collect();
        alias.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        Self {
            root: root.to_path_buf(),
            extensions: config.extensions.clone(),
            alias,
            modules: config.modules.clone(),
            cache: RwLock::new(FxHashMap::default()),
        }
    }

    /// Resolve `specifier` as imported from a module in `from_dir`.
    pub fn resolve(&self, specifier: &str, from_dir: &Path) -> Result<PathBuf, ResolveError> {
        let key = (specifier.to_string(), from_dir.to_path_buf());
        if let Ok(cache) = self.cache.read() {
            if let Some(hit) = cache.get(&key) {
                return Ok(hit.clone());
            }
        }

        let resolved = self.resolve_uncached(specifier, from_dir)?;

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key, resolved.clone());
        }
        Ok(resolved)
    }

    fn resolve_uncached(&self, specifier: &str, from_dir: &Path) -> Result<PathBuf, ResolveError> {
        if specifier.is_empty() {
            return Err(ResolveError::new(specifier, from_dir, "empty specifier"));
        }

        if let Some(target) = self.apply_alias(specifier) {
            return self
                .resolve_file_or_directory(&target)
                .ok_or_else(|| ResolveError::new(specifier, from_dir, "aliased path not found"));
        }

        if is_relative(specifier) {
            return self
                .resolve_file_or_directory(&from_dir.join(specifier))
                .ok_or_else(|| ResolveError::new(specifier, from_dir, "file not found"));
        }

        if specifier.starts_with('/') || Path::new(specifier).is_absolute() {
            return self.resolve_absolute(specifier, from_dir);
        }

        self.resolve_bare(specifier, from_dir)
    }

    /// Substitute the longest alias prefix matching `specifier`.
    fn apply_alias(&self, specifier: &str) -> Option<PathBuf> {
        self.alias.iter().find_map(|(prefix, dir)| {
            if specifier == prefix {
                Some(dir.clone())
            } else {
                specifier
                    .strip_prefix(prefix.as_str())
                    .and_then(|rest| rest.strip_prefix('/'))
                    .map(|rest| dir.join(rest))
            }
        })
    }

    fn resolve_absolute(&self, specifier: &str, from_dir: &Path) -> Result<PathBuf, ResolveError> {
        if let Some(found) = self.resolve_file_or_directory(Path::new(specifier)) {
            return Ok(found);
        }

        // "/src/index.jsx" style specifiers are relative to the project root.
        let rooted = self.root.join(specifier.trim_start_matches('/'));
        self.resolve_file_or_directory(&rooted)
            .ok_or_else(|| ResolveError::new(specifier, from_dir, "file not found"))
    }

    /// Resolve a bare specifier by walking up from `from_dir`.
    fn resolve_bare(&self, specifier: &str, from_dir: &Path) -> Result<PathBuf, ResolveError> {
        let (pkg_name, subpath) = parse_bare_specifier(specifier);

        let mut current = Some(from_dir);
        while let Some(dir) = current {
            for modules in &self.modules {
                let pkg_dir = dir.join(modules).join(pkg_name);
                if !pkg_dir.is_dir() {
                    continue;
                }
                let found = match subpath {
                    Some(sub) => self.resolve_file_or_directory(&pkg_dir.join(sub)),
                    None => self.resolve_package_entry(&pkg_dir),
                };
                if let Some(found) = found {
                    return Ok(found);
                }
            }
            current = dir.parent();
        }

        Err(ResolveError::new(
            specifier,
            from_dir,
            format!(
                "cannot find package '{}' in {}",
                pkg_name,
                self.modules.join(", ")
            ),
        ))
    }

    /// Entry file of a package directory: `exports["."]`, `module`, `main`, then index.
    fn resolve_package_entry(&self, pkg_dir: &Path) -> Option<PathBuf> {
        let manifest = std::fs::read_to_string(pkg_dir.join("package.json"))
            .ok()
            .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok());

        if let Some(json) = manifest {
            let fields = [
                json.get("exports").and_then(root_export),
                json.get("module").and_then(|v| v.as_str()).map(str::to_string),
                json.get("main").and_then(|v| v.as_str()).map(str::to_string),
            ];
            for entry in fields.into_iter().flatten() {
                if let Some(found) = self.resolve_file_or_directory(&pkg_dir.join(entry)) {
                    return Some(found);
                }
            }
        }

        self.resolve_index(pkg_dir)
    }

    /// Try `target` as a file, then with each extension, then as a directory index.
    fn resolve_file_or_directory(&self, target: &Path) -> Option<PathBuf> {
        if target.is_file() {
            return dunce::canonicalize(target).ok();
        }

        for ext in &self.extensions {
            let mut with_ext = target.as_os_str().to_os_string();
            with_ext.push(ext);
            let with_ext = PathBuf::from(with_ext);
            if with_ext.is_file() {
                return dunce::canonicalize(with_ext).ok();
            }
        }

        if target.is_dir() {
            return self.resolve_index(target);
        }
        None
    }

    fn resolve_index(&self, dir: &Path) -> Option<PathBuf> {
        self.extensions
            .iter()
            .map(|ext| dir.join(format!("index{ext}")))
            .find(|p| p.is_file())
            .and_then(|p| dunce::canonicalize(p).ok())
    }
}

fn is_relative(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
}

/// Split a bare specifier into package name and subpath.
fn parse_bare_specifier(specifier: &str) -> (&str, Option<&str>) {
    let split_at = if specifier.starts_with('@') {
        specifier
            .match_indices('/')
            .nth(1)
            .map(|(i, _)| i)
    } else {
        specifier.find('/')
    };

    match split_at {
        Some(i) => (&specifier[..i], Some(&specifier[i + 1..]).filter(|s| !s.is_empty())),
        None => (specifier, None),
    }
}

/// The `"."` target of a package `exports` field (simplified conditions).
fn root_export(exports: &serde_json::Value) -> Option<String> {
    match exports {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => map
            .get(".")
            .and_then(export_target)
            .or_else(|| export_target(exports)),
        _ => None,
    }
}

fn export_target(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => ["browser", "import", "default", "require"]
            .iter()
            .find_map(|cond| map.get(*cond))
            .and_then(export_target),
        _ => None,
    }
}
