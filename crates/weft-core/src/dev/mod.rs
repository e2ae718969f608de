//! Incremental rebuilds for the dev server.
//!
//! The orchestrator remembers the graph of the last successful build. When
//! files change, the records of the changed modules and of everything that
//! transitively imports them are dropped from the module cache; the next
//! build re-reads only those and reuses every other record. A file the
//! graph has never seen can still matter when it changes what an existing
//! import resolves to, so unknown paths trigger a re-resolution check.

mod scheduler;
mod watch;

pub use scheduler::{Rebuild, RebuildScheduler};
pub use watch::{should_ignore, watch_sources};

use crate::bundler::{BuildResult, Bundler, CancelToken, ModuleCache, ModuleGraph, Resolver};
use crate::error::BuildError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Notification for connected clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DevEvent {
    /// A rebuild was promoted. `changed` holds root-relative paths.
    Reload {
        files: Vec<String>,
        changed: Vec<String>,
    },
    /// A rebuild failed; the previous output is still being served.
    Error { code: String, message: String },
}

/// Owns the bundler, the module cache and the last good graph.
#[derive(Debug)]
pub struct DevOrchestrator {
    bundler: Bundler,
    cache: ModuleCache,
    last_graph: RwLock<Option<ModuleGraph>>,
    last_failed: AtomicBool,
    generations: CancelToken,
    events: broadcast::Sender<DevEvent>,
}

impl DevOrchestrator {
    #[must_use]
    pub fn new(bundler: Bundler) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            bundler,
            cache: ModuleCache::new(),
            last_graph: RwLock::new(None),
            last_failed: AtomicBool::new(false),
            generations: CancelToken::new(),
            events,
        }
    }

    #[must_use]
    pub fn bundler(&self) -> &Bundler {
        &self.bundler
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DevEvent> {
        self.events.subscribe()
    }

    /// Start a new build generation, cancelling every older one.
    #[must_use]
    pub fn begin(&self) -> CancelToken {
        self.generations.supersede()
    }

    /// First build of the session. Always runs.
    pub fn initial_build(&self) -> Result<BuildResult, BuildError> {
        let cancel = self.begin();
        match self.rebuild(&[], &cancel)? {
            Some(result) => Ok(result),
            None => Err(BuildError::Cancelled),
        }
    }

    /// Paths referenced by the last successful graph.
    #[must_use]
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.last_graph
            .read()
            .ok()
            .and_then(|g| g.as_ref().map(|g| g.paths().map(Path::to_path_buf).collect()))
            .unwrap_or_default()
    }

    /// Whether a change to `changed` calls for a rebuild.
    ///
    /// After a failed build every change counts, since the fix may be a file
    /// the last good graph never saw.
    #[must_use]
    pub fn needs_rebuild(&self, changed: &[PathBuf]) -> bool {
        self.stale_paths(changed).is_some()
    }

    /// Paths whose cached records must be dropped before rebuilding after
    /// `changed`, or `None` when the last good build is unaffected.
    fn stale_paths(&self, changed: &[PathBuf]) -> Option<Vec<PathBuf>> {
        let failed = self.last_failed.load(Ordering::Acquire);
        let Ok(guard) = self.last_graph.read() else {
            return Some(changed.to_vec());
        };
        let Some(graph) = guard.as_ref() else {
            return Some(changed.to_vec());
        };

        let mut roots: Vec<PathBuf> = changed
            .iter()
            .filter(|p| graph.id_by_path(p).is_some())
            .cloned()
            .collect();
        if roots.len() < changed.len() {
            roots.extend(self.rebound_modules(graph));
        }
        if roots.is_empty() && !failed {
            return None;
        }

        let mut stale = changed.to_vec();
        stale.extend(
            graph
                .affected_by(&roots)
                .into_iter()
                .filter_map(|id| graph.get(id).map(|m| m.path.clone())),
        );
        debug!(changed = changed.len(), stale = stale.len(), "invalidating");
        Some(stale)
    }

    /// Modules of `graph` with an import that now resolves to another file,
    /// plus entries whose specifier does.
    fn rebound_modules(&self, graph: &ModuleGraph) -> Vec<PathBuf> {
        let config = self.bundler.config();
        let resolver = Resolver::new(&config.resolve, &config.root);

        let mut rebound: Vec<PathBuf> = graph
            .iter()
            .filter(|(_, record)| {
                let from_dir = record.path.parent().unwrap_or(&config.root);
                record
                    .dependencies
                    .iter()
                    .zip(&record.resolved)
                    .any(|(dep, old)| resolver.resolve(&dep.specifier, from_dir).ok() != *old)
            })
            .map(|(_, record)| record.path.clone())
            .collect();

        for (name, id) in graph.entries() {
            let Some(specifier) = config.entry.get(name) else { continue };
            let Some(record) = graph.get(*id) else { continue };
            if resolver.resolve(specifier, &config.root).ok().as_ref() != Some(&record.path) {
                rebound.push(record.path.clone());
            }
        }
        if !rebound.is_empty() {
            debug!(modules = rebound.len(), "imports resolve to new files");
        }
        rebound
    }

    /// Rebuild after `changed`, write the output and notify clients.
    ///
    /// Returns `Ok(None)` when no watched file changed. A superseded build
    /// returns [`BuildError::Cancelled`] and notifies nobody.
    pub fn rebuild(
        &self,
        changed: &[PathBuf],
        cancel: &CancelToken,
    ) -> Result<Option<BuildResult>, BuildError> {
        let Some(stale) = self.stale_paths(changed) else {
            debug!(paths = changed.len(), "no watched file changed");
            return Ok(None);
        };

        self.cache.invalidate(stale.iter().map(PathBuf::as_path));
        let outcome = self
            .bundler
            .build_with(cancel, Some(&self.cache))
            .and_then(|result| {
                self.bundler.write(&result, cancel)?;
                Ok(result)
            });

        match outcome {
            Ok(result) => {
                self.cache.replace_with(&result.graph);
                if let Ok(mut last) = self.last_graph.write() {
                    *last = Some(result.graph.clone());
                }
                self.last_failed.store(false, Ordering::Release);

                let root = &self.bundler.config().root;
                let changed: Vec<String> = changed
                    .iter()
                    .map(|p| crate::bundler::module_key(root, p))
                    .collect();
                info!(
                    modules = result.graph.len(),
                    reused = result.reused,
                    changed = changed.len(),
                    "rebuilt"
                );
                let files = result.outputs.iter().map(|f| f.path.clone()).collect();
                let _ = self.events.send(DevEvent::Reload { files, changed });
                Ok(Some(result))
            }
            Err(BuildError::Cancelled) => {
                info!(generation = cancel.generation(), "rebuild superseded");
                Err(BuildError::Cancelled)
            }
            Err(err) => {
                warn!(code = err.code(), "rebuild failed: {err}");
                self.last_failed.store(true, Ordering::Release);
                let _ = self.events.send(DevEvent::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }
}
