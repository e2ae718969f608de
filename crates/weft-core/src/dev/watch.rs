//! File system watching.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Component, Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Whether a change under `root` is irrelevant to the build.
///
/// Ignores the output directory, dependency and VCS directories, and any
/// path with a hidden component (which includes the staging directories).
#[must_use]
pub fn should_ignore(path: &Path, root: &Path, out_dir: &Path) -> bool {
    if path.starts_with(out_dir) {
        return true;
    }
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|c| match c {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            name.starts_with('.') || name == "node_modules" || name == "target"
        }
        _ => false,
    })
}

/// Watch `root` recursively and send each relevant batch of changed paths.
///
/// The returned watcher must be kept alive for as long as events are wanted.
/// Events are forwarded from notify's own thread with a blocking send, so a
/// full channel applies back pressure instead of dropping changes.
pub fn watch_sources(
    root: &Path,
    out_dir: &Path,
    tx: mpsc::Sender<Vec<PathBuf>>,
) -> notify::Result<RecommendedWatcher> {
    let root_owned = root.to_path_buf();
    let out_dir = out_dir.to_path_buf();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    return;
                }
                let paths: Vec<PathBuf> = event
                    .paths
                    .into_iter()
                    .filter(|p| !should_ignore(p, &root_owned, &out_dir))
                    .collect();
                if paths.is_empty() {
                    return;
                }
                debug!(paths = paths.len(), "source change");
                let _ = tx.blocking_send(paths);
            }
            Err(e) => warn!(error = %e, "watch error"),
        },
        Config::default(),
    )?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_ignore() {
        let root = Path::new("/p");
        let out = Path::new("/p/dist");
        assert!(should_ignore(Path::new("/p/dist/main.js"), root, out));
        assert!(should_ignore(Path::new("/p/.dist.staging.42/main.js"), root, out));
        assert!(should_ignore(Path::new("/p/node_modules/x/index.js"), root, out));
        assert!(should_ignore(Path::new("/p/.git/HEAD"), root, out));
        assert!(!should_ignore(Path::new("/p/src/app.js"), root, out));
        assert!(!should_ignore(Path::new("/p/distance.js"), root, out));
    }
}
