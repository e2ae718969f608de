use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Write bytes to `path`, creating missing parent directories.
///
/// # Errors
/// Returns an error if a directory cannot be created or the write fails.
pub fn write_creating_dirs(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)
}

/// Sibling path used for staging or backing up `dir`.
///
/// The name is hidden and tagged with the process id so concurrent processes
/// working on the same directory do not collide.
#[must_use]
pub fn sibling_path(dir: &Path, tag: &str) -> PathBuf {
    let parent = dir.parent().unwrap_or(Path::new("."));
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("out");
    parent.join(format!(".{}.{}.{}", name, tag, std::process::id()))
}

/// Replace `target` with the fully-written directory `staging`.
///
/// The previous `target` (if any) is moved aside first and restored if the
/// swap fails, so `target` either keeps its old contents or receives all of
/// the new ones. The old contents are deleted once the swap succeeds.
///
/// # Errors
/// Returns an error if a rename fails; in that case `target` is left as it was.
pub fn replace_dir(staging: &Path, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    if !target.exists() {
        return fs::rename(staging, target);
    }

    let backup = sibling_path(target, "old");
    if backup.exists() {
        fs::remove_dir_all(&backup)?;
    }
    fs::rename(target, &backup)?;

    if let Err(e) = fs::rename(staging, target) {
        // Put the previous output back before reporting.
        let _ = fs::rename(&backup, target);
        return Err(e);
    }

    let _ = fs::remove_dir_all(&backup);
    Ok(())
}

/// List all files under `dir`, relative to it, sorted, with `/` separators.
#[must_use]
pub fn list_files(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(dir)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_creating_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/c.txt");

        write_creating_dirs(&path, b"hello").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn test_replace_dir_fresh_target() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staging");
        let target = dir.path().join("dist");
        write_creating_dirs(&staging.join("main.js"), b"new").unwrap();

        replace_dir(&staging, &target).unwrap();

        assert!(!staging.exists());
        assert_eq!(fs::read_to_string(target.join("main.js")).unwrap(), "new");
    }

    #[test]
    fn test_replace_dir_drops_stale_files() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staging");
        let target = dir.path().join("dist");
        write_creating_dirs(&target.join("stale.js"), b"old").unwrap();
        write_creating_dirs(&staging.join("main.js"), b"new").unwrap();

        replace_dir(&staging, &target).unwrap();

        assert_eq!(list_files(&target), vec!["main.js".to_string()]);
        // Only the target remains; no backup left behind.
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_list_files_sorted_relative() {
        let dir = tempdir().unwrap();
        write_creating_dirs(&dir.path().join("b.js"), b"").unwrap();
        write_creating_dirs(&dir.path().join("a/z.png"), b"").unwrap();

        assert_eq!(
            list_files(dir.path()),
            vec!["a/z.png".to_string(), "b.js".to_string()]
        );
    }
}
