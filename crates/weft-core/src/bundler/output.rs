//! Output files, manifest, and promotion to the output directory.
//!
//! Files are written to a hidden staging directory next to the output
//! directory and swapped in only when every write succeeded, so a failed
//! build never leaves partial output behind.

use crate::error::BuildError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Component, Path};
use tracing::debug;
use weft_util::fs::{replace_dir, sibling_path, write_creating_dirs};

/// What an output file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputKind {
    Chunk,
    Stylesheet,
    Asset,
    Document,
    Manifest,
}

/// One file to write, relative to the output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputFile {
    /// `/`-separated path relative to the output directory.
    pub path: String,
    pub kind: OutputKind,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// All files of a build, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct OutputSet {
    files: BTreeMap<String, OutputFile>,
}

impl OutputSet {
    /// Add a file. Identical duplicates are ignored; differing ones conflict.
    ///
    /// Paths must stay inside the output directory.
    pub fn add(&mut self, file: OutputFile) -> Result<(), BuildError> {
        if !is_contained(&file.path) {
            return Err(BuildError::OutputPath { path: file.path });
        }
        match self.files.get(&file.path) {
            Some(existing) if existing.bytes == file.bytes => Ok(()),
            Some(_) => Err(BuildError::OutputConflict { path: file.path }),
            None => {
                self.files.insert(file.path.clone(), file);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&OutputFile> {
        self.files.get(path)
    }

    /// Files in path order.
    pub fn iter(&self) -> impl Iterator<Item = &OutputFile> {
        self.files.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Write every file to a staging directory, then replace `out_dir` with it.
    ///
    /// On error the staging directory is removed and `out_dir` is unchanged.
    pub fn write_to(&self, out_dir: &Path) -> Result<(), BuildError> {
        let staging = sibling_path(out_dir, "staging");
        if staging.exists() {
            std::fs::remove_dir_all(&staging).map_err(|source| BuildError::Write {
                path: staging.clone(),
                source,
            })?;
        }

        let result = self.write_staging(&staging).and_then(|()| {
            replace_dir(&staging, out_dir).map_err(|source| BuildError::Write {
                path: out_dir.to_path_buf(),
                source,
            })
        });

        if result.is_err() && staging.exists() {
            let _ = std::fs::remove_dir_all(&staging);
        }
        result
    }

    fn write_staging(&self, staging: &Path) -> Result<(), BuildError> {
        std::fs::create_dir_all(staging).map_err(|source| BuildError::Write {
            path: staging.to_path_buf(),
            source,
        })?;
        for file in self.files.values() {
            let path = staging.join(&file.path);
            write_creating_dirs(&path, &file.bytes)
                .map_err(|source| BuildError::Write { path, source })?;
            debug!(file = %file.path, bytes = file.bytes.len(), "staged output");
        }
        Ok(())
    }
}

/// A non-empty relative path made of plain names only.
fn is_contained(path: &str) -> bool {
    !path.is_empty()
        && !path.contains('\\')
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// Files produced for one chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManifestChunk {
    pub js: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
}

/// `manifest.json`: chunk name → files, source asset → output file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub chunks: BTreeMap<String, ManifestChunk>,
    pub assets: BTreeMap<String, String>,
}

impl Manifest {
    pub const FILE_NAME: &'static str = "manifest.json";

    #[must_use]
    pub fn to_output(&self) -> OutputFile {
        let mut bytes = serde_json::to_vec_pretty(self).unwrap_or_default();
        bytes.push(b'\n');
        OutputFile {
            path: Self::FILE_NAME.to_string(),
            kind: OutputKind::Manifest,
            bytes,
        }
    }
}
