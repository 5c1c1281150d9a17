// src/sys/artifacts.rs

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use ignore::{Walk, WalkBuilder};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::sys::traits::Directory;

/// Entries never captured into a source snapshot, at any depth.
const SNAPSHOT_EXCLUDES: &[&str] = &[".git", "node_modules"];

/// Session-scoped scratch area holding every directory artifact as a plain
/// host tree. Dropping (or closing) the store removes all of them.
pub struct ArtifactStore {
    root: Mutex<Option<TempDir>>,
    root_path: PathBuf,
    next_id: AtomicU64,
}

impl ArtifactStore {
    pub fn new() -> Result<Self, PipelineError> {
        let root = tempfile::Builder::new()
            .prefix("stagehand-")
            .tempdir()
            .map_err(|e| PipelineError::Artifact(format!("failed to create scratch area: {}", e)))?;
        let root_path = root.path().to_path_buf();
        Ok(Self {
            root: Mutex::new(Some(root)),
            root_path,
            next_id: AtomicU64::new(0),
        })
    }

    fn allocate(&self, kind: &str) -> Directory {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = format!("{}-{}", kind, n);
        let path = self.root_path.join(&id);
        Directory::new(id, path)
    }

    /// Copies a host directory into the store, skipping VCS metadata, installed
    /// dependencies and anything the project's ignore files exclude.
    pub async fn snapshot_host(&self, source: &Path) -> Result<Directory, PipelineError> {
        if !source.is_dir() {
            return Err(PipelineError::Artifact(format!(
                "source directory {} does not exist",
                source.display()
            )));
        }
        let dir = self.allocate("source");
        let (from, to) = (source.to_path_buf(), dir.path().to_path_buf());
        tokio::task::spawn_blocking(move || copy_tree(snapshot_walker(&from), &from, &to))
            .await
            .map_err(|e| PipelineError::Artifact(format!("snapshot task failed: {}", e)))??;
        debug!(artifact = dir.id(), source = %source.display(), "captured source snapshot");
        Ok(dir)
    }

    /// Fresh, independent copy of `input`. The original is left untouched.
    pub async fn fork(&self, input: &Directory) -> Result<Directory, PipelineError> {
        let dir = self.allocate("work");
        let (from, to) = (input.path().to_path_buf(), dir.path().to_path_buf());
        tokio::task::spawn_blocking(move || copy_tree(artifact_walker(&from), &from, &to))
            .await
            .map_err(|e| PipelineError::Artifact(format!("copy task failed: {}", e)))??;
        debug!(from = input.id(), to = dir.id(), "forked artifact");
        Ok(dir)
    }

    /// Deletes an artifact that must not be handed on (e.g. after a failed exec).
    pub async fn discard(&self, dir: Directory) {
        if let Err(e) = tokio::fs::remove_dir_all(dir.path()).await {
            warn!(artifact = dir.id(), "failed to discard artifact: {}", e);
        }
    }

    #[cfg(test)]
    pub fn root(&self) -> &Path {
        &self.root_path
    }

    /// Removes the whole scratch area. Safe to call more than once.
    pub fn close(&self) -> Result<(), PipelineError> {
        let root = match self.root.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(root) = root {
            root.close()
                .map_err(|e| PipelineError::Artifact(format!("failed to remove scratch area: {}", e)))?;
        }
        Ok(())
    }
}

/// Walker over a host project: honours `.gitignore`, `.ignore` and
/// `.dockerignore` found inside the tree, keeps dotfiles, and never descends
/// into VCS metadata or installed dependencies.
fn snapshot_walker(root: &Path) -> Walk {
    WalkBuilder::new(root)
        .hidden(false)
        .parents(false)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(false)
        .require_git(false)
        .add_custom_ignore_filename(".dockerignore")
        .filter_entry(|entry| {
            !entry
                .file_name()
                .to_str()
                .is_some_and(|name| SNAPSHOT_EXCLUDES.contains(&name))
        })
        .build()
}

/// Walker over an artifact: everything, no filtering.
fn artifact_walker(root: &Path) -> Walk {
    WalkBuilder::new(root).standard_filters(false).build()
}

/// Mirrors the walked entries of `from` under `to`. Symlinks are recreated as
/// links (node_modules/.bin relies on them); FIFOs, sockets and device nodes
/// are skipped.
fn copy_tree(walker: Walk, from: &Path, to: &Path) -> Result<(), PipelineError> {
    fs::create_dir_all(to)?;
    for entry in walker {
        let entry = entry.map_err(|e| PipelineError::Artifact(format!("failed to walk {}: {}", from.display(), e)))?;
        if entry.depth() == 0 {
            continue;
        }

        let src = entry.path();
        let relative = src
            .strip_prefix(from)
            .map_err(|e| PipelineError::Artifact(format!("{} escapes {}: {}", src.display(), from.display(), e)))?;
        let dst = to.join(relative);

        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_symlink() {
            symlink(fs::read_link(src)?, &dst)?;
        } else if file_type.is_dir() {
            fs::create_dir_all(&dst)?;
        } else if file_type.is_file() {
            fs::copy(src, &dst)?;
        } else {
            debug!(path = %src.display(), "skipping special file");
        }
    }
    Ok(())
}
