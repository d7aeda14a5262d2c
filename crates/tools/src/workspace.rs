//! Workspace file state — snapshots a directory for checkpoints.
//!
//! Each regular file becomes a [`StateRef`] keyed by its `/`-separated
//! relative path with a sha256 content hash. Text files up to
//! [`MAX_INLINE_BYTES`] carry their content inline so restore can rewrite
//! them; larger or binary files are tracked by hash only.
//!
//! Restore is non-destructive: files whose current hash differs from the
//! snapshot are rewritten, files absent from the snapshot are left alone.

use async_trait::async_trait;
use agentloom_core::checkpoint::{StateKind, StateProvider, StateRef};
use agentloom_core::error::Error;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const MAX_INLINE_BYTES: u64 = 64 * 1024;

/// Directory names never descended into.
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "target"];

pub struct WorkspaceFiles {
    root: PathBuf,
}

impl WorkspaceFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn hash_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn io_error(context: &str, path: &Path, e: std::io::Error) -> Error {
    Error::Internal(format!("{context} {}: {e}", path.display()))
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<StateRef>) -> Result<(), Error> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_error("read dir", dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_error("read dir entry", dir, e))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| io_error("stat", &path, e))?;

        if file_type.is_dir() {
            let name = entry.file_name();
            if SKIPPED_DIRS.iter().any(|s| name == *s) {
                continue;
            }
            collect(root, &path, out)?;
        } else if file_type.is_file() {
            let bytes = std::fs::read(&path).map_err(|e| io_error("read", &path, e))?;
            let size = bytes.len() as u64;
            let content_hash = hash_hex(&bytes);
            let content = if size <= MAX_INLINE_BYTES {
                String::from_utf8(bytes).ok()
            } else {
                None
            };

            let key = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            out.push(StateRef {
                key,
                content_hash,
                size,
                content,
            });
        }
    }
    Ok(())
}

fn snapshot_dir(root: &Path) -> Result<Vec<StateRef>, Error> {
    let mut refs = Vec::new();
    if root.exists() {
        collect(root, root, &mut refs)?;
    }
    refs.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(refs)
}

/// Resolve a snapshot key under `root`, refusing keys that escape it.
fn resolve_key(root: &Path, key: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for part in key.split('/') {
        match part {
            "" | "." => continue,
            ".." => return None,
            p => path.push(p),
        }
    }
    Some(path)
}

fn restore_dir(root: &Path, refs: &[StateRef]) -> Result<usize, Error> {
    let mut rewritten = 0;
    for state in refs {
        let Some(path) = resolve_key(root, &state.key) else {
            warn!(key = %state.key, "Skipping snapshot key outside the workspace");
            continue;
        };

        let current = std::fs::read(&path).ok().map(|b| hash_hex(&b));
        if current.as_deref() == Some(state.content_hash.as_str()) {
            continue;
        }

        match &state.content {
            Some(content) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| io_error("create dir", parent, e))?;
                }
                std::fs::write(&path, content).map_err(|e| io_error("write", &path, e))?;
                rewritten += 1;
            }
            None => {
                warn!(key = %state.key, "File changed since checkpoint but content was not captured");
            }
        }
    }
    Ok(rewritten)
}

#[async_trait]
impl StateProvider for WorkspaceFiles {
    fn kind(&self) -> StateKind {
        StateKind::Files
    }

    async fn snapshot(&self) -> Result<Vec<StateRef>, Error> {
        let root = self.root.clone();
        let refs = tokio::task::spawn_blocking(move || snapshot_dir(&root))
            .await
            .map_err(|e| Error::Internal(format!("workspace snapshot task: {e}")))??;
        debug!(files = refs.len(), root = %self.root.display(), "Workspace snapshot taken");
        Ok(refs)
    }

    async fn restore(&self, refs: &[StateRef]) -> Result<(), Error> {
        let root = self.root.clone();
        let refs = refs.to_vec();
        let rewritten = tokio::task::spawn_blocking(move || restore_dir(&root, &refs))
            .await
            .map_err(|e| Error::Internal(format!("workspace restore task: {e}")))??;
        debug!(rewritten, root = %self.root.display(), "Workspace restored");
        Ok(())
    }
}
