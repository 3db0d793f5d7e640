//! Working directory ("repo") management.
//!
//! The repo holds the node's private key. It is created with owner-only
//! permissions if it does not exist; an existing directory is used as-is.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{NodeError, NodeResult};

/// Directory name used under the home directory when no repo is configured.
pub const DEFAULT_REPO_DIR: &str = ".party-node";

/// Resolve the repo directory and create it if needed.
pub fn ensure(repo: Option<&Path>) -> NodeResult<PathBuf> {
    let path = match repo {
        Some(path) => path.to_path_buf(),
        None => dirs::home_dir()
            .ok_or_else(|| NodeError::Repo("problem getting home dir".to_string()))?
            .join(DEFAULT_REPO_DIR),
    };

    if path.is_dir() {
        tracing::debug!(path = %path.display(), "Repo exists, skipping directory creation");
        return Ok(path);
    }

    if path.exists() {
        return Err(NodeError::Repo(format!(
            "{} exists and is not a directory",
            path.display()
        )));
    }

    tracing::info!(path = %path.display(), "Creating repo");
    create_private_dir(&path)?;

    Ok(path)
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> NodeResult<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
        .map_err(|e| NodeError::Repo(format!("cannot create {}: {e}", path.display())))
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> NodeResult<()> {
    fs::create_dir_all(path)
        .map_err(|e| NodeError::Repo(format!("cannot create {}: {e}", path.display())))
}
