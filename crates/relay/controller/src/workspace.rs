//! Per-Promotion working directories
//!
//! A Promotion's workspace lives at `<root>/promotion-<uid>`. Whether the
//! directory had to be created decides if execution restarts from the first
//! step or resumes where the last reconcile left off: a fresh directory means
//! any earlier progress (for instance from before a restart on another node)
//! can no longer be trusted.

use relay_types::Uid;
use std::io;
use std::path::{Path, PathBuf};

/// Whether the workspace existed before it was acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceState {
    Fresh,
    Resumed,
}

#[derive(Debug, Clone)]
pub struct Workspace {
    pub path: PathBuf,
    pub state: WorkspaceState,
}

impl Workspace {
    pub fn is_fresh(&self) -> bool {
        self.state == WorkspaceState::Fresh
    }
}

/// Allocates and removes workspaces under a root directory
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, uid: &Uid) -> PathBuf {
        self.root.join(format!("promotion-{uid}"))
    }

    /// Create the workspace directory, or report that it already exists.
    pub async fn acquire(&self, uid: &Uid) -> io::Result<Workspace> {
        tokio::fs::create_dir_all(&self.root).await?;

        let path = self.path_for(uid);
        let mut builder = tokio::fs::DirBuilder::new();
        #[cfg(unix)]
        builder.mode(0o700);

        let state = match builder.create(&path).await {
            Ok(()) => WorkspaceState::Fresh,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => WorkspaceState::Resumed,
            Err(e) => return Err(e),
        };
        Ok(Workspace { path, state })
    }

    /// Remove the workspace and everything in it. A missing directory is not
    /// an error.
    pub async fn release(&self, uid: &Uid) -> io::Result<()> {
        match tokio::fs::remove_dir_all(self.path_for(uid)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
