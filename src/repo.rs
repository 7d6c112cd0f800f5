//! The site repository as seen by the staging engine.
//!
//! The engine only needs six operations on the store that holds the site
//! sources. [`GitRepository`] provides them over a local git clone.

mod git;

use std::path::PathBuf;

pub use git::{GitOptions, GitRepository};

// =============================================================================
// Errors
// =============================================================================

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("failed to open repository at {path}: {source}")]
    Open { path: PathBuf, source: git2::Error },

    #[error("repository at {0} has no working tree")]
    Bare(PathBuf),

    #[error("failed to clone repository {url}: {source}")]
    CloneFailed { url: String, source: git2::Error },

    #[error("git {op} failed: {source}")]
    Git {
        op: &'static str,
        source: git2::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to remove untracked {path}: {source}")]
    Remove {
        path: String,
        source: std::io::Error,
    },

    #[error("path '{0}' is outside the repository")]
    OutsideRepository(String),

    #[error("HEAD is not on a branch")]
    DetachedHead,

    #[error("local branch '{branch}' has diverged from {remote}; it cannot be fast-forwarded")]
    Diverged { remote: String, branch: String },

    #[error("nothing to commit for {0}")]
    NothingToCommit(String),

    #[error("remote rejected push of {refname}: {message}")]
    PushRejected { refname: String, message: String },
}

impl RepoError {
    /// Wrap a git2 error with the operation that produced it.
    pub(crate) fn git(op: &'static str) -> impl FnOnce(git2::Error) -> Self {
        move |source| Self::Git { op, source }
    }
}

// =============================================================================
// Capability
// =============================================================================

/// Persistent, versioned store for post files.
///
/// Paths are relative to the repository root and use `/` separators.
pub trait Repository: Send + Sync {
    /// Discard staged and unstaged changes and delete untracked files.
    /// `recursive` also deletes untracked directories.
    fn clean(&self, recursive: bool) -> Result<(), RepoError>;

    /// Stage the file at `path` and record a commit with `message`.
    fn commit(&self, path: &str, message: &str) -> Result<(), RepoError>;

    /// Publish local commits to the remote.
    fn push(&self) -> Result<(), RepoError>;

    /// Bring in commits published on the remote.
    fn pull(&self) -> Result<(), RepoError>;

    fn write_file(&self, path: &str, data: &[u8]) -> Result<(), RepoError>;

    /// Read `path` from the working tree, uncommitted changes included.
    fn read_file(&self, path: &str) -> Result<Vec<u8>, RepoError>;

    /// Read `path` as of the last commit.
    fn read_committed(&self, path: &str) -> Result<Vec<u8>, RepoError>;
}
