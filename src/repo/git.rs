//! git2-backed site repository.

use std::path::{Component, Path, PathBuf};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    Cred, FetchOptions, ObjectType, PushOptions, RemoteCallbacks, ResetType, Signature, Status,
    StatusOptions,
};
use serde::{Deserialize, Serialize};

use super::{RepoError, Repository};

const REMOTE: &str = "origin";

/// Credentials and commit identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitOptions {
    /// Username for HTTPS basic auth against the remote
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Password or access token for HTTPS basic auth
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Name recorded as commit author and committer
    pub author_name: String,
    /// Email recorded as commit author and committer
    pub author_email: String,
}

impl Default for GitOptions {
    fn default() -> Self {
        Self {
            username: None,
            token: None,
            author_name: "blogposter".to_string(),
            author_email: "blogposter@localhost".to_string(),
        }
    }
}

// =============================================================================
// GitRepository
// =============================================================================

/// A non-bare git repository on local disk with an `origin` remote.
///
/// The underlying `git2::Repository` is reopened for every operation, which
/// keeps this type `Sync` without a lock of its own.
pub struct GitRepository {
    workdir: PathBuf,
    options: GitOptions,
}

impl GitRepository {
    /// Open an existing clone.
    pub fn open(path: impl Into<PathBuf>, options: GitOptions) -> Result<Self, RepoError> {
        let path = path.into();
        let repo = git2::Repository::open(&path).map_err(|source| RepoError::Open {
            path: path.clone(),
            source,
        })?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| RepoError::Bare(path.clone()))?
            .to_path_buf();
        Ok(Self { workdir, options })
    }

    /// Clone `url` into `path`, then open it.
    pub fn clone_into(
        url: &str,
        path: impl Into<PathBuf>,
        options: GitOptions,
    ) -> Result<Self, RepoError> {
        let path = path.into();
        tracing::info!(%url, path = %path.display(), "cloning site repository");

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(credential_callbacks(&options));
        RepoBuilder::new()
            .fetch_options(fetch_options)
            .clone(url, &path)
            .map_err(|source| RepoError::CloneFailed {
                url: url.to_string(),
                source,
            })?;

        Self::open(path, options)
    }

    /// Root of the working tree.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Returns true if the working tree has no changes and no untracked files.
    pub fn is_clean(&self) -> Result<bool, RepoError> {
        let repo = self.repo()?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).include_ignored(false);
        let statuses = repo
            .statuses(Some(&mut opts))
            .map_err(RepoError::git("status"))?;
        Ok(statuses.is_empty())
    }

    fn repo(&self) -> Result<git2::Repository, RepoError> {
        git2::Repository::open(&self.workdir).map_err(|source| RepoError::Open {
            path: self.workdir.clone(),
            source,
        })
    }

    /// Resolve a repository-relative path, refusing anything that leaves the tree.
    fn resolve(&self, path: &str) -> Result<PathBuf, RepoError> {
        let rel = Path::new(path);
        let inside = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || !inside {
            return Err(RepoError::OutsideRepository(path.to_string()));
        }
        Ok(self.workdir.join(rel))
    }

    fn current_branch(repo: &git2::Repository) -> Result<String, RepoError> {
        let head = repo.head().map_err(RepoError::git("resolve HEAD"))?;
        if !head.is_branch() {
            return Err(RepoError::DetachedHead);
        }
        head.shorthand()
            .map(str::to_string)
            .ok_or(RepoError::DetachedHead)
    }
}

impl Repository for GitRepository {
    fn clean(&self, recursive: bool) -> Result<(), RepoError> {
        let repo = self.repo()?;

        let head = repo
            .head()
            .and_then(|h| h.peel(ObjectType::Commit))
            .map_err(RepoError::git("resolve HEAD"))?;
        repo.reset(&head, ResetType::Hard, None)
            .map_err(RepoError::git("reset"))?;

        // Untracked directories are reported as a single "dir/" entry.
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(false)
            .include_ignored(false);
        let statuses = repo
            .statuses(Some(&mut opts))
            .map_err(RepoError::git("status"))?;

        for entry in statuses.iter() {
            if !entry.status().contains(Status::WT_NEW) {
                continue;
            }
            let Some(rel) = entry.path() else {
                continue;
            };
            let full = self.workdir.join(rel);
            let removed = if rel.ends_with('/') {
                if !recursive {
                    continue;
                }
                std::fs::remove_dir_all(&full)
            } else {
                std::fs::remove_file(&full)
            };
            removed.map_err(|source| RepoError::Remove {
                path: rel.to_string(),
                source,
            })?;
            tracing::debug!(path = rel, "removed untracked path");
        }

        Ok(())
    }

    fn commit(&self, path: &str, message: &str) -> Result<(), RepoError> {
        let repo = self.repo()?;
        self.resolve(path)?;

        let mut index = repo.index().map_err(RepoError::git("open index"))?;
        index
            .add_path(Path::new(path))
            .map_err(RepoError::git("add"))?;
        index.write().map_err(RepoError::git("write index"))?;
        let tree_id = index.write_tree().map_err(RepoError::git("write tree"))?;

        // An unborn branch has no parent commit.
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        if parent.as_ref().is_some_and(|p| p.tree_id() == tree_id) {
            return Err(RepoError::NothingToCommit(path.to_string()));
        }

        let tree = repo.find_tree(tree_id).map_err(RepoError::git("find tree"))?;
        let signature = Signature::now(&self.options.author_name, &self.options.author_email)
            .map_err(RepoError::git("signature"))?;
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let id = repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
            .map_err(RepoError::git("commit"))?;

        tracing::info!(%id, path, "committed");
        Ok(())
    }

    fn push(&self) -> Result<(), RepoError> {
        let repo = self.repo()?;
        let branch = Self::current_branch(&repo)?;
        let mut remote = repo
            .find_remote(REMOTE)
            .map_err(RepoError::git("find remote"))?;
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");

        let mut rejection = None;
        {
            let mut callbacks = credential_callbacks(&self.options);
            callbacks.push_update_reference(|refname, status| {
                if let Some(message) = status {
                    rejection = Some(RepoError::PushRejected {
                        refname: refname.to_string(),
                        message: message.to_string(),
                    });
                }
                Ok(())
            });
            let mut push_options = PushOptions::new();
            push_options.remote_callbacks(callbacks);
            remote
                .push(&[refspec.as_str()], Some(&mut push_options))
                .map_err(RepoError::git("push"))?;
        }
        if let Some(err) = rejection {
            return Err(err);
        }

        tracing::info!(%branch, remote = REMOTE, "pushed");
        Ok(())
    }

    fn pull(&self) -> Result<(), RepoError> {
        let repo = self.repo()?;
        let branch = Self::current_branch(&repo)?;
        let mut remote = repo
            .find_remote(REMOTE)
            .map_err(RepoError::git("find remote"))?;

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(credential_callbacks(&self.options));
        remote
            .fetch(&[branch.as_str()], Some(&mut fetch_options), None)
            .map_err(RepoError::git("fetch"))?;

        let fetch_head = repo
            .find_reference("FETCH_HEAD")
            .map_err(RepoError::git("find FETCH_HEAD"))?;
        let incoming = repo
            .reference_to_annotated_commit(&fetch_head)
            .map_err(RepoError::git("resolve FETCH_HEAD"))?;
        let (analysis, _) = repo
            .merge_analysis(&[&incoming])
            .map_err(RepoError::git("merge analysis"))?;

        if analysis.is_up_to_date() {
            tracing::debug!(%branch, "already up to date");
            return Ok(());
        }
        if !analysis.is_fast_forward() {
            return Err(RepoError::Diverged {
                remote: REMOTE.to_string(),
                branch,
            });
        }

        // Update the working tree first so a conflicting local file aborts
        // the pull before the branch moves.
        let target = repo
            .find_object(incoming.id(), None)
            .map_err(RepoError::git("find fetched commit"))?;
        repo.checkout_tree(&target, Some(CheckoutBuilder::new().safe()))
            .map_err(RepoError::git("checkout"))?;

        let refname = format!("refs/heads/{branch}");
        let mut reference = repo
            .find_reference(&refname)
            .map_err(RepoError::git("find branch"))?;
        reference
            .set_target(incoming.id(), "pull: fast-forward")
            .map_err(RepoError::git("fast-forward"))?;

        tracing::info!(%branch, to = %incoming.id(), "fast-forwarded");
        Ok(())
    }

    fn write_file(&self, path: &str, data: &[u8]) -> Result<(), RepoError> {
        let full = self.resolve(path)?;
        let write_err = |source| RepoError::Write {
            path: path.to_string(),
            source,
        };
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(&full, data).map_err(write_err)
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, RepoError> {
        let full = self.resolve(path)?;
        std::fs::read(&full).map_err(|source| RepoError::Read {
            path: path.to_string(),
            source,
        })
    }

    fn read_committed(&self, path: &str) -> Result<Vec<u8>, RepoError> {
        self.resolve(path)?;
        let repo = self.repo()?;
        let tree = repo
            .head()
            .and_then(|head| head.peel_to_tree())
            .map_err(RepoError::git("resolve HEAD tree"))?;
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == git2::ErrorCode::NotFound => {
                return Err(RepoError::Read {
                    path: path.to_string(),
                    source: std::io::ErrorKind::NotFound.into(),
                });
            }
            Err(e) => return Err(RepoError::git("look up path")(e)),
        };
        let blob = repo
            .find_blob(entry.id())
            .map_err(RepoError::git("read blob"))?;
        Ok(blob.content().to_vec())
    }
}

/// Remote callbacks answering credential requests with the configured
/// username and token, when both are set.
fn credential_callbacks(options: &GitOptions) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    if let (Some(username), Some(token)) = (&options.username, &options.token) {
        callbacks.credentials(move |_url, _username_from_url, _allowed| {
            Cred::userpass_plaintext(username, token)
        });
    }
    callbacks
}
