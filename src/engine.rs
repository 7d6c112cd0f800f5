//! The staging engine.
//!
//! At most one post change is pending at a time. [`Engine::new_post`] and
//! [`Engine::update_post`] write a post into the repository and remember it as
//! the change "on deck"; [`Engine::deploy`] commits and pushes it and
//! [`Engine::abort`] throws it away.
//!
//! Every operation runs under the engine's lock from start to finish, external
//! converter and repository calls included. Reads share the lock.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, FixedOffset, Local};
use serde::Serialize;

use crate::convert::{ConvertError, Converter};
use crate::normalize::Normalizer;
use crate::post::{Post, PostError, PostInput, post_path, slugify};
use crate::repo::{RepoError, Repository};

// =============================================================================
// Errors
// =============================================================================

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("document conversion failed: {0}")]
    Conversion(#[from] ConvertError),

    #[error(transparent)]
    Repository(#[from] RepoError),

    #[error("failed to commit {slug} (staged change discarded): {source}")]
    CommitFailed { slug: String, source: RepoError },

    #[error(
        "failed to commit {slug}: {commit}; discarding the staged change also failed, \
         the repository index may be inconsistent: {recovery}"
    )]
    CommitUnrecovered {
        slug: String,
        commit: RepoError,
        #[source]
        recovery: RepoError,
    },

    #[error("committed {slug} but failed to push: {source}")]
    PushFailed { slug: String, source: RepoError },

    #[error("no staged change to deploy")]
    NothingStaged,

    #[error("no readable post '{slug}': {source}")]
    UnknownPost { slug: String, source: RepoError },

    #[error("invalid post name '{0}'")]
    InvalidSlug(String),

    #[error("title must contain at least one letter or digit")]
    EmptyTitle,

    #[error("malformed post: {0}")]
    Post(#[from] PostError),
}

/// Coarse classification of [`EngineError`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The document converter failed.
    Conversion,
    /// The repository failed.
    Repository,
    /// The operation does not fit the engine's state or its arguments.
    State,
    /// A stored post could not be parsed or a post could not be encoded.
    Serialization,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conversion(_) => ErrorKind::Conversion,
            Self::Repository(_)
            | Self::CommitFailed { .. }
            | Self::CommitUnrecovered { .. }
            | Self::PushFailed { .. } => ErrorKind::Repository,
            Self::NothingStaged
            | Self::UnknownPost { .. }
            | Self::InvalidSlug(_)
            | Self::EmptyTitle => ErrorKind::State,
            Self::Post(_) => ErrorKind::Serialization,
        }
    }
}

// =============================================================================
// Clock
// =============================================================================

/// Source of post creation dates.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Local wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

// =============================================================================
// Engine
// =============================================================================

/// The pending change: a post written to the repository but not committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnDeck {
    /// Slug of the staged post
    pub name: String,
    /// Commit message; empty means the default
    pub msg: String,
}

/// Outcome of a successful [`Engine::deploy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deployed {
    pub slug: String,
    /// False in test mode, where commits stay local.
    pub pushed: bool,
}

pub struct Engine {
    repo: Box<dyn Repository>,
    converter: Box<dyn Converter>,
    clock: Box<dyn Clock>,
    normalizer: Normalizer,
    test_mode: bool,
    on_deck: RwLock<Option<OnDeck>>,
}

impl Engine {
    pub fn new(
        repo: impl Repository + 'static,
        converter: impl Converter + 'static,
    ) -> Self {
        Self {
            repo: Box::new(repo),
            converter: Box::new(converter),
            clock: Box::new(SystemClock),
            normalizer: Normalizer::standard(),
            test_mode: false,
            on_deck: RwLock::new(None),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// In test mode deploys commit but never push.
    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    /// The pending change, if any.
    pub fn on_deck(&self) -> Option<OnDeck> {
        self.read().clone()
    }

    /// Convert `document` into a new post and stage it.
    ///
    /// Remote changes are pulled first. A change already on deck is then
    /// replaced; if anything fails it stays on deck.
    pub fn new_post(&self, document: &[u8], input: &PostInput) -> Result<OnDeck, EngineError> {
        let mut on_deck = self.write();
        let post = self.build_post(document, input, None)?;
        self.stage(&mut on_deck, &post)
    }

    /// Replace the post at `slug` with a new conversion, keeping its date.
    ///
    /// The new post is written under the slug of the new title, which need not
    /// match `slug`.
    pub fn update_post(
        &self,
        slug: &str,
        document: &[u8],
        input: &PostInput,
    ) -> Result<OnDeck, EngineError> {
        let mut on_deck = self.write();
        check_slug(slug)?;
        let bytes = self
            .repo
            .read_file(&post_path(slug))
            .map_err(|source| EngineError::UnknownPost {
                slug: slug.to_string(),
                source,
            })?;
        let existing = Post::parse(&bytes)?;

        let mut post = self.build_post(document, input, Some(existing.front_matter.date))?;
        post.front_matter.img = existing.front_matter.img;
        self.stage(&mut on_deck, &post)
    }

    /// Commit the change on deck and push it.
    ///
    /// Once the commit exists the change is no longer on deck, even if the
    /// push fails; [`Engine::push`] retries it.
    pub fn deploy(&self) -> Result<Deployed, EngineError> {
        let mut on_deck = self.write();
        let staged = on_deck.take().ok_or(EngineError::NothingStaged)?;
        let slug = staged.name;
        let message = if staged.msg.is_empty() {
            format!("Publish {slug}")
        } else {
            staged.msg
        };

        if let Err(commit) = self.repo.commit(&post_path(&slug), &message) {
            tracing::warn!(%slug, error = %commit, "commit failed, discarding staged change");
            return Err(match self.repo.clean(true) {
                Ok(()) => EngineError::CommitFailed {
                    slug,
                    source: commit,
                },
                Err(recovery) => EngineError::CommitUnrecovered {
                    slug,
                    commit,
                    recovery,
                },
            });
        }
        tracing::info!(%slug, "committed");

        if self.test_mode {
            tracing::info!(%slug, "test mode, not pushing");
            return Ok(Deployed {
                slug,
                pushed: false,
            });
        }

        if let Err(source) = self.repo.push() {
            return Err(EngineError::PushFailed { slug, source });
        }
        tracing::info!(%slug, "published");
        Ok(Deployed { slug, pushed: true })
    }

    /// Push local commits, e.g. after a deploy whose push failed.
    pub fn push(&self) -> Result<(), EngineError> {
        let _guard = self.write();
        self.repo.push()?;
        Ok(())
    }

    /// Drop the change on deck and clean the repository.
    ///
    /// Cleans even when nothing is on deck. Returns the discarded change.
    pub fn abort(&self) -> Result<Option<OnDeck>, EngineError> {
        let mut on_deck = self.write();
        let discarded = on_deck.take();
        self.repo.clean(true)?;
        tracing::info!(discarded = ?discarded.as_ref().map(|d| &d.name), "aborted");
        Ok(discarded)
    }

    /// Read the committed post stored under `slug`. A staged change to the
    /// same post is not visible here until it is deployed.
    pub fn get_post(&self, slug: &str) -> Result<Post, EngineError> {
        let _guard = self.read();
        check_slug(slug)?;
        let bytes = self.repo.read_committed(&post_path(slug))?;
        Ok(Post::parse(&bytes)?)
    }

    fn build_post(
        &self,
        document: &[u8],
        input: &PostInput,
        date: Option<DateTime<FixedOffset>>,
    ) -> Result<Post, EngineError> {
        if slugify(&input.title).trim_matches('-').is_empty() {
            return Err(EngineError::EmptyTitle);
        }
        let converted = self.converter.convert(document)?;
        let content = self.normalizer.normalize(&converted);
        let date = date.unwrap_or_else(|| self.clock.now());
        Ok(Post::new(content, input, date))
    }

    fn stage(&self, on_deck: &mut Option<OnDeck>, post: &Post) -> Result<OnDeck, EngineError> {
        let bytes = post.to_bytes()?;
        self.repo.pull()?;

        let fname = post.fname();
        self.replace_staged(on_deck, &fname, &bytes)?;

        let staged = OnDeck {
            name: post.slug(),
            msg: String::new(),
        };
        *on_deck = Some(staged.clone());
        tracing::info!(slug = %staged.name, %fname, "staged");
        Ok(staged)
    }

    /// Write `bytes` to `fname`, discarding the change on deck first.
    ///
    /// If the write fails the discarded post is written back and stays on
    /// deck. It is dropped only when that restore fails too.
    fn replace_staged(
        &self,
        on_deck: &mut Option<OnDeck>,
        fname: &str,
        bytes: &[u8],
    ) -> Result<(), EngineError> {
        let Some(previous) = on_deck.as_ref() else {
            return Ok(self.repo.write_file(fname, bytes)?);
        };
        let previous_path = post_path(&previous.name);
        let previous_bytes = self.repo.read_file(&previous_path)?;

        tracing::info!(previous = %previous.name, "discarding superseded change");
        self.repo.clean(true)?;

        let Err(write) = self.repo.write_file(fname, bytes) else {
            return Ok(());
        };
        if let Err(restore) = self.repo.write_file(&previous_path, &previous_bytes) {
            tracing::error!(
                previous = %previous.name,
                error = %restore,
                "failed to restore superseded change, dropping it"
            );
            *on_deck = None;
        }
        Err(write.into())
    }

    // The lock only guards a plain Option, which no panic can leave half
    // updated, so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, Option<OnDeck>> {
        self.on_deck.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<OnDeck>> {
        self.on_deck.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reject slugs that could name a file outside the post directory.
fn check_slug(slug: &str) -> Result<(), EngineError> {
    if slug.is_empty() || slug.contains(['/', '\\']) || slug.contains("..") {
        return Err(EngineError::InvalidSlug(slug.to_string()));
    }
    Ok(())
}
