//! Local storage layout for mirrored artifacts
//!
//! Every remote artifact maps to exactly one directory under
//! `<root>/data/<host>/`. Repositories and wikis carry the platform's numeric
//! id in the directory name so that a renamed or re-created remote never
//! lands on top of an older mirror.

use reqwest::Url;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Kind of mirrorable unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Repository,
    Wiki,
    Gist,
}

/// Errors raised while turning a clone URL into an artifact reference
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("invalid clone URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("clone URL {url} has no host")]
    MissingHost { url: String },

    #[error("clone URL {url} has an unusable path")]
    UnsafePath { url: String },
}

/// One remote mirrorable unit, built fresh from a catalog page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub host: String,
    /// Path segment on the host, without the leading slash
    pub remote_path: String,
    pub numeric_id: u64,
    pub kind: ArtifactKind,
    pub clone_url: String,
    pub is_private: bool,
    /// Only meaningful for [`ArtifactKind::Repository`]
    pub has_wiki: bool,
}

impl ArtifactRef {
    /// Build a repository reference from its clone URL
    pub fn repository(
        clone_url: &str,
        numeric_id: u64,
        is_private: bool,
        has_wiki: bool,
    ) -> Result<Self, PathError> {
        let (host, remote_path) = split_clone_url(clone_url)?;

        Ok(Self {
            host,
            remote_path,
            numeric_id,
            kind: ArtifactKind::Repository,
            clone_url: clone_url.to_string(),
            is_private,
            has_wiki,
        })
    }

    /// Build a gist reference from its pull URL. Gists are always fetched anonymously.
    pub fn gist(pull_url: &str) -> Result<Self, PathError> {
        let (host, remote_path) = split_clone_url(pull_url)?;

        Ok(Self {
            host,
            remote_path,
            numeric_id: 0,
            kind: ArtifactKind::Gist,
            clone_url: pull_url.to_string(),
            is_private: false,
            has_wiki: false,
        })
    }

    /// Derive the wiki counterpart of a repository.
    ///
    /// The wiki keeps the repository's remote path so it resolves next to the
    /// repository mirror; only the clone URL changes.
    pub fn wiki(&self) -> Option<Self> {
        if self.kind != ArtifactKind::Repository {
            return None;
        }

        Some(Self {
            kind: ArtifactKind::Wiki,
            clone_url: wiki_clone_url(&self.clone_url),
            has_wiki: false,
            ..self.clone()
        })
    }

    /// Last path segment without the `.git` suffix, used for name filters
    pub fn name(&self) -> &str {
        let trimmed = trim_git_suffix(&self.remote_path);
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }
}

/// `https://h/a/b.git` -> `https://h/a/b.wiki.git`
pub fn wiki_clone_url(clone_url: &str) -> String {
    format!("{}.wiki.git", trim_git_suffix(clone_url))
}

fn trim_git_suffix(value: &str) -> &str {
    value.strip_suffix(".git").unwrap_or(value)
}

fn split_clone_url(clone_url: &str) -> Result<(String, String), PathError> {
    let url = Url::parse(clone_url).map_err(|e| PathError::InvalidUrl {
        url: clone_url.to_string(),
        reason: e.to_string(),
    })?;

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| PathError::MissingHost {
            url: clone_url.to_string(),
        })?;

    let remote_path = url.path().trim_start_matches('/').to_string();

    // Only plain segments may reach the filesystem
    let safe = !remote_path.is_empty()
        && Path::new(&remote_path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(PathError::UnsafePath {
            url: clone_url.to_string(),
        });
    }

    Ok((host.to_string(), remote_path))
}

/// Maps artifacts to mirror directories under a fixed storage root
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the bare mirror for `artifact`.
    ///
    /// Pure function of host, remote path, numeric id and kind.
    pub fn resolve(&self, artifact: &ArtifactRef) -> PathBuf {
        let base = self.root.join("data").join(&artifact.host);
        let stem = trim_git_suffix(&artifact.remote_path);

        match artifact.kind {
            ArtifactKind::Repository => {
                base.join(format!("{}-{}.git", stem, artifact.numeric_id))
            }
            ArtifactKind::Wiki => {
                base.join(format!("{}-{}.wiki.git", stem, artifact.numeric_id))
            }
            ArtifactKind::Gist => base.join(&artifact.remote_path),
        }
    }
}
