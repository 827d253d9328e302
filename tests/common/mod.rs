//! Common test utilities and fakes for repomirror tests
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use repomirror::catalog::{CatalogApi, CatalogPage, RemoteGist, RemoteRepo};
use repomirror::git::{Credentials, GitBackend, GitError, GitErrorKind, MirrorHandle};
use repomirror::mirror::{CacheLease, MirrorSync, ObjectCache};
use repomirror::{CatalogWalker, PathResolver, QuotaStatus, RateGovernor};

/// How a fake remote answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remote {
    Present,
    Empty,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitCall {
    Clone {
        url: String,
        destination: PathBuf,
        authenticated: bool,
    },
    Fetch {
        path: PathBuf,
        refspec: String,
        force: bool,
        authenticated: bool,
    },
}

/// In-memory git collaborator that still creates mirror directories
#[derive(Default)]
pub struct FakeGit {
    remotes: Mutex<HashMap<String, Remote>>,
    calls: Mutex<Vec<GitCall>>,
}

impl FakeGit {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Remotes not registered here answer as `Present`
    pub fn set_remote(&self, url: &str, remote: Remote) {
        self.remotes.lock().unwrap().insert(url.to_string(), remote);
    }

    pub fn calls(&self) -> Vec<GitCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn cloned_urls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GitCall::Clone { url, .. } => Some(url),
                GitCall::Fetch { .. } => None,
            })
            .collect()
    }

    fn remote(&self, url: &str) -> Remote {
        self.remotes
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(Remote::Present)
    }
}

#[async_trait]
impl GitBackend for FakeGit {
    async fn clone_bare(
        &self,
        url: &str,
        destination: &Path,
        auth: Option<&Credentials>,
        _cache: &CacheLease<'_>,
    ) -> Result<(), GitError> {
        self.calls.lock().unwrap().push(GitCall::Clone {
            url: url.to_string(),
            destination: destination.to_path_buf(),
            authenticated: auth.is_some(),
        });

        match self.remote(url) {
            Remote::Missing => Err(GitError::new(
                GitErrorKind::RemoteNotFound,
                format!("repository '{}' not found", url),
            )),
            remote => {
                std::fs::create_dir_all(destination).map_err(|e| GitError::other(e.to_string()))?;
                std::fs::write(destination.join("origin"), url)
                    .map_err(|e| GitError::other(e.to_string()))?;
                if remote == Remote::Empty {
                    Err(GitError::new(
                        GitErrorKind::EmptyRemoteRepository,
                        "You appear to have cloned an empty repository.",
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn is_mirror(&self, path: &Path, _cache: &CacheLease<'_>) -> Result<bool, GitError> {
        Ok(path.join("origin").is_file())
    }

    async fn open_bare(&self, path: &Path, _cache: &CacheLease<'_>) -> Result<MirrorHandle, GitError> {
        let remote_url = std::fs::read_to_string(path.join("origin"))
            .map_err(|e| GitError::new(GitErrorKind::RemoteNotFound, e.to_string()))?;
        Ok(MirrorHandle {
            path: path.to_path_buf(),
            remote_url,
        })
    }

    async fn fetch(
        &self,
        handle: &MirrorHandle,
        refspec: &str,
        force: bool,
        auth: Option<&Credentials>,
        _cache: &CacheLease<'_>,
    ) -> Result<(), GitError> {
        self.calls.lock().unwrap().push(GitCall::Fetch {
            path: handle.path.clone(),
            refspec: refspec.to_string(),
            force,
            authenticated: auth.is_some(),
        });

        match self.remote(&handle.remote_url) {
            Remote::Present => Ok(()),
            Remote::Empty => Err(GitError::new(
                GitErrorKind::EmptyRemoteRepository,
                "remote repository is empty",
            )),
            Remote::Missing => Err(GitError::new(
                GitErrorKind::RemoteNotFound,
                "repository not found",
            )),
        }
    }
}

/// Scripted catalog: one entry per page, recorded calls
pub struct FakeCatalog {
    pub owned: Vec<Vec<RemoteRepo>>,
    pub starred: Vec<Vec<RemoteRepo>>,
    pub gists: Vec<Vec<RemoteGist>>,
    pub remaining: u64,
    /// Listing that fails, as (source, page)
    pub fail_on: Option<(&'static str, u32)>,
    pub calls: Mutex<Vec<(&'static str, String, u32, u8)>>,
    pub quota_calls: Mutex<usize>,
}

impl Default for FakeCatalog {
    fn default() -> Self {
        Self {
            owned: Vec::new(),
            starred: Vec::new(),
            gists: Vec::new(),
            remaining: 5000,
            fail_on: None,
            calls: Mutex::new(Vec::new()),
            quota_calls: Mutex::new(0),
        }
    }
}

impl FakeCatalog {
    pub fn calls(&self) -> Vec<(&'static str, String, u32, u8)> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of walks started
    pub fn quota_calls(&self) -> usize {
        *self.quota_calls.lock().unwrap()
    }

    fn page<T: Clone>(
        &self,
        source: &'static str,
        pages: &[Vec<T>],
        user: &str,
        page: u32,
        per_page: u8,
    ) -> Result<CatalogPage<T>> {
        self.calls
            .lock()
            .unwrap()
            .push((source, user.to_string(), page, per_page));

        if self.fail_on == Some((source, page)) {
            return Err(anyhow!("502 Bad Gateway listing {} page {}", source, page));
        }

        let index = page as usize - 1;
        let items = pages.get(index).cloned().unwrap_or_default();
        let next_page = (index + 1 < pages.len()).then_some(page + 1);
        Ok(CatalogPage {
            items,
            next_page,
            quota: Some(self.status()),
        })
    }

    fn status(&self) -> QuotaStatus {
        QuotaStatus {
            remaining: self.remaining,
            limit: 5000,
            reset_at: Utc::now() + TimeDelta::minutes(30),
        }
    }
}

#[async_trait]
impl CatalogApi for FakeCatalog {
    async fn quota(&self) -> Result<QuotaStatus> {
        *self.quota_calls.lock().unwrap() += 1;
        Ok(self.status())
    }

    async fn list_owned(&self, user: &str, page: u32, per_page: u8) -> Result<CatalogPage<RemoteRepo>> {
        self.page("owned", &self.owned, user, page, per_page)
    }

    async fn list_starred(
        &self,
        user: &str,
        page: u32,
        per_page: u8,
    ) -> Result<CatalogPage<RemoteRepo>> {
        self.page("starred", &self.starred, user, page, per_page)
    }

    async fn list_gists(&self, user: &str, page: u32, per_page: u8) -> Result<CatalogPage<RemoteGist>> {
        self.page("gists", &self.gists, user, page, per_page)
    }
}

pub fn repo(id: u64, clone_url: &str) -> RemoteRepo {
    RemoteRepo {
        id,
        clone_url: Some(clone_url.to_string()),
        ..RemoteRepo::default()
    }
}

pub fn gist(id: &str, public: bool) -> RemoteGist {
    RemoteGist {
        id: id.to_string(),
        pull_url: Some(format!("https://gist.github.com/{}.git", id)),
        is_public: public,
    }
}

/// Walker over the fakes with storage rooted at `root`
pub fn walker(catalog: Arc<FakeCatalog>, git: Arc<FakeGit>, root: &Path) -> CatalogWalker {
    let mirror = MirrorSync::new(git, ObjectCache::default(), Duration::from_secs(60));
    CatalogWalker::new(
        catalog,
        mirror,
        PathResolver::new(root),
        RateGovernor::default(),
    )
}
