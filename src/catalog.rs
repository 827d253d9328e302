//! Catalog Walker - paginated enumeration of remote artifacts
//!
//! Walks the enabled catalog sources (owned repositories, starred
//! repositories, gists) page by page, filters the items and hands every
//! surviving artifact to [`MirrorSync`]. A sync that fails outside the
//! tolerated set aborts the walk with an error.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::Config;
use crate::git::Credentials;
use crate::mirror::{MirrorSync, SyncOutcome};
use crate::paths::{ArtifactRef, PathResolver};
use crate::rate::{QuotaStatus, RateGovernor};

/// Repository item as listed by the platform
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteRepo {
    pub id: u64,
    pub clone_url: Option<String>,
    pub is_private: bool,
    pub is_fork: bool,
    pub has_wiki: bool,
}

/// Gist item as listed by the platform
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteGist {
    pub id: String,
    pub pull_url: Option<String>,
    pub is_public: bool,
}

/// One page of a catalog listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPage<T> {
    pub items: Vec<T>,
    /// `None` on the last page
    pub next_page: Option<u32>,
    /// Quota reading taken with this page, when the platform exposes one
    pub quota: Option<QuotaStatus>,
}

impl<T> CatalogPage<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page: None,
            quota: None,
        }
    }
}

/// Hosting-platform catalog API
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Cheap identity/quota call made once at the start of a walk
    async fn quota(&self) -> Result<QuotaStatus>;

    async fn list_owned(&self, user: &str, page: u32, per_page: u8)
        -> Result<CatalogPage<RemoteRepo>>;

    async fn list_starred(
        &self,
        user: &str,
        page: u32,
        per_page: u8,
    ) -> Result<CatalogPage<RemoteRepo>>;

    async fn list_gists(&self, user: &str, page: u32, per_page: u8)
        -> Result<CatalogPage<RemoteGist>>;
}

/// Which repository listing to walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoSource {
    Owned,
    Starred,
}

impl fmt::Display for RepoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owned => f.write_str("owned"),
            Self::Starred => f.write_str("starred"),
        }
    }
}

/// Per-walk switches and filters
#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub include_owned: bool,
    pub include_starred: bool,
    pub include_gists: bool,
    pub skip_forks: bool,
    pub page_size: u8,
    /// Attached to private repositories only
    pub credentials: Option<Credentials>,
    pub exclude: Vec<Regex>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            include_owned: true,
            include_starred: false,
            include_gists: false,
            skip_forks: false,
            page_size: 100,
            credentials: None,
            exclude: Vec::new(),
        }
    }
}

impl WalkOptions {
    pub fn from_config(config: &Config, credentials: Option<Credentials>) -> Result<Self> {
        Ok(Self {
            include_owned: config.github.include_owned,
            include_starred: config.github.include_starred,
            include_gists: config.github.include_gists,
            skip_forks: config.github.skip_forks,
            page_size: config.github.page_size,
            credentials,
            exclude: Vec::new(),
        }
        .with_exclude_patterns(&config.github.exclude_patterns)?)
    }

    /// Exclude repositories whose name matches any glob pattern (`*` wildcard)
    pub fn with_exclude_patterns(mut self, patterns: &[String]) -> Result<Self> {
        self.exclude = patterns
            .iter()
            .map(|pattern| {
                let regex = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*"));
                Regex::new(&regex)
                    .with_context(|| format!("Invalid exclude pattern: {}", pattern))
            })
            .collect::<Result<_>>()?;
        Ok(self)
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|re| re.is_match(name))
    }
}

/// Counts from one complete catalog walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkSummary {
    pub owned: usize,
    pub starred: usize,
    pub gists: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped_missing: usize,
}

impl WalkSummary {
    /// Artifacts actually attempted; filtered items are not counted
    pub fn total(&self) -> usize {
        self.owned + self.starred + self.gists
    }

    fn record(&mut self, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Created => self.created += 1,
            SyncOutcome::Updated => self.updated += 1,
            SyncOutcome::SkippedMissing => self.skipped_missing += 1,
            SyncOutcome::Failed(_) => {}
        }
    }
}

/// Drives one catalog walk, strictly one artifact at a time
pub struct CatalogWalker {
    api: Arc<dyn CatalogApi>,
    mirror: MirrorSync,
    resolver: PathResolver,
    governor: RateGovernor,
}

impl CatalogWalker {
    pub fn new(
        api: Arc<dyn CatalogApi>,
        mirror: MirrorSync,
        resolver: PathResolver,
        governor: RateGovernor,
    ) -> Self {
        Self {
            api,
            mirror,
            resolver,
            governor,
        }
    }

    pub fn mirror(&self) -> &MirrorSync {
        &self.mirror
    }

    /// Walk every enabled source for `user`
    pub async fn walk(&self, user: &str, options: &WalkOptions) -> Result<WalkSummary> {
        let start = Instant::now();

        let quota = self
            .api
            .quota()
            .await
            .context("Failed to read API rate limit")?;
        self.governor.check_and_wait(&quota).await;

        let mut summary = WalkSummary::default();

        if options.include_owned {
            let owned = self
                .walk_repositories(user, RepoSource::Owned, options, &mut summary)
                .await?;
            summary.owned = owned;
        }

        if options.include_starred {
            let starred = self
                .walk_repositories(user, RepoSource::Starred, options, &mut summary)
                .await?;
            summary.starred = starred;
        }

        if options.include_gists {
            let gists = self.walk_gists(user, options, &mut summary).await?;
            summary.gists = gists;
        }

        info!(
            "Catalog walk finished in {:.1}s: {} owned, {} starred, {} gists ({} created, {} updated, {} skipped)",
            start.elapsed().as_secs_f64(),
            summary.owned,
            summary.starred,
            summary.gists,
            summary.created,
            summary.updated,
            summary.skipped_missing
        );

        Ok(summary)
    }

    async fn walk_repositories(
        &self,
        user: &str,
        source: RepoSource,
        options: &WalkOptions,
        summary: &mut WalkSummary,
    ) -> Result<usize> {
        let mut count = 0;
        let mut page = 1;

        loop {
            let listing = match source {
                RepoSource::Owned => self.api.list_owned(user, page, options.page_size).await,
                RepoSource::Starred => {
                    self.api.list_starred(user, page, options.page_size).await
                }
            }
            .with_context(|| format!("Failed to fetch {} repositories page {}", source, page))?;

            debug!(
                "Fetched {} {} repositories from page {}",
                listing.items.len(),
                source,
                page
            );

            for repo in &listing.items {
                if self.mirror_repository(repo, options, summary).await? {
                    count += 1;
                }
            }

            if let Some(quota) = &listing.quota {
                self.governor.observe(quota);
            }

            match listing.next_page {
                Some(next) => page = next,
                None => break,
            }
        }

        info!("Mirrored {} {} repositories", count, source);
        Ok(count)
    }

    /// Returns whether the repository was attempted
    async fn mirror_repository(
        &self,
        repo: &RemoteRepo,
        options: &WalkOptions,
        summary: &mut WalkSummary,
    ) -> Result<bool> {
        let Some(clone_url) = repo.clone_url.as_deref().filter(|url| !url.is_empty()) else {
            debug!("Skipping repository {} without clone URL", repo.id);
            return Ok(false);
        };

        if options.skip_forks && repo.is_fork {
            debug!("Skipping fork {}", clone_url);
            return Ok(false);
        }

        let artifact = ArtifactRef::repository(clone_url, repo.id, repo.is_private, repo.has_wiki)
            .with_context(|| format!("Failed to parse clone URL of repository {}", repo.id))?;

        if options.is_excluded(artifact.name()) {
            debug!("Excluding repository due to pattern match: {}", artifact.name());
            return Ok(false);
        }

        let credentials = if artifact.is_private {
            options.credentials.as_ref()
        } else {
            None
        };

        self.sync_artifact(&artifact, credentials, false, summary)
            .await?;

        // Wikis are often flagged but never created, so a missing one is fine
        if artifact.has_wiki {
            if let Some(wiki) = artifact.wiki() {
                self.sync_artifact(&wiki, credentials, true, summary).await?;
            }
        }

        Ok(true)
    }

    async fn walk_gists(
        &self,
        user: &str,
        options: &WalkOptions,
        summary: &mut WalkSummary,
    ) -> Result<usize> {
        let mut count = 0;
        let mut page = 1;

        loop {
            let listing = self
                .api
                .list_gists(user, page, options.page_size)
                .await
                .with_context(|| format!("Failed to fetch gists page {}", page))?;

            for gist in &listing.items {
                if !gist.is_public {
                    debug!("Skipping secret gist {}", gist.id);
                    continue;
                }

                let Some(pull_url) = gist.pull_url.as_deref().filter(|url| !url.is_empty()) else {
                    debug!("Skipping gist {} without pull URL", gist.id);
                    continue;
                };

                let artifact = ArtifactRef::gist(pull_url)
                    .with_context(|| format!("Failed to parse pull URL of gist {}", gist.id))?;

                // Gists are fetched anonymously
                self.sync_artifact(&artifact, None, true, summary).await?;
                count += 1;
            }

            if let Some(quota) = &listing.quota {
                self.governor.observe(quota);
            }

            match listing.next_page {
                Some(next) => page = next,
                None => break,
            }
        }

        info!("Mirrored {} gists", count);
        Ok(count)
    }

    async fn sync_artifact(
        &self,
        artifact: &ArtifactRef,
        credentials: Option<&Credentials>,
        tolerate_missing: bool,
        summary: &mut WalkSummary,
    ) -> Result<()> {
        let path = self.resolver.resolve(artifact);

        let outcome = self
            .mirror
            .sync(&path, &artifact.clone_url, credentials, tolerate_missing)
            .await;

        if let SyncOutcome::Failed(error) = outcome {
            return Err(anyhow!(error)).with_context(|| {
                format!(
                    "Failed to mirror {} into {}",
                    artifact.clone_url,
                    path.display()
                )
            });
        }

        summary.record(&outcome);
        Ok(())
    }
}
