//! Scheduler - the outermost control loop
//!
//! Runs one full catalog walk, logs the total, sleeps a fixed interval and
//! repeats. A fatal walk error ends the loop and is returned to the caller,
//! which is expected to exit the process and rely on an external restart.

use anyhow::{Context, Result};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::catalog::{CatalogWalker, WalkOptions, WalkSummary};
use crate::config::Config;
use crate::git::CliGit;
use crate::github::GitHubCatalog;
use crate::mirror::{MirrorSync, ObjectCache};
use crate::paths::PathResolver;
use crate::rate::RateGovernor;

pub struct Scheduler {
    walker: CatalogWalker,
    user: String,
    options: WalkOptions,
    interval: Duration,
}

impl Scheduler {
    pub fn new(walker: CatalogWalker, user: String, options: WalkOptions, interval: Duration) -> Self {
        Self {
            walker,
            user,
            options,
            interval,
        }
    }

    /// Assemble the production wiring: GitHub catalog, git CLI, storage root
    pub async fn from_config(config: &Config) -> Result<Self> {
        let catalog = GitHubCatalog::new(config)
            .await
            .context("Failed to create GitHub catalog client")?;
        let user = catalog.username().to_string();
        let options = WalkOptions::from_config(config, catalog.credentials())?;

        let mirror = MirrorSync::new(
            Arc::new(CliGit::default()),
            ObjectCache::new(config.object_cache_bytes()),
            config.slow_threshold()?,
        );
        let governor = RateGovernor::new(config.rate_limit.min_remaining, config.reset_margin()?);
        let walker = CatalogWalker::new(
            Arc::new(catalog),
            mirror,
            PathResolver::new(config.data_path()),
            governor,
        );

        Ok(Self::new(walker, user, options, config.interval()?))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One catalog walk
    pub async fn run_cycle(&self) -> Result<WalkSummary> {
        let start = Instant::now();
        let summary = self
            .walker
            .walk(&self.user, &self.options)
            .await
            .with_context(|| format!("Catalog walk for {} failed", self.user))?;

        info!(
            "Total: {} (owned {}, starred {}, gists {}) in {:?}",
            summary.total(),
            summary.owned,
            summary.starred,
            summary.gists,
            start.elapsed()
        );
        Ok(summary)
    }

    /// Walk, sleep, repeat. Only returns on a fatal error.
    pub async fn run_forever(&self) -> Result<Infallible> {
        info!(
            "Scheduler started for {} with interval: {:?}",
            self.user, self.interval
        );

        loop {
            self.run_cycle().await?;
            debug!("Next walk in {:?}", self.interval);
            tokio::time::sleep(self.interval).await;
        }
    }
}
