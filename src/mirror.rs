//! Mirror Sync - create or refresh one bare mirror
//!
//! A sync either initialises a new bare mirror (clone, then a full-refspec
//! fetch) or refreshes an existing one (full-refspec fetch). Every transport
//! and storage error is classified here and returned as a [`SyncOutcome`];
//! nothing escapes as an `Err`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::git::{Credentials, GitBackend, GitError, GitErrorKind, MIRROR_REFSPEC};

/// Default object cache budget handed to git for one sync
pub const DEFAULT_OBJECT_CACHE_BYTES: u64 = 64 * 1024 * 1024;

/// Result of one sync attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A new mirror was initialised
    Created,
    /// An existing mirror was refreshed
    Updated,
    /// The remote has no content (or refused us) and the policy tolerates it
    SkippedMissing,
    /// Anything the policy does not tolerate
    Failed(GitError),
}

impl SyncOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Object cache shared by all syncs, leased to exactly one sync at a time.
///
/// The lease carries the memory budget the backend may use; releasing the
/// lease clears the cache.
#[derive(Debug)]
pub struct ObjectCache {
    limit_bytes: u64,
    leased: AtomicBool,
    clears: AtomicU64,
}

impl ObjectCache {
    pub fn new(limit_bytes: u64) -> Self {
        Self {
            limit_bytes,
            leased: AtomicBool::new(false),
            clears: AtomicU64::new(0),
        }
    }

    pub fn acquire(&self) -> CacheLease<'_> {
        let already_leased = self.leased.swap(true, Ordering::SeqCst);
        debug_assert!(!already_leased, "object cache leased by two syncs at once");
        CacheLease { cache: self }
    }

    pub fn limit_bytes(&self) -> u64 {
        self.limit_bytes
    }

    pub fn is_leased(&self) -> bool {
        self.leased.load(Ordering::SeqCst)
    }

    /// Number of times the cache has been cleared
    pub fn clears(&self) -> u64 {
        self.clears.load(Ordering::SeqCst)
    }
}

impl Default for ObjectCache {
    fn default() -> Self {
        Self::new(DEFAULT_OBJECT_CACHE_BYTES)
    }
}

/// Scoped access to the [`ObjectCache`]; dropping it clears the cache
#[derive(Debug)]
pub struct CacheLease<'a> {
    cache: &'a ObjectCache,
}

impl CacheLease<'_> {
    pub fn limit_bytes(&self) -> u64 {
        self.cache.limit_bytes
    }
}

impl Drop for CacheLease<'_> {
    fn drop(&mut self) {
        self.cache.clears.fetch_add(1, Ordering::SeqCst);
        self.cache.leased.store(false, Ordering::SeqCst);
    }
}

/// Creates and refreshes bare mirrors through a [`GitBackend`]
pub struct MirrorSync {
    backend: Arc<dyn GitBackend>,
    cache: ObjectCache,
    slow_threshold: Duration,
}

impl MirrorSync {
    pub fn new(backend: Arc<dyn GitBackend>, cache: ObjectCache, slow_threshold: Duration) -> Self {
        Self {
            backend,
            cache,
            slow_threshold,
        }
    }

    pub fn object_cache(&self) -> &ObjectCache {
        &self.cache
    }

    /// Bring the mirror at `local_path` in line with `clone_url`.
    ///
    /// `tolerate_missing` turns an absent or empty remote into
    /// [`SyncOutcome::SkippedMissing`] instead of a failure.
    pub async fn sync(
        &self,
        local_path: &Path,
        clone_url: &str,
        credentials: Option<&Credentials>,
        tolerate_missing: bool,
    ) -> SyncOutcome {
        let start = Instant::now();

        let outcome = {
            let lease = self.cache.acquire();

            match self.existing_mirror(local_path, &lease).await {
                Ok(true) => {
                    self.update(local_path, clone_url, credentials, tolerate_missing, &lease)
                        .await
                }
                Ok(false) => {
                    self.create(local_path, clone_url, credentials, tolerate_missing, &lease)
                        .await
                }
                Err(e) => SyncOutcome::Failed(e),
            }
        };

        let elapsed = start.elapsed();
        if elapsed > self.slow_threshold {
            warn!(
                clone_url,
                elapsed_secs = elapsed.as_secs_f64(),
                "repo {} processing time: {:.1}s",
                clone_url,
                elapsed.as_secs_f64()
            );
        }

        outcome
    }

    /// Whether `path` is an initialised mirror. A directory that is not one
    /// (left by an interrupted clone) is removed so the sync starts over.
    async fn existing_mirror(&self, path: &Path, lease: &CacheLease<'_>) -> Result<bool, GitError> {
        if !path.exists() {
            return Ok(false);
        }

        if self.backend.is_mirror(path, lease).await? {
            return Ok(true);
        }

        warn!("{} is not an initialised mirror, cloning again", path.display());
        remove_partial_mirror(path).await;
        Ok(false)
    }

    async fn create(
        &self,
        path: &Path,
        clone_url: &str,
        credentials: Option<&Credentials>,
        tolerate_missing: bool,
        lease: &CacheLease<'_>,
    ) -> SyncOutcome {
        match self
            .backend
            .clone_bare(clone_url, path, credentials, lease)
            .await
        {
            Ok(()) => {}
            Err(e) if e.kind() == GitErrorKind::EmptyRemoteRepository && !tolerate_missing => {
                info!("Remote {} is empty, keeping an empty mirror", clone_url);
            }
            Err(e) if tolerate_missing => {
                remove_partial_mirror(path).await;
                info!("Skipping missing remote {}: {}", clone_url, e.kind());
                return SyncOutcome::SkippedMissing;
            }
            Err(e) => {
                remove_partial_mirror(path).await;
                return SyncOutcome::Failed(e);
            }
        }

        info!(clone_url, "add new repo {}", clone_url);

        let handle = match self.backend.open_bare(path, lease).await {
            Ok(handle) => handle,
            Err(e) => return SyncOutcome::Failed(e),
        };

        match self
            .backend
            .fetch(&handle, MIRROR_REFSPEC, true, credentials, lease)
            .await
        {
            Ok(()) => SyncOutcome::Created,
            Err(e)
                if matches!(
                    e.kind(),
                    GitErrorKind::AlreadyUpToDate
                        | GitErrorKind::RemoteNotFound
                        | GitErrorKind::EmptyRemoteRepository
                ) =>
            {
                debug!("Initial fetch of {} was a no-op: {}", clone_url, e.kind());
                SyncOutcome::Created
            }
            Err(e) => SyncOutcome::Failed(e),
        }
    }

    async fn update(
        &self,
        path: &Path,
        clone_url: &str,
        credentials: Option<&Credentials>,
        tolerate_missing: bool,
        lease: &CacheLease<'_>,
    ) -> SyncOutcome {
        info!(clone_url, "updating repo {}", clone_url);

        let handle = match self.backend.open_bare(path, lease).await {
            Ok(handle) => handle,
            Err(e) => return SyncOutcome::Failed(e),
        };

        match self
            .backend
            .fetch(&handle, MIRROR_REFSPEC, true, credentials, lease)
            .await
        {
            Ok(()) => SyncOutcome::Updated,
            Err(e) => match e.kind() {
                GitErrorKind::AlreadyUpToDate | GitErrorKind::EmptyRemoteRepository => {
                    SyncOutcome::Updated
                }
                // The remote went private or was deleted; keep what we have
                GitErrorKind::AccessDeniedOrNotExported => {
                    warn!("Remote {} refused the fetch, keeping existing mirror", clone_url);
                    SyncOutcome::SkippedMissing
                }
                GitErrorKind::RemoteNotFound if tolerate_missing => {
                    info!("Skipping missing remote {}", clone_url);
                    SyncOutcome::SkippedMissing
                }
                _ => SyncOutcome::Failed(e),
            },
        }
    }
}

/// Drop whatever a failed clone left behind so the next run clones again
async fn remove_partial_mirror(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove partial mirror {}: {}", path.display(), e);
        }
    }
}
