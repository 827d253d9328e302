//! repomirror - Unattended GitHub Mirror Agent
//!
//! repomirror walks a GitHub account's catalog (owned repositories, starred
//! repositories, gists) and keeps a bare mirror of every artifact on local
//! storage, refreshing all refs on each hourly pass.
//!
//! ## Core Features
//!
//! - **Deterministic layout**: mirror paths derive from host, path and numeric id
//! - **Full-ref mirrors**: `+refs/*:refs/*` fetched into bare repositories
//! - **Quota aware**: waits out the API rate limit instead of failing
//! - **Fail fast**: unexpected errors end the run for an external restart
//!
//! ## Modules
//!
//! - [`paths`]: Artifact identity and on-disk layout
//! - [`git`]: Git collaborator driving the `git` executable
//! - [`mirror`]: Create-or-update of a single mirror
//! - [`catalog`]: Paginated catalog walk
//! - [`github`]: GitHub API integration and authentication
//! - [`scheduler`]: Hourly walk loop
//! - [`config`]: Configuration management and parsing

pub mod catalog;
pub mod config;
pub mod diagnostics;
pub mod git;
pub mod github;
pub mod health;
pub mod mirror;
pub mod paths;
pub mod rate;
pub mod scheduler;

pub use catalog::{CatalogApi, CatalogWalker, WalkOptions, WalkSummary};
pub use config::Config;
pub use git::{CliGit, GitBackend, GitError, GitErrorKind};
pub use github::GitHubCatalog;
pub use health::HealthCheck;
pub use mirror::{MirrorSync, ObjectCache, SyncOutcome};
pub use paths::{ArtifactKind, ArtifactRef, PathResolver};
pub use rate::{QuotaStatus, RateGovernor};
pub use scheduler::Scheduler;
