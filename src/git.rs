use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Output;
use thiserror::Error;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use crate::mirror::CacheLease;

/// Refspec that forces every remote ref onto the same local ref
pub const MIRROR_REFSPEC: &str = "+refs/*:refs/*";

/// Conditions the backend promises to recognise. Everything else is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GitErrorKind {
    AlreadyUpToDate,
    RemoteNotFound,
    EmptyRemoteRepository,
    AccessDeniedOrNotExported,
    Other,
}

impl GitErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyUpToDate => "already up to date",
            Self::RemoteNotFound => "remote not found",
            Self::EmptyRemoteRepository => "remote repository is empty",
            Self::AccessDeniedOrNotExported => "access denied or repository not exported",
            Self::Other => "git error",
        }
    }
}

impl fmt::Display for GitErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error surfaced by a [`GitBackend`] operation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct GitError {
    pub kind: GitErrorKind,
    pub message: String,
}

impl GitError {
    pub fn new(kind: GitErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(GitErrorKind::Other, message)
    }

    pub fn kind(&self) -> GitErrorKind {
        self.kind
    }
}

/// Bearer token presented to the remote as HTTP basic auth
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    /// Placeholder user name; the hosting platform only checks the token
    pub const USERNAME: &'static str = "git";

    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &Self::USERNAME)
            .field("token", &"***")
            .finish()
    }
}

/// An opened bare mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorHandle {
    pub path: PathBuf,
    /// Credential-free fetch location recorded as `origin`
    pub remote_url: String,
}

/// Git transport and object storage used by the mirror sync.
///
/// Implementations must map failures onto [`GitErrorKind`] so callers never
/// need to look at library- or tool-specific messages.
#[async_trait]
pub trait GitBackend: Send + Sync {
    /// Create a bare repository at `destination` from `url`
    async fn clone_bare(
        &self,
        url: &str,
        destination: &Path,
        auth: Option<&Credentials>,
        cache: &CacheLease<'_>,
    ) -> Result<(), GitError>;

    /// Whether `path` holds an initialised bare repository.
    ///
    /// `Ok(false)` for a missing path or a leftover directory; `Err` only when
    /// the question itself could not be answered.
    async fn is_mirror(&self, path: &Path, cache: &CacheLease<'_>) -> Result<bool, GitError>;

    /// Open an existing bare mirror
    async fn open_bare(&self, path: &Path, cache: &CacheLease<'_>)
        -> Result<MirrorHandle, GitError>;

    /// Fetch `refspec` from the mirror's origin
    async fn fetch(
        &self,
        handle: &MirrorHandle,
        refspec: &str,
        force: bool,
        auth: Option<&Credentials>,
        cache: &CacheLease<'_>,
    ) -> Result<(), GitError>;
}

/// Map git's stderr onto a recognised error kind
pub fn classify_stderr(stderr: &str) -> GitErrorKind {
    let lower = stderr.to_lowercase();

    // GitHub answers "Repository not found" for both deleted and private remotes
    if lower.contains("access denied")
        || lower.contains("not exported")
        || lower.contains("repository not found")
        || lower.contains("authentication failed")
        || lower.contains("terminal prompts disabled")
        || lower.contains("returned error: 403")
    {
        GitErrorKind::AccessDeniedOrNotExported
    } else if lower.contains("does not appear to be a git repository")
        || lower.contains("couldn't find remote ref")
        || lower.contains("returned error: 404")
        || lower.contains("no such remote")
    {
        GitErrorKind::RemoteNotFound
    } else if lower.contains("empty repository") {
        GitErrorKind::EmptyRemoteRepository
    } else if lower.contains("up to date") || lower.contains("up-to-date") {
        GitErrorKind::AlreadyUpToDate
    } else {
        GitErrorKind::Other
    }
}

/// [`GitBackend`] that drives the `git` executable
#[derive(Debug, Clone)]
pub struct CliGit {
    program: String,
}

impl Default for CliGit {
    fn default() -> Self {
        Self::new("git")
    }
}

impl CliGit {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Child environment carrying `Authorization: Basic` for git's HTTP transport.
    ///
    /// Passed as `GIT_CONFIG_*` so the token never reaches the command line.
    fn auth_env(auth: Option<&Credentials>) -> Vec<(&'static str, String)> {
        let Some(credentials) = auth else {
            return Vec::new();
        };

        let basic = STANDARD.encode(format!("{}:{}", Credentials::USERNAME, credentials.token()));
        vec![
            ("GIT_CONFIG_COUNT", "1".to_string()),
            ("GIT_CONFIG_KEY_0", "http.extraHeader".to_string()),
            ("GIT_CONFIG_VALUE_0", format!("Authorization: Basic {}", basic)),
        ]
    }

    fn redact(text: &str, auth: Option<&Credentials>) -> String {
        match auth {
            Some(credentials) if !credentials.token().is_empty() => {
                text.replace(credentials.token(), "***")
            }
            _ => text.to_string(),
        }
    }

    async fn run(
        &self,
        args: &[&str],
        cache: &CacheLease<'_>,
        auth: Option<&Credentials>,
    ) -> Result<Output, GitError> {
        let output = self.output(args, cache, auth).await?;

        if output.status.success() {
            return Ok(output);
        }

        let stderr = Self::redact(&String::from_utf8_lossy(&output.stderr), auth);
        Err(GitError::new(
            classify_stderr(&stderr),
            stderr.trim().to_string(),
        ))
    }

    /// Run git and hand back its output whatever the exit status
    async fn output(
        &self,
        args: &[&str],
        cache: &CacheLease<'_>,
        auth: Option<&Credentials>,
    ) -> Result<Output, GitError> {
        debug!("git {}", args.join(" "));

        AsyncCommand::new(&self.program)
            .arg("-c")
            .arg(format!("core.deltaBaseCacheLimit={}", cache.limit_bytes()))
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .envs(Self::auth_env(auth))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| GitError::other(format!("failed to execute {}: {}", self.program, e)))
    }
}

#[async_trait]
impl GitBackend for CliGit {
    async fn clone_bare(
        &self,
        url: &str,
        destination: &Path,
        auth: Option<&Credentials>,
        cache: &CacheLease<'_>,
    ) -> Result<(), GitError> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GitError::other(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        let destination_str = destination.to_string_lossy();

        let output = self
            .run(&["clone", "--bare", url, &destination_str], cache, auth)
            .await?;

        // git reports an empty remote as a warning and still succeeds
        let stderr = String::from_utf8_lossy(&output.stderr);
        if classify_stderr(&stderr) == GitErrorKind::EmptyRemoteRepository {
            return Err(GitError::new(
                GitErrorKind::EmptyRemoteRepository,
                Self::redact(stderr.trim(), auth),
            ));
        }

        Ok(())
    }

    async fn is_mirror(&self, path: &Path, cache: &CacheLease<'_>) -> Result<bool, GitError> {
        if !path.is_dir() {
            return Ok(false);
        }

        // An explicit git dir stops discovery from climbing into a parent repository
        let git_dir = format!("--git-dir={}", path.to_string_lossy());
        let output = self
            .output(&[&git_dir, "rev-parse", "--is-bare-repository"], cache, None)
            .await?;

        Ok(output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    async fn open_bare(
        &self,
        path: &Path,
        cache: &CacheLease<'_>,
    ) -> Result<MirrorHandle, GitError> {
        let path_str = path.to_string_lossy();

        let output = self
            .run(&["-C", &path_str, "rev-parse", "--is-bare-repository"], cache, None)
            .await?;
        if String::from_utf8_lossy(&output.stdout).trim() != "true" {
            return Err(GitError::other(format!(
                "{} is not a bare repository",
                path.display()
            )));
        }

        let output = self
            .run(
                &["-C", &path_str, "config", "--get", "remote.origin.url"],
                cache,
                None,
            )
            .await
            .map_err(|_| {
                GitError::new(
                    GitErrorKind::RemoteNotFound,
                    format!("{} has no origin remote", path.display()),
                )
            })?;

        Ok(MirrorHandle {
            path: path.to_path_buf(),
            remote_url: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        })
    }

    async fn fetch(
        &self,
        handle: &MirrorHandle,
        refspec: &str,
        force: bool,
        auth: Option<&Credentials>,
        cache: &CacheLease<'_>,
    ) -> Result<(), GitError> {
        let path_str = handle.path.to_string_lossy();

        let mut args: Vec<&str> = vec!["-C", &path_str, "fetch"];
        if force {
            args.push("--force");
        }
        args.push(&handle.remote_url);
        args.push(refspec);

        self.run(&args, cache, auth).await.map(|_| ())
    }
}
