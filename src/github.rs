use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octocrab::models::gists::Gist;
use octocrab::models::Repository;
use octocrab::{FromResponse, Octocrab, Page};
use serde::de::DeserializeOwned;
use std::process::Command;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogApi, CatalogPage, RemoteGist, RemoteRepo};
use crate::config::Config;
use crate::git::Credentials;
use crate::rate::QuotaStatus;

/// GitHub catalog client with authentication management
pub struct GitHubCatalog {
    client: Octocrab,
    /// Account whose catalog is walked
    username: String,
    /// Login the token belongs to, if authenticated
    login: Option<String>,
    token: Option<String>,
}

/// GitHub authentication strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Token from configuration or GITHUB_TOKEN
    ConfiguredToken,
    /// Use GitHub CLI authentication
    GitHubCLI,
    /// No token; only public data is reachable
    Anonymous,
}

impl GitHubCatalog {
    /// Create a new GitHub client and resolve the target account
    pub async fn new(config: &Config) -> Result<Self> {
        let (auth_strategy, token) = Self::detect_authentication(config)?;

        info!("Using authentication strategy: {:?}", auth_strategy);

        let mut builder = Octocrab::builder();
        if let Some(api_url) = &config.github.api_url {
            builder = builder
                .base_uri(normalize_api_url(api_url))
                .with_context(|| format!("Invalid GitHub API address: {}", api_url))?;
        }
        if let Some(token) = &token {
            builder = builder.personal_token(token.clone());
        }
        let client = builder.build().context("Failed to create GitHub client")?;

        let login = if token.is_some() {
            let user = client
                .current()
                .user()
                .await
                .context("Failed to get current user information. Check your authentication.")?;
            Some(user.login)
        } else {
            None
        };

        let username = config
            .github
            .user
            .clone()
            .or_else(|| login.clone())
            .ok_or_else(|| anyhow!("No GitHub user configured and no token to infer one from"))?;

        info!("Mirroring catalog of GitHub user: {}", username);

        Ok(Self {
            client,
            username,
            login,
            token,
        })
    }

    /// Detect and obtain GitHub authentication
    pub fn detect_authentication(config: &Config) -> Result<(AuthStrategy, Option<String>)> {
        let configured = config.github.token.clone().filter(|t| !t.is_empty());

        match config.github.auth_method.as_str() {
            "auto" => {
                if let Some(token) = configured {
                    check_token_shape(&token);
                    Ok((AuthStrategy::ConfiguredToken, Some(token)))
                } else if let Ok(token) = Self::try_github_cli() {
                    Ok((AuthStrategy::GitHubCLI, Some(token)))
                } else if config.github.user.is_some() {
                    warn!("No GitHub token found; private repositories will not be mirrored");
                    Ok((AuthStrategy::Anonymous, None))
                } else {
                    Err(anyhow!(
                        "No GitHub authentication found. Please either:\n\
                         1. Install and authenticate GitHub CLI: gh auth login\n\
                         2. Set GITHUB_TOKEN environment variable\n\
                         3. Set GITHUB_USER to mirror public data anonymously"
                    ))
                }
            }
            "gh_cli" => {
                let token = Self::try_github_cli()
                    .context("GitHub CLI authentication failed. Run: gh auth login")?;
                Ok((AuthStrategy::GitHubCLI, Some(token)))
            }
            "token" => {
                let token = configured
                    .ok_or_else(|| anyhow!("GITHUB_TOKEN environment variable not found or invalid"))?;
                check_token_shape(&token);
                Ok((AuthStrategy::ConfiguredToken, Some(token)))
            }
            other => Err(anyhow!("Unknown auth method: {}", other)),
        }
    }

    /// Try to get token from GitHub CLI
    fn try_github_cli() -> Result<String> {
        debug!("Attempting GitHub CLI authentication");

        if !is_command_available("gh") {
            return Err(anyhow!("GitHub CLI (gh) is not installed"));
        }

        let token_output = Command::new("gh")
            .args(["auth", "token"])
            .output()
            .context("Failed to get GitHub CLI token")?;

        if !token_output.status.success() {
            return Err(anyhow!(
                "Failed to retrieve token from GitHub CLI: {}",
                String::from_utf8_lossy(&token_output.stderr)
            ));
        }

        let token = String::from_utf8(token_output.stdout)
            .context("GitHub CLI token is not valid UTF-8")?
            .trim()
            .to_string();

        if token.is_empty() {
            return Err(anyhow!("GitHub CLI returned empty token"));
        }

        debug!("Successfully obtained token from GitHub CLI");
        Ok(token)
    }

    /// Get the target username
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Credentials presented to git for private repositories
    pub fn credentials(&self) -> Option<Credentials> {
        self.token.as_deref().map(Credentials::new)
    }

    /// Whether the walk targets the account the token belongs to
    fn is_self(&self, user: &str) -> bool {
        self.login
            .as_deref()
            .is_some_and(|login| login.eq_ignore_ascii_case(user))
    }

    fn route(&self, user: &str, own: &str, other: &str) -> String {
        if self.is_self(user) {
            own.to_string()
        } else {
            format!("/users/{}/{}", user, other)
        }
    }

    /// One listing page, with the quota reported in its response headers
    async fn fetch_page<T: DeserializeOwned>(
        &self,
        route: &str,
        page: u32,
        per_page: u8,
    ) -> Result<(Page<T>, Option<QuotaStatus>)> {
        debug!("GET {} page {}", route, page);
        let response = self
            .client
            ._get(format!("{}?per_page={}&page={}", route, per_page, page))
            .await
            .with_context(|| format!("Failed to fetch {} page {}", route, page))?;
        let response = octocrab::map_github_error(response)
            .await
            .with_context(|| format!("Failed to fetch {} page {}", route, page))?;

        let headers = response.headers();
        let quota = quota_from_headers(|name| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        });

        let listing = Page::<T>::from_response(response)
            .await
            .with_context(|| format!("Failed to decode {} page {}", route, page))?;
        Ok((listing, quota))
    }
}

#[async_trait]
impl CatalogApi for GitHubCatalog {
    async fn quota(&self) -> Result<QuotaStatus> {
        let limits = self
            .client
            .ratelimit()
            .get()
            .await
            .context("Failed to query GitHub rate limit")?;
        let core = limits.resources.core;

        Ok(QuotaStatus {
            remaining: core.remaining as u64,
            limit: core.limit as u64,
            reset_at: reset_time(core.reset),
        })
    }

    async fn list_owned(
        &self,
        user: &str,
        page: u32,
        per_page: u8,
    ) -> Result<CatalogPage<RemoteRepo>> {
        let route = self.route(user, "/user/repos", "repos");
        let (listing, quota) = self.fetch_page::<Repository>(&route, page, per_page).await?;
        Ok(into_catalog_page(listing, page, quota, remote_repo))
    }

    async fn list_starred(
        &self,
        user: &str,
        page: u32,
        per_page: u8,
    ) -> Result<CatalogPage<RemoteRepo>> {
        let route = self.route(user, "/user/starred", "starred");
        let (listing, quota) = self.fetch_page::<Repository>(&route, page, per_page).await?;
        Ok(into_catalog_page(listing, page, quota, remote_repo))
    }

    async fn list_gists(
        &self,
        user: &str,
        page: u32,
        per_page: u8,
    ) -> Result<CatalogPage<RemoteGist>> {
        let route = self.route(user, "/gists", "gists");
        let (listing, quota) = self.fetch_page::<Gist>(&route, page, per_page).await?;
        Ok(into_catalog_page(listing, page, quota, remote_gist))
    }
}

fn into_catalog_page<T, U>(
    listing: Page<T>,
    page: u32,
    quota: Option<QuotaStatus>,
    convert: fn(T) -> U,
) -> CatalogPage<U> {
    let next_page = listing.next.as_ref().map(|_| page + 1);
    CatalogPage {
        items: listing.items.into_iter().map(convert).collect(),
        next_page,
        quota,
    }
}

/// Read the `x-ratelimit-*` headers GitHub attaches to every API response
pub fn quota_from_headers(header: impl Fn(&str) -> Option<String>) -> Option<QuotaStatus> {
    let number = |name: &str| header(name).and_then(|value| value.trim().parse::<u64>().ok());

    Some(QuotaStatus {
        remaining: number("x-ratelimit-remaining")?,
        limit: number("x-ratelimit-limit")?,
        reset_at: reset_time(number("x-ratelimit-reset")?),
    })
}

pub fn remote_repo(repo: Repository) -> RemoteRepo {
    RemoteRepo {
        id: repo.id.into_inner(),
        clone_url: repo.clone_url.map(|url| url.to_string()),
        is_private: repo.private.unwrap_or(false),
        is_fork: repo.fork.unwrap_or(false),
        has_wiki: repo.has_wiki.unwrap_or(false),
    }
}

pub fn remote_gist(gist: Gist) -> RemoteGist {
    RemoteGist {
        id: gist.id,
        pull_url: Some(gist.git_pull_url.to_string()),
        is_public: gist.public,
    }
}

/// Accept "ghe.example.com/api/v3" as well as full URLs
pub fn normalize_api_url(api_url: &str) -> String {
    let trimmed = api_url.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

fn reset_time(epoch_seconds: u64) -> DateTime<Utc> {
    i64::try_from(epoch_seconds)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}

fn check_token_shape(token: &str) {
    const PREFIXES: [&str; 4] = ["ghp_", "gho_", "ghs_", "github_pat_"];
    if !PREFIXES.iter().any(|prefix| token.starts_with(prefix)) {
        warn!("GitHub token doesn't look like a GitHub token (expected ghp_, gho_, ghs_ or github_pat_)");
    }
}

/// Check if a command is available in PATH
pub fn is_command_available(command: &str) -> bool {
    Command::new("which")
        .arg(command)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_normalize_api_url() {
        assert_eq!(
            normalize_api_url("ghe.example.com/api/v3/"),
            "https://ghe.example.com/api/v3"
        );
        assert_eq!(
            normalize_api_url("http://localhost:8080"),
            "http://localhost:8080"
        );
    }

    #[test]
    fn test_reset_time_from_epoch() {
        let reset = reset_time(1_700_000_000);
        assert_eq!(reset.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_quota_from_headers() {
        let headers: HashMap<&str, &str> = HashMap::from([
            ("x-ratelimit-remaining", "4999"),
            ("x-ratelimit-limit", "5000"),
            ("x-ratelimit-reset", "1700000000"),
        ]);

        let quota = quota_from_headers(|name| headers.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(quota.remaining, 4999);
        assert_eq!(quota.limit, 5000);
        assert_eq!(quota.reset_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_quota_from_headers_incomplete() {
        let headers: HashMap<&str, &str> = HashMap::from([
            ("x-ratelimit-remaining", "12"),
            ("x-ratelimit-reset", "soon"),
        ]);

        assert!(quota_from_headers(|name| headers.get(name).map(|v| v.to_string())).is_none());
        assert!(quota_from_headers(|_| None).is_none());
    }

    #[test]
    fn test_token_auth_requires_token() {
        let mut config = Config::default();
        config.github.auth_method = "token".to_string();
        config.github.token = None;

        assert!(GitHubCatalog::detect_authentication(&config).is_err());

        config.github.token = Some("ghp_example".to_string());
        let (strategy, token) = GitHubCatalog::detect_authentication(&config).unwrap();
        assert_eq!(strategy, AuthStrategy::ConfiguredToken);
        assert_eq!(token.as_deref(), Some("ghp_example"));
    }

    #[test]
    fn test_auto_prefers_configured_token() {
        let mut config = Config::default();
        config.github.token = Some("ghp_configured".to_string());

        let (strategy, token) = GitHubCatalog::detect_authentication(&config).unwrap();
        assert_eq!(strategy, AuthStrategy::ConfiguredToken);
        assert_eq!(token.as_deref(), Some("ghp_configured"));
    }

    #[test]
    fn test_unknown_auth_method() {
        let mut config = Config::default();
        config.github.auth_method = "oauth".to_string();

        let err = GitHubCatalog::detect_authentication(&config).unwrap_err();
        assert!(err.to_string().contains("Unknown auth method"));
    }

    #[test]
    fn test_convert_repository_json() {
        let repo: Repository = serde_json::from_value(serde_json::json!({
            "id": 42,
            "name": "b",
            "url": "https://api.github.com/repos/a/b",
            "clone_url": "https://github.com/a/b.git",
            "private": true,
            "fork": false,
            "has_wiki": true
        }))
        .expect("minimal repository JSON");

        let remote = remote_repo(repo);
        assert_eq!(remote.id, 42);
        assert_eq!(remote.clone_url.as_deref(), Some("https://github.com/a/b.git"));
        assert!(remote.is_private);
        assert!(!remote.is_fork);
        assert!(remote.has_wiki);
    }
}
