use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for the mirror agent
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Storage root; mirrors live under `<data_directory>/data`
    #[serde(default = "default_data_directory")]
    pub data_directory: String,

    /// GitHub account and catalog settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Walk schedule
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// API quota handling
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Mirror sync tuning
    #[serde(default)]
    pub mirror: MirrorConfig,

    /// Optional diagnostics endpoint
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// Account whose catalog is mirrored (authenticated user if null)
    pub user: Option<String>,

    /// Authentication method
    #[serde(default = "default_auth_method")]
    pub auth_method: String, // "auto", "gh_cli", "token"

    /// Access token; falls back to GITHUB_TOKEN / gh CLI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// API base URL for GitHub Enterprise
    pub api_url: Option<String>,

    /// Mirror the user's own repositories
    #[serde(default = "default_true")]
    pub include_owned: bool,

    /// Mirror repositories the user starred
    #[serde(default)]
    pub include_starred: bool,

    /// Mirror the user's public gists
    #[serde(default)]
    pub include_gists: bool,

    /// Skip forked repositories
    #[serde(default)]
    pub skip_forks: bool,

    /// Repository exclusion patterns
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Items requested per catalog page
    #[serde(default = "default_page_size")]
    pub page_size: u8,
}

/// Schedule configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScheduleConfig {
    /// Pause between two catalog walks
    #[serde(default = "default_interval")]
    pub interval: String, // "1h"
}

/// Rate limit configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitConfig {
    /// Wait for the reset when fewer calls than this remain
    #[serde(default = "default_min_remaining")]
    pub min_remaining: u64,

    /// Extra wait past the reported reset time
    #[serde(default = "default_reset_margin")]
    pub reset_margin: String, // "5m"
}

/// Mirror configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MirrorConfig {
    /// Syncs slower than this are logged
    #[serde(default = "default_slow_threshold")]
    pub slow_threshold: String, // "1m"

    /// Object cache budget per sync, in MiB
    #[serde(default = "default_object_cache_mib")]
    pub object_cache_mib: u64,
}

/// Diagnostics endpoint configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct DiagnosticsConfig {
    /// Bind address, e.g. "127.0.0.1:6060"; endpoint disabled if null
    pub listen_addr: Option<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"
}

// Default value functions
fn default_data_directory() -> String {
    "${HOME}/git-backup".to_string()
}
fn default_auth_method() -> String {
    "auto".to_string()
}
fn default_true() -> bool {
    true
}
fn default_page_size() -> u8 {
    100
}
fn default_interval() -> String {
    "1h".to_string()
}
fn default_min_remaining() -> u64 {
    10
}
fn default_reset_margin() -> String {
    "5m".to_string()
}
fn default_slow_threshold() -> String {
    "1m".to_string()
}
fn default_object_cache_mib() -> u64 {
    64
}
fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations
impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            user: None,
            auth_method: default_auth_method(),
            token: None,
            api_url: None,
            include_owned: default_true(),
            include_starred: false,
            include_gists: false,
            skip_forks: false,
            exclude_patterns: Vec::new(),
            page_size: default_page_size(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_remaining: default_min_remaining(),
            reset_margin: default_reset_margin(),
        }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            slow_threshold: default_slow_threshold(),
            object_cache_mib: default_object_cache_mib(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_directory: default_data_directory(),
            github: GitHubConfig::default(),
            schedule: ScheduleConfig::default(),
            rate_limit: RateLimitConfig::default(),
            mirror: MirrorConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Parse duration strings like "30m", "1h", "2d" or raw seconds
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let duration_str = duration_str.trim().to_lowercase();

    let seconds = if let Some(value) = duration_str.strip_suffix('s') {
        value.parse::<u64>().context("Invalid seconds value")?
    } else if let Some(value) = duration_str.strip_suffix('m') {
        value
            .parse::<u64>()
            .context("Invalid minutes value")?
            .checked_mul(60)
            .context("duration too large")?
    } else if let Some(value) = duration_str.strip_suffix('h') {
        value
            .parse::<u64>()
            .context("Invalid hours value")?
            .checked_mul(3600)
            .context("duration too large")?
    } else if let Some(value) = duration_str.strip_suffix('d') {
        value
            .parse::<u64>()
            .context("Invalid days value")?
            .checked_mul(86400)
            .context("duration too large")?
    } else {
        duration_str
            .parse::<u64>()
            .context("Invalid duration format. Use format like '30m', '1h', '2d'")?
    };

    Ok(Duration::from_secs(seconds))
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        let mut config = if config_path.exists() {
            Self::load(&config_path)?
        } else {
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            config
        };

        config.apply_env_overrides();
        config.expand_paths()?;
        Ok(config)
    }

    /// Load configuration from a specific file (environment overrides not applied)
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Load a specific file, then apply environment overrides and expand paths
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.expand_paths()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("repomirror").join("config.yml"))
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Flags follow the "non-empty means set" convention.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(user) = value("GITHUB_USER") {
            self.github.user = Some(user);
        }
        if let Some(token) = value("GITHUB_TOKEN") {
            self.github.token = Some(token);
        }
        if let Some(api_url) = value("GITHUB_API_ADDR") {
            self.github.api_url = Some(api_url);
        }
        if value("GITHUB_SKIP_MAIN").is_some() {
            self.github.include_owned = false;
        }
        if value("GITHUB_STARRED").is_some() {
            self.github.include_starred = true;
        }
        if value("GITHUB_GIST").is_some() {
            self.github.include_gists = true;
        }
        if value("GITHUB_SKIP_USER_FORKS").is_some() {
            self.github.skip_forks = true;
        }
        if let Some(data_dir) = value("DATA_DIR") {
            self.data_directory = data_dir;
        }
        if let Some(addr) = value("API_SERVER_ADDR") {
            self.diagnostics.listen_addr = Some(addr);
        }
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.data_directory = shellexpand::full(&self.data_directory)
            .context("Failed to expand data_directory path")?
            .into_owned();

        Ok(())
    }

    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_directory)
    }

    pub fn interval(&self) -> Result<Duration> {
        parse_duration(&self.schedule.interval).context("Failed to parse schedule interval")
    }

    pub fn reset_margin(&self) -> Result<Duration> {
        parse_duration(&self.rate_limit.reset_margin).context("Failed to parse reset margin")
    }

    pub fn slow_threshold(&self) -> Result<Duration> {
        parse_duration(&self.mirror.slow_threshold).context("Failed to parse slow threshold")
    }

    pub fn object_cache_bytes(&self) -> u64 {
        self.mirror.object_cache_mib.saturating_mul(1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;
    use std::env;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.data_directory, "${HOME}/git-backup");
        assert!(config.github.include_owned);
        assert!(!config.github.include_starred);
        assert!(!config.github.include_gists);
        assert!(!config.github.skip_forks);
        assert_eq!(config.github.page_size, 100);
        assert_eq!(config.rate_limit.min_remaining, 10);
        assert_eq!(config.interval().unwrap(), Duration::from_secs(3600));
        assert_eq!(config.reset_margin().unwrap(), Duration::from_secs(300));
        assert_eq!(config.slow_threshold().unwrap(), Duration::from_secs(60));
        assert_eq!(config.object_cache_bytes(), 64 * 1024 * 1024);
        assert!(config.diagnostics.listen_addr.is_none());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("1H").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("2d").unwrap(), Duration::from_secs(172800));
        assert_eq!(parse_duration(" 90 ").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("xm").is_err());
    }

    #[test]
    fn test_parse_duration_overflow() {
        let err = parse_duration("18446744073709551615m").unwrap_err();
        assert!(err.to_string().contains("duration too large"));
        assert!(parse_duration("213503982334602d").is_err());
        assert!(parse_duration("18446744073709551615s").is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides_from(lookup(&[
            ("GITHUB_USER", "octocat"),
            ("GITHUB_TOKEN", "ghp_abc"),
            ("GITHUB_SKIP_MAIN", "1"),
            ("GITHUB_STARRED", "yes"),
            ("GITHUB_GIST", "1"),
            ("GITHUB_SKIP_USER_FORKS", "1"),
            ("DATA_DIR", "/var/lib/mirror"),
            ("API_SERVER_ADDR", "127.0.0.1:6060"),
        ]));

        assert_eq!(config.github.user.as_deref(), Some("octocat"));
        assert_eq!(config.github.token.as_deref(), Some("ghp_abc"));
        assert!(!config.github.include_owned);
        assert!(config.github.include_starred);
        assert!(config.github.include_gists);
        assert!(config.github.skip_forks);
        assert_eq!(config.data_directory, "/var/lib/mirror");
        assert_eq!(
            config.diagnostics.listen_addr.as_deref(),
            Some("127.0.0.1:6060")
        );
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_overrides_from(lookup(&[("GITHUB_SKIP_MAIN", ""), ("DATA_DIR", "")]));

        assert!(config.github.include_owned);
        assert_eq!(config.data_directory, "${HOME}/git-backup");
    }

    #[test]
    #[serial]
    fn test_expand_paths() {
        env::set_var("TEST_REPOMIRROR_HOME", "/test/home");

        let mut config = Config::default();
        config.data_directory = "${TEST_REPOMIRROR_HOME}/backup".to_string();

        config.expand_paths().expect("Failed to expand paths");

        assert_eq!(config.data_directory, "/test/home/backup");

        env::remove_var("TEST_REPOMIRROR_HOME");
    }

    #[test]
    fn test_config_load_nonexistent_file() {
        let nonexistent_path = Path::new("/nonexistent/path/config.yml");
        let result = Config::load(nonexistent_path);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("config.yml");

        let mut config = Config::default();
        config.data_directory = "/custom/path".to_string();
        config.github.user = Some("testuser".to_string());
        config.github.include_gists = true;
        config.schedule.interval = "30m".to_string();

        config.save(&config_path).expect("Failed to save config");

        let loaded_config = Config::load(&config_path).expect("Failed to load config");

        assert_eq!(loaded_config.data_directory, "/custom/path");
        assert_eq!(loaded_config.github.user, Some("testuser".to_string()));
        assert!(loaded_config.github.include_gists);
        assert_eq!(loaded_config.interval().unwrap(), Duration::from_secs(1800));
    }

    #[test]
    fn test_token_is_not_written_back() {
        let mut config = Config::default();
        config.github.token = None;
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("token:"));
    }

    #[test]
    fn test_config_default_path_xdg() {
        let default_path = Config::default_config_path().expect("Failed to get default path");
        assert!(default_path.to_string_lossy().contains("repomirror"));
        assert!(default_path.to_string_lossy().ends_with("config.yml"));
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml_content = r#"
data_directory: "/srv/mirror"
github:
  user: "octocat"
  auth_method: "token"
  api_url: "https://ghe.example.com/api/v3"
  include_owned: false
  include_starred: true
  include_gists: true
  skip_forks: true
  exclude_patterns:
    - "archived-*"
  page_size: 50
schedule:
  interval: "2h"
rate_limit:
  min_remaining: 25
  reset_margin: "10m"
mirror:
  slow_threshold: "5m"
  object_cache_mib: 128
diagnostics:
  listen_addr: "0.0.0.0:6060"
logging:
  level: "debug"
"#;

        let config: Config = serde_yaml::from_str(yaml_content).expect("Failed to parse YAML");

        assert_eq!(config.data_directory, "/srv/mirror");
        assert_eq!(config.github.user.as_deref(), Some("octocat"));
        assert_eq!(config.github.auth_method, "token");
        assert!(!config.github.include_owned);
        assert!(config.github.include_starred);
        assert!(config.github.include_gists);
        assert!(config.github.skip_forks);
        assert_eq!(config.github.exclude_patterns, vec!["archived-*".to_string()]);
        assert_eq!(config.github.page_size, 50);
        assert_eq!(config.interval().unwrap(), Duration::from_secs(7200));
        assert_eq!(config.rate_limit.min_remaining, 25);
        assert_eq!(config.reset_margin().unwrap(), Duration::from_secs(600));
        assert_eq!(config.slow_threshold().unwrap(), Duration::from_secs(300));
        assert_eq!(config.object_cache_bytes(), 128 * 1024 * 1024);
        assert_eq!(config.diagnostics.listen_addr.as_deref(), Some("0.0.0.0:6060"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("{}").expect("Failed to parse YAML");
        assert_eq!(config.data_directory, "${HOME}/git-backup");
        assert!(config.github.include_owned);
        assert_eq!(config.schedule.interval, "1h");
    }
}
