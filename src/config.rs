//! Configuration management
//!
//! This module handles loading and validating configuration from TOML files.
//! The file is read once at startup; edits need a restart to take effect.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hard ceiling for any single navigation or login wait
const MAX_NAVIGATION_TIMEOUT: u64 = 60;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Gatekeeper settings; `None` when the file has no `[security]` table
    pub security: Option<SecurityConfig>,

    /// Headless browser settings for the SG200 path
    #[serde(default)]
    pub browser: BrowserConfig,

    /// HTTP client settings for the Netgear path
    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub sg200: Sg200Config,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServerConfig {
    /// Listen address, e.g. `0.0.0.0:8080`
    pub bind: Option<String>,
}

/// Allowlist and shared token checked before any extraction runs
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SecurityConfig {
    /// Exact client IPs; either a TOML array or a comma separated string
    #[serde(default)]
    pub allowed_ips: IpList,

    /// Cleartext shared token
    #[serde(default)]
    pub token: String,

    /// Lower-case hex SHA-256 of the shared token; preferred over `token`
    #[serde(default)]
    pub token_sha256: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum IpList {
    List(Vec<String>),
    Csv(String),
}

impl Default for IpList {
    fn default() -> Self {
        IpList::List(Vec::new())
    }
}

impl IpList {
    pub fn to_vec(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            IpList::List(items) => items.iter().map(String::as_str).collect(),
            IpList::Csv(s) => s.split(',').collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrowserConfig {
    /// Chrome/Chromium executable; empty means auto-detect
    #[serde(default)]
    pub chrome_path: String,

    #[serde(default = "default_true")]
    pub headless: bool,

    /// Pass `--no-sandbox` (needed when running as root in containers)
    #[serde(default)]
    pub no_sandbox: bool,

    /// Navigation timeout in seconds
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout: u64,

    /// How long to let the frameset settle after submitting the login form
    #[serde(default = "default_login_settle_ms")]
    pub login_settle_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_path: String::new(),
            headless: true,
            no_sandbox: false,
            navigation_timeout: default_navigation_timeout(),
            login_settle_ms: default_login_settle_ms(),
        }
    }
}

impl BrowserConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout.clamp(1, MAX_NAVIGATION_TIMEOUT))
    }

    pub fn login_settle(&self) -> Duration {
        Duration::from_millis(self.login_settle_ms.min(MAX_NAVIGATION_TIMEOUT * 1000))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Sg200Config {
    /// Concurrent browser sessions allowed against one switch
    #[serde(default = "default_sessions_per_host")]
    pub sessions_per_host: usize,

    #[serde(default)]
    pub port_labels: PortLabelConfig,
}

impl Default for Sg200Config {
    fn default() -> Self {
        Self {
            sessions_per_host: default_sessions_per_host(),
            port_labels: PortLabelConfig::default(),
        }
    }
}

/// Numbering convention used when the switch's port database is unavailable
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct PortLabelConfig {
    #[serde(default = "default_port_prefix")]
    pub prefix: String,

    /// Raw index of the first front-panel port
    #[serde(default = "default_first_ifindex")]
    pub first_ifindex: u32,

    #[serde(default = "default_port_count")]
    pub port_count: u32,
}

impl Default for PortLabelConfig {
    fn default() -> Self {
        Self {
            prefix: default_port_prefix(),
            first_ifindex: default_first_ifindex(),
            port_count: default_port_count(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_navigation_timeout() -> u64 {
    15
}

fn default_login_settle_ms() -> u64 {
    4000
}

fn default_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_sessions_per_host() -> usize {
    1
}

fn default_port_prefix() -> String {
    "GE".to_string()
}

fn default_first_ifindex() -> u32 {
    1
}

fn default_port_count() -> u32 {
    52
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Config {
    /// Load configuration from `explicit` or the first standard location found
    ///
    /// An explicit path that does not exist is an error; missing standard
    /// locations fall back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let config_paths = vec![
            PathBuf::from("collector.toml"),
            PathBuf::from("/etc/sg200/collector.toml"),
            dirs::home_dir()
                .map(|h| h.join(".config/sg200-collector/collector.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if path.is_file() {
                return Self::from_file(path);
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        tracing::debug!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Security settings, falling back to the environment when the file has none
    pub fn security_or_env(&self) -> SecurityConfig {
        self.security_with_env(|key| std::env::var(key).ok())
    }

    fn security_with_env(&self, env: impl Fn(&str) -> Option<String>) -> SecurityConfig {
        self.security.clone().unwrap_or_else(|| SecurityConfig {
            allowed_ips: IpList::Csv(env("SG200_COLLECTOR_ALLOWED_IPS").unwrap_or_default()),
            token: env("SG200_COLLECTOR_TOKEN").unwrap_or_default(),
            token_sha256: String::new(),
        })
    }

    /// Listen address: CLI flag, then file, then environment, then default
    pub fn bind_address(&self, cli: Option<&str>) -> String {
        self.bind_address_with_env(cli, |key| std::env::var(key).ok())
    }

    fn bind_address_with_env(
        &self,
        cli: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> String {
        if let Some(bind) = cli.or(self.server.bind.as_deref()) {
            return bind.to_string();
        }

        match (env("SG200_COLLECTOR_HOST"), env("SG200_COLLECTOR_PORT")) {
            (None, None) => default_bind(),
            (host, port) => format!(
                "{}:{}",
                host.unwrap_or_else(|| "0.0.0.0".to_string()),
                port.unwrap_or_else(|| "8080".to_string())
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_file() {
        let cfg = Config::from_toml("").unwrap();
        assert!(cfg.security.is_none());
        assert_eq!(cfg.browser.navigation_timeout(), Duration::from_secs(15));
        assert_eq!(cfg.sg200.sessions_per_host, 1);
        assert_eq!(cfg.sg200.port_labels.prefix, "GE");
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_allowed_ips_list_or_csv() {
        let cfg = Config::from_toml(
            r#"
            [security]
            allowed_ips = ["10.10.10.21", " 10.10.10.22 ", ""]
            "#,
        )
        .unwrap();
        assert_eq!(
            cfg.security.unwrap().allowed_ips.to_vec(),
            vec!["10.10.10.21", "10.10.10.22"]
        );

        let cfg = Config::from_toml(
            r#"
            [security]
            allowed_ips = "10.10.10.21,10.10.10.22,"
            token_sha256 = "abc"
            "#,
        )
        .unwrap();
        let sec = cfg.security.unwrap();
        assert_eq!(sec.allowed_ips.to_vec(), vec!["10.10.10.21", "10.10.10.22"]);
        assert_eq!(sec.token_sha256, "abc");
    }

    #[test]
    fn test_navigation_timeout_is_capped() {
        let cfg = Config::from_toml("[browser]\nnavigation_timeout = 600\n").unwrap();
        assert_eq!(cfg.browser.navigation_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nbind = \"127.0.0.1:9000\"").unwrap();

        let cfg = Config::load(Some(file.path())).unwrap();
        assert_eq!(cfg.bind_address(None), "127.0.0.1:9000");
        assert_eq!(cfg.bind_address(Some("0.0.0.0:1")), "0.0.0.0:1");
    }

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_security_from_env_without_section() {
        let env = env_of(&[
            ("SG200_COLLECTOR_ALLOWED_IPS", "10.10.10.21, 10.10.10.22"),
            ("SG200_COLLECTOR_TOKEN", "s3cret"),
        ]);

        let sec = Config::default().security_with_env(&env);
        assert_eq!(sec.allowed_ips.to_vec(), vec!["10.10.10.21", "10.10.10.22"]);
        assert_eq!(sec.token, "s3cret");

        // A [security] section, even an empty one, shuts the environment out
        let cfg = Config::from_toml("[security]\n").unwrap();
        let sec = cfg.security_with_env(&env);
        assert!(sec.allowed_ips.to_vec().is_empty());
        assert!(sec.token.is_empty());

        let sec = Config::default().security_with_env(env_of(&[]));
        assert!(sec.allowed_ips.to_vec().is_empty());
        assert!(sec.token.is_empty());
    }

    #[test]
    fn test_bind_address_env_fallback() {
        let cfg = Config::default();
        assert_eq!(cfg.bind_address_with_env(None, env_of(&[])), "0.0.0.0:8080");
        assert_eq!(
            cfg.bind_address_with_env(None, env_of(&[("SG200_COLLECTOR_PORT", "9090")])),
            "0.0.0.0:9090"
        );
        assert_eq!(
            cfg.bind_address_with_env(
                None,
                env_of(&[
                    ("SG200_COLLECTOR_HOST", "127.0.0.1"),
                    ("SG200_COLLECTOR_PORT", "9090"),
                ])
            ),
            "127.0.0.1:9090"
        );

        let env = env_of(&[("SG200_COLLECTOR_HOST", "127.0.0.1")]);
        let cfg = Config::from_toml("[server]\nbind = \"10.0.0.5:80\"\n").unwrap();
        assert_eq!(cfg.bind_address_with_env(None, &env), "10.0.0.5:80");
        assert_eq!(cfg.bind_address_with_env(Some("0.0.0.0:1"), &env), "0.0.0.0:1");
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("nope.toml"))).is_err());
    }
}
