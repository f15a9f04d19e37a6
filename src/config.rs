//! TOML configuration for podrunner.
//!
//! A layered configuration model: compiled-in defaults, an optional TOML file
//! (path from `PODRUNNER_CONFIG` or the standard system location), then a small
//! set of environment variable overrides for container-image and host settings.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::hosts::Host;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the podrunner process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodrunnerConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PodrunnerConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), hosts = config.hosts.len(), "loaded podrunner configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path specified by the `PODRUNNER_CONFIG` environment variable.
    /// 2. `/etc/podrunner/podrunner.toml`.
    /// 3. Fall back to compiled-in defaults.
    ///
    /// Environment overrides are applied on top of whichever source won.
    pub fn load_or_default() -> Self {
        let mut config = Self::load_from_standard_locations();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    fn load_from_standard_locations() -> Self {
        if let Ok(env_path) = std::env::var("PODRUNNER_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "PODRUNNER_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new("/etc/podrunner/podrunner.toml");
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Apply environment overrides. `lookup` is injected so tests do not have
    /// to mutate the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PODRUNNER_APP_ENV") {
            self.runner.app_env = v;
        }
        if let Some(v) = lookup("PODRUNNER_CHROME_IMAGE") {
            self.runner.chrome_image = v;
        }
        if let Some(v) = lookup("PODRUNNER_DEFAULT_IMAGE") {
            self.runner.default_image = v;
        }
        if let Some(v) = lookup("PODRUNNER_NGINX_PORT") {
            match v.trim().parse() {
                Ok(port) => self.runner.nginx_port = port,
                Err(_) => warn!(value = %v, "PODRUNNER_NGINX_PORT is not a valid port, keeping configured port"),
            }
        }
        if let Some(v) = lookup("PODRUNNER_DB_PATH") {
            self.database.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("PODRUNNER_HOSTS") {
            let hosts = parse_host_list(&v);
            if hosts.is_empty() {
                warn!(value = %v, "PODRUNNER_HOSTS contained no usable entries, keeping configured hosts");
            } else {
                self.hosts = hosts;
            }
        }
        if let Some(v) = lookup("VAULT_URL") {
            self.vault.url = v;
        }
        if let Some(v) = lookup("VAULT_TOKEN") {
            self.vault.token = Some(v);
        }
    }

    /// Reject configurations the dispatcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            anyhow::bail!("no container hosts configured");
        }
        if self.dispatch.workers == 0 {
            anyhow::bail!("dispatch.workers must be at least 1");
        }
        for host in &self.hosts {
            if !(host.url.starts_with("http://") || host.url.starts_with("https://")) {
                anyhow::bail!("host url '{}' must start with http:// or https://", host.url);
            }
        }
        Ok(())
    }
}

/// Parse `url[=envA|envB],url2,...` into host entries.
fn parse_host_list(raw: &str) -> Vec<Host> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((url, envs)) => Host {
                url: url.trim().to_string(),
                environments: envs
                    .split('|')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(str::to_string)
                    .collect(),
            },
            None => Host {
                url: entry.to_string(),
                environments: Vec::new(),
            },
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/podrunner.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address and port for the HTTP API listener.
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Worker pool and polling settings for the dispatch orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum number of executions dispatched concurrently.
    pub workers: usize,
    /// Seconds between polls for eligible executions.
    pub poll_interval_sec: u64,
    /// Force-delete a container that was created but failed to start.
    pub cleanup_on_start_failure: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            poll_interval_sec: 30,
            cleanup_on_start_failure: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Container runtime REST API
// ---------------------------------------------------------------------------

/// Per-call timeouts and API path settings for container hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Versioned libpod path segment, e.g. `v4.8.0`.
    pub api_version: String,
    pub ping_timeout_sec: u64,
    pub list_timeout_sec: u64,
    pub create_timeout_sec: u64,
    pub start_timeout_sec: u64,
    pub stop_timeout_sec: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api_version: "v4.8.0".to_string(),
            ping_timeout_sec: 5,
            list_timeout_sec: 10,
            create_timeout_sec: 15,
            start_timeout_sec: 10,
            stop_timeout_sec: 15,
        }
    }
}

// ---------------------------------------------------------------------------
// Test runner container
// ---------------------------------------------------------------------------

/// What gets launched inside each execution container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Target environment label of this deployment (e.g. `DEV`).
    pub app_env: String,
    /// Image used when the execution's browser is Chrome.
    pub chrome_image: String,
    /// Image used for every other browser.
    pub default_image: String,
    /// Interpreter that runs the entrypoint.
    pub interpreter: String,
    /// Entrypoint script inside the image. `{app_env}` is substituted.
    pub entrypoint: String,
    /// `host:container` bind mounts.
    pub bind_mounts: Vec<String>,
    pub network_mode: String,
    /// Port the runner's embedded web server listens on.
    pub nginx_port: u16,
    /// Extra `KEY=VALUE` environment entries for the container.
    pub env: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            app_env: "DEV".to_string(),
            chrome_image: "localhost/lumoslite_lean:latest".to_string(),
            default_image: "localhost/lumoslite_edge:latest".to_string(),
            interpreter: "python".to_string(),
            entrypoint: "/appfs/{app_env}/Lumos/Lumos_main.py".to_string(),
            bind_mounts: vec!["/appfs:/appfs".to_string()],
            network_mode: "host".to_string(),
            nginx_port: 8080,
            env: Vec::new(),
        }
    }
}

impl RunnerConfig {
    /// Entrypoint path with `{app_env}` resolved.
    pub fn resolved_entrypoint(&self) -> String {
        self.entrypoint.replace("{app_env}", &self.app_env)
    }

    /// Container environment: `FLASK_ENV` and `NGINX_PORT` first, then the
    /// configured extras.
    pub fn container_env(&self) -> Vec<String> {
        let mut env = vec![
            format!("FLASK_ENV={}", self.app_env),
            format!("NGINX_PORT={}", self.nginx_port),
        ];
        env.extend(self.env.iter().cloned());
        env
    }
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Full URL of the KV secret document.
    pub url: String,
    /// Vault token; secret lookups return nothing when unset.
    pub token: Option<String>,
    pub timeout_sec: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8200/v1/secret/data/podrunner".to_string(),
            token: None,
            timeout_sec: 15,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON log lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = PodrunnerConfig::default();

        assert_eq!(cfg.database.path, PathBuf::from("data/podrunner.db"));
        assert_eq!(cfg.api.bind, "0.0.0.0:8080");
        assert_eq!(cfg.dispatch.workers, 5);
        assert_eq!(cfg.dispatch.poll_interval_sec, 30);
        assert!(!cfg.dispatch.cleanup_on_start_failure);
        assert_eq!(cfg.runtime.api_version, "v4.8.0");
        assert_eq!(cfg.runtime.ping_timeout_sec, 5);
        assert_eq!(cfg.runtime.create_timeout_sec, 15);
        assert_eq!(cfg.runner.app_env, "DEV");
        assert_eq!(cfg.runner.bind_mounts, vec!["/appfs:/appfs".to_string()]);
        assert_eq!(cfg.runner.network_mode, "host");
        assert!(cfg.hosts.is_empty());
        assert!(cfg.vault.token.is_none());
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[database]
path = "/var/lib/podrunner/podrunner.db"

[dispatch]
workers = 2
poll_interval_sec = 10
cleanup_on_start_failure = true

[runner]
app_env = "SIT"
chrome_image = "registry/lean:1"
default_image = "registry/edge:1"

[[hosts]]
url = "http://10.0.0.1:61191"
environments = ["Mars", "Pluto"]

[[hosts]]
url = "http://10.0.0.2:61191"
environments = ["Nexon"]

[vault]
url = "https://vault.internal/v1/kv/data/app"
token = "s.abc"
"#;

        let cfg: PodrunnerConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.database.path, PathBuf::from("/var/lib/podrunner/podrunner.db"));
        assert_eq!(cfg.dispatch.workers, 2);
        assert_eq!(cfg.dispatch.poll_interval_sec, 10);
        assert!(cfg.dispatch.cleanup_on_start_failure);
        assert_eq!(cfg.runner.app_env, "SIT");
        assert_eq!(cfg.runner.chrome_image, "registry/lean:1");
        assert_eq!(cfg.hosts.len(), 2);
        assert_eq!(cfg.hosts[0].environments, vec!["Mars", "Pluto"]);
        assert_eq!(cfg.vault.token.as_deref(), Some("s.abc"));
        // Untouched sections keep defaults.
        assert_eq!(cfg.runtime.api_version, "v4.8.0");
        assert_eq!(cfg.runner.network_mode, "host");
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: PodrunnerConfig = toml::from_str("").unwrap();
        let defaults = PodrunnerConfig::default();

        assert_eq!(cfg.dispatch.workers, defaults.dispatch.workers);
        assert_eq!(cfg.runner.default_image, defaults.runner.default_image);
        assert_eq!(cfg.runtime.stop_timeout_sec, defaults.runtime.stop_timeout_sec);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("podrunner.toml");
        std::fs::write(
            &path,
            r#"
[api]
bind = "127.0.0.1:9999"
"#,
        )
        .unwrap();

        let cfg = PodrunnerConfig::load(&path).unwrap();
        assert_eq!(cfg.api.bind, "127.0.0.1:9999");
    }

    #[test]
    fn test_load_missing_file_errors() {
        let result = PodrunnerConfig::load(Path::new("/nonexistent/path/podrunner.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PODRUNNER_APP_ENV", "PROD"),
            ("PODRUNNER_CHROME_IMAGE", "img/chrome"),
            ("PODRUNNER_NGINX_PORT", "9090"),
            ("PODRUNNER_HOSTS", "http://a:1=Mars|Pluto, http://b:2"),
            ("VAULT_TOKEN", "tok"),
        ]
        .into_iter()
        .collect();

        let mut cfg = PodrunnerConfig::default();
        cfg.apply_env_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.runner.app_env, "PROD");
        assert_eq!(cfg.runner.chrome_image, "img/chrome");
        assert_eq!(cfg.runner.nginx_port, 9090);
        assert_eq!(cfg.hosts.len(), 2);
        assert_eq!(cfg.hosts[0].url, "http://a:1");
        assert_eq!(cfg.hosts[0].environments, vec!["Mars", "Pluto"]);
        assert_eq!(cfg.hosts[1].url, "http://b:2");
        assert!(cfg.hosts[1].environments.is_empty());
        assert_eq!(cfg.vault.token.as_deref(), Some("tok"));
        // Not overridden.
        assert_eq!(cfg.runner.default_image, PodrunnerConfig::default().runner.default_image);
    }

    #[test]
    fn test_empty_host_override_keeps_configured_hosts() {
        let mut cfg = PodrunnerConfig::default();
        cfg.hosts.push(Host::new("http://keep:1", &[]));
        cfg.apply_env_overrides(|k| (k == "PODRUNNER_HOSTS").then(|| " , ".to_string()));
        assert_eq!(cfg.hosts.len(), 1);
        assert_eq!(cfg.hosts[0].url, "http://keep:1");
    }

    #[test]
    fn test_validate() {
        let mut cfg = PodrunnerConfig::default();
        assert!(cfg.validate().is_err(), "no hosts should be rejected");

        cfg.hosts.push(Host::new("10.0.0.1:61191", &[]));
        assert!(cfg.validate().is_err(), "scheme-less url should be rejected");

        cfg.hosts[0].url = "http://10.0.0.1:61191".to_string();
        assert!(cfg.validate().is_ok());

        cfg.dispatch.workers = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_resolved_entrypoint() {
        let runner = RunnerConfig {
            app_env: "UAT".to_string(),
            ..RunnerConfig::default()
        };
        assert_eq!(runner.resolved_entrypoint(), "/appfs/UAT/Lumos/Lumos_main.py");
    }

    #[test]
    fn test_invalid_port_override_keeps_configured_port() {
        let mut cfg = PodrunnerConfig::default();
        cfg.apply_env_overrides(|k| (k == "PODRUNNER_NGINX_PORT").then(|| "eighty".to_string()));
        assert_eq!(cfg.runner.nginx_port, 8080);
    }

    #[test]
    fn test_container_env_leads_with_app_env_and_port() {
        let runner = RunnerConfig {
            app_env: "SIT".to_string(),
            env: vec!["TZ=UTC".to_string()],
            ..RunnerConfig::default()
        };
        assert_eq!(runner.container_env(), vec!["FLASK_ENV=SIT", "NGINX_PORT=8080", "TZ=UTC"]);
    }
}
