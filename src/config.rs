use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "stability.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

/// A credential that never prints its value.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value. Only call this where the value leaves the process.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("***")
    }
}

/// Sandbox platform API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Control-plane base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Domain under which sandbox agents are reachable
    /// (`https://<port>-<sandbox id>.<domain>`)
    #[serde(default = "default_domain")]
    pub domain: String,

    /// API key (usually supplied through `E2B_API_KEY`)
    #[serde(default)]
    pub api_key: Secret,

    /// Sandbox template to create from
    #[serde(default = "default_template")]
    pub template: String,

    /// Platform-side sandbox lifetime in seconds, refreshed on connect
    #[serde(default = "default_sandbox_timeout")]
    pub sandbox_timeout_secs: u64,

    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            domain: default_domain(),
            api_key: Secret::default(),
            template: default_template(),
            sandbox_timeout_secs: default_sandbox_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// S3-compatible storage mounted inside each sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Gateway endpoint URL
    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub bucket: String,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default)]
    pub access_key: Secret,

    #[serde(default)]
    pub secret_key: Secret,

    /// Mount point inside the sandbox
    #[serde(default = "default_mount_path")]
    pub mount_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            bucket: String::new(),
            region: default_region(),
            access_key: Secret::default(),
            secret_key: Secret::default(),
            mount_path: default_mount_path(),
        }
    }
}

/// Delays, retry bounds and deadlines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Fixed wait around pause and reconnect, in milliseconds
    #[serde(default = "default_round_delay")]
    pub round_delay_ms: u64,

    /// Maximum kill calls issued by cleanup
    #[serde(default = "default_kill_attempts")]
    pub kill_max_attempts: u32,

    /// Wait between failed kill calls, in milliseconds
    #[serde(default = "default_kill_interval")]
    pub kill_interval_ms: u64,

    /// Wall-clock budget for one sandbox sequence, in seconds
    #[serde(default = "default_sequence_timeout")]
    pub sequence_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            round_delay_ms: default_round_delay(),
            kill_max_attempts: default_kill_attempts(),
            kill_interval_ms: default_kill_interval(),
            sequence_timeout_secs: default_sequence_timeout(),
        }
    }
}

impl TimingConfig {
    pub fn round_delay(&self) -> Duration {
        Duration::from_millis(self.round_delay_ms)
    }

    pub fn kill_interval(&self) -> Duration {
        Duration::from_millis(self.kill_interval_ms)
    }

    pub fn sequence_timeout(&self) -> Duration {
        Duration::from_secs(self.sequence_timeout_secs)
    }
}

// Default value functions
fn default_api_url() -> String {
    "https://api.e2b.dev".to_string()
}

fn default_domain() -> String {
    "e2b.dev".to_string()
}

fn default_template() -> String {
    "code-interpreter-v1".to_string()
}

fn default_sandbox_timeout() -> u64 {
    600
}

fn default_request_timeout() -> u64 {
    60
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_mount_path() -> String {
    "/home/user/bucket".to_string()
}

fn default_round_delay() -> u64 {
    1000
}

fn default_kill_attempts() -> u32 {
    20
}

fn default_kill_interval() -> u64 {
    500
}

fn default_sequence_timeout() -> u64 {
    600
}

impl Config {
    /// Load configuration from an explicit path, `./stability.toml`, or the
    /// user config directory, using defaults if none exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                path.to_path_buf()
            }
            None => match default_config_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }

    /// Apply environment overrides. Non-empty values win over the file.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("E2B_API_KEY") {
            self.platform.api_key = Secret::new(v);
        }
        if let Some(v) = get("E2B_DOMAIN") {
            self.platform.domain = v;
        }
        if let Some(v) = get("S3_ENDPOINT") {
            self.storage.endpoint = v;
        }
        if let Some(v) = get("S3_BUCKET") {
            self.storage.bucket = v;
        }
        if let Some(v) = get("S3_REGION") {
            self.storage.region = v;
        }
        if let Some(v) = get("S3_ACCESS_KEY") {
            self.storage.access_key = Secret::new(v);
        }
        if let Some(v) = get("S3_SECRET_KEY") {
            self.storage.secret_key = Secret::new(v);
        }
        if let Some(v) = get("S3_MOUNT_PATH") {
            self.storage.mount_path = v;
        }
    }

    /// Check that the platform API can be reached.
    pub fn validate_platform(&self) -> Result<()> {
        if self.platform.api_key.is_empty() {
            bail!("Missing required configuration: platform.api_key (E2B_API_KEY)");
        }
        Ok(())
    }

    /// Check that everything a stability run needs is present.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.platform.api_key.is_empty() {
            missing.push("platform.api_key (E2B_API_KEY)");
        }
        if self.storage.endpoint.is_empty() {
            missing.push("storage.endpoint (S3_ENDPOINT)");
        }
        if self.storage.bucket.is_empty() {
            missing.push("storage.bucket (S3_BUCKET)");
        }
        if self.storage.access_key.is_empty() {
            missing.push("storage.access_key (S3_ACCESS_KEY)");
        }
        if self.storage.secret_key.is_empty() {
            missing.push("storage.secret_key (S3_SECRET_KEY)");
        }
        if !missing.is_empty() {
            bail!("Missing required configuration: {}", missing.join(", "));
        }

        if !self.storage.mount_path.starts_with('/') {
            bail!(
                "storage.mount_path must be absolute, got '{}'",
                self.storage.mount_path
            );
        }
        if self.timing.kill_max_attempts == 0 {
            bail!("timing.kill_max_attempts must be at least 1");
        }
        if self.timing.sequence_timeout_secs == 0 {
            bail!("timing.sequence_timeout_secs must be at least 1");
        }
        Ok(())
    }

    /// Configuration as TOML with credentials redacted.
    pub fn redacted_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        for secret in [
            &mut shown.platform.api_key,
            &mut shown.storage.access_key,
            &mut shown.storage.secret_key,
        ] {
            if !secret.is_empty() {
                *secret = Secret::new("***");
            }
        }
        toml::to_string_pretty(&shown).context("Failed to serialize config")
    }
}

fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }
    let user = dirs::config_dir()?.join("sandbox-stability").join(CONFIG_FILE);
    user.exists().then_some(user)
}
