// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Coordinator Configuration Types
//
// Defines the configuration schema for a saga coordinator node:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Node identity and static cluster role
// - Journal backend selection
// - Compensation retry policy and timeout scanning
// - Registry retention and observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::cluster::NodeRole;
use crate::domain::compensation::CompensationPolicy;

pub const API_VERSION: &str = "saga-coordinator/v1";
pub const KIND: &str = "CoordinatorConfig";

/// Top-level Kubernetes-style coordinator configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfigManifest {
    /// API version (must be "saga-coordinator/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "CoordinatorConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: CoordinatorConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable coordinator name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Coordinator configuration specification (content under spec:)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorConfigSpec {
    #[serde(default)]
    pub node: NodeIdentity,

    #[serde(default)]
    pub journal: JournalConfig,

    #[serde(default)]
    pub compensation: CompensationConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Unique stable node identifier
    pub id: String,

    /// Static role; deployments with external leader election override it at runtime
    #[serde(default)]
    pub role: NodeRole,
}

impl Default for NodeIdentity {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: NodeRole::Primary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default)]
    pub backend: JournalBackend,

    /// Journal file (file backend only)
    #[serde(default = "default_journal_path")]
    pub path: PathBuf,

    /// sync_data after every append
    #[serde(default = "default_true")]
    pub fsync: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            backend: JournalBackend::Memory,
            path: default_journal_path(),
            fsync: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Wait for TxCompensatedEvent before re-dispatching
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

impl Default for CompensationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            ack_timeout_ms: default_ack_timeout_ms(),
        }
    }
}

impl CompensationConfig {
    pub fn policy(&self) -> CompensationPolicy {
        CompensationPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.multiplier,
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// How often the timeout monitor looks for expired deadlines
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: default_scan_interval_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// How long a terminal transaction stays live before eviction
    #[serde(default = "default_retention_seconds")]
    pub retention_seconds: u64,

    #[serde(default = "default_eviction_interval_ms")]
    pub eviction_interval_ms: u64,

    /// Bounded per-transaction mailbox
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            retention_seconds: default_retention_seconds(),
            eviction_interval_ms: default_eviction_interval_ms(),
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

impl RegistryConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Expose Prometheus metrics
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_journal_path() -> PathBuf {
    PathBuf::from("saga-journal.jsonl")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_ack_timeout_ms() -> u64 {
    30_000
}

fn default_scan_interval_ms() -> u64 {
    500
}

fn default_retention_seconds() -> u64 {
    300
}

fn default_eviction_interval_ms() -> u64 {
    10_000
}

fn default_mailbox_capacity() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9464
}

impl Default for CoordinatorConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "saga-coordinator".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: CoordinatorConfigSpec::default(),
        }
    }
}

impl CoordinatorConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. SAGA_COORDINATOR_CONFIG environment variable
    /// 2. ./saga-coordinator.yaml (working directory)
    /// 3. ~/.saga-coordinator/config.yaml (user home)
    /// 4. /etc/saga-coordinator/config.yaml (system, Unix) or C:\ProgramData\SagaCoordinator\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("SAGA_COORDINATOR_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./saga-coordinator.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".saga-coordinator").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/saga-coordinator/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\SagaCoordinator\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path (fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("SAGA_COORDINATOR_NODE_ROLE") {
            match val.parse::<NodeRole>() {
                Ok(role) => {
                    tracing::info!("Environment override: SAGA_COORDINATOR_NODE_ROLE={}", role);
                    self.spec.node.role = role;
                }
                Err(e) => {
                    tracing::warn!(
                        "Invalid value for SAGA_COORDINATOR_NODE_ROLE: {}. Expected primary/secondary. Ignoring.",
                        e
                    );
                }
            }
        }

        if let Some(val) = lookup("SAGA_COORDINATOR_JOURNAL_PATH") {
            tracing::info!("Environment override: SAGA_COORDINATOR_JOURNAL_PATH={}", val);
            self.spec.journal.path = PathBuf::from(val);
            self.spec.journal.backend = JournalBackend::File;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.node.id.is_empty() {
            anyhow::bail!("spec.node.id cannot be empty");
        }

        if self.spec.journal.backend == JournalBackend::File
            && self.spec.journal.path.as_os_str().is_empty()
        {
            anyhow::bail!("spec.journal.path is required for the file backend");
        }

        let compensation = &self.spec.compensation;
        if compensation.max_attempts == 0 {
            anyhow::bail!("spec.compensation.max_attempts must be at least 1");
        }
        if compensation.multiplier < 1.0 || !compensation.multiplier.is_finite() {
            anyhow::bail!(
                "spec.compensation.multiplier must be >= 1.0, got {}",
                compensation.multiplier
            );
        }
        if compensation.max_backoff_ms < compensation.initial_backoff_ms {
            anyhow::bail!("spec.compensation.max_backoff_ms cannot be below initial_backoff_ms");
        }
        if compensation.ack_timeout_ms == 0 {
            anyhow::bail!("spec.compensation.ack_timeout_ms must be positive");
        }

        if self.spec.timeouts.scan_interval_ms == 0 {
            anyhow::bail!("spec.timeouts.scan_interval_ms must be positive");
        }

        if self.spec.registry.mailbox_capacity == 0 {
            anyhow::bail!("spec.registry.mailbox_capacity must be positive");
        }
        if self.spec.registry.eviction_interval_ms == 0 {
            anyhow::bail!("spec.registry.eviction_interval_ms must be positive");
        }

        match self.spec.observability.logging.format.as_str() {
            "json" | "text" | "compact" => {}
            other => anyhow::bail!("Unknown log format '{}'. Expected json or text", other),
        }

        Ok(())
    }
}
