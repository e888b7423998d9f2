//! Shared types, the supervisor state machine, error types, and path
//! configuration for the GOST crate.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

lazy_static! {
    static ref VERSION_RE: Option<Regex> = Regex::new(r"gost\s+v?(\d+\.\d+\.\d+)").ok();
}

/// Name of the managed engine executable.
pub const ENGINE_BINARY_NAME: &str = "gost";
/// File name of the generated native engine configuration.
pub const ENGINE_CONFIG_FILE: &str = "gost.yaml";
/// File name of the durable engine log.
pub const ENGINE_LOG_FILE: &str = "gost.log";
/// File name of the persisted configuration store.
pub const SETTINGS_FILE: &str = "settings.json";
/// Default local SOCKS5 listening port.
pub const DEFAULT_LOCAL_PORT: u16 = 1080;
/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: &str = "1.0";
/// Schema versions this build can read.
pub const SUPPORTED_SCHEMA_VERSIONS: &[&str] = &["1.0"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Proxy configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Upstream proxy settings and the local listener port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfiguration {
    /// `host` or `host:port` of the upstream hop.
    pub server_address: String,
    pub username: String,
    pub password: String,
    /// Local SOCKS5 listener port (1–65535).
    pub local_port: u16,
    pub enabled: bool,
    pub schema_version: String,
}

impl Default for ProxyConfiguration {
    fn default() -> Self {
        Self {
            server_address: String::new(),
            username: String::new(),
            password: String::new(),
            local_port: DEFAULT_LOCAL_PORT,
            enabled: false,
            schema_version: CURRENT_SCHEMA_VERSION.into(),
        }
    }
}

impl ProxyConfiguration {
    /// True when every field needed to generate an engine config is filled in.
    pub fn is_complete(&self) -> bool {
        !self.server_address.is_empty() && !self.username.is_empty() && !self.password.is_empty()
    }

    /// Host part of `server_address` (everything before the first `:`).
    pub fn server_host(&self) -> &str {
        split_host_port(&self.server_address).0
    }

    /// Port part of `server_address`, if one was given.
    pub fn server_port(&self) -> Option<&str> {
        split_host_port(&self.server_address).1
    }
}

/// Split `host[:port]` at the first colon.
pub fn split_host_port(address: &str) -> (&str, Option<&str>) {
    match address.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (address, None),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What to do with traffic matching a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Proxy,
    Direct,
    Reject,
}

impl Default for RuleAction {
    fn default() -> Self {
        Self::Proxy
    }
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proxy => write!(f, "proxy"),
            Self::Direct => write!(f, "direct"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

impl RuleAction {
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "proxy" => Some(Self::Proxy),
            "direct" => Some(Self::Direct),
            "reject" | "block" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// A stored traffic rule. Rules keep insertion order and are never evaluated
/// by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRule {
    pub id: String,
    pub pattern: String,
    pub is_enabled: bool,
    pub action: RuleAction,
    #[serde(default)]
    pub description: String,
}

impl ProxyRule {
    pub fn new(pattern: impl Into<String>, action: RuleAction) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pattern: pattern.into(),
            is_enabled: true,
            action,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.is_enabled = false;
        self
    }
}

/// Configuration plus its ordered rules; the unit of export and import.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProxyProfile {
    pub configuration: ProxyConfiguration,
    pub rules: Vec<ProxyRule>,
}

/// Extra engine flags chosen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LaunchOptions {
    /// Pass `-D` (verbose engine logging).
    pub debug: bool,
    /// Pass `-V` (engine prints its version on start).
    pub version: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Supervisor state machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle of the managed engine subprocess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    NotInstalled,
    Installed,
    Starting,
    Running,
    Stopping,
    /// Transient; always followed by `Installed`.
    Failed(String),
}

impl Default for SupervisorState {
    fn default() -> Self {
        Self::NotInstalled
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInstalled => write!(f, "Not Installed"),
            Self::Installed => write!(f, "Installed"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Failed(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

impl SupervisorState {
    /// The authoritative transition table.
    pub fn can_transition_to(&self, next: &SupervisorState) -> bool {
        use SupervisorState::*;
        matches!(
            (self, next),
            (NotInstalled, Installed)
                | (Installed, Installed)
                | (Installed, Starting)
                | (Starting, Running)
                | (Starting, Failed(_))
                | (Running, Stopping)
                | (Running, Failed(_))
                | (Stopping, Installed)
                | (Stopping, Failed(_))
                | (Failed(_), Installed)
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_installed(&self) -> bool {
        !matches!(self, Self::NotInstalled)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Snapshot pushed to observers on every supervisor transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangeEvent {
    pub old_state: SupervisorState,
    pub new_state: SupervisorState,
    pub timestamp: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Error types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A rejected configuration. The variant is the kind; `Display` is the
/// human-readable description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ConfigValidationError {
    #[error("Invalid server address. Please enter a valid hostname or IP address.")]
    InvalidServerAddress,
    #[error("Invalid server port. Port must be between 1 and 65535.")]
    InvalidServerPort,
    #[error("Invalid local port. Port must be between 1 and 65535.")]
    InvalidLocalPort,
    #[error("Username and password cannot be empty.")]
    EmptyCredentials,
    #[error("Invalid rule pattern: {0}")]
    InvalidRulePattern(String),
    #[error("Incompatible configuration version: {0}")]
    IncompatibleVersion(String),
    #[error("Invalid YAML format: {0}")]
    InvalidYamlFormat(String),
    #[error("Invalid JSON format: {0}")]
    InvalidJsonFormat(String),
}

/// Engine subprocess failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProcessError {
    #[error("GOST binary not installed")]
    NotInstalled,
    #[error("GOST is already running")]
    AlreadyRunning,
    #[error("Config file not found: {0}")]
    ConfigMissing(String),
    #[error("GOST package not found: {0}")]
    PackageMissing(String),
    #[error("Failed to spawn GOST: {0}")]
    SpawnFailed(String),
    #[error("GOST exited unexpectedly: {0}")]
    UnexpectedExit(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Could not determine GOST version: {0}")]
    VersionUnavailable(String),
}

/// The host rejected (or failed to apply) proposed network settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("Failed to apply network settings: {message}")]
pub struct NetworkSettingsError {
    pub message: String,
}

impl NetworkSettingsError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Configuration store persistence failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StoreError {
    #[error("Cannot write {path}: {message}")]
    Write { path: String, message: String },
    #[error("Cannot encode settings: {0}")]
    Encode(String),
    #[error("Secret store error: {0}")]
    Secret(String),
}

/// Aggregate error reported through the tunnel lifecycle surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TunnelError {
    #[error(transparent)]
    Config(#[from] ConfigValidationError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    NetworkSettings(#[from] NetworkSettingsError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{operation} did not finish within {after_ms} ms")]
    Timeout { operation: String, after_ms: u64 },
    #[error("A tunnel session is already active")]
    SessionActive,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<TunnelError> for String {
    fn from(e: TunnelError) -> String {
        e.to_string()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Paths and settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Filesystem layout used by the store, supervisor, and log pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnginePaths {
    /// Already-fetched engine package that `install` copies from.
    pub package_path: PathBuf,
    /// Directory holding the managed engine binary.
    pub install_dir: PathBuf,
    /// Working directory of the engine process.
    pub support_dir: PathBuf,
    pub engine_config_path: PathBuf,
    pub log_path: PathBuf,
    pub settings_path: PathBuf,
}

impl EnginePaths {
    /// Lay everything out below `root`.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let support_dir = root.join("Application Support");
        Self {
            package_path: root.join("Package").join(engine_binary_file_name()),
            install_dir: root.join("Binaries"),
            engine_config_path: support_dir.join(ENGINE_CONFIG_FILE),
            settings_path: support_dir.join(SETTINGS_FILE),
            log_path: root.join("Logs").join(ENGINE_LOG_FILE),
            support_dir,
        }
    }

    /// Per-user layout under the platform data directory.
    pub fn default_for_user() -> Option<Self> {
        dirs::data_dir().map(|d| Self::under(d.join("sorng-gost")))
    }

    /// Path of the installed engine executable.
    pub fn binary_path(&self) -> PathBuf {
        self.install_dir.join(engine_binary_file_name())
    }
}

fn engine_binary_file_name() -> String {
    format!("{}{}", ENGINE_BINARY_NAME, std::env::consts::EXE_SUFFIX)
}

/// Timing and capacity knobs for the supervisor and log pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// How long a fresh process must stay alive before it counts as running.
    pub startup_grace_ms: u64,
    /// How long to wait after the termination signal before killing.
    pub stop_grace_ms: u64,
    /// How long to wait for output readers to drain after exit.
    pub drain_timeout_ms: u64,
    /// In-memory log entry capacity.
    pub log_capacity: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            startup_grace_ms: 300,
            stop_grace_ms: 3_000,
            drain_timeout_ms: 1_000,
            log_capacity: 1_000,
        }
    }
}

/// Host-facing deadlines and tunnel parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    pub start_deadline_ms: u64,
    pub stop_deadline_ms: u64,
    pub tunnel_remote_address: String,
    pub mtu: u16,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            start_deadline_ms: 8_000,
            stop_deadline_ms: 5_000,
            tunnel_remote_address: "127.0.0.1".into(),
            mtu: 1500,
        }
    }
}

/// Extract a semantic version from engine `-V` output.
pub fn parse_version_string(output: &str) -> Option<String> {
    VERSION_RE
        .as_ref()?
        .captures(output)
        .map(|c| c[1].to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
