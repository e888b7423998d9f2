//! Virtual tunnel network settings and the host capability that applies them.

use crate::gost::types::{NetworkSettingsError, OrchestratorSettings};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Address every local proxy setting points at.
pub const LOOPBACK: &str = "127.0.0.1";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Settings model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// System proxy configuration pushed through the tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    pub socks_enabled: bool,
    pub socks_server: String,
    pub socks_port: u16,
    pub http_enabled: bool,
    pub https_enabled: bool,
    /// `[""]` routes every domain.
    pub match_domains: Vec<String>,
    pub exclude_simple_hostnames: bool,
    pub exception_list: Vec<String>,
}

impl ProxySettings {
    pub fn socks_endpoint(&self) -> String {
        format!("{}:{}", self.socks_server, self.socks_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub tunnel_remote_address: String,
    pub mtu: u16,
    pub proxy: ProxySettings,
}

impl NetworkSettings {
    /// Route all domains through the local SOCKS5 listener on `local_port`.
    pub fn for_local_socks(settings: &OrchestratorSettings, local_port: u16) -> Self {
        Self {
            tunnel_remote_address: settings.tunnel_remote_address.clone(),
            mtu: settings.mtu,
            proxy: ProxySettings {
                socks_enabled: true,
                socks_server: LOOPBACK.into(),
                socks_port: local_port,
                http_enabled: false,
                https_enabled: false,
                match_domains: vec![String::new()],
                exclude_simple_hostnames: true,
                exception_list: Vec::new(),
            },
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Host capability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Applies tunnel network settings on behalf of the host runtime.
#[async_trait]
pub trait NetworkSettingsApplier: Send + Sync {
    /// Apply `settings`; `None` retracts whatever was applied before.
    async fn apply_settings(&self, settings: Option<NetworkSettings>) -> Result<(), NetworkSettingsError>;
}

/// Completion handed to a callback-style host.
pub type SettingsCompletion = Box<dyn FnOnce(Result<(), NetworkSettingsError>) + Send>;

/// Adapts a host API of the form `apply(settings, completion)` to
/// [`NetworkSettingsApplier`].
pub struct CallbackApplier<F> {
    apply: F,
}

impl<F> CallbackApplier<F>
where
    F: Fn(Option<NetworkSettings>, SettingsCompletion) + Send + Sync,
{
    pub fn new(apply: F) -> Self {
        Self { apply }
    }
}

#[async_trait]
impl<F> NetworkSettingsApplier for CallbackApplier<F>
where
    F: Fn(Option<NetworkSettings>, SettingsCompletion) + Send + Sync,
{
    async fn apply_settings(&self, settings: Option<NetworkSettings>) -> Result<(), NetworkSettingsError> {
        let (tx, rx) = oneshot::channel();
        (self.apply)(
            settings,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.await
            .unwrap_or_else(|_| Err(NetworkSettingsError::new("host dropped the completion")))
    }
}

/// Keeps every apply call in memory. Used for dry runs and tests; can be
/// told to reject the next apply.
#[derive(Default)]
pub struct RecordingApplier {
    applied: std::sync::Mutex<Vec<Option<NetworkSettings>>>,
    reject_with: std::sync::Mutex<Option<String>>,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(message: impl Into<String>) -> Self {
        let applier = Self::default();
        applier.reject_next(message);
        applier
    }

    pub fn reject_next(&self, message: impl Into<String>) {
        if let Ok(mut slot) = self.reject_with.lock() {
            *slot = Some(message.into());
        }
    }

    /// Every call so far, oldest first.
    pub fn calls(&self) -> Vec<Option<NetworkSettings>> {
        self.applied.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// The currently effective settings.
    pub fn current(&self) -> Option<NetworkSettings> {
        self.calls().into_iter().last().flatten()
    }
}

#[async_trait]
impl NetworkSettingsApplier for RecordingApplier {
    async fn apply_settings(&self, settings: Option<NetworkSettings>) -> Result<(), NetworkSettingsError> {
        let rejection = self.reject_with.lock().ok().and_then(|mut r| r.take());
        if let Some(message) = rejection {
            return Err(NetworkSettingsError::new(message));
        }
        let mut applied = self
            .applied
            .lock()
            .map_err(|e| NetworkSettingsError::new(e.to_string()))?;
        applied.push(settings);
        Ok(())
    }
}
