//! Tunnel lifecycle: bridges host start/stop/message calls to the
//! configuration store, the process supervisor, and the host's network
//! settings capability.

use crate::gost::logging::{LogLevel, LogPipeline};
use crate::gost::network::{NetworkSettings, NetworkSettingsApplier};
use crate::gost::process::ProcessSupervisor;
use crate::gost::store::{ConfigStore, SecretStore};
use crate::gost::types::*;
use crate::gost::validate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};

/// One successful `on_start` until the matching `on_stop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub settings: NetworkSettings,
    pub configuration: ProxyConfiguration,
}

/// Snapshot returned by [`TunnelOrchestrator::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelStatus {
    pub supervisor: SupervisorState,
    pub session: Option<TunnelSession>,
}

pub type TunnelOrchestratorState = Arc<TunnelOrchestrator>;

pub struct TunnelOrchestrator {
    store: Arc<ConfigStore>,
    supervisor: Arc<ProcessSupervisor>,
    log: Arc<LogPipeline>,
    applier: Arc<dyn NetworkSettingsApplier>,
    settings: OrchestratorSettings,
    session: Arc<Mutex<Option<TunnelSession>>>,
    /// Bumped by every start attempt that reaches the engine launch.
    start_generation: Arc<AtomicU64>,
}

impl TunnelOrchestrator {
    pub fn new(
        store: Arc<ConfigStore>,
        supervisor: Arc<ProcessSupervisor>,
        applier: Arc<dyn NetworkSettingsApplier>,
        settings: OrchestratorSettings,
    ) -> TunnelOrchestratorState {
        let log = supervisor.log().clone();
        Arc::new(Self {
            store,
            supervisor,
            log,
            applier,
            settings,
            session: Arc::new(Mutex::new(None)),
            start_generation: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Build the log pipeline, store, supervisor, and orchestrator over one
    /// filesystem layout. Call once at process start and share the result.
    pub async fn assemble(
        paths: EnginePaths,
        secrets: Arc<dyn SecretStore>,
        applier: Arc<dyn NetworkSettingsApplier>,
        supervisor_settings: SupervisorSettings,
        settings: OrchestratorSettings,
    ) -> TunnelOrchestratorState {
        let log = LogPipeline::open(&paths.log_path, supervisor_settings.log_capacity).await;
        let store = ConfigStore::open(&paths, secrets).await;
        let supervisor = ProcessSupervisor::new(paths, supervisor_settings, log);
        Self::new(store, supervisor, applier, settings)
    }

    // ── Queries ───────────────────────────────────────────────────

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub async fn session(&self) -> Option<TunnelSession> {
        self.session.lock().await.clone()
    }

    pub async fn status(&self) -> TunnelStatus {
        TunnelStatus {
            supervisor: self.supervisor.state(),
            session: self.session().await,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChangeEvent> {
        self.supervisor.subscribe()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    //  Start
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Bring the tunnel up. `launch` overrides the stored launch options.
    ///
    /// A disabled configuration completes successfully without doing
    /// anything. Network settings are confirmed before the engine is
    /// started; the whole sequence is bounded by `start_deadline_ms`.
    pub async fn on_start(&self, launch: Option<LaunchOptions>) -> Result<(), TunnelError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(TunnelError::SessionActive);
        }

        let profile = self.store.snapshot().await;
        let config = profile.configuration.clone();
        if !config.enabled {
            log::info!("Proxy is disabled; tunnel start is a no-op");
            return Ok(());
        }
        validate::validate(&config, &profile.rules)?;

        let deadline = Instant::now() + Duration::from_millis(self.settings.start_deadline_ms);
        let config_path = self.store.write_engine_config().await?;
        let launch = match launch {
            Some(l) => l,
            None => self.store.launch_options().await,
        };

        let settings = NetworkSettings::for_local_socks(&self.settings, config.local_port);
        log::info!(
            "Applying tunnel settings (SOCKS {})",
            settings.proxy.socks_endpoint()
        );
        let applied = within(
            deadline,
            "apply network settings",
            self.settings.start_deadline_ms,
            self.applier.apply_settings(Some(settings.clone())),
        )
        .await
        .and_then(|r| r.map_err(TunnelError::from));
        if let Err(e) = applied {
            self.log
                .log(LogLevel::Error, format!("Tunnel settings rejected: {}", e))
                .await;
            return Err(e);
        }

        if let Err(e) = self.launch_engine(deadline, config_path, launch).await {
            self.log
                .log(LogLevel::Error, format!("Tunnel start failed: {}", e))
                .await;
            self.retract_settings().await;
            return Err(e);
        }

        let started = TunnelSession {
            id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            settings,
            configuration: config,
        };
        log::info!("Tunnel session {} started", started.id);
        *session = Some(started);
        Ok(())
    }

    /// Install (when missing) and start the engine on its own task. When the
    /// deadline passes first, whatever the task started is stopped afterwards
    /// unless a later start attempt has run in the meantime.
    ///
    /// Called with the session lock held.
    async fn launch_engine(
        &self,
        deadline: Instant,
        config_path: std::path::PathBuf,
        launch: LaunchOptions,
    ) -> Result<(), TunnelError> {
        let generation = self.start_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let supervisor = self.supervisor.clone();
        let mut task = tokio::spawn(async move {
            supervisor.check_and_install().await?;
            supervisor.start(&config_path, launch).await
        });

        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, &mut task).await {
            Ok(Ok(result)) => result.map_err(TunnelError::from),
            Ok(Err(join)) => Err(TunnelError::Internal(join.to_string())),
            Err(_) => {
                let supervisor = self.supervisor.clone();
                let session = self.session.clone();
                let current = self.start_generation.clone();
                tokio::spawn(async move {
                    let _ = task.await;
                    // Held across the stop so no start attempt interleaves.
                    let session = session.lock().await;
                    if current.load(Ordering::SeqCst) != generation || session.is_some() {
                        log::debug!("Skipping start timeout cleanup; a newer start owns the engine");
                        return;
                    }
                    if let Err(e) = supervisor.stop().await {
                        log::warn!("Cleanup after start timeout failed: {}", e);
                    }
                });
                Err(TunnelError::Timeout {
                    operation: "engine start".into(),
                    after_ms: self.settings.start_deadline_ms,
                })
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    //  Stop
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Tear the tunnel down. Never fails: stop and retraction errors are
    /// logged and swallowed.
    pub async fn on_stop(&self, reason: &str) {
        let mut session = self.session.lock().await;
        log::info!("Stopping tunnel ({})", reason);

        // Stop runs to completion even when the deadline passes.
        let supervisor = self.supervisor.clone();
        let stop = tokio::spawn(async move { supervisor.stop().await });
        let stop = tokio::time::timeout(
            Duration::from_millis(self.settings.stop_deadline_ms),
            stop,
        )
        .await;
        match stop {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                self.log
                    .log(LogLevel::Error, format!("Failed to stop GOST: {}", e))
                    .await;
            }
            Ok(Err(join)) => {
                self.log
                    .log(LogLevel::Error, format!("GOST stop task failed: {}", join))
                    .await;
            }
            Err(_) => {
                self.log
                    .log(
                        LogLevel::Error,
                        format!(
                            "GOST stop did not finish within {} ms",
                            self.settings.stop_deadline_ms
                        ),
                    )
                    .await;
            }
        }

        if session.take().is_some() {
            self.retract_settings().await;
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    //  Messages
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Acknowledge an opaque control message from the controlling app.
    pub async fn on_message(&self, data: &[u8]) -> Option<Vec<u8>> {
        let text = String::from_utf8_lossy(data);
        self.log
            .log(LogLevel::Debug, format!("App message: {}", text))
            .await;
        None
    }

    async fn retract_settings(&self) {
        let retract = tokio::time::timeout(
            Duration::from_millis(self.settings.stop_deadline_ms),
            self.applier.apply_settings(None),
        )
        .await;
        match retract {
            Ok(Ok(())) => log::debug!("Tunnel settings retracted"),
            Ok(Err(e)) => log::warn!("Failed to retract tunnel settings: {}", e),
            Err(_) => log::warn!("Retracting tunnel settings timed out"),
        }
    }
}

async fn within<F, T>(
    deadline: Instant,
    operation: &str,
    budget_ms: u64,
    fut: F,
) -> Result<T, TunnelError>
where
    F: Future<Output = T>,
{
    let remaining = deadline.saturating_duration_since(Instant::now());
    tokio::time::timeout(remaining, fut)
        .await
        .map_err(|_| TunnelError::Timeout {
            operation: operation.into(),
            after_ms: budget_ms,
        })
}
