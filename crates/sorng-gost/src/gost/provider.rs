//! Host adapter: the fixed start/stop/message surface with callback
//! completion.
//!
//! Each entry point is a thin wrapper that runs the matching
//! [`TunnelOrchestrator`] method on the runtime and invokes the completion
//! exactly once.

use crate::gost::orchestrator::TunnelOrchestratorState;
use crate::gost::types::{LaunchOptions, TunnelError};
use tokio::runtime::Handle;

pub struct PacketTunnelProvider {
    orchestrator: TunnelOrchestratorState,
    runtime: Handle,
}

impl PacketTunnelProvider {
    pub fn new(orchestrator: TunnelOrchestratorState, runtime: Handle) -> Self {
        Self {
            orchestrator,
            runtime,
        }
    }

    /// Bind to the runtime of the calling task.
    pub fn on_current_runtime(orchestrator: TunnelOrchestratorState) -> Option<Self> {
        Handle::try_current()
            .ok()
            .map(|runtime| Self::new(orchestrator, runtime))
    }

    pub fn orchestrator(&self) -> &TunnelOrchestratorState {
        &self.orchestrator
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// `completion(None)` on success, `completion(Some(err))` otherwise.
    pub fn start_tunnel<F>(&self, options: Option<LaunchOptions>, completion: F)
    where
        F: FnOnce(Option<TunnelError>) + Send + 'static,
    {
        let orchestrator = self.orchestrator.clone();
        let task = self
            .runtime
            .spawn(async move { orchestrator.on_start(options).await });
        self.runtime.spawn(async move {
            let error = match task.await {
                Ok(result) => result.err(),
                Err(join) => Some(TunnelError::Internal(join.to_string())),
            };
            if let Some(e) = &error {
                log::error!("Tunnel start failed: {}", e);
            }
            completion(error);
        });
    }

    pub fn stop_tunnel<F>(&self, reason: impl Into<String>, completion: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let orchestrator = self.orchestrator.clone();
        let reason = reason.into();
        let task = self
            .runtime
            .spawn(async move { orchestrator.on_stop(&reason).await });
        self.runtime.spawn(async move {
            if let Err(join) = task.await {
                log::error!("Tunnel stop task failed: {}", join);
            }
            completion();
        });
    }

    pub fn handle_app_message<F>(&self, data: Vec<u8>, completion: Option<F>)
    where
        F: FnOnce(Option<Vec<u8>>) + Send + 'static,
    {
        let orchestrator = self.orchestrator.clone();
        let task = self
            .runtime
            .spawn(async move { orchestrator.on_message(&data).await });
        self.runtime.spawn(async move {
            let response = task.await.unwrap_or_else(|join| {
                log::warn!("App message task failed: {}", join);
                None
            });
            if let Some(done) = completion {
                done(response);
            }
        });
    }
}
