//! GOST module root – re-exports public API surface.

pub mod types;
pub mod validate;
pub mod config;
pub mod store;
pub mod process;
pub mod logging;
pub mod network;
pub mod orchestrator;
pub mod provider;

pub use types::*;
pub use store::{ConfigStore, MemorySecretStore, SecretStore};
pub use process::{ProcessSupervisor, ProcessSupervisorState};
pub use logging::{LogEntry, LogLevel, LogPipeline};
pub use network::{NetworkSettings, NetworkSettingsApplier};
pub use orchestrator::{TunnelOrchestrator, TunnelSession, TunnelStatus};
pub use provider::PacketTunnelProvider;
