//! GOST binary lifecycle – install, spawn, terminate, crash detection.
//!
//! [`ProcessSupervisor`] owns exactly one engine subprocess and the state
//! machine in [`SupervisorState`]. Commands (`install`, `start`, `stop`) are
//! serialised by one async mutex; state lives in a `watch` channel so queries
//! never wait on a command in flight.

use crate::gost::logging::{pump_stream, LogLevel, LogPipeline, StreamSource};
use crate::gost::types::*;
use chrono::Utc;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

/// Shared handle type passed to every consumer.
pub type ProcessSupervisorState = Arc<ProcessSupervisor>;

const EVENT_CHANNEL_CAPACITY: usize = 64;
const VERSION_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const SPAWN_BUSY_RETRIES: u32 = 3;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Argument builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `-C <config>` plus the optional `-D` / `-V` flags.
pub fn build_args(config_path: &Path, launch: &LaunchOptions) -> Vec<String> {
    let mut args = vec!["-C".to_string(), config_path.display().to_string()];
    if launch.debug {
        args.push("-D".into());
    }
    if launch.version {
        args.push("-V".into());
    }
    args
}

/// Human-readable exit reason.
pub fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {}", code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("terminated by signal {}", signal);
        }
    }
    "terminated".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Running engine handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bookkeeping for the live subprocess. The `Child` itself belongs to the
/// monitor task.
struct RunningEngine {
    pid: u32,
    /// Set by whichever side (explicit stop or the exit monitor) gets to
    /// drive the exit transitions.
    claimed: Arc<AtomicBool>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    monitor: JoinHandle<String>,
}

impl RunningEngine {
    fn claim(&self) -> bool {
        claim(&self.claimed)
    }
}

fn claim(flag: &AtomicBool) -> bool {
    flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Supervisor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ProcessSupervisor {
    paths: EnginePaths,
    settings: SupervisorSettings,
    log: Arc<LogPipeline>,
    state: watch::Sender<SupervisorState>,
    events: broadcast::Sender<StatusChangeEvent>,
    engine: Mutex<Option<RunningEngine>>,
    pid: AtomicU32,
}

impl ProcessSupervisor {
    /// Create the supervisor; starts as `Installed` if the managed binary
    /// is already present.
    pub fn new(
        paths: EnginePaths,
        settings: SupervisorSettings,
        log: Arc<LogPipeline>,
    ) -> ProcessSupervisorState {
        let initial = if paths.binary_path().is_file() {
            SupervisorState::Installed
        } else {
            SupervisorState::NotInstalled
        };
        let (state, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            paths,
            settings,
            log,
            state,
            events,
            engine: Mutex::new(None),
            pid: AtomicU32::new(0),
        })
    }

    // ── Queries ───────────────────────────────────────────────────

    pub fn state(&self) -> SupervisorState {
        self.state.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().is_running()
    }

    pub fn is_installed(&self) -> bool {
        self.state.borrow().is_installed()
    }

    /// PID of the live engine, if any.
    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn paths(&self) -> &EnginePaths {
        &self.paths
    }

    pub fn log(&self) -> &Arc<LogPipeline> {
        &self.log
    }

    /// Every transition as it happens.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChangeEvent> {
        self.events.subscribe()
    }

    /// Latest state snapshot, updated in place.
    pub fn watch_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    // ── Install ───────────────────────────────────────────────────

    /// Copy an already-fetched engine package into the managed location.
    pub async fn install(&self, source: &Path) -> Result<(), ProcessError> {
        let _engine = self.engine.lock().await;
        if self.is_running() {
            return Err(ProcessError::AlreadyRunning);
        }
        match tokio::fs::metadata(source).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(ProcessError::PackageMissing(source.display().to_string())),
        }

        let binary = self.paths.binary_path();
        tokio::fs::create_dir_all(&self.paths.install_dir)
            .await
            .map_err(|e| io_error("create install dir", e))?;
        match tokio::fs::remove_file(&binary).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error("remove previous binary", e)),
        }
        tokio::fs::copy(source, &binary)
            .await
            .map_err(|e| io_error("copy binary", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| io_error("set permissions", e))?;
        }

        self.transition(SupervisorState::Installed);
        self.log
            .log(LogLevel::Info, format!("GOST binary installed to {}", binary.display()))
            .await;
        Ok(())
    }

    /// Install from the bundled package location unless already installed.
    pub async fn check_and_install(&self) -> Result<(), ProcessError> {
        if self.is_installed() && tokio::fs::metadata(self.paths.binary_path()).await.is_ok() {
            return Ok(());
        }
        let package = self.paths.package_path.clone();
        self.install(&package).await
    }

    // ── Start ─────────────────────────────────────────────────────

    /// Spawn the engine with `-C config_path`. Starting a running engine
    /// is a no-op success.
    pub async fn start(
        self: &Arc<Self>,
        config_path: &Path,
        launch: LaunchOptions,
    ) -> Result<(), ProcessError> {
        let mut engine = self.engine.lock().await;
        self.reap_exited(&mut engine).await;

        match self.state() {
            SupervisorState::NotInstalled => return Err(ProcessError::NotInstalled),
            SupervisorState::Running => {
                log::info!("GOST is already running");
                return Ok(());
            }
            _ => {}
        }
        match tokio::fs::metadata(config_path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(ProcessError::ConfigMissing(config_path.display().to_string())),
        }

        if !self.transition(SupervisorState::Starting) {
            return Err(ProcessError::SpawnFailed(format!(
                "cannot start from state {}",
                self.state()
            )));
        }
        self.log
            .log(
                LogLevel::Info,
                format!("Starting GOST with config {}", config_path.display()),
            )
            .await;

        match self.spawn_engine(config_path, &launch).await {
            Ok(running) => {
                self.log
                    .log(LogLevel::Info, format!("GOST started (pid {})", running.pid))
                    .await;
                *engine = Some(running);
                Ok(())
            }
            Err(e) => {
                self.pid.store(0, Ordering::SeqCst);
                self.log.log(LogLevel::Error, e.to_string()).await;
                self.fail_and_reset(failure_reason(&e));
                Err(e)
            }
        }
    }

    async fn spawn_engine(
        self: &Arc<Self>,
        config_path: &Path,
        launch: &LaunchOptions,
    ) -> Result<RunningEngine, ProcessError> {
        tokio::fs::create_dir_all(&self.paths.support_dir)
            .await
            .map_err(|e| io_error("create support dir", e))?;

        let args = build_args(config_path, launch);
        let mut child = self.spawn_child(&args).await?;
        let pid = child.id().unwrap_or(0);
        self.pid.store(pid, Ordering::SeqCst);

        let mut readers = Vec::new();
        if let Some(out) = child.stdout.take() {
            readers.push(tokio::spawn(pump_stream(out, StreamSource::Stdout, self.log.clone())));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(tokio::spawn(pump_stream(err, StreamSource::Stderr, self.log.clone())));
        }

        // Alive after the grace period counts as started.
        let grace = Duration::from_millis(self.settings.startup_grace_ms);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                self.drain_readers(readers).await;
                return Err(ProcessError::UnexpectedExit(describe_exit(&status)));
            }
            Ok(Err(e)) => {
                let _ = child.kill().await;
                self.drain_readers(readers).await;
                return Err(ProcessError::SpawnFailed(e.to_string()));
            }
            Err(_) => {}
        }

        self.transition(SupervisorState::Running);
        let claimed = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let monitor = tokio::spawn(self.clone().monitor(child, shutdown_rx, claimed.clone(), readers));
        Ok(RunningEngine {
            pid,
            claimed,
            shutdown_tx: Some(shutdown_tx),
            monitor,
        })
    }

    async fn spawn_child(&self, args: &[String]) -> Result<Child, ProcessError> {
        let binary = self.paths.binary_path();
        let mut attempt = 0;
        loop {
            let spawned = Command::new(&binary)
                .args(args)
                .current_dir(&self.paths.support_dir)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn();
            match spawned {
                Ok(child) => return Ok(child),
                // ETXTBSY: the binary may still be open for writing right after install.
                Err(e) if e.raw_os_error() == Some(26) && attempt < SPAWN_BUSY_RETRIES => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => return Err(ProcessError::SpawnFailed(e.to_string())),
            }
        }
    }

    // ── Exit monitoring ───────────────────────────────────────────

    /// Owns the child until it exits. Returns the exit reason.
    async fn monitor(
        self: Arc<Self>,
        mut child: Child,
        shutdown_rx: oneshot::Receiver<()>,
        claimed: Arc<AtomicBool>,
        readers: Vec<JoinHandle<()>>,
    ) -> String {
        let (requested, status) = tokio::select! {
            _ = shutdown_rx => (true, self.terminate(&mut child).await),
            status = child.wait() => (false, status),
        };
        let reason = match &status {
            Ok(status) => describe_exit(status),
            Err(e) => format!("wait failed: {}", e),
        };
        self.pid.store(0, Ordering::SeqCst);
        // Claimed before draining so a stop arriving meanwhile sees the crash.
        let crashed = !requested && claim(&claimed);
        self.drain_readers(readers).await;

        if crashed {
            log::error!("GOST exited unexpectedly: {}", reason);
            self.log
                .log(LogLevel::Error, format!("GOST exited unexpectedly: {}", reason))
                .await;
            self.fail_and_reset(reason.clone());
        }
        reason
    }

    /// Graceful termination signal, then a hard kill after the grace period.
    async fn terminate(&self, child: &mut Child) -> std::io::Result<ExitStatus> {
        if let Some(pid) = child.id() {
            send_terminate_signal(pid).await;
        }
        let grace = Duration::from_millis(self.settings.stop_grace_ms);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                log::warn!("GOST ignored termination signal; killing");
                child.kill().await?;
                child.wait().await
            }
        }
    }

    async fn drain_readers(&self, readers: Vec<JoinHandle<()>>) {
        let limit = Duration::from_millis(self.settings.drain_timeout_ms);
        for mut reader in readers {
            if tokio::time::timeout(limit, &mut reader).await.is_err() {
                log::warn!("GOST output reader did not finish; cancelling");
                reader.abort();
            }
        }
    }

    /// Drop the handle of an engine whose exit the monitor already handled.
    async fn reap_exited(&self, engine: &mut Option<RunningEngine>) {
        let exited = engine
            .as_ref()
            .map(|e| e.claimed.load(Ordering::SeqCst))
            .unwrap_or(false);
        if exited {
            if let Some(running) = engine.take() {
                let _ = running.monitor.await;
            }
        }
    }

    // ── Stop ──────────────────────────────────────────────────────

    /// Terminate the engine. No-op when nothing is running. On return the
    /// process has exited and its output readers are finished.
    pub async fn stop(&self) -> Result<(), ProcessError> {
        let mut engine = self.engine.lock().await;
        let Some(mut running) = engine.take() else {
            log::debug!("GOST stop requested while not running");
            return Ok(());
        };
        if !running.claim() {
            // Already exited on its own; the monitor drove the transitions.
            let _ = running.monitor.await;
            return Ok(());
        }

        self.transition(SupervisorState::Stopping);
        self.log.log(LogLevel::Info, "Stopping GOST").await;
        if let Some(tx) = running.shutdown_tx.take() {
            let _ = tx.send(());
        }
        match running.monitor.await {
            Ok(reason) => {
                self.transition(SupervisorState::Installed);
                self.log
                    .log(LogLevel::Info, format!("GOST stopped ({})", reason))
                    .await;
                Ok(())
            }
            Err(e) => {
                self.pid.store(0, Ordering::SeqCst);
                let reason = format!("monitor task failed: {}", e);
                self.log.log(LogLevel::Error, reason.clone()).await;
                self.fail_and_reset(reason.clone());
                Err(ProcessError::UnexpectedExit(reason))
            }
        }
    }

    // ── Version ───────────────────────────────────────────────────

    /// Run the installed engine with `-V`. Does not touch the state machine.
    pub async fn query_version(&self) -> Result<String, ProcessError> {
        let binary = self.paths.binary_path();
        if tokio::fs::metadata(&binary).await.is_err() {
            return Err(ProcessError::NotInstalled);
        }
        let output = Command::new(&binary)
            .arg("-V")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(VERSION_QUERY_TIMEOUT, output)
            .await
            .map_err(|_| ProcessError::VersionUnavailable("timed out".into()))?
            .map_err(|e| ProcessError::SpawnFailed(e.to_string()))?;

        let combined = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        parse_version_string(&combined)
            .ok_or_else(|| ProcessError::VersionUnavailable(combined.trim().to_string()))
    }

    // ── State transitions ─────────────────────────────────────────

    /// Apply `next` if the transition table allows it and notify observers.
    fn transition(&self, next: SupervisorState) -> bool {
        let mut previous = None;
        self.state.send_if_modified(|current| {
            if !current.can_transition_to(&next) {
                return false;
            }
            previous = Some(std::mem::replace(current, next.clone()));
            true
        });
        match previous {
            Some(old) => {
                log::info!("GOST supervisor: {} -> {}", old, next);
                let _ = self.events.send(StatusChangeEvent {
                    old_state: old,
                    new_state: next,
                    timestamp: Utc::now(),
                });
                true
            }
            None => {
                log::warn!("Ignoring supervisor transition {} -> {}", self.state(), next);
                false
            }
        }
    }

    fn fail_and_reset(&self, reason: String) {
        self.transition(SupervisorState::Failed(reason));
        self.transition(SupervisorState::Installed);
    }
}

fn failure_reason(e: &ProcessError) -> String {
    match e {
        ProcessError::UnexpectedExit(reason) | ProcessError::SpawnFailed(reason) => reason.clone(),
        other => other.to_string(),
    }
}

fn io_error(action: &str, e: std::io::Error) -> ProcessError {
    ProcessError::Io(format!("{}: {}", action, e))
}

async fn send_terminate_signal(pid: u32) {
    #[cfg(target_os = "windows")]
    {
        let _ = Command::new("taskkill")
            .args(["/PID", &pid.to_string()])
            .output()
            .await;
    }
    #[cfg(not(target_os = "windows"))]
    {
        let _ = Command::new("kill")
            .arg("-TERM")
            .arg(pid.to_string())
            .output()
            .await;
    }
}
