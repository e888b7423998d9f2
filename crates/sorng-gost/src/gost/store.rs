//! Single owner of the proxy configuration, its rules, and launch options.
//!
//! Readers get copies. Every mutation is applied to a copy, persisted, and
//! only then swapped in, so a failed write or a rejected import leaves the
//! previous state in place. The password goes through a [`SecretStore`]
//! rather than into the settings file.

use crate::gost::config::{
    export_config, export_config_yaml, generate_config, import_config, import_config_yaml,
};
use crate::gost::types::*;
use crate::gost::validate::{validate_profile, validate_rule_pattern};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Secret-store key for the upstream proxy password.
pub const PASSWORD_SECRET_KEY: &str = "sorng-gost.proxy.password";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Secrets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Opaque get/set secret storage provided by the host (usually a keychain).
pub trait SecretStore: Send + Sync {
    fn get_secret(&self, key: &str) -> Result<Option<String>, String>;
    fn set_secret(&self, key: &str, value: &str) -> Result<(), String>;
}

/// Process-local secret store for tests and hosts without a keychain.
#[derive(Default)]
pub struct MemorySecretStore {
    values: std::sync::Mutex<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl SecretStore for MemorySecretStore {
    fn get_secret(&self, key: &str) -> Result<Option<String>, String> {
        let values = self.values.lock().map_err(|e| e.to_string())?;
        Ok(values.get(key).cloned())
    }

    fn set_secret(&self, key: &str, value: &str) -> Result<(), String> {
        let mut values = self.values.lock().map_err(|e| e.to_string())?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Persisted form
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PersistedSettings {
    server_address: String,
    username: String,
    local_port: u16,
    enabled: bool,
    schema_version: String,
    rules: Vec<ProxyRule>,
    launch: LaunchOptions,
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self::from_state(&StoreState::default())
    }
}

impl PersistedSettings {
    fn from_state(state: &StoreState) -> Self {
        let c = &state.profile.configuration;
        Self {
            server_address: c.server_address.clone(),
            username: c.username.clone(),
            local_port: c.local_port,
            enabled: c.enabled,
            schema_version: c.schema_version.clone(),
            rules: state.profile.rules.clone(),
            launch: state.launch,
        }
    }

    fn into_state(self, password: String) -> StoreState {
        StoreState {
            profile: ProxyProfile {
                configuration: ProxyConfiguration {
                    server_address: self.server_address,
                    username: self.username,
                    password,
                    local_port: self.local_port,
                    enabled: self.enabled,
                    schema_version: self.schema_version,
                },
                rules: self.rules,
            },
            launch: self.launch,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct StoreState {
    profile: ProxyProfile,
    launch: LaunchOptions,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ConfigStore {
    settings_path: PathBuf,
    engine_config_path: PathBuf,
    secrets: Arc<dyn SecretStore>,
    state: RwLock<StoreState>,
}

impl ConfigStore {
    /// Load persisted settings. A missing or unreadable file yields defaults.
    pub async fn open(paths: &EnginePaths, secrets: Arc<dyn SecretStore>) -> Arc<Self> {
        let persisted = match tokio::fs::read(&paths.settings_path).await {
            Ok(bytes) => serde_json::from_slice::<PersistedSettings>(&bytes).unwrap_or_else(|e| {
                log::warn!(
                    "Ignoring unreadable settings {}: {}",
                    paths.settings_path.display(),
                    e
                );
                PersistedSettings::default()
            }),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Cannot read settings {}: {}", paths.settings_path.display(), e);
                }
                PersistedSettings::default()
            }
        };
        let password = secrets
            .get_secret(PASSWORD_SECRET_KEY)
            .unwrap_or_else(|e| {
                log::warn!("Cannot read proxy password from secret store: {}", e);
                None
            })
            .unwrap_or_default();

        Arc::new(Self {
            settings_path: paths.settings_path.clone(),
            engine_config_path: paths.engine_config_path.clone(),
            secrets,
            state: RwLock::new(persisted.into_state(password)),
        })
    }

    pub fn engine_config_path(&self) -> &Path {
        &self.engine_config_path
    }

    // ── Reads (by value) ──────────────────────────────────────────

    pub async fn snapshot(&self) -> ProxyProfile {
        self.state.read().await.profile.clone()
    }

    pub async fn configuration(&self) -> ProxyConfiguration {
        self.state.read().await.profile.configuration.clone()
    }

    pub async fn rules(&self) -> Vec<ProxyRule> {
        self.state.read().await.profile.rules.clone()
    }

    pub async fn launch_options(&self) -> LaunchOptions {
        self.state.read().await.launch
    }

    // ── Configuration ─────────────────────────────────────────────

    pub async fn set_configuration(&self, config: ProxyConfiguration) -> Result<(), TunnelError> {
        self.mutate(|s| {
            s.profile.configuration = config;
            Ok(())
        })
        .await
    }

    /// Edit the configuration in place; the edit is discarded if invalid.
    pub async fn update_configuration<F>(&self, edit: F) -> Result<(), TunnelError>
    where
        F: FnOnce(&mut ProxyConfiguration),
    {
        self.mutate(|s| {
            edit(&mut s.profile.configuration);
            Ok(())
        })
        .await
    }

    pub async fn set_launch_options(&self, launch: LaunchOptions) -> Result<(), TunnelError> {
        self.mutate(|s| {
            s.launch = launch;
            Ok(())
        })
        .await
    }

    // ── Rules ─────────────────────────────────────────────────────

    pub async fn add_rule(&self, rule: ProxyRule) -> Result<(), TunnelError> {
        validate_rule_pattern(&rule.pattern)?;
        self.mutate(|s| {
            s.profile.rules.push(rule);
            Ok(())
        })
        .await
    }

    pub async fn remove_rule(&self, id: &str) -> Result<Option<ProxyRule>, TunnelError> {
        let mut removed = None;
        self.mutate(|s| {
            if let Some(idx) = s.profile.rules.iter().position(|r| r.id == id) {
                removed = Some(s.profile.rules.remove(idx));
            }
            Ok(())
        })
        .await?;
        Ok(removed)
    }

    pub async fn remove_rule_at(&self, index: usize) -> Result<Option<ProxyRule>, TunnelError> {
        let mut removed = None;
        self.mutate(|s| {
            if index < s.profile.rules.len() {
                removed = Some(s.profile.rules.remove(index));
            }
            Ok(())
        })
        .await?;
        Ok(removed)
    }

    /// Replace the rule with the same id. Returns false if there is none.
    pub async fn update_rule(&self, rule: ProxyRule) -> Result<bool, TunnelError> {
        validate_rule_pattern(&rule.pattern)?;
        let mut found = false;
        self.mutate(|s| {
            if let Some(slot) = s.profile.rules.iter_mut().find(|r| r.id == rule.id) {
                *slot = rule;
                found = true;
            }
            Ok(())
        })
        .await?;
        Ok(found)
    }

    // ── Export / import ───────────────────────────────────────────

    pub async fn export_config(&self) -> Result<Vec<u8>, TunnelError> {
        Ok(export_config(&self.snapshot().await)?)
    }

    pub async fn export_config_yaml(&self) -> Result<String, TunnelError> {
        Ok(export_config_yaml(&self.snapshot().await)?)
    }

    /// Replace the profile with an imported JSON document. Launch options
    /// are kept.
    pub async fn import_config(&self, bytes: &[u8]) -> Result<(), TunnelError> {
        let profile = import_config(bytes)?;
        self.replace_profile(profile).await
    }

    pub async fn import_config_yaml(&self, text: &str) -> Result<(), TunnelError> {
        let profile = import_config_yaml(text)?;
        self.replace_profile(profile).await
    }

    async fn replace_profile(&self, profile: ProxyProfile) -> Result<(), TunnelError> {
        self.mutate(|s| {
            s.profile = profile;
            Ok(())
        })
        .await
    }

    // ── Engine config ─────────────────────────────────────────────

    /// Native engine config for the current configuration.
    pub async fn engine_config_text(&self) -> Result<String, TunnelError> {
        Ok(generate_config(&self.configuration().await)?)
    }

    /// Write the native engine config, skipping the write when the file
    /// already holds identical bytes.
    pub async fn write_engine_config(&self) -> Result<PathBuf, TunnelError> {
        let config = self.configuration().await;
        write_engine_config_for(&config, &self.engine_config_path).await?;
        Ok(self.engine_config_path.clone())
    }

    // ── Internals ─────────────────────────────────────────────────

    async fn mutate<F>(&self, change: F) -> Result<(), TunnelError>
    where
        F: FnOnce(&mut StoreState) -> Result<(), TunnelError>,
    {
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        change(&mut next)?;
        validate_profile(&next.profile)?;
        if next == *guard {
            return Ok(());
        }
        self.persist(&guard, &next).await?;
        *guard = next;
        Ok(())
    }

    /// Write `next` to disk and the secret store. Everything that can fail
    /// without side effects runs first; a later failure restores the files
    /// already replaced.
    async fn persist(&self, previous: &StoreState, next: &StoreState) -> Result<(), TunnelError> {
        let config = &next.profile.configuration;
        let engine_text = if config.is_complete() {
            Some(generate_config(config)?)
        } else {
            None
        };
        let settings = serde_json::to_vec_pretty(&PersistedSettings::from_state(next))
            .map_err(|e| StoreError::Encode(e.to_string()))?;

        let mut replaced = Vec::new();
        if let Some(text) = &engine_text {
            let backup = FileBackup::take(&self.engine_config_path).await;
            write_engine_text(&self.engine_config_path, text).await?;
            replaced.extend(backup);
        }

        let backup = FileBackup::take(&self.settings_path).await;
        if let Err(e) = write_atomically(&self.settings_path, &settings).await {
            restore_all(replaced).await;
            return Err(e.into());
        }
        replaced.extend(backup);

        let password = &config.password;
        if *password != previous.profile.configuration.password {
            if let Err(e) = self.secrets.set_secret(PASSWORD_SECRET_KEY, password) {
                restore_all(replaced).await;
                return Err(StoreError::Secret(e).into());
            }
        }
        Ok(())
    }
}

async fn write_engine_config_for(config: &ProxyConfiguration, path: &Path) -> Result<(), TunnelError> {
    let text = generate_config(config)?;
    write_engine_text(path, &text).await?;
    Ok(())
}

async fn write_engine_text(path: &Path, text: &str) -> Result<(), StoreError> {
    if let Ok(existing) = tokio::fs::read(path).await {
        if existing == text.as_bytes() {
            return Ok(());
        }
    }
    write_atomically(path, text.as_bytes()).await?;
    log::info!("Wrote GOST config to {}", path.display());
    Ok(())
}

/// Write through a temp file and rename. On Unix the file is private to the
/// user (the engine config carries the password).
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| write_error(parent, e))?;
    }
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, bytes).await.map_err(|e| write_error(&tmp, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_error(&tmp, e));
        }
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(write_error(path, e));
    }
    Ok(())
}

fn write_error(path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Write {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

/// Contents of a file before it was replaced; `None` when it did not exist.
struct FileBackup {
    path: PathBuf,
    contents: Option<Vec<u8>>,
}

impl FileBackup {
    /// `None` when the current contents cannot be read, in which case the
    /// file is left alone on rollback.
    async fn take(path: &Path) -> Option<Self> {
        let contents = match tokio::fs::read(path).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                log::warn!("Cannot back up {}: {}", path.display(), e);
                return None;
            }
        };
        Some(Self {
            path: path.to_path_buf(),
            contents,
        })
    }

    async fn restore(self) {
        let result = match &self.contents {
            Some(bytes) => write_atomically(&self.path, bytes).await.map_err(|e| e.to_string()),
            None => tokio::fs::remove_file(&self.path).await.map_err(|e| e.to_string()),
        };
        if let Err(e) = result {
            log::warn!("Cannot restore {}: {}", self.path.display(), e);
        }
    }
}

async fn restore_all(backups: Vec<FileBackup>) {
    for backup in backups.into_iter().rev() {
        backup.restore().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> ProxyConfiguration {
        ProxyConfiguration {
            server_address: "proxy.example.com:443".into(),
            username: "u".into(),
            password: "p".into(),
            local_port: 1080,
            enabled: true,
            schema_version: "1.0".into(),
        }
    }

    async fn open_in(dir: &Path) -> (Arc<ConfigStore>, Arc<MemorySecretStore>, EnginePaths) {
        let paths = EnginePaths::under(dir);
        let secrets = MemorySecretStore::new();
        let store = ConfigStore::open(&paths, secrets.clone()).await;
        (store, secrets, paths)
    }

    #[tokio::test]
    async fn defaults_when_nothing_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _, _) = open_in(dir.path()).await;
        assert_eq!(store.configuration().await, ProxyConfiguration::default());
        assert!(store.rules().await.is_empty());
        assert_eq!(store.launch_options().await, LaunchOptions::default());
    }

    #[tokio::test]
    async fn persists_and_reloads_with_secret() {
        let dir = tempfile::tempdir().unwrap();
        let (store, secrets, paths) = open_in(dir.path()).await;
        store.set_configuration(complete()).await.unwrap();

        let raw = std::fs::read_to_string(&paths.settings_path).unwrap();
        assert!(raw.contains("proxy.example.com:443"));
        assert!(!raw.contains("\"password\""));
        assert_eq!(secrets.get_secret(PASSWORD_SECRET_KEY).unwrap(), Some("p".into()));

        let reopened = ConfigStore::open(&paths, secrets.clone()).await;
        assert_eq!(reopened.configuration().await, complete());
    }

    #[tokio::test]
    async fn complete_config_writes_engine_file() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _, paths) = open_in(dir.path()).await;
        store.set_configuration(complete()).await.unwrap();
        let on_disk = std::fs::read_to_string(&paths.engine_config_path).unwrap();
        assert_eq!(on_disk, store.engine_config_text().await.unwrap());
    }

    #[tokio::test]
    async fn incomplete_config_skips_engine_file() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _, paths) = open_in(dir.path()).await;
        store
            .update_configuration(|c| c.server_address = "h.example".into())
            .await
            .unwrap();
        assert!(paths.settings_path.exists());
        assert!(!paths.engine_config_path.exists());
    }

    #[tokio::test]
    async fn invalid_enabled_config_rejected_and_state_kept() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _, _) = open_in(dir.path()).await;
        store.set_configuration(complete()).await.unwrap();
        let err = store
            .update_configuration(|c| c.local_port = 0)
            .await
            .unwrap_err();
        assert_eq!(err, TunnelError::Config(ConfigValidationError::InvalidLocalPort));
        assert_eq!(store.configuration().await.local_port, 1080);
    }

    #[tokio::test]
    async fn corrupt_settings_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let paths = EnginePaths::under(dir.path());
        std::fs::create_dir_all(&paths.support_dir).unwrap();
        std::fs::write(&paths.settings_path, b"{ not json").unwrap();
        let store = ConfigStore::open(&paths, MemorySecretStore::new()).await;
        assert_eq!(store.configuration().await, ProxyConfiguration::default());
    }

    // ── Failed writes ───────────────────────────────────────────

    #[tokio::test]
    async fn unwritable_engine_config_leaves_disk_and_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let (store, secrets, paths) = open_in(dir.path()).await;
        // A directory where the engine file should go makes the rename fail.
        std::fs::create_dir_all(&paths.engine_config_path).unwrap();

        let err = store.set_configuration(complete()).await.unwrap_err();
        assert!(matches!(err, TunnelError::Store(StoreError::Write { .. })));
        assert_eq!(store.configuration().await, ProxyConfiguration::default());
        assert!(!paths.settings_path.exists());
        assert_eq!(secrets.get_secret(PASSWORD_SECRET_KEY).unwrap(), None);

        let reopened = ConfigStore::open(&paths, secrets.clone()).await;
        assert_eq!(reopened.configuration().await, store.configuration().await);
    }

    #[derive(Default)]
    struct SwitchableSecretStore {
        inner: MemorySecretStore,
        reject: std::sync::atomic::AtomicBool,
    }

    impl SecretStore for SwitchableSecretStore {
        fn get_secret(&self, key: &str) -> Result<Option<String>, String> {
            self.inner.get_secret(key)
        }

        fn set_secret(&self, key: &str, value: &str) -> Result<(), String> {
            if self.reject.load(std::sync::atomic::Ordering::SeqCst) {
                return Err("keychain locked".into());
            }
            self.inner.set_secret(key, value)
        }
    }

    #[tokio::test]
    async fn rejected_secret_restores_previous_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = EnginePaths::under(dir.path());
        let secrets = Arc::new(SwitchableSecretStore::default());
        let store = ConfigStore::open(&paths, secrets.clone()).await;
        store.set_configuration(complete()).await.unwrap();
        let settings_before = std::fs::read(&paths.settings_path).unwrap();
        let engine_before = std::fs::read(&paths.engine_config_path).unwrap();

        secrets.reject.store(true, std::sync::atomic::Ordering::SeqCst);
        let err = store
            .set_configuration(ProxyConfiguration {
                server_address: "other.example.org:8443".into(),
                password: "new".into(),
                ..complete()
            })
            .await
            .unwrap_err();
        assert_eq!(err, TunnelError::Store(StoreError::Secret("keychain locked".into())));
        assert_eq!(store.configuration().await, complete());
        assert_eq!(std::fs::read(&paths.settings_path).unwrap(), settings_before);
        assert_eq!(std::fs::read(&paths.engine_config_path).unwrap(), engine_before);

        secrets.reject.store(false, std::sync::atomic::Ordering::SeqCst);
        let reopened = ConfigStore::open(&paths, secrets.clone()).await;
        assert_eq!(reopened.configuration().await, complete());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn written_files_are_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let (store, _, paths) = open_in(dir.path()).await;
        store.set_configuration(complete()).await.unwrap();
        for path in [&paths.engine_config_path, &paths.settings_path] {
            let mode = std::fs::metadata(path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    // ── Rules ───────────────────────────────────────────────────

    #[tokio::test]
    async fn rule_crud_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _, _) = open_in(dir.path()).await;
        let a = ProxyRule::new("a.example", RuleAction::Proxy);
        let b = ProxyRule::new("b.example", RuleAction::Direct);
        let c = ProxyRule::new("c.example", RuleAction::Reject);
        for r in [&a, &b, &c] {
            store.add_rule(r.clone()).await.unwrap();
        }
        let ids: Vec<_> = store.rules().await.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a.id.clone(), b.id.clone(), c.id.clone()]);

        let mut edited = b.clone();
        edited.pattern = "*.b.example".into();
        assert!(store.update_rule(edited).await.unwrap());
        assert_eq!(store.rules().await[1].pattern, "*.b.example");

        assert_eq!(store.remove_rule(&a.id).await.unwrap().map(|r| r.id), Some(a.id));
        assert_eq!(store.remove_rule_at(1).await.unwrap().map(|r| r.id), Some(c.id));
        assert_eq!(store.remove_rule_at(5).await.unwrap(), None);
        assert_eq!(store.rules().await.len(), 1);
    }

    #[tokio::test]
    async fn bad_rule_pattern_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _, _) = open_in(dir.path()).await;
        let err = store
            .add_rule(ProxyRule::new("has space", RuleAction::Proxy))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TunnelError::Config(ConfigValidationError::InvalidRulePattern(_))
        ));
        assert!(!store
            .update_rule(ProxyRule::new("unknown.example", RuleAction::Proxy))
            .await
            .unwrap());
    }

    // ── Import / export ─────────────────────────────────────────

    #[tokio::test]
    async fn import_replaces_profile() {
        let dir = tempfile::tempdir().unwrap();
        let (source, _, _) = open_in(dir.path()).await;
        source.set_configuration(complete()).await.unwrap();
        source
            .add_rule(ProxyRule::new("x.example", RuleAction::Direct))
            .await
            .unwrap();
        let exported = source.export_config().await.unwrap();

        let other = tempfile::tempdir().unwrap();
        let (target, _, _) = open_in(other.path()).await;
        target.import_config(&exported).await.unwrap();
        assert_eq!(target.snapshot().await, source.snapshot().await);
    }

    #[tokio::test]
    async fn failed_import_leaves_state() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _, _) = open_in(dir.path()).await;
        store.set_configuration(complete()).await.unwrap();
        let before = store.snapshot().await;
        let exported = store.export_config().await.unwrap();
        let err = store.import_config(&exported[..exported.len() - 3]).await.unwrap_err();
        assert!(matches!(
            err,
            TunnelError::Config(ConfigValidationError::InvalidJsonFormat(_))
        ));
        assert_eq!(store.snapshot().await, before);
    }

    #[tokio::test]
    async fn yaml_export_import() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _, _) = open_in(dir.path()).await;
        store.set_configuration(complete()).await.unwrap();
        let text = store.export_config_yaml().await.unwrap();
        store.set_configuration(ProxyConfiguration::default()).await.unwrap();
        store.import_config_yaml(&text).await.unwrap();
        assert_eq!(store.configuration().await, complete());
    }

    #[tokio::test]
    async fn launch_options_persist() {
        let dir = tempfile::tempdir().unwrap();
        let (store, secrets, paths) = open_in(dir.path()).await;
        let launch = LaunchOptions {
            debug: true,
            version: false,
        };
        store.set_launch_options(launch).await.unwrap();
        let reopened = ConfigStore::open(&paths, secrets.clone()).await;
        assert_eq!(reopened.launch_options().await, launch);
    }
}
