//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [store]
//! root = "/var/lib/treadle/store"
//!
//! [controller]
//! workers = 4
//! sync_timeout_secs = 30
//! max_retries = 0          # 0 = log and drop failed reconciles
//!
//! [dispatcher]
//! task_timeout_secs = 3600
//!
//! [executor]
//! artifact_root = "/artifacts"
//! input_env = "TREADLE_INPUT"
//!
//! [launcher]
//! state_dir = "/var/lib/treadle/launcher"
//!
//! [logging]
//! dir = "/var/log/treadle"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. project-local
/// overrides) can be loaded and merged. Accessors fill in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store: Option<StoreConfig>,
    pub controller: Option<ControllerConfig>,
    pub dispatcher: Option<DispatcherConfig>,
    pub executor: Option<ExecutorConfig>,
    pub launcher: Option<LauncherConfig>,
    pub logging: Option<LoggingConfig>,
}

impl EngineConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole, not field by field.
    pub fn merge(&mut self, other: EngineConfig) {
        if other.store.is_some() {
            self.store = other.store;
        }
        if other.controller.is_some() {
            self.controller = other.controller;
        }
        if other.dispatcher.is_some() {
            self.dispatcher = other.dispatcher;
        }
        if other.executor.is_some() {
            self.executor = other.executor;
        }
        if other.launcher.is_some() {
            self.launcher = other.launcher;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let controller = self.controller();
        if controller.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "controller.workers".into(),
                reason: "must be at least 1".into(),
            });
        }
        if controller.qps == 0 || controller.burst == 0 {
            return Err(ConfigError::InvalidValue {
                field: "controller.qps/burst".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.dispatcher().task_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "dispatcher.task_timeout_secs".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.executor().input_env.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "executor.input_env".into(),
                reason: "cannot be empty".into(),
            });
        }
        Ok(())
    }

    pub fn store(&self) -> StoreConfig {
        self.store.clone().unwrap_or_default()
    }

    pub fn controller(&self) -> ControllerConfig {
        self.controller.clone().unwrap_or_default()
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        self.dispatcher.clone().unwrap_or_default()
    }

    pub fn executor(&self) -> ExecutorConfig {
        self.executor.clone().unwrap_or_default()
    }

    pub fn launcher(&self) -> LauncherConfig {
        self.launcher.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// Workflow resource store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one JSON document per workflow.
    /// Defaults to `<data dir>/store`.
    pub root: Option<PathBuf>,
}

impl StoreConfig {
    pub fn root(&self) -> PathBuf {
        self.root
            .clone()
            .unwrap_or_else(|| crate::data_dir().join("store"))
    }
}

/// Reconciliation controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Number of worker loops draining the queue.
    pub workers: usize,
    /// How long to wait for the initial cache sync before aborting.
    pub sync_timeout_secs: u64,
    /// Requeue attempts per key after a failed reconcile; 0 disables retry.
    pub max_retries: u32,
    /// First per-key backoff delay.
    pub base_delay_ms: u64,
    /// Cap on the per-key backoff delay.
    pub max_delay_ms: u64,
    /// Sustained requeue rate across all keys.
    pub qps: u32,
    /// Requeue burst across all keys.
    pub burst: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            sync_timeout_secs: 30,
            max_retries: 0,
            base_delay_ms: 5,
            max_delay_ms: 1_000_000,
            qps: 10,
            burst: 100,
        }
    }
}

impl ControllerConfig {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Run dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Upper bound on the wait for one execution unit to finish.
    pub task_timeout_secs: u64,
    /// Re-read/re-apply attempts when a status write hits a version conflict.
    pub conflict_retries: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            task_timeout_secs: 3600,
            conflict_retries: 3,
        }
    }
}

impl DispatcherConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Task executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Root of the `incoming/` and `outgoing/` artifact directories.
    pub artifact_root: PathBuf,
    /// Environment variable carrying the previous task's output.
    pub input_env: String,
    /// Where script bodies are materialized. Defaults to the temp dir.
    pub script_dir: Option<PathBuf>,
    /// Re-read/re-apply attempts when the status write hits a version conflict.
    pub conflict_retries: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            artifact_root: PathBuf::from("/artifacts"),
            input_env: "TREADLE_INPUT".to_string(),
            script_dir: None,
            conflict_retries: 3,
        }
    }
}

impl ExecutorConfig {
    pub fn incoming_dir(&self) -> PathBuf {
        self.artifact_root.join("incoming")
    }

    pub fn outgoing_dir(&self) -> PathBuf {
        self.artifact_root.join("outgoing")
    }

    pub fn script_dir(&self) -> PathBuf {
        self.script_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Stage artifacts and scripts under one unit's private directory.
    pub fn in_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.script_dir = Some(dir.join("scripts"));
        self.artifact_root = dir;
        self
    }
}

/// Local workload launcher settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Schedule registry and artifact instances live here.
    /// Defaults to `<data dir>/launcher`.
    pub state_dir: Option<PathBuf>,
    /// Binary launched as each execution unit's entry point.
    /// Defaults to the running executable.
    pub program: Option<PathBuf>,
}

impl LauncherConfig {
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| crate::data_dir().join("launcher"))
    }
}

/// Log output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for the rotating JSON log. Defaults to `<config dir>/logs`.
    pub dir: Option<PathBuf>,
    /// Console filter directive, e.g. `treadle=debug,info`.
    pub level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        let controller = config.controller();
        assert_eq!(controller.workers, 2);
        assert_eq!(controller.max_retries, 0);
        assert_eq!(controller.sync_timeout(), Duration::from_secs(30));
        assert_eq!(config.dispatcher().task_timeout_secs, 3600);
        assert_eq!(config.executor().input_env, "TREADLE_INPUT");
        assert_eq!(
            config.executor().incoming_dir(),
            PathBuf::from("/artifacts/incoming")
        );
    }

    #[test]
    fn test_work_dir_overrides_staging_paths() {
        let config = ExecutorConfig {
            conflict_retries: 9,
            ..ExecutorConfig::default()
        }
        .in_work_dir("/state/work/default/wf-task-1");
        assert_eq!(
            config.incoming_dir(),
            PathBuf::from("/state/work/default/wf-task-1/incoming")
        );
        assert_eq!(
            config.outgoing_dir(),
            PathBuf::from("/state/work/default/wf-task-1/outgoing")
        );
        assert_eq!(
            config.script_dir(),
            PathBuf::from("/state/work/default/wf-task-1/scripts")
        );
        assert_eq!(config.conflict_retries, 9);
    }

    #[test]
    fn test_partial_section_fills_defaults() {
        let config = EngineConfig::from_toml(
            r#"
[controller]
workers = 8
"#,
        )
        .unwrap();
        let controller = config.controller();
        assert_eq!(controller.workers, 8);
        assert_eq!(controller.qps, 10);
    }

    #[test]
    fn test_merge_override() {
        let mut base = EngineConfig::from_toml(
            r#"
[controller]
workers = 3

[executor]
input_env = "BASE_INPUT"
"#,
        )
        .unwrap();
        let over = EngineConfig::from_toml(
            r#"
[controller]
workers = 5
"#,
        )
        .unwrap();
        base.merge(over);
        assert_eq!(base.controller().workers, 5);
        assert_eq!(base.executor().input_env, "BASE_INPUT");
    }

    #[test]
    fn test_rejects_zero_workers() {
        let err = EngineConfig::from_toml(
            r#"
[controller]
workers = 0
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_explicit_paths() {
        let config = EngineConfig::from_toml(
            r#"
[store]
root = "/srv/store"

[launcher]
state_dir = "/srv/launcher"
"#,
        )
        .unwrap();
        assert_eq!(config.store().root(), PathBuf::from("/srv/store"));
        assert_eq!(config.launcher().state_dir(), PathBuf::from("/srv/launcher"));
    }
}
