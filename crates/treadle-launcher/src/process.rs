//! Local launcher backed by child processes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use treadle_artifact::{ArtifactAccess, ArtifactCredentials, FsArtifactStore};
use treadle_types::{ObjectKey, artifact_instance_name};

use crate::registry::ScheduleRegistry;
use crate::{
    Launcher, LauncherError, Result, ScheduleSpec, UnitEvent, UnitEventStream, UnitSpec,
    WORK_DIR_ENV,
};

const SCHEDULES_FILE: &str = "schedules.json";

struct Unit {
    state: watch::Receiver<UnitEvent>,
    cancel: CancellationToken,
}

/// Runs execution units as children of the current process.
///
/// Layout under `state_dir`:
/// - `schedules.json`: registered recurring schedules
/// - `units/<namespace>/<unit>.log`: combined stdout/stderr of each unit
/// - `work/<namespace>/<unit>/`: private working directory of a live unit,
///   emptied when the unit starts and removed when it is deleted
/// - `artifacts/<namespace>/<workflow>-artifact/`: artifact instances
///
/// Schedules are recorded here but fired by whatever drives the host's
/// periodic jobs, which invokes each schedule's `args` on `program`.
pub struct ProcessLauncher {
    program: PathBuf,
    state_dir: PathBuf,
    env: Vec<(String, String)>,
    schedules: ScheduleRegistry,
    units: Mutex<HashMap<ObjectKey, Unit>>,
}

impl ProcessLauncher {
    /// `program` is started with each unit's arguments.
    pub fn new(program: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        Self {
            program: program.into(),
            schedules: ScheduleRegistry::new(state_dir.join(SCHEDULES_FILE)),
            state_dir,
            env: Vec::new(),
            units: Mutex::new(HashMap::new()),
        }
    }

    /// Environment given to every unit ahead of the unit's own entries.
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Every registered schedule.
    pub async fn list_schedules(&self) -> Result<Vec<ScheduleSpec>> {
        self.schedules.list().await
    }

    /// Where a unit's output is captured.
    pub fn log_path(&self, unit: &ObjectKey) -> PathBuf {
        self.state_dir
            .join("units")
            .join(&unit.namespace)
            .join(format!("{}.log", unit.name))
    }

    /// Working directory of a unit, exported to it as `TREADLE_WORK_DIR`.
    pub fn work_dir(&self, unit: &ObjectKey) -> PathBuf {
        self.state_dir
            .join("work")
            .join(&unit.namespace)
            .join(&unit.name)
    }

    fn artifact_root(&self, workflow: &ObjectKey) -> PathBuf {
        self.state_dir
            .join("artifacts")
            .join(&workflow.namespace)
            .join(artifact_instance_name(&workflow.name))
    }

    fn spawn(&self, spec: &UnitSpec, key: &ObjectKey) -> Result<Unit> {
        let log_path = self.log_path(key);
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stdout = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let stderr = stdout.try_clone()?;

        // A previous unit of the same name must not leave files behind.
        let work_dir = self.work_dir(key);
        remove_dir_if_present(&work_dir)?;
        std::fs::create_dir_all(&work_dir)?;

        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&spec.args)
            .envs(
                self.env
                    .iter()
                    .chain(&spec.env)
                    .map(|(k, v)| (k.as_str(), v.as_str())),
            )
            .env(WORK_DIR_ENV, &work_dir)
            .current_dir(&work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        // Own process group, so stopping the unit reaches its task command too.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| LauncherError::Spawn {
            unit: key.clone(),
            source,
        })?;

        let (tx, rx) = watch::channel(UnitEvent::Running);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let unit = key.clone();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => UnitEvent::Succeeded,
                    Ok(status) => UnitEvent::Failed { message: format!("unit {status}") },
                    Err(e) => UnitEvent::Failed { message: format!("wait failed: {e}") },
                },
                _ = token.cancelled() => {
                    terminate(&mut child, &unit).await;
                    UnitEvent::Vanished
                }
            };
            debug!(unit = %unit, outcome = ?outcome, "Execution unit finished");
            // Receivers may already be gone.
            let _ = tx.send(outcome);

            // The directory outlives the process until the unit is deleted.
            token.cancelled().await;
            if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(unit = %unit, error = %e, "Failed to remove unit work dir");
            }
        });

        Ok(Unit { state: rx, cancel })
    }
}

fn remove_dir_if_present(dir: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Kill the unit's process group, then the unit itself.
async fn terminate(child: &mut tokio::process::Child, unit: &ObjectKey) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let group = format!("-{pid}");
        let signalled = tokio::process::Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match signalled {
            Ok(status) if status.success() => {}
            Ok(status) => debug!(unit = %unit, %status, "Process group already gone"),
            Err(e) => warn!(unit = %unit, error = %e, "Failed to signal unit process group"),
        }
    }
    if let Err(e) = child.kill().await {
        warn!(unit = %unit, error = %e, "Failed to kill execution unit");
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn get_schedule(&self, key: &ObjectKey) -> Result<Option<ScheduleSpec>> {
        self.schedules.get(key).await
    }

    async fn create_schedule(&self, spec: &ScheduleSpec) -> Result<()> {
        self.schedules.create(spec).await?;
        info!(schedule = %spec.key(), cron = %spec.schedule, "Created schedule");
        Ok(())
    }

    async fn update_schedule(&self, spec: &ScheduleSpec) -> Result<()> {
        self.schedules.update(spec).await?;
        info!(schedule = %spec.key(), cron = %spec.schedule, "Updated schedule");
        Ok(())
    }

    async fn delete_schedule(&self, key: &ObjectKey) -> Result<()> {
        self.schedules.delete(key).await?;
        info!(schedule = %key, "Deleted schedule");
        Ok(())
    }

    async fn create_unit(&self, spec: UnitSpec) -> Result<ObjectKey> {
        let key = spec.key();
        let mut units = self.units.lock();
        if units.contains_key(&key) {
            return Err(LauncherError::UnitExists(key));
        }
        let unit = self.spawn(&spec, &key)?;
        units.insert(key.clone(), unit);
        debug!(unit = %key, "Started execution unit");
        Ok(key)
    }

    async fn delete_unit(&self, key: &ObjectKey) -> Result<()> {
        let unit = self
            .units
            .lock()
            .remove(key)
            .ok_or_else(|| LauncherError::UnitNotFound(key.clone()))?;
        unit.cancel.cancel();
        debug!(unit = %key, "Deleted execution unit");
        Ok(())
    }

    async fn watch_unit(&self, key: &ObjectKey) -> Result<UnitEventStream> {
        let rx = self
            .units
            .lock()
            .get(key)
            .map(|unit| unit.state.clone())
            .ok_or_else(|| LauncherError::UnitNotFound(key.clone()))?;

        Ok(Box::pin(futures::stream::unfold(
            Some((rx, true)),
            |state| async move {
                let (mut rx, first) = state?;
                if !first && rx.changed().await.is_err() {
                    return None;
                }
                let event = rx.borrow_and_update().clone();
                let next = (!event.is_terminal()).then_some((rx, false));
                Some((event, next))
            },
        )))
    }

    async fn provision_artifacts(&self, workflow: &ObjectKey) -> Result<ArtifactAccess> {
        let root = self.artifact_root(workflow);
        let credentials = ArtifactCredentials::generate();
        FsArtifactStore::provision(&root, &credentials).await?;
        info!(workflow = %workflow, root = %root.display(), "Provisioned artifact instance");
        Ok(ArtifactAccess::new(root.display().to_string(), credentials))
    }

    async fn teardown_artifacts(&self, workflow: &ObjectKey) -> Result<()> {
        FsArtifactStore::teardown(&self.artifact_root(workflow)).await?;
        info!(workflow = %workflow, "Tore down artifact instance");
        Ok(())
    }
}
