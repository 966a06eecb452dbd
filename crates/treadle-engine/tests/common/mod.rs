//! Common test utilities for engine integration tests.
//!
//! [`TestLauncher`] runs each execution unit as a tokio task that drives a
//! real [`TaskExecutor`] against the shared store, so dispatcher tests cover
//! the whole dispatch → execute → record loop without spawning processes.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use treadle_artifact::{ArtifactAccess, ArtifactCredentials, FsArtifactStore};
use treadle_config::{DispatcherConfig, ExecutorConfig};
use treadle_engine::{Dispatcher, TaskExecutor};
use treadle_launcher::{
    Launcher, LauncherError, Result, ScheduleSpec, UnitEvent, UnitEventStream, UnitSpec,
};
use treadle_store::{MemoryStore, ResourceStore, SharedStore};
use treadle_types::{ObjectKey, TaskRequest, Workflow, artifact_instance_name, unit_name};

/// Misbehaviour injected for one task index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `create_unit` fails.
    LaunchFails,
    /// The unit starts and never finishes.
    Hang,
    /// The unit fails before its executor records anything.
    Crash,
}

struct Unit {
    state: watch::Receiver<UnitEvent>,
    handle: JoinHandle<()>,
}

/// In-process launcher for tests.
pub struct TestLauncher {
    store: SharedStore,
    root: PathBuf,
    schedules: Mutex<HashMap<ObjectKey, ScheduleSpec>>,
    schedule_writes: Mutex<usize>,
    schedule_failures: Mutex<usize>,
    create_attempts: Mutex<usize>,
    units: Mutex<HashMap<ObjectKey, Unit>>,
    faults: Mutex<HashMap<usize, Fault>>,
    launched: Mutex<Vec<ObjectKey>>,
}

impl TestLauncher {
    pub fn new(store: SharedStore, root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            root: root.into(),
            schedules: Mutex::new(HashMap::new()),
            schedule_writes: Mutex::new(0),
            schedule_failures: Mutex::new(0),
            create_attempts: Mutex::new(0),
            units: Mutex::new(HashMap::new()),
            faults: Mutex::new(HashMap::new()),
            launched: Mutex::new(Vec::new()),
        }
    }

    pub fn inject(&self, task_id: usize, fault: Fault) {
        self.faults.lock().insert(task_id, fault);
    }

    /// Make the next `count` schedule creations fail.
    pub fn fail_schedule_creates(&self, count: usize) {
        *self.schedule_failures.lock() = count;
    }

    /// Every `create_schedule` call, failed ones included.
    pub fn create_attempts(&self) -> usize {
        *self.create_attempts.lock()
    }

    /// Schedule owned by the workflow at `workflow`, if any.
    pub fn schedule_for(&self, workflow: &ObjectKey) -> Option<ScheduleSpec> {
        self.schedules
            .lock()
            .get(&ScheduleSpec::key_for(workflow))
            .cloned()
    }

    pub fn schedule_count(&self) -> usize {
        self.schedules.lock().len()
    }

    /// Number of successful create and update calls.
    pub fn schedule_writes(&self) -> usize {
        *self.schedule_writes.lock()
    }

    pub fn live_units(&self) -> usize {
        self.units.lock().len()
    }

    pub fn launched(&self) -> Vec<ObjectKey> {
        self.launched.lock().clone()
    }

    /// Scratch directory standing in for a unit's artifact mount.
    pub fn work_dir(&self, workflow: &str, task_id: usize) -> PathBuf {
        self.root.join("work").join(unit_name(workflow, task_id))
    }

    pub fn artifact_root(&self, workflow: &ObjectKey) -> PathBuf {
        self.root
            .join("artifacts")
            .join(&workflow.namespace)
            .join(artifact_instance_name(&workflow.name))
    }

    fn spawn(&self, spec: &UnitSpec, request: TaskRequest, fault: Option<Fault>) -> Unit {
        let work = self.work_dir(&request.workflow, request.task_id);
        let config = ExecutorConfig {
            artifact_root: work.clone(),
            script_dir: Some(work.join("scripts")),
            ..ExecutorConfig::default()
        };
        let store = Arc::clone(&self.store);
        let env = spec.env.clone();
        let (tx, rx) = watch::channel(UnitEvent::Pending);

        let handle = tokio::spawn(async move {
            let _ = tx.send(UnitEvent::Running);
            let outcome = match fault {
                Some(Fault::Hang) => futures::future::pending::<UnitEvent>().await,
                Some(Fault::Crash) => UnitEvent::Failed {
                    message: "killed".into(),
                },
                _ => execute(store, config, env, request).await,
            };
            let _ = tx.send(outcome);
        });

        Unit { state: rx, handle }
    }
}

async fn execute(
    store: SharedStore,
    config: ExecutorConfig,
    env: Vec<(String, String)>,
    request: TaskRequest,
) -> UnitEvent {
    let mut executor = TaskExecutor::new(store, config);
    if !env.is_empty() {
        let vars: HashMap<String, String> = env.into_iter().collect();
        let connected = match ArtifactAccess::from_lookup(|k| vars.get(k).cloned()) {
            Ok(access) => FsArtifactStore::connect(&access).await,
            Err(e) => Err(e),
        };
        match connected {
            Ok(store) => executor = executor.with_artifacts(Arc::new(store)),
            Err(e) => {
                return UnitEvent::Failed {
                    message: e.to_string(),
                };
            }
        }
    }
    match executor.execute(&request).await {
        Ok(_) => UnitEvent::Succeeded,
        Err(e) => UnitEvent::Failed {
            message: e.to_string(),
        },
    }
}

/// Recover the task request from `exec -w <wf> -n <ns> -r <run> -t <task>`.
fn parse_exec_args(args: &[String]) -> Option<TaskRequest> {
    if args.first().map(String::as_str) != Some("exec") {
        return None;
    }
    let flag = |name: &str| {
        args.iter()
            .position(|a| a == name)
            .and_then(|i| args.get(i + 1))
    };
    Some(TaskRequest::new(
        flag("-w")?.clone(),
        flag("-n")?.clone(),
        flag("-r")?.parse().ok()?,
        flag("-t")?.parse().ok()?,
    ))
}

#[async_trait]
impl Launcher for TestLauncher {
    async fn get_schedule(&self, key: &ObjectKey) -> Result<Option<ScheduleSpec>> {
        Ok(self.schedules.lock().get(key).cloned())
    }

    async fn create_schedule(&self, spec: &ScheduleSpec) -> Result<()> {
        *self.create_attempts.lock() += 1;
        {
            let mut failures = self.schedule_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(LauncherError::Io(std::io::Error::other(
                    "schedule API unavailable",
                )));
            }
        }
        let mut schedules = self.schedules.lock();
        if schedules.contains_key(&spec.key()) {
            return Err(LauncherError::ScheduleExists(spec.key()));
        }
        schedules.insert(spec.key(), spec.clone());
        *self.schedule_writes.lock() += 1;
        Ok(())
    }

    async fn update_schedule(&self, spec: &ScheduleSpec) -> Result<()> {
        let mut schedules = self.schedules.lock();
        let slot = schedules
            .get_mut(&spec.key())
            .ok_or_else(|| LauncherError::ScheduleNotFound(spec.key()))?;
        *slot = spec.clone();
        *self.schedule_writes.lock() += 1;
        Ok(())
    }

    async fn delete_schedule(&self, key: &ObjectKey) -> Result<()> {
        self.schedules
            .lock()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| LauncherError::ScheduleNotFound(key.clone()))
    }

    async fn create_unit(&self, spec: UnitSpec) -> Result<ObjectKey> {
        let key = spec.key();
        let request = parse_exec_args(&spec.args).ok_or_else(|| LauncherError::Spawn {
            unit: key.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad exec args"),
        })?;
        let fault = self.faults.lock().get(&request.task_id).copied();
        if fault == Some(Fault::LaunchFails) {
            return Err(LauncherError::Spawn {
                unit: key,
                source: std::io::Error::other("image pull failed"),
            });
        }

        let mut units = self.units.lock();
        if units.contains_key(&key) {
            return Err(LauncherError::UnitExists(key));
        }
        units.insert(key.clone(), self.spawn(&spec, request, fault));
        self.launched.lock().push(key.clone());
        Ok(key)
    }

    async fn delete_unit(&self, key: &ObjectKey) -> Result<()> {
        let unit = self
            .units
            .lock()
            .remove(key)
            .ok_or_else(|| LauncherError::UnitNotFound(key.clone()))?;
        unit.handle.abort();
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
        Ok(ArtifactAccess::new(root.display().to_string(), credentials))
    }

    async fn teardown_artifacts(&self, workflow: &ObjectKey) -> Result<()> {
        FsArtifactStore::teardown(&self.artifact_root(workflow)).await?;
        Ok(())
    }
}

/// A memory store and a test launcher sharing one temp directory.
pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<MemoryStore>,
    pub launcher: Arc<TestLauncher>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let store = Arc::new(MemoryStore::new());
        let launcher = Arc::new(TestLauncher::new(store.clone(), dir.path()));
        Self {
            dir,
            store,
            launcher,
        }
    }

    pub fn dispatcher(&self, task_timeout_secs: u64) -> Dispatcher {
        Dispatcher::new(
            self.store.clone(),
            self.launcher.clone(),
            DispatcherConfig {
                task_timeout_secs,
                ..DispatcherConfig::default()
            },
        )
    }

    pub async fn seed(&self, workflow: Workflow) -> ObjectKey {
        self.store.put(workflow).await.expect("seed workflow").key()
    }

    pub async fn workflow(&self, key: &ObjectKey) -> Workflow {
        self.store.get(key).await.expect("workflow present")
    }
}

/// Poll `check` until it holds, failing the test after ten seconds.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
