//! Schedule registry persisted as one JSON document.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio::sync::Mutex;
use treadle_types::ObjectKey;

use crate::{LauncherError, Result, ScheduleSpec};

type Schedules = BTreeMap<String, ScheduleSpec>;

pub(crate) struct ScheduleRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ScheduleRegistry {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Schedules> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Schedules::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, schedules: &Schedules) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(schedules)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    pub(crate) async fn get(&self, key: &ObjectKey) -> Result<Option<ScheduleSpec>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(&key.to_string()))
    }

    pub(crate) async fn list(&self) -> Result<Vec<ScheduleSpec>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.into_values().collect())
    }

    pub(crate) async fn create(&self, spec: &ScheduleSpec) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut schedules = self.load().await?;
        let key = spec.key();
        if schedules.contains_key(&key.to_string()) {
            return Err(LauncherError::ScheduleExists(key));
        }
        schedules.insert(key.to_string(), spec.clone());
        self.save(&schedules).await
    }

    pub(crate) async fn update(&self, spec: &ScheduleSpec) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut schedules = self.load().await?;
        let key = spec.key();
        match schedules.get_mut(&key.to_string()) {
            Some(existing) => *existing = spec.clone(),
            None => return Err(LauncherError::ScheduleNotFound(key)),
        }
        self.save(&schedules).await
    }

    pub(crate) async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut schedules = self.load().await?;
        if schedules.remove(&key.to_string()).is_none() {
            return Err(LauncherError::ScheduleNotFound(key.clone()));
        }
        self.save(&schedules).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use treadle_types::{TaskCommand, Workflow};

    fn spec(name: &str, cron: &str) -> ScheduleSpec {
        ScheduleSpec::for_workflow(
            &Workflow::new("default", name)
                .with_schedule(cron)
                .with_task("t", TaskCommand::script("true")),
        )
    }

    #[tokio::test]
    async fn test_create_get_update_delete() {
        let dir = TempDir::new().unwrap();
        let registry = ScheduleRegistry::new(dir.path().join("schedules.json"));
        let s = spec("wf", "@hourly");

        assert!(registry.get(&s.key()).await.unwrap().is_none());
        registry.create(&s).await.unwrap();
        assert!(registry.create(&s).await.unwrap_err().is_already_exists());

        let changed = spec("wf", "@daily");
        registry.update(&changed).await.unwrap();
        assert_eq!(
            registry.get(&s.key()).await.unwrap().unwrap().schedule,
            "@daily"
        );

        registry.delete(&s.key()).await.unwrap();
        assert!(registry.delete(&s.key()).await.unwrap_err().is_not_found());
        assert!(registry.update(&changed).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/schedules.json");
        ScheduleRegistry::new(path.clone())
            .create(&spec("a", "@daily"))
            .await
            .unwrap();
        let reopened = ScheduleRegistry::new(path);
        assert_eq!(reopened.list().await.unwrap().len(), 1);
    }
}
