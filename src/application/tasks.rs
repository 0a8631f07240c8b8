use crate::application::gateway::PersistenceGateway;
use crate::domain::models::{Task, TaskRef, validate_task_name};
use crate::infrastructure::clock::{Clock, LocalZone};
use crate::infrastructure::error::InfraError;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub const TASKS_KEY: &str = "tasks.registry";
pub const DEFAULT_TASK_COLOR: &str = "#6366f1";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id(prefix: &str, now_ms: i64) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{now_ms}-{sequence}")
}

/// Study tasks that sessions can be attributed to. Sessions keep only the id.
pub struct TaskRegistry {
    gateway: Arc<PersistenceGateway>,
    clock: Arc<dyn Clock>,
    zone: LocalZone,
    write_guard: Mutex<()>,
}

impl TaskRegistry {
    pub fn new(gateway: Arc<PersistenceGateway>, clock: Arc<dyn Clock>, zone: LocalZone) -> Self {
        Self {
            gateway,
            clock,
            zone,
            write_guard: Mutex::new(()),
        }
    }

    pub fn list(&self) -> Vec<Task> {
        self.gateway
            .get_local_typed::<Vec<Task>>(TASKS_KEY)
            .unwrap_or_default()
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.list().into_iter().find(|task| task.id == task_id)
    }

    /// Snapshot used by the ledger; unknown ids resolve to no task.
    pub fn resolve(&self, task_id: Option<&str>) -> Option<TaskRef> {
        task_id.and_then(|id| self.get(id)).map(|task| task.to_ref())
    }

    /// Pulls the registry through the gateway, preferring a fresher remote copy.
    pub async fn refresh(&self) -> Vec<Task> {
        let value = self.gateway.get(TASKS_KEY, Value::Array(Vec::new())).await;
        serde_json::from_value(value).unwrap_or_else(|error| {
            log::warn!("task registry is malformed, using local copy: {error}");
            self.list()
        })
    }

    pub fn create(&self, name: &str, color: Option<&str>) -> Result<Task, InfraError> {
        let name = name.trim();
        validate_task_name(name).map_err(InfraError::InvalidConfig)?;
        let now_ms = self.clock.now_ms();
        let task = Task {
            id: next_id("tsk", now_ms),
            name: name.to_string(),
            color: color
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or(DEFAULT_TASK_COLOR)
                .to_string(),
            created_at_iso: self.zone.to_iso(now_ms),
        };
        task.validate().map_err(InfraError::InvalidConfig)?;

        self.update(|tasks| {
            tasks.push(task.clone());
            Ok(())
        })?;
        log::info!("created task_id={}", task.id);
        Ok(task)
    }

    pub fn rename(&self, task_id: &str, name: &str) -> Result<Task, InfraError> {
        let name = name.trim();
        validate_task_name(name).map_err(InfraError::InvalidConfig)?;

        let mut renamed = None;
        self.update(|tasks| {
            let task = tasks
                .iter_mut()
                .find(|task| task.id == task_id)
                .ok_or_else(|| InfraError::InvalidConfig(format!("task not found: {task_id}")))?;
            task.name = name.to_string();
            renamed = Some(task.clone());
            Ok(())
        })?;
        renamed.ok_or_else(|| InfraError::InvalidConfig(format!("task not found: {task_id}")))
    }

    /// Returns whether a task was removed. Ledger entries keep their task snapshot.
    pub fn delete(&self, task_id: &str) -> Result<bool, InfraError> {
        let mut removed = false;
        self.update(|tasks| {
            let before = tasks.len();
            tasks.retain(|task| task.id != task_id);
            removed = tasks.len() != before;
            Ok(())
        })?;
        if removed {
            log::info!("deleted task_id={task_id}");
        }
        Ok(removed)
    }

    fn update(
        &self,
        mutate: impl FnOnce(&mut Vec<Task>) -> Result<(), InfraError>,
    ) -> Result<(), InfraError> {
        let _guard = self
            .write_guard
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("task registry lock poisoned: {error}")))?;
        let mut tasks = self.list();
        mutate(&mut tasks)?;
        self.gateway.put_typed(TASKS_KEY, &tasks)
    }
}
