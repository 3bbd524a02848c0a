use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::cli::config::StorageSettings;
use crate::crawler::task::{Task, TaskId};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("no task found with id {0}")]
    NotFound(TaskId),

    #[error("task with id {0} provided, but task does not exist")]
    UnknownId(TaskId),

    #[error("task storage failure: {0}")]
    Backend(String),
}

/// Persistence contract for tasks
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert the task if it has no id yet (assigning one), otherwise overwrite
    /// the stored task with the same id
    async fn store_task(&self, task: &mut Task) -> Result<TaskId, StorageError>;

    /// Get a task by id
    async fn retrieve_task(&self, id: TaskId) -> Result<Task, StorageError>;

    /// All tasks, most recently created first
    async fn list_tasks(&self) -> Result<Vec<Task>, StorageError>;
}

/// Factory for creating a TaskStore implementation
pub struct TaskStorage;

impl TaskStorage {
    /// Create a new TaskStore instance based on the settings
    pub async fn create(settings: &StorageSettings) -> Result<Arc<dyn TaskStore>> {
        match settings.storage_type.as_str() {
            "memory" => Ok(Arc::new(InMemoryTaskStore::new())),
            _ => {
                anyhow::bail!("Unsupported task storage type: {}", settings.storage_type);
            }
        }
    }
}

#[derive(Default)]
struct Tasks {
    tasks: HashMap<TaskId, Task>,
    last_id: TaskId,
}

/// Keeps tasks in memory for the lifetime of the process
#[derive(Default)]
pub struct InMemoryTaskStore {
    state: RwLock<Tasks>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn store_task(&self, task: &mut Task) -> Result<TaskId, StorageError> {
        let mut state = self.state.write().await;

        if let Some(id) = task.id {
            return match state.tasks.get_mut(&id) {
                Some(stored) => {
                    *stored = task.clone();
                    Ok(id)
                }
                None => Err(StorageError::UnknownId(id)),
            };
        }

        state.last_id += 1;
        let id = state.last_id;
        task.id = Some(id);
        state.tasks.insert(id, task.clone());
        debug!("Stored new task {} for {}", id, task.link);

        Ok(id)
    }

    async fn retrieve_task(&self, id: TaskId) -> Result<Task, StorageError> {
        self.state
            .read()
            .await
            .tasks
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound(id))
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StorageError> {
        let state = self.state.read().await;
        let mut tasks: Vec<Task> = state.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::task::TaskStatus;
    use tokio_test::assert_ok;
    use url::Url;

    fn task(path: &str) -> Task {
        Task::new(Url::parse("https://example.com").unwrap().join(path).unwrap())
    }

    #[tokio::test]
    async fn test_ids_are_unique_and_increasing() {
        let store = InMemoryTaskStore::new();
        let mut previous = 0;
        for i in 0..5 {
            let mut task = task(&format!("/{}", i));
            let id = assert_ok!(store.store_task(&mut task).await);
            assert!(id > previous);
            assert_eq!(task.id, Some(id));
            previous = id;
        }
    }

    #[tokio::test]
    async fn test_overwrite_existing_task() {
        let store = InMemoryTaskStore::new();
        let mut task = task("/");
        let id = assert_ok!(store.store_task(&mut task).await);

        task.status = TaskStatus::Initiating;
        assert_eq!(assert_ok!(store.store_task(&mut task).await), id);

        let stored = assert_ok!(store.retrieve_task(id).await);
        assert_eq!(stored.status, TaskStatus::Initiating);
    }

    #[tokio::test]
    async fn test_unknown_id_rejected() {
        let store = InMemoryTaskStore::new();
        let mut task = task("/");
        task.id = Some(42);

        let result = store.store_task(&mut task).await;
        assert!(matches!(result, Err(StorageError::UnknownId(42))));
        assert!(matches!(store.retrieve_task(42).await, Err(StorageError::NotFound(42))));
    }

    #[tokio::test]
    async fn test_stored_copy_is_independent() {
        let store = InMemoryTaskStore::new();
        let mut task = task("/");
        let id = assert_ok!(store.store_task(&mut task).await);

        task.crawled_links = 10;
        let stored = assert_ok!(store.retrieve_task(id).await);
        assert_eq!(stored.crawled_links, 0);
    }

    #[tokio::test]
    async fn test_list_most_recent_first() {
        let store = InMemoryTaskStore::new();
        for path in ["/first", "/second", "/third"] {
            let mut task = task(path);
            assert_ok!(store.store_task(&mut task).await);
        }

        let tasks = assert_ok!(store.list_tasks().await);
        let paths: Vec<&str> = tasks.iter().map(|task| task.link.path()).collect();
        assert_eq!(paths, vec!["/third", "/second", "/first"]);
    }

    #[tokio::test]
    async fn test_factory_rejects_unknown_backend() {
        let settings = StorageSettings {
            storage_type: "mongodb".to_string(),
        };
        assert!(TaskStorage::create(&settings).await.is_err());

        let settings = StorageSettings {
            storage_type: "memory".to_string(),
        };
        assert!(TaskStorage::create(&settings).await.is_ok());
    }
}
