//! Task persistence seam.
//!
//! Storage itself lives outside this service; the assistant only needs to
//! create tasks and list a user's tasks through [`TaskStore`].

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::types::{NewTask, Task, TaskStatus};

#[derive(Debug, thiserror::Error)]
pub enum TaskStoreError {
    #[error("invalid task: {0}")]
    Invalid(String),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a pending task owned by `owner`
    async fn create_task(&self, owner: &str, task: NewTask) -> Result<Task, TaskStoreError>;

    /// Tasks the user created or is assigned to, oldest first
    async fn tasks_for_user(&self, user_id: &str) -> Result<Vec<Task>, TaskStoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<Vec<Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, owner: &str, task: NewTask) -> Result<Task, TaskStoreError> {
        let title = task.title.trim();
        if title.is_empty() {
            return Err(TaskStoreError::Invalid("title must not be empty".to_string()));
        }

        let now = Utc::now();
        let task = Task {
            id: ulid::Ulid::new().to_string(),
            title: title.to_string(),
            description: task.description,
            priority: task.priority,
            status: TaskStatus::Pending,
            assigned_by: owner.to_string(),
            assigned_to: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        self.tasks.write().await.push(task.clone());
        Ok(task)
    }

    async fn tasks_for_user(&self, user_id: &str) -> Result<Vec<Task>, TaskStoreError> {
        Ok(self
            .tasks
            .read()
            .await
            .iter()
            .filter(|t| t.assigned_by == user_id || t.assigned_to.iter().any(|u| u == user_id))
            .cloned()
            .collect())
    }
}
