use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::account::{AccountError, AccountService};
use crate::clock::now_unix_millis;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDef {
    pub id: String,
    pub name: String,
    pub description: String,
    pub platform: String,
    pub url: String,
    pub points: u64,
    pub active: bool,
}

/// One user's completion of one task. At most one per (user, task);
/// completion is never undone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletion {
    pub user_id: String,
    pub task_id: String,
    pub points_awarded: u64,
    pub completed_at_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("unknown task")]
    UnknownTask,
    #[error("task is not active")]
    InactiveTask,
    #[error("task already completed")]
    AlreadyCompleted,
    #[error(transparent)]
    Account(#[from] AccountError),
}

#[derive(Debug, Clone)]
pub struct TaskService {
    catalog: Vec<TaskDef>,
    completions: Arc<Mutex<HashMap<(String, String), TaskCompletion>>>,
}

impl TaskService {
    pub fn new(catalog: Vec<TaskDef>) -> Self {
        Self {
            catalog,
            completions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The promo campaign's social-follow tasks.
    pub fn seeded() -> Self {
        Self::new(vec![
            TaskDef {
                id: "follow-x".to_string(),
                name: "Follow on X".to_string(),
                description: "Follow our official X account".to_string(),
                platform: "twitter".to_string(),
                url: "https://x.com/wishgate".to_string(),
                points: 1000,
                active: true,
            },
            TaskDef {
                id: "follow-instagram".to_string(),
                name: "Follow on Instagram".to_string(),
                description: "Follow our Instagram for updates".to_string(),
                platform: "instagram".to_string(),
                url: "https://instagram.com/wishgate".to_string(),
                points: 1000,
                active: true,
            },
            TaskDef {
                id: "join-telegram".to_string(),
                name: "Join Telegram".to_string(),
                description: "Join our official Telegram channel".to_string(),
                platform: "telegram".to_string(),
                url: "https://t.me/wishgate".to_string(),
                points: 1000,
                active: true,
            },
        ])
    }

    pub fn all(&self) -> &[TaskDef] {
        &self.catalog
    }

    /// First completion awards `task.points × multiplier` through the
    /// account service; repeats are rejected without touching the balance.
    pub async fn complete(
        &self,
        user_id: &str,
        task_id: &str,
        accounts: &AccountService,
    ) -> Result<TaskCompletion, TaskError> {
        let task = self
            .catalog
            .iter()
            .find(|task| task.id == task_id)
            .ok_or(TaskError::UnknownTask)?;
        if !task.active {
            return Err(TaskError::InactiveTask);
        }

        let mut completions = self.completions.lock().await;
        let key = (user_id.to_string(), task_id.to_string());
        if completions.contains_key(&key) {
            return Err(TaskError::AlreadyCompleted);
        }

        let points_awarded = accounts.award_points(user_id, task.points).await?;
        let completion = TaskCompletion {
            user_id: user_id.to_string(),
            task_id: task_id.to_string(),
            points_awarded,
            completed_at_unix_ms: now_unix_millis(),
        };
        completions.insert(key, completion.clone());
        info!(user_id, task_id, points_awarded, "task completed");
        Ok(completion)
    }

    pub async fn completions_for(&self, user_id: &str) -> Vec<TaskCompletion> {
        let completions = self.completions.lock().await;
        let mut rows: Vec<TaskCompletion> = completions
            .values()
            .filter(|completion| completion.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|completion| completion.completed_at_unix_ms);
        rows
    }
}
