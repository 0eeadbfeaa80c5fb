use async_trait::async_trait;

use swarm_types::{Agent, BudgetState, Task, TaskPriority, TaskResult, TaskStatus, TaskType};

mod deps;
mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Listing filter shared by both backends. Listing is newest-first.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
    pub priority: Option<TaskPriority>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    fn accepts(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(task_type) = self.task_type {
            if task.task_type != task_type {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if task.priority != priority {
                return false;
            }
        }
        true
    }
}

/// Single operation set shared by the ephemeral and durable backends. Absent
/// entries come back as `Ok(None)`, never as errors.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn set_task(&self, task: Task) -> anyhow::Result<()>;
    async fn get_task(&self, id: &str) -> anyhow::Result<Option<Task>>;
    async fn delete_task(&self, id: &str) -> anyhow::Result<bool>;
    async fn list_tasks(&self, filter: &TaskFilter) -> anyhow::Result<Vec<Task>>;

    async fn set_result(&self, result: TaskResult) -> anyhow::Result<()>;
    async fn get_result(&self, task_id: &str) -> anyhow::Result<Option<TaskResult>>;

    async fn set_agent(&self, agent: Agent) -> anyhow::Result<()>;
    async fn get_agent(&self, id: &str) -> anyhow::Result<Option<Agent>>;
    async fn delete_agent(&self, id: &str) -> anyhow::Result<bool>;
    async fn list_agents(&self) -> anyhow::Result<Vec<Agent>>;
    async fn active_agent_count(&self) -> anyhow::Result<usize>;

    async fn get_budget(&self) -> anyhow::Result<BudgetState>;
    async fn set_budget(&self, budget: BudgetState) -> anyhow::Result<()>;
    /// Atomically increments both the daily and weekly counters.
    async fn add_spend(&self, cents: u64) -> anyhow::Result<BudgetState>;
    async fn reset_daily(&self) -> anyhow::Result<()>;
    async fn reset_weekly(&self) -> anyhow::Result<()>;

    async fn add_dependency(&self, task_id: &str, depends_on: &str) -> anyhow::Result<()>;
    async fn remove_dependency(&self, task_id: &str, depends_on: &str) -> anyhow::Result<()>;
    async fn dependencies_of(&self, task_id: &str) -> anyhow::Result<Vec<String>>;
    async fn dependents_of(&self, task_id: &str) -> anyhow::Result<Vec<String>>;
    async fn dependency_chain(&self, task_id: &str) -> anyhow::Result<Vec<String>>;
    async fn dependencies_completed(&self, task_id: &str) -> anyhow::Result<bool>;

    async fn ping(&self) -> anyhow::Result<()>;
}

fn sort_newest_first(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

fn page<T>(rows: Vec<T>, offset: Option<usize>, limit: Option<usize>) -> Vec<T> {
    rows.into_iter()
        .skip(offset.unwrap_or(0))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}
