use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use swarm_types::{Agent, BudgetState, Task, TaskResult, TaskStatus};

use crate::deps::{add_edge, remove_edge, transitive_chain};
use crate::{page, sort_newest_first, StateStore, TaskFilter};

/// Ephemeral backend. Everything lives in process memory and dies with it.
#[derive(Default)]
pub struct MemoryStore {
    tasks: RwLock<HashMap<String, Task>>,
    results: RwLock<HashMap<String, TaskResult>>,
    agents: RwLock<HashMap<String, Agent>>,
    budget: RwLock<BudgetState>,
    forward: RwLock<HashMap<String, Vec<String>>>,
    reverse: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budget(budget: BudgetState) -> Self {
        Self {
            budget: RwLock::new(budget),
            ..Self::default()
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn set_task(&self, task: Task) -> anyhow::Result<()> {
        self.tasks.write().await.insert(task.id.clone(), task);
        Ok(())
    }

    async fn get_task(&self, id: &str) -> anyhow::Result<Option<Task>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn delete_task(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self.tasks.write().await.remove(id).is_some())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> anyhow::Result<Vec<Task>> {
        let mut rows = self
            .tasks
            .read()
            .await
            .values()
            .filter(|task| filter.accepts(task))
            .cloned()
            .collect::<Vec<_>>();
        sort_newest_first(&mut rows);
        Ok(page(rows, filter.offset, filter.limit))
    }

    async fn set_result(&self, result: TaskResult) -> anyhow::Result<()> {
        self.results
            .write()
            .await
            .insert(result.task_id.clone(), result);
        Ok(())
    }

    async fn get_result(&self, task_id: &str) -> anyhow::Result<Option<TaskResult>> {
        Ok(self.results.read().await.get(task_id).cloned())
    }

    async fn set_agent(&self, agent: Agent) -> anyhow::Result<()> {
        self.agents.write().await.insert(agent.id.clone(), agent);
        Ok(())
    }

    async fn get_agent(&self, id: &str) -> anyhow::Result<Option<Agent>> {
        Ok(self.agents.read().await.get(id).cloned())
    }

    async fn delete_agent(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self.agents.write().await.remove(id).is_some())
    }

    async fn list_agents(&self) -> anyhow::Result<Vec<Agent>> {
        let mut rows = self.agents.read().await.values().cloned().collect::<Vec<_>>();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(rows)
    }

    async fn active_agent_count(&self) -> anyhow::Result<usize> {
        Ok(self
            .agents
            .read()
            .await
            .values()
            .filter(|agent| agent.status.is_active())
            .count())
    }

    async fn get_budget(&self) -> anyhow::Result<BudgetState> {
        Ok(self.budget.read().await.clone())
    }

    async fn set_budget(&self, budget: BudgetState) -> anyhow::Result<()> {
        *self.budget.write().await = budget;
        Ok(())
    }

    async fn add_spend(&self, cents: u64) -> anyhow::Result<BudgetState> {
        let mut budget = self.budget.write().await;
        budget.daily_used_cents += cents;
        budget.weekly_used_cents += cents;
        budget.updated_at = Utc::now();
        Ok(budget.clone())
    }

    async fn reset_daily(&self) -> anyhow::Result<()> {
        let mut budget = self.budget.write().await;
        budget.daily_used_cents = 0;
        budget.paused = false;
        budget.updated_at = Utc::now();
        Ok(())
    }

    async fn reset_weekly(&self) -> anyhow::Result<()> {
        let mut budget = self.budget.write().await;
        budget.weekly_used_cents = 0;
        budget.updated_at = Utc::now();
        Ok(())
    }

    async fn add_dependency(&self, task_id: &str, depends_on: &str) -> anyhow::Result<()> {
        let mut forward = self.forward.write().await;
        let mut reverse = self.reverse.write().await;
        add_edge(&mut forward, &mut reverse, task_id, depends_on);
        Ok(())
    }

    async fn remove_dependency(&self, task_id: &str, depends_on: &str) -> anyhow::Result<()> {
        let mut forward = self.forward.write().await;
        let mut reverse = self.reverse.write().await;
        remove_edge(&mut forward, &mut reverse, task_id, depends_on);
        Ok(())
    }

    async fn dependencies_of(&self, task_id: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .forward
            .read()
            .await
            .get(task_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn dependents_of(&self, task_id: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .reverse
            .read()
            .await
            .get(task_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn dependency_chain(&self, task_id: &str) -> anyhow::Result<Vec<String>> {
        Ok(transitive_chain(&*self.forward.read().await, task_id))
    }

    async fn dependencies_completed(&self, task_id: &str) -> anyhow::Result<bool> {
        let deps = self.dependencies_of(task_id).await?;
        let tasks = self.tasks.read().await;
        Ok(deps.iter().all(|dep| {
            tasks
                .get(dep)
                .map(|task| task.status == TaskStatus::Completed)
                .unwrap_or(false)
        }))
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use swarm_types::{ModelKind, TaskContext, TaskPriority, TaskType};

    fn task(id: &str, status: TaskStatus) -> Task {
        Task {
            id: id.to_string(),
            task_type: TaskType::Code,
            priority: TaskPriority::Normal,
            model: Some(ModelKind::Sonnet),
            prompt: "work".to_string(),
            context: TaskContext {
                branch: "main".to_string(),
                ..TaskContext::default()
            },
            max_tokens: None,
            timeout_minutes: 30,
            budget_cents: 100,
            created_at: Utc::now(),
            parent_task_id: None,
            assigned_agent: None,
            status,
        }
    }

    #[tokio::test]
    async fn set_then_get_returns_structural_copy() {
        let store = MemoryStore::new();
        let original = task("t-1", TaskStatus::Pending);
        store.set_task(original.clone()).await.expect("set");
        let loaded = store.get_task("t-1").await.expect("get").expect("present");
        assert_eq!(
            serde_json::to_value(&loaded).expect("json"),
            serde_json::to_value(&original).expect("json")
        );
    }

    #[tokio::test]
    async fn absent_entries_are_none_not_errors() {
        let store = MemoryStore::new();
        assert!(store.get_task("missing").await.expect("get").is_none());
        assert!(store.get_result("missing").await.expect("get").is_none());
        assert!(store.get_agent("missing").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn listing_is_newest_first_and_paged() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let mut t = task(&format!("t-{i}"), TaskStatus::Pending);
            t.created_at = Utc::now() - Duration::seconds(10 - i);
            store.set_task(t).await.expect("set");
        }
        let rows = store
            .list_tasks(&TaskFilter {
                limit: Some(2),
                ..TaskFilter::default()
            })
            .await
            .expect("list");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "t-4");
        assert_eq!(rows[1].id, "t-3");

        let offset = store
            .list_tasks(&TaskFilter {
                offset: Some(4),
                ..TaskFilter::default()
            })
            .await
            .expect("list");
        assert_eq!(offset.len(), 1);
        assert_eq!(offset[0].id, "t-0");
    }

    #[tokio::test]
    async fn dependencies_completed_treats_missing_tasks_as_unmet() {
        let store = MemoryStore::new();
        store.set_task(task("t-1", TaskStatus::Pending)).await.expect("set");
        store.add_dependency("t-1", "ghost").await.expect("edge");
        assert!(!store.dependencies_completed("t-1").await.expect("check"));

        store
            .set_task(task("ghost", TaskStatus::Completed))
            .await
            .expect("set");
        assert!(store.dependencies_completed("t-1").await.expect("check"));
    }

    #[tokio::test]
    async fn spend_increments_both_counters_and_reset_is_idempotent() {
        let store = MemoryStore::new();
        let after = store.add_spend(40).await.expect("spend");
        assert_eq!(after.daily_used_cents, 40);
        assert_eq!(after.weekly_used_cents, 40);

        store.reset_daily().await.expect("reset");
        store.reset_daily().await.expect("reset again");
        let budget = store.get_budget().await.expect("budget");
        assert_eq!(budget.daily_used_cents, 0);
        assert_eq!(budget.weekly_used_cents, 40);
    }

    #[tokio::test]
    async fn active_agent_count_tracks_running_and_initializing() {
        let store = MemoryStore::new();
        let mut a = Agent::new("a-1");
        a.status = swarm_types::AgentStatus::Running;
        let mut b = Agent::new("a-2");
        b.status = swarm_types::AgentStatus::Idle;
        store.set_agent(a).await.expect("set");
        store.set_agent(b).await.expect("set");
        assert_eq!(store.active_agent_count().await.expect("count"), 1);
    }
}
