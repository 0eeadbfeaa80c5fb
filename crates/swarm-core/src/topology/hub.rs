use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use swarm_store::StateStore;
use swarm_types::{
    AgentStatus, Notification, NotificationType, ResultStatus, Task, TaskResult, TaskStatus,
};

use crate::event_bus::EventBus;
use crate::scheduler::Scheduler;
use crate::topology::{TopologyError, TopologyHandler, TopologyKind};

/// Default shape: every task flows through the central scheduler and no
/// agent-to-agent paths exist.
#[derive(Clone)]
pub struct HubTopology {
    store: Arc<dyn StateStore>,
    scheduler: Scheduler,
    bus: EventBus,
}

impl HubTopology {
    pub fn new(store: Arc<dyn StateStore>, scheduler: Scheduler, bus: EventBus) -> Self {
        Self {
            store,
            scheduler,
            bus,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

#[async_trait]
impl TopologyHandler for HubTopology {
    fn kind(&self) -> TopologyKind {
        TopologyKind::Hub
    }

    async fn submit_task(&self, task: Task) -> Result<(), TopologyError> {
        let task_id = task.id.clone();
        let task_type = task.task_type;
        self.scheduler.register_task(task).await?;
        self.bus.publish(Notification::new(
            NotificationType::TaskCreated,
            json!({"taskId": task_id, "taskType": task_type}),
        ));
        Ok(())
    }

    async fn on_task_complete(&self, result: TaskResult) -> Result<(), TopologyError> {
        let succeeded = result.status != ResultStatus::Failed;
        self.store.set_result(result.clone()).await?;

        if let Some(mut task) = self.store.get_task(&result.task_id).await? {
            task.status = if succeeded {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            };
            self.store.set_task(task).await?;
        }

        if let Some(mut agent) = self.store.get_agent(&result.agent_id).await? {
            // Successful agents return to the idle pool for reuse; failures
            // are retired.
            agent.status = if succeeded {
                AgentStatus::Idle
            } else {
                AgentStatus::Failed
            };
            agent.current_task = None;
            agent.completed_at = Some(Utc::now());
            agent.cost_cents += result.cost_cents;
            agent.tokens.add(&result.tokens);
            self.store.set_agent(agent).await?;
            if succeeded {
                self.bus.publish(Notification::new(
                    NotificationType::AgentIdle,
                    json!({"agentId": result.agent_id}),
                ));
            }
        }

        self.bus.publish(Notification::new(
            if succeeded {
                NotificationType::TaskCompleted
            } else {
                NotificationType::TaskFailed
            },
            json!({
                "taskId": result.task_id,
                "agentId": result.agent_id,
                "status": result.status,
                "costCents": result.cost_cents,
            }),
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_store::MemoryStore;
    use swarm_types::{Agent, TaskContext, TaskPriority, TaskType, TokenUsage};

    use crate::graph::DependencyGraph;
    use crate::router::Router;
    use crate::scoring::PerformanceTracker;

    fn topology() -> (HubTopology, Arc<MemoryStore>, EventBus) {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let store_dyn: Arc<dyn StateStore> = store.clone();
        let bus = EventBus::new();
        let scheduler = Scheduler::new(
            store_dyn.clone(),
            DependencyGraph::new(store_dyn.clone()),
            Router::new(Arc::new(PerformanceTracker::new())),
            bus.clone(),
        );
        (
            HubTopology::new(store_dyn, scheduler, bus.clone()),
            store,
            bus,
        )
    }

    fn task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            task_type: TaskType::Code,
            priority: TaskPriority::Normal,
            model: None,
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
            status: TaskStatus::Pending,
        }
    }

    fn result(task_id: &str, agent_id: &str, status: ResultStatus) -> TaskResult {
        TaskResult {
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            status,
            files: Vec::new(),
            summary: None,
            tests: None,
            review: None,
            tokens: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
                cached_tokens: 0,
            },
            duration_ms: 1_000,
            cost_cents: 25,
            base_commit: None,
            result_commit: None,
            conflicts: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn submission_stores_and_announces_the_task() {
        let (topology, store, bus) = topology();
        let mut rx = bus.subscribe();
        topology.submit_task(task("t-1")).await.expect("submit");
        assert!(store.get_task("t-1").await.expect("get").is_some());
        let event = rx.recv().await.expect("event");
        assert_eq!(event.kind, NotificationType::TaskCreated);
    }

    #[tokio::test]
    async fn completion_flips_status_and_updates_the_agent() {
        let (topology, store, bus) = topology();
        topology.submit_task(task("t-1")).await.expect("submit");
        let mut agent = Agent::new("a-1");
        agent.status = AgentStatus::Running;
        agent.current_task = Some("t-1".to_string());
        store.set_agent(agent).await.expect("agent");

        let mut rx = bus.subscribe();
        topology
            .on_task_complete(result("t-1", "a-1", ResultStatus::Success))
            .await
            .expect("complete");

        let task = store.get_task("t-1").await.expect("get").expect("present");
        assert_eq!(task.status, TaskStatus::Completed);
        let agent = store.get_agent("a-1").await.expect("get").expect("present");
        assert_eq!(agent.status, AgentStatus::Idle);
        assert_eq!(agent.current_task, None);
        assert_eq!(agent.cost_cents, 25);
        assert!(store.get_result("t-1").await.expect("get").is_some());
        let event = rx.recv().await.expect("event");
        assert_eq!(event.kind, NotificationType::TaskCompleted);
    }

    #[tokio::test]
    async fn failed_results_mark_the_task_failed() {
        let (topology, store, _) = topology();
        topology.submit_task(task("t-1")).await.expect("submit");
        topology
            .on_task_complete(result("t-1", "a-1", ResultStatus::Failed))
            .await
            .expect("complete");
        let task = store.get_task("t-1").await.expect("get").expect("present");
        assert_eq!(task.status, TaskStatus::Failed);
    }
}
