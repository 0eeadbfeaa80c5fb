use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use swarm_store::{StateStore, TaskFilter};
use swarm_types::{Agent, ModelKind, Notification, NotificationType, Task, TaskStatus};

use crate::event_bus::EventBus;
use crate::graph::{DependencyGraph, GraphError};
use crate::router::Router;

pub const DEFAULT_MAX_CONCURRENT_PER_AGENT: usize = 1;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub task_id: String,
    pub agent_id: String,
    pub model: ModelKind,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deferred {
    pub task_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Blocked {
    pub task_id: String,
    pub unmet_dependencies: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingDecision {
    pub assignments: Vec<Assignment>,
    pub deferred: Vec<Deferred>,
    pub blocked: Vec<Blocked>,
}

/// Composes the graph, store and router into scheduling passes.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn StateStore>,
    graph: DependencyGraph,
    router: Router,
    bus: EventBus,
    max_concurrent_per_agent: usize,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn StateStore>,
        graph: DependencyGraph,
        router: Router,
        bus: EventBus,
    ) -> Self {
        Self {
            store,
            graph,
            router,
            bus,
            max_concurrent_per_agent: DEFAULT_MAX_CONCURRENT_PER_AGENT,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent_per_agent: usize) -> Self {
        self.max_concurrent_per_agent = max_concurrent_per_agent.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Stores the task and registers its dependency edges. A cycle rejects
    /// the registration and nothing of the task remains.
    pub async fn register_task(&self, task: Task) -> Result<(), GraphError> {
        let task_id = task.id.clone();
        let dependencies = task.context.dependencies.clone();
        self.store.set_task(task).await.map_err(|e| GraphError::Store {
            message: e.to_string(),
        })?;
        for dependency in &dependencies {
            if let Err(error) = self.graph.add_dependency(&task_id, dependency).await {
                let _ = self.store.delete_task(&task_id).await;
                return Err(error);
            }
        }
        Ok(())
    }

    pub async fn schedule(
        &self,
        available_agents: &[Agent],
    ) -> anyhow::Result<SchedulingDecision> {
        let mut decision = SchedulingDecision::default();

        let ready = self.graph.get_ready_tasks().await?;
        let mut ready_tasks: Vec<Task> = Vec::new();
        for task in ready {
            // Re-check status; a cancel may have landed since the ready scan.
            if let Some(current) = self.store.get_task(&task.id).await? {
                if current.status == TaskStatus::Pending {
                    ready_tasks.push(current);
                }
            }
        }
        ready_tasks.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        let ready_ids: HashSet<String> =
            ready_tasks.iter().map(|task| task.id.clone()).collect();

        let mut held = self.held_task_counts().await?;
        let mut pool: Vec<Agent> = available_agents
            .iter()
            .filter(|agent| self.has_capacity(agent, &held))
            .cloned()
            .collect();

        for task in &ready_tasks {
            let routed = self.router.route(task, &pool).await;
            match routed.agent_id {
                Some(agent_id) => {
                    decision.assignments.push(Assignment {
                        task_id: task.id.clone(),
                        agent_id: agent_id.clone(),
                        model: routed.model,
                        score: routed.confidence,
                        reason: routed.reason.clone(),
                    });
                    let count = held.entry(agent_id.clone()).or_insert(0);
                    *count += 1;
                    if *count >= self.max_concurrent_per_agent {
                        pool.retain(|agent| agent.id != agent_id);
                    }
                    self.bus.publish(Notification::new(
                        NotificationType::TaskAssigned,
                        json!({
                            "taskId": task.id,
                            "agentId": agent_id,
                            "reason": routed.reason,
                        }),
                    ));
                }
                None => {
                    decision.deferred.push(Deferred {
                        task_id: task.id.clone(),
                        reason: "no suitable agent".to_string(),
                    });
                }
            }
        }

        // Visibility pass: pending tasks missing from the ready set, with the
        // dependencies still standing in their way.
        let pending = self
            .store
            .list_tasks(&TaskFilter::with_status(TaskStatus::Pending))
            .await?;
        for task in pending {
            if ready_ids.contains(&task.id) {
                continue;
            }
            let mut unmet = Vec::new();
            for dependency in self.graph.get_dependencies(&task.id).await? {
                let completed = self
                    .store
                    .get_task(&dependency)
                    .await?
                    .map(|dep| dep.status == TaskStatus::Completed)
                    .unwrap_or(false);
                if !completed {
                    unmet.push(dependency);
                }
            }
            decision.blocked.push(Blocked {
                task_id: task.id,
                unmet_dependencies: unmet,
            });
        }

        Ok(decision)
    }

    /// Marks the task completed and returns the dependents that became ready.
    pub async fn complete_task(&self, task_id: &str) -> anyhow::Result<Vec<Task>> {
        if let Some(mut task) = self.store.get_task(task_id).await? {
            task.status = TaskStatus::Completed;
            self.store.set_task(task).await?;
        }

        let mut newly_ready = Vec::new();
        for dependent in self.graph.get_dependents(task_id).await? {
            let Some(task) = self.store.get_task(&dependent).await? else {
                continue;
            };
            if task.status == TaskStatus::Pending
                && self.store.dependencies_completed(&dependent).await?
            {
                newly_ready.push(task);
            }
        }
        Ok(newly_ready)
    }

    /// Reverts every task the lost agent held back to pending and re-routes
    /// them over the remaining agents.
    pub async fn rebalance(
        &self,
        lost_agent_id: &str,
        remaining_agents: &[Agent],
    ) -> anyhow::Result<Vec<Assignment>> {
        let assigned = self
            .store
            .list_tasks(&TaskFilter::with_status(TaskStatus::Assigned))
            .await?;
        let mut orphaned = Vec::new();
        for mut task in assigned {
            if task.assigned_agent.as_deref() != Some(lost_agent_id) {
                continue;
            }
            task.status = TaskStatus::Pending;
            task.assigned_agent = None;
            self.store.set_task(task.clone()).await?;
            orphaned.push(task);
        }

        let mut reassignments = Vec::new();
        for task in &orphaned {
            let routed = self.router.route(task, remaining_agents).await;
            if let Some(agent_id) = routed.agent_id {
                reassignments.push(Assignment {
                    task_id: task.id.clone(),
                    agent_id: agent_id.clone(),
                    model: routed.model,
                    score: routed.confidence,
                    reason: routed.reason.clone(),
                });
                self.bus.publish(Notification::new(
                    NotificationType::TaskAssigned,
                    json!({
                        "taskId": task.id,
                        "agentId": agent_id,
                        "reassignedFrom": lost_agent_id,
                    }),
                ));
            }
        }
        Ok(reassignments)
    }

    async fn held_task_counts(&self) -> anyhow::Result<HashMap<String, usize>> {
        let mut held: HashMap<String, usize> = HashMap::new();
        for status in [TaskStatus::Assigned, TaskStatus::Running] {
            for task in self
                .store
                .list_tasks(&TaskFilter::with_status(status))
                .await?
            {
                if let Some(agent) = task.assigned_agent {
                    *held.entry(agent).or_insert(0) += 1;
                }
            }
        }
        Ok(held)
    }

    fn has_capacity(&self, agent: &Agent, held: &HashMap<String, usize>) -> bool {
        let holding = held.get(&agent.id).copied().unwrap_or(0);
        agent.status == swarm_types::AgentStatus::Idle
            && holding < self.max_concurrent_per_agent
    }
}
