use std::sync::Arc;

use serde::Serialize;

use swarm_types::{Agent, ModelKind, Task, TaskType};

use crate::scoring::{PerformanceRecord, PerformanceTracker};

const OPUS_BUDGET_CENTS: u32 = 500;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDecision {
    /// `None` means no idle agent is suitable and a fresh worker should be
    /// spawned.
    pub agent_id: Option<String>,
    pub model: ModelKind,
    pub confidence: f64,
    pub reason: String,
}

/// Picks a worker for a task from the idle pool using the score tracker.
#[derive(Clone)]
pub struct Router {
    tracker: Arc<PerformanceTracker>,
}

impl Router {
    pub fn new(tracker: Arc<PerformanceTracker>) -> Self {
        Self { tracker }
    }

    pub async fn route(&self, task: &Task, idle_agents: &[Agent]) -> RouteDecision {
        if idle_agents.is_empty() {
            return RouteDecision {
                agent_id: None,
                model: select_model(task, None),
                confidence: 0.5,
                reason: "no idle agents; spawn new".to_string(),
            };
        }

        let mut best: Option<(&Agent, PerformanceRecord, f64)> = None;
        for agent in idle_agents {
            let record = self.tracker.snapshot(&agent.id, task.task_type).await;
            let score = record.score();
            let replace = match &best {
                None => true,
                Some((_, current, current_score)) => {
                    if (score - current_score).abs() > f64::EPSILON {
                        score > *current_score
                    } else if record.completed_count != current.completed_count {
                        record.completed_count > current.completed_count
                    } else {
                        record.updated_at < current.updated_at
                    }
                }
            };
            if replace {
                best = Some((agent, record, score));
            }
        }

        let (agent, record, score) = best.expect("non-empty idle pool");
        RouteDecision {
            agent_id: Some(agent.id.clone()),
            model: select_model(task, Some(&record)),
            confidence: confidence(score, &record),
            reason: describe(&agent.id, &record),
        }
    }
}

fn select_model(task: &Task, record: Option<&PerformanceRecord>) -> ModelKind {
    if let Some(model) = task.model {
        return model;
    }
    if matches!(task.task_type, TaskType::Security | TaskType::Review) {
        return ModelKind::Opus;
    }
    if task.budget_cents >= OPUS_BUDGET_CENTS {
        return ModelKind::Opus;
    }
    if let Some(record) = record {
        if record.success_rate < 0.6 && record.completed_count >= 5 {
            return ModelKind::Opus;
        }
    }
    ModelKind::Sonnet
}

fn confidence(score: f64, record: &PerformanceRecord) -> f64 {
    let mut value = score.min(1.0);
    if record.completed_count < 5 {
        value *= 0.6;
    } else if record.completed_count < 20 {
        value *= 0.8;
    }
    if record.success_rate > 0.3 && record.success_rate < 0.7 {
        value *= 0.8;
    }
    (value * 100.0).round() / 100.0
}

fn describe(agent_id: &str, record: &PerformanceRecord) -> String {
    let mut parts = Vec::new();
    if record.success_rate >= 0.8 {
        parts.push("high success rate".to_string());
    } else if record.success_rate < 0.4 {
        parts.push("weak success rate".to_string());
    }
    if record.completed_count >= 20 {
        parts.push("experienced".to_string());
    } else if record.completed_count < 5 {
        parts.push("little history".to_string());
    }
    if parts.is_empty() {
        parts.push("best composite score".to_string());
    }
    format!("selected {agent_id}: {}", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use swarm_types::{TaskContext, TaskPriority, TaskStatus};

    fn task(task_type: TaskType, budget_cents: u32, model: Option<ModelKind>) -> Task {
        Task {
            id: "t-1".to_string(),
            task_type,
            priority: TaskPriority::Normal,
            model,
            prompt: "work".to_string(),
            context: TaskContext {
                branch: "main".to_string(),
                ..TaskContext::default()
            },
            max_tokens: None,
            timeout_minutes: 30,
            budget_cents,
            created_at: Utc::now(),
            parent_task_id: None,
            assigned_agent: None,
            status: TaskStatus::Pending,
        }
    }

    fn idle(id: &str) -> Agent {
        let mut agent = Agent::new(id);
        agent.status = swarm_types::AgentStatus::Idle;
        agent
    }

    #[tokio::test]
    async fn empty_pool_always_asks_for_a_spawn() {
        let router = Router::new(Arc::new(PerformanceTracker::new()));
        let decision = router
            .route(&task(TaskType::Code, 100, None), &[])
            .await;
        assert_eq!(decision.agent_id, None);
        assert!((decision.confidence - 0.5).abs() < 1e-9);
        assert!(decision.reason.contains("spawn new"));
    }

    #[tokio::test]
    async fn seasoned_agent_wins_with_high_confidence() {
        let tracker = Arc::new(PerformanceTracker::new());
        // Drive a-1's record to roughly {0.9 success, 60s, 50c, 30 runs}.
        for _ in 0..30 {
            tracker
                .record_result("a-1", TaskType::Code, true, 60_000, 50)
                .await;
        }
        let router = Router::new(tracker);
        let decision = router
            .route(&task(TaskType::Code, 100, None), &[idle("a-1"), idle("a-2")])
            .await;
        assert_eq!(decision.agent_id.as_deref(), Some("a-1"));
        assert!(decision.confidence >= 0.8, "confidence {}", decision.confidence);
        assert!(decision.reason.contains("high success rate"));
        assert!(decision.reason.contains("experienced"));
        assert_eq!(decision.model, ModelKind::Sonnet);
    }

    #[tokio::test]
    async fn security_tasks_route_to_opus_regardless_of_winner() {
        let router = Router::new(Arc::new(PerformanceTracker::new()));
        let decision = router
            .route(
                &task(TaskType::Security, 100, None),
                &[idle("a-1"), idle("a-2")],
            )
            .await;
        assert_eq!(decision.model, ModelKind::Opus);
        assert!(decision.agent_id.is_some());
    }

    #[tokio::test]
    async fn explicit_model_is_honoured() {
        let router = Router::new(Arc::new(PerformanceTracker::new()));
        let decision = router
            .route(
                &task(TaskType::Security, 100, Some(ModelKind::Sonnet)),
                &[idle("a-1")],
            )
            .await;
        assert_eq!(decision.model, ModelKind::Sonnet);
    }

    #[tokio::test]
    async fn big_budgets_get_opus() {
        let router = Router::new(Arc::new(PerformanceTracker::new()));
        let decision = router
            .route(&task(TaskType::Code, 500, None), &[idle("a-1")])
            .await;
        assert_eq!(decision.model, ModelKind::Opus);
    }

    #[tokio::test]
    async fn struggling_agents_are_escalated_to_opus() {
        let tracker = Arc::new(PerformanceTracker::new());
        for _ in 0..8 {
            tracker
                .record_result("a-1", TaskType::Code, false, 60_000, 30)
                .await;
        }
        let router = Router::new(tracker);
        let decision = router
            .route(&task(TaskType::Code, 100, None), &[idle("a-1")])
            .await;
        assert_eq!(decision.model, ModelKind::Opus);
    }

    #[tokio::test]
    async fn fresh_records_get_the_low_history_confidence_haircut() {
        let router = Router::new(Arc::new(PerformanceTracker::new()));
        let decision = router
            .route(&task(TaskType::Code, 100, None), &[idle("a-1")])
            .await;
        // Default record scores ~0.71, then *0.6 for count<5 and *0.8 for
        // the indecisive success band.
        assert!(decision.confidence < 0.5);
        assert!(decision.confidence > 0.0);
    }

    #[tokio::test]
    async fn ties_break_on_completion_count() {
        let tracker = Arc::new(PerformanceTracker::new());
        // Identical averages; both counts sit past the experience-bonus cap
        // so the composite scores tie exactly and only the count differs.
        {
            let mut records = tracker.records.write().await;
            let mut record = PerformanceRecord::default();
            record.completed_count = 500;
            records.insert(("a-low".to_string(), TaskType::Code), record.clone());
            record.completed_count = 600;
            records.insert(("a-high".to_string(), TaskType::Code), record);
        }
        let router = Router::new(tracker);
        let decision = router
            .route(
                &task(TaskType::Code, 100, None),
                &[idle("a-low"), idle("a-high")],
            )
            .await;
        assert_eq!(decision.agent_id.as_deref(), Some("a-high"));
    }
}
