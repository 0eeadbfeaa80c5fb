use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;

use swarm_types::{FileAction, FileChange, ResultStatus, Task, TaskResult, TaskType, TokenUsage};

use crate::{
    agent_id_for, ActiveJob, CompletionOutcome, CompletionStatus, ExecutionHandle,
    ExecutionProvider, ExecutionStatus,
};

#[derive(Debug, Clone)]
struct SimulatedExecution {
    task: Task,
    agent_id: String,
    started_at: DateTime<Utc>,
    completes_at: DateTime<Utc>,
}

/// Simulate mode: executions complete on a per-type schedule without
/// touching any remote API.
#[derive(Default)]
pub struct MockProvider {
    executions: RwLock<HashMap<String, SimulatedExecution>>,
}

fn simulated_duration(task_type: TaskType) -> ChronoDuration {
    match task_type {
        TaskType::Doc => ChronoDuration::seconds(2),
        TaskType::Test => ChronoDuration::seconds(5),
        TaskType::Security => ChronoDuration::seconds(8),
        _ => ChronoDuration::seconds(3),
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn synthesize_result(execution: &SimulatedExecution) -> TaskResult {
        let task = &execution.task;
        TaskResult {
            task_id: task.id.clone(),
            agent_id: execution.agent_id.clone(),
            status: ResultStatus::Success,
            files: task
                .context
                .files
                .iter()
                .map(|path| FileChange {
                    path: path.clone(),
                    action: FileAction::Modify,
                })
                .collect(),
            summary: Some(format!(
                "simulated {} run for `{}`",
                task.task_type.as_str(),
                task.context.branch
            )),
            tests: None,
            review: None,
            tokens: TokenUsage {
                input_tokens: 1_200,
                output_tokens: 800,
                cached_tokens: 0,
            },
            duration_ms: (execution.completes_at - execution.started_at)
                .num_milliseconds()
                .max(0) as u64,
            cost_cents: 5,
            base_commit: task.context.base_commit.clone(),
            result_commit: None,
            conflicts: None,
            error: None,
        }
    }
}

#[async_trait]
impl ExecutionProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn execute_task(&self, task: &Task) -> anyhow::Result<ExecutionHandle> {
        let execution_id = format!("sim-{}", task.id);
        let agent_id = agent_id_for("mock", &task.id);
        let now = Utc::now();
        self.executions.write().await.insert(
            execution_id.clone(),
            SimulatedExecution {
                task: task.clone(),
                agent_id: agent_id.clone(),
                started_at: now,
                completes_at: now + simulated_duration(task.task_type),
            },
        );
        Ok(ExecutionHandle {
            execution_id,
            agent_id,
        })
    }

    async fn execution_status(&self, execution_id: &str) -> anyhow::Result<ExecutionStatus> {
        let executions = self.executions.read().await;
        // Gone means finished and reaped, same as a 404 from a real backend.
        let Some(execution) = executions.get(execution_id) else {
            return Ok(ExecutionStatus::Completed);
        };
        if Utc::now() >= execution.completes_at {
            Ok(ExecutionStatus::Completed)
        } else {
            Ok(ExecutionStatus::Running)
        }
    }

    async fn wait_for_completion(
        &self,
        execution_id: &str,
        timeout_ms: u64,
    ) -> anyhow::Result<CompletionOutcome> {
        let completes_at = {
            let executions = self.executions.read().await;
            let Some(execution) = executions.get(execution_id) else {
                return Ok(CompletionOutcome {
                    status: CompletionStatus::Completed,
                    result: None,
                });
            };
            execution.completes_at
        };

        let remaining = (completes_at - Utc::now()).num_milliseconds().max(0) as u64;
        if remaining > timeout_ms {
            tokio::time::sleep(std::time::Duration::from_millis(timeout_ms)).await;
            return Ok(CompletionOutcome {
                status: CompletionStatus::Timeout,
                result: None,
            });
        }
        tokio::time::sleep(std::time::Duration::from_millis(remaining)).await;

        let Some(execution) = self.executions.write().await.remove(execution_id) else {
            return Ok(CompletionOutcome {
                status: CompletionStatus::Completed,
                result: None,
            });
        };
        Ok(CompletionOutcome {
            status: CompletionStatus::Completed,
            result: Some(Self::synthesize_result(&execution)),
        })
    }

    async fn cancel_execution(&self, execution_id: &str) -> anyhow::Result<()> {
        self.executions.write().await.remove(execution_id);
        Ok(())
    }

    async fn active_job_count(&self) -> usize {
        self.executions.read().await.len()
    }

    async fn active_jobs(&self) -> Vec<ActiveJob> {
        self.executions
            .read()
            .await
            .iter()
            .map(|(execution_id, execution)| ActiveJob {
                execution_id: execution_id.clone(),
                task_id: execution.task.id.clone(),
                started_at: execution.started_at,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_types::{TaskContext, TaskPriority, TaskStatus};

    fn doc_task() -> Task {
        Task {
            id: "aaaa1111-0000-0000-0000-000000000000".to_string(),
            task_type: TaskType::Doc,
            priority: TaskPriority::Normal,
            model: None,
            prompt: "write docs".to_string(),
            context: TaskContext {
                branch: "main".to_string(),
                files: vec!["README.md".to_string()],
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

    #[tokio::test]
    async fn doc_task_completes_on_schedule_and_drains_active_jobs() {
        let provider = MockProvider::new();
        let handle = provider.execute_task(&doc_task()).await.expect("execute");
        assert_eq!(handle.agent_id, "mock-agent-aaaa1111");
        assert_eq!(provider.active_job_count().await, 1);

        let started = std::time::Instant::now();
        let outcome = provider
            .wait_for_completion(&handle.execution_id, 10_000)
            .await
            .expect("wait");
        let elapsed = started.elapsed().as_millis();
        assert_eq!(outcome.status, CompletionStatus::Completed);
        assert!((1_800..=2_400).contains(&elapsed), "elapsed {elapsed}ms");

        let result = outcome.result.expect("synthesized result");
        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(result.files.len(), 1);
        assert_eq!(provider.active_job_count().await, 0);
    }

    #[tokio::test]
    async fn wait_times_out_when_the_deadline_is_shorter_than_the_run() {
        let provider = MockProvider::new();
        let handle = provider.execute_task(&doc_task()).await.expect("execute");
        let outcome = provider
            .wait_for_completion(&handle.execution_id, 50)
            .await
            .expect("wait");
        assert_eq!(outcome.status, CompletionStatus::Timeout);
        // Execution is still tracked so a cancel can reap it.
        assert_eq!(provider.active_job_count().await, 1);
    }

    #[tokio::test]
    async fn unknown_execution_reports_completed() {
        let provider = MockProvider::new();
        let status = provider.execution_status("missing").await.expect("status");
        assert_eq!(status, ExecutionStatus::Completed);
        provider.cancel_execution("missing").await.expect("cancel");
    }
}
