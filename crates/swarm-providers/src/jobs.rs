use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;

use swarm_types::Task;

use crate::api::{classify_api_error, is_not_found, ApiError};
use crate::retry::RetryPolicy;
use crate::spawn::{resource_tier, worker_env, SpawnSecrets};
use crate::{
    agent_id_for, ActiveJob, CompletionOutcome, CompletionStatus, ExecutionHandle,
    ExecutionProvider, ExecutionStatus,
};

fn default_poll_interval_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub api_base: String,
    pub api_token: String,
    /// Pre-defined job template invoked per task.
    pub job_template: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Deserialize)]
struct JobRunResponse {
    id: String,
    #[serde(default)]
    status: String,
}

/// Provider backed by a managed job API. The API has no blocking wait
/// endpoint, so completion is observed by polling run status.
pub struct JobsProvider {
    config: JobsConfig,
    secrets: SpawnSecrets,
    client: Client,
    retry: RetryPolicy,
    active: RwLock<HashMap<String, ActiveJob>>,
}

impl JobsProvider {
    pub fn new(config: JobsConfig, secrets: SpawnSecrets) -> Self {
        Self {
            config,
            secrets,
            client: Client::new(),
            retry: RetryPolicy::default(),
            active: RwLock::new(HashMap::new()),
        }
    }

    fn runs_url(&self) -> String {
        format!(
            "{}/v1/jobs/{}/runs",
            self.config.api_base.trim_end_matches('/'),
            self.config.job_template
        )
    }

    fn run_url(&self, run_id: &str) -> String {
        format!(
            "{}/v1/jobs/runs/{run_id}",
            self.config.api_base.trim_end_matches('/')
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> anyhow::Result<JobRunResponse> {
        let response = request
            .bearer_auth(&self.config.api_token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status.as_u16(), body).into());
        }
        Ok(response.json::<JobRunResponse>().await?)
    }

    fn map_status(status: &str) -> ExecutionStatus {
        match status {
            "queued" | "pending" | "scheduled" => ExecutionStatus::Pending,
            "running" | "starting" => ExecutionStatus::Running,
            "succeeded" | "completed" => ExecutionStatus::Completed,
            _ => ExecutionStatus::Failed,
        }
    }
}

#[async_trait]
impl ExecutionProvider for JobsProvider {
    fn name(&self) -> &'static str {
        "jobs"
    }

    async fn execute_task(&self, task: &Task) -> anyhow::Result<ExecutionHandle> {
        let agent_id = agent_id_for("job", &task.id);
        let tier = resource_tier(task);
        let env: HashMap<String, String> =
            worker_env(task, &agent_id, &self.secrets)?.into_iter().collect();
        let payload = json!({
            "env": env,
            "resources": {
                "cpus": tier.cpus(),
                "memory_mb": tier.memory_mb(),
            },
            "labels": { "taskId": task.id },
        });

        let run = self
            .retry
            .run(classify_api_error, || {
                self.send(self.client.post(self.runs_url()).json(&payload))
            })
            .await?;

        tracing::info!("started job run {} for task {}", run.id, task.id);
        self.active.write().await.insert(
            run.id.clone(),
            ActiveJob {
                execution_id: run.id.clone(),
                task_id: task.id.clone(),
                started_at: Utc::now(),
            },
        );
        Ok(ExecutionHandle {
            execution_id: run.id,
            agent_id,
        })
    }

    async fn execution_status(&self, execution_id: &str) -> anyhow::Result<ExecutionStatus> {
        let fetched = self
            .retry
            .run(classify_api_error, || {
                self.send(self.client.get(self.run_url(execution_id)))
            })
            .await;
        match fetched {
            Ok(run) => Ok(Self::map_status(&run.status)),
            Err(error) if is_not_found(&error) => Ok(ExecutionStatus::Completed),
            Err(error) => {
                tracing::warn!("job status fetch failed for {execution_id}: {error}");
                Ok(ExecutionStatus::Failed)
            }
        }
    }

    async fn wait_for_completion(
        &self,
        execution_id: &str,
        timeout_ms: u64,
    ) -> anyhow::Result<CompletionOutcome> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            match self.execution_status(execution_id).await? {
                ExecutionStatus::Completed => {
                    self.active.write().await.remove(execution_id);
                    return Ok(CompletionOutcome {
                        status: CompletionStatus::Completed,
                        result: None,
                    });
                }
                ExecutionStatus::Failed => {
                    self.active.write().await.remove(execution_id);
                    return Ok(CompletionOutcome {
                        status: CompletionStatus::Failed,
                        result: None,
                    });
                }
                ExecutionStatus::Pending | ExecutionStatus::Running => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(CompletionOutcome {
                    status: CompletionStatus::Timeout,
                    result: None,
                });
            }
            tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
        }
    }

    async fn cancel_execution(&self, execution_id: &str) -> anyhow::Result<()> {
        let cancelled = self
            .retry
            .run(classify_api_error, || {
                self.send(
                    self.client
                        .post(format!("{}/cancel", self.run_url(execution_id))),
                )
            })
            .await;
        self.active.write().await.remove(execution_id);
        match cancelled {
            Ok(_) => Ok(()),
            Err(error) if is_not_found(&error) => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn active_job_count(&self) -> usize {
        self.active.read().await.len()
    }

    async fn active_jobs(&self) -> Vec<ActiveJob> {
        self.active.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_statuses_map_to_execution_statuses() {
        assert_eq!(JobsProvider::map_status("queued"), ExecutionStatus::Pending);
        assert_eq!(JobsProvider::map_status("running"), ExecutionStatus::Running);
        assert_eq!(
            JobsProvider::map_status("succeeded"),
            ExecutionStatus::Completed
        );
        assert_eq!(JobsProvider::map_status("failed"), ExecutionStatus::Failed);
    }

    #[test]
    fn poll_interval_defaults_when_omitted() {
        let config: JobsConfig = serde_json::from_value(json!({
            "api_base": "https://jobs.example.dev",
            "api_token": "tk",
            "job_template": "swarm-worker"
        }))
        .expect("parse");
        assert_eq!(config.poll_interval_ms, 5_000);
    }
}
