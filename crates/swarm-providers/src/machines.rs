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

const WAIT_SLICE_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachinesConfig {
    pub api_base: String,
    pub api_token: String,
    pub app_name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MachineResponse {
    id: String,
    #[serde(default)]
    state: String,
}

/// Provider backed by a machine-lifecycle REST API: create a machine per
/// task, block on the wait endpoint, stop to cancel.
pub struct MachinesProvider {
    config: MachinesConfig,
    secrets: SpawnSecrets,
    client: Client,
    retry: RetryPolicy,
    active: RwLock<HashMap<String, ActiveJob>>,
}

impl MachinesProvider {
    pub fn new(config: MachinesConfig, secrets: SpawnSecrets) -> Self {
        Self {
            config,
            secrets,
            client: Client::new(),
            retry: RetryPolicy::default(),
            active: RwLock::new(HashMap::new()),
        }
    }

    fn machines_url(&self) -> String {
        format!(
            "{}/v1/apps/{}/machines",
            self.config.api_base.trim_end_matches('/'),
            self.config.app_name
        )
    }

    fn machine_url(&self, machine_id: &str) -> String {
        format!("{}/{machine_id}", self.machines_url())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> anyhow::Result<MachineResponse> {
        let response = request
            .bearer_auth(&self.config.api_token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status.as_u16(), body).into());
        }
        Ok(response.json::<MachineResponse>().await?)
    }

    fn map_state(state: &str) -> ExecutionStatus {
        match state {
            "created" | "starting" | "queued" => ExecutionStatus::Pending,
            "started" | "replacing" => ExecutionStatus::Running,
            "stopping" | "stopped" | "destroying" | "destroyed" => ExecutionStatus::Completed,
            _ => ExecutionStatus::Failed,
        }
    }
}

#[async_trait]
impl ExecutionProvider for MachinesProvider {
    fn name(&self) -> &'static str {
        "machines"
    }

    async fn execute_task(&self, task: &Task) -> anyhow::Result<ExecutionHandle> {
        let agent_id = agent_id_for("machine", &task.id);
        let tier = resource_tier(task);
        let env: HashMap<String, String> =
            worker_env(task, &agent_id, &self.secrets)?.into_iter().collect();
        let payload = json!({
            "name": agent_id,
            "region": self.config.region,
            "config": {
                "image": self.config.image,
                "guest": {
                    "cpus": tier.cpus(),
                    "memory_mb": tier.memory_mb(),
                    "cpu_kind": "shared",
                },
                "env": env,
                "auto_destroy": true,
            }
        });

        let machine = self
            .retry
            .run(classify_api_error, || {
                self.send(self.client.post(self.machines_url()).json(&payload))
            })
            .await?;

        tracing::info!(
            "spawned machine {} (state {}) for task {}",
            machine.id,
            machine.state,
            task.id
        );
        self.active.write().await.insert(
            machine.id.clone(),
            ActiveJob {
                execution_id: machine.id.clone(),
                task_id: task.id.clone(),
                started_at: Utc::now(),
            },
        );
        Ok(ExecutionHandle {
            execution_id: machine.id,
            agent_id,
        })
    }

    async fn execution_status(&self, execution_id: &str) -> anyhow::Result<ExecutionStatus> {
        let fetched = self
            .retry
            .run(classify_api_error, || {
                self.send(self.client.get(self.machine_url(execution_id)))
            })
            .await;
        match fetched {
            Ok(machine) => Ok(Self::map_state(&machine.state)),
            Err(error) if is_not_found(&error) => Ok(ExecutionStatus::Completed),
            Err(error) => {
                tracing::warn!("machine status fetch failed for {execution_id}: {error}");
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
        let wait_url = format!("{}/wait", self.machine_url(execution_id));
        let wait_slice = WAIT_SLICE_SECS.to_string();

        loop {
            if tokio::time::Instant::now() >= deadline {
                return Ok(CompletionOutcome {
                    status: CompletionStatus::Timeout,
                    result: None,
                });
            }

            let waited = self
                .retry
                .run(classify_api_error, || {
                    self.send(
                        self.client
                            .get(&wait_url)
                            .query(&[("state", "stopped"), ("timeout", wait_slice.as_str())])
                            .timeout(Duration::from_secs(WAIT_SLICE_SECS + 15)),
                    )
                })
                .await;

            match waited {
                Ok(machine) if Self::map_state(&machine.state) == ExecutionStatus::Completed => {
                    self.active.write().await.remove(execution_id);
                    return Ok(CompletionOutcome {
                        status: CompletionStatus::Completed,
                        result: None,
                    });
                }
                // Not yet stopped; the blocking slice elapsed, go around.
                Ok(_) => continue,
                Err(error) if is_not_found(&error) => {
                    self.active.write().await.remove(execution_id);
                    return Ok(CompletionOutcome {
                        status: CompletionStatus::Completed,
                        result: None,
                    });
                }
                Err(error) => {
                    self.active.write().await.remove(execution_id);
                    tracing::warn!("machine wait failed for {execution_id}: {error}");
                    return Ok(CompletionOutcome {
                        status: CompletionStatus::Failed,
                        result: None,
                    });
                }
            }
        }
    }

    async fn cancel_execution(&self, execution_id: &str) -> anyhow::Result<()> {
        let stopped = self
            .retry
            .run(classify_api_error, || {
                self.send(
                    self.client
                        .post(format!("{}/stop", self.machine_url(execution_id))),
                )
            })
            .await;
        self.active.write().await.remove(execution_id);
        match stopped {
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
    fn machine_states_map_to_execution_statuses() {
        assert_eq!(
            MachinesProvider::map_state("created"),
            ExecutionStatus::Pending
        );
        assert_eq!(
            MachinesProvider::map_state("started"),
            ExecutionStatus::Running
        );
        assert_eq!(
            MachinesProvider::map_state("stopped"),
            ExecutionStatus::Completed
        );
        assert_eq!(
            MachinesProvider::map_state("destroyed"),
            ExecutionStatus::Completed
        );
        assert_eq!(
            MachinesProvider::map_state("broken"),
            ExecutionStatus::Failed
        );
    }

    #[test]
    fn urls_are_rooted_at_the_app() {
        let provider = MachinesProvider::new(
            MachinesConfig {
                api_base: "https://machines.example.dev/".to_string(),
                api_token: "tk".to_string(),
                app_name: "swarm-workers".to_string(),
                image: "registry.example.dev/worker:latest".to_string(),
                region: None,
            },
            SpawnSecrets::default(),
        );
        assert_eq!(
            provider.machine_url("m-1"),
            "https://machines.example.dev/v1/apps/swarm-workers/machines/m-1"
        );
    }
}
