use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use swarm_types::{Task, TaskResult};

mod api;
mod jobs;
mod machines;
mod mock;
pub mod retry;
mod spawn;

pub use jobs::{JobsConfig, JobsProvider};
pub use machines::{MachinesConfig, MachinesProvider};
pub use mock::MockProvider;
pub use spawn::{resource_tier, worker_env, ResourceTier, SpawnSecrets};

pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 1_800_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Completed,
    Failed,
    Timeout,
}

#[derive(Debug, Clone)]
pub struct ExecutionHandle {
    pub execution_id: String,
    pub agent_id: String,
}

#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub status: CompletionStatus,
    /// Parsed worker result when the backend surfaces one; the orchestrator
    /// synthesises a record otherwise.
    pub result: Option<TaskResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveJob {
    pub execution_id: String,
    pub task_id: String,
    pub started_at: DateTime<Utc>,
}

/// Contract every execution backend fulfils. A 404 from the backend always
/// means "execution finished and was reaped", never an error.
#[async_trait]
pub trait ExecutionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute_task(&self, task: &Task) -> anyhow::Result<ExecutionHandle>;

    async fn execution_status(&self, execution_id: &str) -> anyhow::Result<ExecutionStatus>;

    async fn wait_for_completion(
        &self,
        execution_id: &str,
        timeout_ms: u64,
    ) -> anyhow::Result<CompletionOutcome>;

    async fn cancel_execution(&self, execution_id: &str) -> anyhow::Result<()>;

    async fn active_job_count(&self) -> usize;

    async fn active_jobs(&self) -> Vec<ActiveJob>;
}

/// Which backend to run against, decided exactly once at process start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Machines,
    Jobs,
    Mock,
}

impl Default for ProviderKind {
    fn default() -> Self {
        ProviderKind::Mock
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderSettings {
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default)]
    pub machines: Option<MachinesConfig>,
    #[serde(default)]
    pub jobs: Option<JobsConfig>,
    #[serde(default)]
    pub secrets: SpawnSecrets,
}

pub fn build_provider(settings: &ProviderSettings) -> anyhow::Result<Arc<dyn ExecutionProvider>> {
    match settings.kind {
        ProviderKind::Machines => {
            let config = settings
                .machines
                .clone()
                .ok_or_else(|| anyhow::anyhow!("machines provider selected but not configured"))?;
            Ok(Arc::new(MachinesProvider::new(
                config,
                settings.secrets.clone(),
            )))
        }
        ProviderKind::Jobs => {
            let config = settings
                .jobs
                .clone()
                .ok_or_else(|| anyhow::anyhow!("jobs provider selected but not configured"))?;
            Ok(Arc::new(JobsProvider::new(config, settings.secrets.clone())))
        }
        ProviderKind::Mock => Ok(Arc::new(MockProvider::new())),
    }
}

pub(crate) fn agent_id_for(prefix: &str, task_id: &str) -> String {
    let short = task_id.get(..8).unwrap_or(task_id);
    format!("{prefix}-agent-{short}")
}
