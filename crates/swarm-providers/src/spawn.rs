use serde::{Deserialize, Serialize};

use swarm_types::{ModelKind, Task, TaskType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceTier {
    Light,
    Standard,
    Heavy,
}

impl ResourceTier {
    pub fn cpus(self) -> u32 {
        match self {
            ResourceTier::Light => 1,
            ResourceTier::Standard => 2,
            ResourceTier::Heavy => 4,
        }
    }

    pub fn memory_mb(self) -> u32 {
        match self {
            ResourceTier::Light => 1024,
            ResourceTier::Standard => 2048,
            ResourceTier::Heavy => 4096,
        }
    }
}

pub fn resource_tier(task: &Task) -> ResourceTier {
    if task.task_type == TaskType::Security {
        return ResourceTier::Heavy;
    }
    if task.model == Some(ModelKind::Opus) && task.task_type == TaskType::Code {
        return ResourceTier::Heavy;
    }
    if task.task_type == TaskType::Doc {
        return ResourceTier::Light;
    }
    if task.task_type == TaskType::Review && task.context.files.len() < 3 {
        return ResourceTier::Light;
    }
    ResourceTier::Standard
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpawnSecrets {
    #[serde(default)]
    pub anthropic_api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,
}

/// Environment handed to a spawned worker. The queue-binding variables are
/// set to empty strings so the worker reports over stdout instead of trying
/// to consume from an external queue.
pub fn worker_env(
    task: &Task,
    agent_id: &str,
    secrets: &SpawnSecrets,
) -> anyhow::Result<Vec<(String, String)>> {
    let mut env = vec![
        ("TASK_ID".to_string(), task.id.clone()),
        ("TASK_JSON".to_string(), serde_json::to_string(task)?),
        ("AGENT_ID".to_string(), agent_id.to_string()),
        (
            "MODEL".to_string(),
            task.model.unwrap_or_default().as_str().to_string(),
        ),
        (
            "ANTHROPIC_API_KEY".to_string(),
            secrets.anthropic_api_key.clone(),
        ),
        ("QUEUE_URL".to_string(), String::new()),
        ("RESULT_QUEUE".to_string(), String::new()),
    ];
    if let Some(token) = &secrets.github_token {
        env.push(("GITHUB_TOKEN".to_string(), token.clone()));
    }
    Ok(env)
}
