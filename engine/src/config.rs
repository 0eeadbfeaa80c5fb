use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use swarm_core::topology::TopologyKind;
use swarm_providers::{ProviderKind, ProviderSettings};
use swarm_types::BudgetConfig;

fn default_schedule_interval_secs() -> u64 {
    15
}

fn default_max_concurrent() -> usize {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    File,
}

impl Default for StoreKind {
    fn default() -> Self {
        StoreKind::Memory
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            required: true,
            jwt_secret: None,
        }
    }
}

/// Engine configuration: a JSON file under the state dir overlaid with
/// environment variables (environment wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub store: StoreKind,
    #[serde(default)]
    pub topology: TopologyKind,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default = "default_schedule_interval_secs")]
    pub schedule_interval_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_per_agent: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: ProviderSettings::default(),
            store: StoreKind::default(),
            topology: TopologyKind::default(),
            budget: BudgetConfig::default(),
            auth: AuthSettings::default(),
            schedule_interval_secs: default_schedule_interval_secs(),
            max_concurrent_per_agent: default_max_concurrent(),
        }
    }
}

impl EngineConfig {
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = match fs::read_to_string(path).await {
            Ok(raw) => serde_json::from_str::<EngineConfig>(&raw)
                .map_err(|error| anyhow::anyhow!("invalid config {}: {error}", path.display()))?,
            Err(_) => EngineConfig::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(secret) = non_empty_env("SWARM_JWT_SECRET") {
            self.auth.jwt_secret = Some(secret);
        }
        if let Some(key) = non_empty_env("ANTHROPIC_API_KEY") {
            self.provider.secrets.anthropic_api_key = key;
        }
        if let Some(token) = non_empty_env("GITHUB_TOKEN") {
            self.provider.secrets.github_token = Some(token);
        }
        if let Some(kind) = non_empty_env("SWARM_PROVIDER") {
            match kind.as_str() {
                "machines" => self.provider.kind = ProviderKind::Machines,
                "jobs" => self.provider.kind = ProviderKind::Jobs,
                "mock" => self.provider.kind = ProviderKind::Mock,
                other => tracing::warn!("ignoring unknown SWARM_PROVIDER `{other}`"),
            }
        }
        if let Some(kind) = non_empty_env("SWARM_STORE") {
            match kind.as_str() {
                "memory" => self.store = StoreKind::Memory,
                "file" => self.store = StoreKind::File,
                other => tracing::warn!("ignoring unknown SWARM_STORE `{other}`"),
            }
        }
        if let Some(kind) = non_empty_env("SWARM_TOPOLOGY") {
            match kind.as_str() {
                "hub" => self.topology = TopologyKind::Hub,
                "hierarchical" => self.topology = TopologyKind::Hierarchical,
                "mesh" => self.topology = TopologyKind::Mesh,
                other => tracing::warn!("ignoring unknown SWARM_TOPOLOGY `{other}`"),
            }
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_mock_memory_hub() {
        let config = EngineConfig::default();
        assert_eq!(config.provider.kind, ProviderKind::Mock);
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.topology, TopologyKind::Hub);
        assert!(config.auth.required);
    }

    #[test]
    fn partial_config_files_fill_with_defaults() {
        let parsed: EngineConfig = serde_json::from_str(
            r#"{"store": "file", "schedule_interval_secs": 5}"#,
        )
        .expect("parse");
        assert_eq!(parsed.store, StoreKind::File);
        assert_eq!(parsed.schedule_interval_secs, 5);
        assert_eq!(parsed.max_concurrent_per_agent, 1);
        assert_eq!(parsed.provider.kind, ProviderKind::Mock);
    }
}
