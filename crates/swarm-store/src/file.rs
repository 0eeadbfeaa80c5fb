use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;

use swarm_types::{Agent, BudgetState, Task, TaskResult, TaskStatus};

use crate::deps::{add_edge, remove_edge, transitive_chain};
use crate::{page, sort_newest_first, StateStore, TaskFilter};

const TASK_TTL_DAYS: i64 = 7;
const RESULT_TTL_DAYS: i64 = 7;
const AGENT_TTL_DAYS: i64 = 1;
const DEP_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Expiring<T> {
    value: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl<T> Expiring<T> {
    fn with_ttl_days(value: T, days: i64) -> Self {
        Self {
            value,
            expires_at: Some(Utc::now() + Duration::days(days)),
        }
    }

    fn live(&self) -> bool {
        self.expires_at.map(|at| at > Utc::now()).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct DepFile {
    forward: HashMap<String, Expiring<Vec<String>>>,
    reverse: HashMap<String, Expiring<Vec<String>>>,
}

/// Durable backend. Each keyspace is a JSON file under the base directory,
/// hydrated at startup and flushed on every mutation. Records carry an
/// `expires_at` stamp; expired entries are invisible to reads and pruned by
/// `sweep`.
pub struct FileStore {
    base: PathBuf,
    tasks: RwLock<HashMap<String, Expiring<Task>>>,
    results: RwLock<HashMap<String, Expiring<TaskResult>>>,
    agents: RwLock<HashMap<String, Expiring<Agent>>>,
    budget: RwLock<BudgetState>,
    deps: RwLock<DepFile>,
}

async fn load_map<T: DeserializeOwned>(path: &Path) -> HashMap<String, Expiring<T>> {
    let Ok(raw) = fs::read_to_string(path).await else {
        return HashMap::new();
    };
    serde_json::from_str::<HashMap<String, Expiring<T>>>(&raw).unwrap_or_default()
}

impl FileStore {
    pub async fn new(base: impl AsRef<Path>) -> anyhow::Result<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base).await?;

        let mut tasks = load_map::<Task>(&base.join("tasks.json")).await;
        let mut results = load_map::<TaskResult>(&base.join("results.json")).await;
        let mut agents = load_map::<Agent>(&base.join("agents.json")).await;
        let mut deps = match fs::read_to_string(base.join("deps.json")).await {
            Ok(raw) => serde_json::from_str::<DepFile>(&raw).unwrap_or_default(),
            Err(_) => DepFile::default(),
        };
        let budget = match fs::read_to_string(base.join("budget.json")).await {
            Ok(raw) => serde_json::from_str::<BudgetState>(&raw).unwrap_or_default(),
            Err(_) => BudgetState::default(),
        };

        let pruned = prune(&mut tasks) + prune(&mut results) + prune(&mut agents);
        deps.forward.retain(|_, entry| entry.live());
        deps.reverse.retain(|_, entry| entry.live());
        if pruned > 0 {
            tracing::info!("file store pruned {pruned} expired records at startup");
        }

        let store = Self {
            base,
            tasks: RwLock::new(tasks),
            results: RwLock::new(results),
            agents: RwLock::new(agents),
            budget: RwLock::new(budget),
            deps: RwLock::new(deps),
        };
        store.flush().await?;
        Ok(store)
    }

    /// Drops expired records from every keyspace and persists the survivors.
    pub async fn sweep(&self) -> anyhow::Result<usize> {
        let mut removed = 0;
        removed += prune(&mut *self.tasks.write().await);
        removed += prune(&mut *self.results.write().await);
        removed += prune(&mut *self.agents.write().await);
        {
            let mut deps = self.deps.write().await;
            let before = deps.forward.len() + deps.reverse.len();
            deps.forward.retain(|_, entry| entry.live());
            deps.reverse.retain(|_, entry| entry.live());
            removed += before - (deps.forward.len() + deps.reverse.len());
        }
        if removed > 0 {
            self.flush().await?;
        }
        Ok(removed)
    }

    async fn flush(&self) -> anyhow::Result<()> {
        let tasks = self.tasks.read().await.clone();
        fs::write(
            self.base.join("tasks.json"),
            serde_json::to_string_pretty(&tasks)?,
        )
        .await?;
        let results = self.results.read().await.clone();
        fs::write(
            self.base.join("results.json"),
            serde_json::to_string_pretty(&results)?,
        )
        .await?;
        let agents = self.agents.read().await.clone();
        fs::write(
            self.base.join("agents.json"),
            serde_json::to_string_pretty(&agents)?,
        )
        .await?;
        let budget = self.budget.read().await.clone();
        fs::write(
            self.base.join("budget.json"),
            serde_json::to_string_pretty(&budget)?,
        )
        .await?;
        let deps = self.deps.read().await.clone();
        fs::write(
            self.base.join("deps.json"),
            serde_json::to_string_pretty(&deps)?,
        )
        .await?;
        Ok(())
    }

    async fn live_forward(&self) -> HashMap<String, Vec<String>> {
        self.deps
            .read()
            .await
            .forward
            .iter()
            .filter(|(_, entry)| entry.live())
            .map(|(id, entry)| (id.clone(), entry.value.clone()))
            .collect()
    }
}

fn prune<T>(map: &mut HashMap<String, Expiring<T>>) -> usize {
    let before = map.len();
    map.retain(|_, entry| entry.live());
    before - map.len()
}

#[async_trait]
impl StateStore for FileStore {
    async fn set_task(&self, task: Task) -> anyhow::Result<()> {
        self.tasks.write().await.insert(
            task.id.clone(),
            Expiring::with_ttl_days(task, TASK_TTL_DAYS),
        );
        self.flush().await
    }

    async fn get_task(&self, id: &str) -> anyhow::Result<Option<Task>> {
        Ok(self
            .tasks
            .read()
            .await
            .get(id)
            .filter(|entry| entry.live())
            .map(|entry| entry.value.clone()))
    }

    async fn delete_task(&self, id: &str) -> anyhow::Result<bool> {
        let removed = self.tasks.write().await.remove(id).is_some();
        if removed {
            self.flush().await?;
        }
        Ok(removed)
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> anyhow::Result<Vec<Task>> {
        let mut rows = self
            .tasks
            .read()
            .await
            .values()
            .filter(|entry| entry.live())
            .map(|entry| entry.value.clone())
            .filter(|task| filter.accepts(task))
            .collect::<Vec<_>>();
        sort_newest_first(&mut rows);
        Ok(page(rows, filter.offset, filter.limit))
    }

    async fn set_result(&self, result: TaskResult) -> anyhow::Result<()> {
        self.results.write().await.insert(
            result.task_id.clone(),
            Expiring::with_ttl_days(result, RESULT_TTL_DAYS),
        );
        self.flush().await
    }

    async fn get_result(&self, task_id: &str) -> anyhow::Result<Option<TaskResult>> {
        Ok(self
            .results
            .read()
            .await
            .get(task_id)
            .filter(|entry| entry.live())
            .map(|entry| entry.value.clone()))
    }

    async fn set_agent(&self, agent: Agent) -> anyhow::Result<()> {
        self.agents.write().await.insert(
            agent.id.clone(),
            Expiring::with_ttl_days(agent, AGENT_TTL_DAYS),
        );
        self.flush().await
    }

    async fn get_agent(&self, id: &str) -> anyhow::Result<Option<Agent>> {
        Ok(self
            .agents
            .read()
            .await
            .get(id)
            .filter(|entry| entry.live())
            .map(|entry| entry.value.clone()))
    }

    async fn delete_agent(&self, id: &str) -> anyhow::Result<bool> {
        let removed = self.agents.write().await.remove(id).is_some();
        if removed {
            self.flush().await?;
        }
        Ok(removed)
    }

    async fn list_agents(&self) -> anyhow::Result<Vec<Agent>> {
        let mut rows = self
            .agents
            .read()
            .await
            .values()
            .filter(|entry| entry.live())
            .map(|entry| entry.value.clone())
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(rows)
    }

    async fn active_agent_count(&self) -> anyhow::Result<usize> {
        Ok(self
            .agents
            .read()
            .await
            .values()
            .filter(|entry| entry.live() && entry.value.status.is_active())
            .count())
    }

    async fn get_budget(&self) -> anyhow::Result<BudgetState> {
        Ok(self.budget.read().await.clone())
    }

    async fn set_budget(&self, budget: BudgetState) -> anyhow::Result<()> {
        *self.budget.write().await = budget;
        self.flush().await
    }

    async fn add_spend(&self, cents: u64) -> anyhow::Result<BudgetState> {
        let updated = {
            let mut budget = self.budget.write().await;
            budget.daily_used_cents += cents;
            budget.weekly_used_cents += cents;
            budget.updated_at = Utc::now();
            budget.clone()
        };
        self.flush().await?;
        Ok(updated)
    }

    async fn reset_daily(&self) -> anyhow::Result<()> {
        {
            let mut budget = self.budget.write().await;
            budget.daily_used_cents = 0;
            budget.paused = false;
            budget.updated_at = Utc::now();
        }
        self.flush().await
    }

    async fn reset_weekly(&self) -> anyhow::Result<()> {
        {
            let mut budget = self.budget.write().await;
            budget.weekly_used_cents = 0;
            budget.updated_at = Utc::now();
        }
        self.flush().await
    }

    async fn add_dependency(&self, task_id: &str, depends_on: &str) -> anyhow::Result<()> {
        {
            let mut deps = self.deps.write().await;
            let mut forward = take_live(&mut deps.forward);
            let mut reverse = take_live(&mut deps.reverse);
            add_edge(&mut forward, &mut reverse, task_id, depends_on);
            deps.forward = stamp(forward);
            deps.reverse = stamp(reverse);
        }
        self.flush().await
    }

    async fn remove_dependency(&self, task_id: &str, depends_on: &str) -> anyhow::Result<()> {
        {
            let mut deps = self.deps.write().await;
            let mut forward = take_live(&mut deps.forward);
            let mut reverse = take_live(&mut deps.reverse);
            remove_edge(&mut forward, &mut reverse, task_id, depends_on);
            deps.forward = stamp(forward);
            deps.reverse = stamp(reverse);
        }
        self.flush().await
    }

    async fn dependencies_of(&self, task_id: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .deps
            .read()
            .await
            .forward
            .get(task_id)
            .filter(|entry| entry.live())
            .map(|entry| entry.value.clone())
            .unwrap_or_default())
    }

    async fn dependents_of(&self, task_id: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .deps
            .read()
            .await
            .reverse
            .get(task_id)
            .filter(|entry| entry.live())
            .map(|entry| entry.value.clone())
            .unwrap_or_default())
    }

    async fn dependency_chain(&self, task_id: &str) -> anyhow::Result<Vec<String>> {
        Ok(transitive_chain(&self.live_forward().await, task_id))
    }

    async fn dependencies_completed(&self, task_id: &str) -> anyhow::Result<bool> {
        let deps = self.dependencies_of(task_id).await?;
        let tasks = self.tasks.read().await;
        Ok(deps.iter().all(|dep| {
            tasks
                .get(dep)
                .filter(|entry| entry.live())
                .map(|entry| entry.value.status == TaskStatus::Completed)
                .unwrap_or(false)
        }))
    }

    async fn ping(&self) -> anyhow::Result<()> {
        fs::metadata(&self.base).await?;
        Ok(())
    }
}

fn take_live(
    map: &mut HashMap<String, Expiring<Vec<String>>>,
) -> HashMap<String, Vec<String>> {
    map.drain()
        .filter(|(_, entry)| entry.live())
        .map(|(id, entry)| (id, entry.value))
        .collect()
}

fn stamp(map: HashMap<String, Vec<String>>) -> HashMap<String, Expiring<Vec<String>>> {
    map.into_iter()
        .map(|(id, value)| (id, Expiring::with_ttl_days(value, DEP_TTL_DAYS)))
        .collect()
}
