use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;

use swarm_types::{Notification, NotificationType, Task};

use crate::event_bus::EventBus;

const HISTORY_LIMIT: usize = 500;
const STALE_LOCK_MINUTES: i64 = 30;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLock {
    pub agent_id: String,
    pub task_id: String,
    pub branch: String,
    pub locked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConflict {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub files: Vec<String>,
    pub agents: Vec<String>,
    pub severity: ConflictSeverity,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentCheck {
    pub safe: bool,
    pub potential_conflicts: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureOverlap {
    pub directory: String,
    pub agents: Vec<String>,
}

#[derive(Debug, Clone)]
struct ConflictRecord {
    file: String,
    agents: (String, String),
    severity: ConflictSeverity,
    at: DateTime<Utc>,
}

/// In-process file-lock table across concurrent agents. At most one lock per
/// path; overlapping activity produces graded conflict events instead of
/// blocking.
pub struct ConflictMonitor {
    locks: RwLock<HashMap<String, FileLock>>,
    by_agent: RwLock<HashMap<String, HashSet<String>>>,
    history: RwLock<VecDeque<ConflictRecord>>,
    bus: EventBus,
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_critical(path: &str) -> bool {
    let name = file_name(path);
    name == "package.json"
        || name == "package-lock.json"
        || name.starts_with(".env")
        || name.starts_with("config.")
        || name.starts_with("schema.")
        || name.starts_with("migration")
}

fn is_test_file(path: &str) -> bool {
    let name = file_name(path);
    name.contains(".test.") || name.contains(".spec.")
}

impl ConflictMonitor {
    pub fn new(bus: EventBus) -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
            by_agent: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::with_capacity(HISTORY_LIMIT)),
            bus,
        }
    }

    /// Locks every free path to the caller; paths held by another agent
    /// yield a `potential` conflict event instead.
    pub async fn register_file_activity(
        &self,
        agent_id: &str,
        task_id: &str,
        files: &[String],
        branch: &str,
    ) -> Vec<FileConflict> {
        let mut conflicts = Vec::new();
        let now = Utc::now();
        let mut locks = self.locks.write().await;
        let mut by_agent = self.by_agent.write().await;

        for file in files {
            match locks.get(file) {
                Some(existing) if existing.agent_id != agent_id => {
                    let severity = severity_for(file, branch, &existing.branch);
                    let recommendation = recommend(file, existing, now);
                    let conflict = FileConflict {
                        kind: "potential",
                        files: vec![file.clone()],
                        agents: vec![existing.agent_id.clone(), agent_id.to_string()],
                        severity,
                        recommendation,
                    };
                    self.push_history(ConflictRecord {
                        file: file.clone(),
                        agents: (existing.agent_id.clone(), agent_id.to_string()),
                        severity,
                        at: now,
                    })
                    .await;
                    self.bus.publish(Notification::new(
                        NotificationType::ConflictPotential,
                        json!({
                            "taskId": task_id,
                            "agentId": agent_id,
                            "conflict": conflict,
                        }),
                    ));
                    conflicts.push(conflict);
                }
                Some(_) => {}
                None => {
                    locks.insert(
                        file.clone(),
                        FileLock {
                            agent_id: agent_id.to_string(),
                            task_id: task_id.to_string(),
                            branch: branch.to_string(),
                            locked_at: now,
                        },
                    );
                    by_agent
                        .entry(agent_id.to_string())
                        .or_default()
                        .insert(file.clone());
                }
            }
        }
        conflicts
    }

    /// Idempotent: releasing an agent that holds nothing is a no-op.
    pub async fn release_agent_locks(&self, agent_id: &str) -> usize {
        let mut by_agent = self.by_agent.write().await;
        let Some(files) = by_agent.remove(agent_id) else {
            return 0;
        };
        let mut locks = self.locks.write().await;
        let mut released = 0;
        for file in files {
            if locks
                .get(&file)
                .map(|lock| lock.agent_id == agent_id)
                .unwrap_or(false)
            {
                locks.remove(&file);
                released += 1;
            }
        }
        if released > 0 {
            self.bus.publish(Notification::new(
                NotificationType::ConflictResolved,
                json!({"agentId": agent_id, "releasedLocks": released}),
            ));
        }
        released
    }

    /// Gate consulted before dispatch: does the task's file scope collide
    /// with locks held by other agents?
    pub async fn check_task_assignment(&self, task: &Task, agent_id: &str) -> AssignmentCheck {
        let locks = self.locks.read().await;
        let potential_conflicts: Vec<String> = task
            .context
            .files
            .iter()
            .filter(|file| {
                locks
                    .get(*file)
                    .map(|lock| lock.agent_id != agent_id)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        AssignmentCheck {
            safe: potential_conflicts.is_empty(),
            potential_conflicts,
        }
    }

    /// Directories where more than one agent currently holds locks.
    pub async fn detect_feature_overlap(&self) -> Vec<FeatureOverlap> {
        let locks = self.locks.read().await;
        let mut by_directory: HashMap<String, HashSet<String>> = HashMap::new();
        for (file, lock) in locks.iter() {
            let directory = match file.rsplit_once('/') {
                Some((dir, _)) => dir.to_string(),
                None => ".".to_string(),
            };
            by_directory
                .entry(directory)
                .or_default()
                .insert(lock.agent_id.clone());
        }
        let mut overlaps: Vec<FeatureOverlap> = by_directory
            .into_iter()
            .filter(|(_, agents)| agents.len() > 1)
            .map(|(directory, agents)| {
                let mut agents: Vec<String> = agents.into_iter().collect();
                agents.sort();
                FeatureOverlap { directory, agents }
            })
            .collect();
        overlaps.sort_by(|a, b| a.directory.cmp(&b.directory));
        overlaps
    }

    pub async fn lock_for(&self, file: &str) -> Option<FileLock> {
        self.locks.read().await.get(file).cloned()
    }

    pub async fn active_lock_count(&self) -> usize {
        self.locks.read().await.len()
    }

    /// Conflict counts per file over the bounded history.
    pub async fn conflicts_by_file(&self) -> HashMap<String, usize> {
        let history = self.history.read().await;
        let mut counts = HashMap::new();
        for record in history.iter() {
            *counts.entry(record.file.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Conflict counts per agent pair (ordered lexicographically).
    pub async fn conflicts_by_agent_pair(&self) -> HashMap<(String, String), usize> {
        let history = self.history.read().await;
        let mut counts = HashMap::new();
        for record in history.iter() {
            let (a, b) = record.agents.clone();
            let key = if a <= b { (a, b) } else { (b, a) };
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }

    async fn push_history(&self, record: ConflictRecord) {
        let mut history = self.history.write().await;
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(record);
    }
}

fn severity_for(file: &str, incoming_branch: &str, holder_branch: &str) -> ConflictSeverity {
    if incoming_branch == holder_branch || is_critical(file) {
        return ConflictSeverity::High;
    }
    if is_test_file(file) {
        return ConflictSeverity::Low;
    }
    ConflictSeverity::Medium
}

fn recommend(file: &str, existing: &FileLock, now: DateTime<Utc>) -> String {
    if now - existing.locked_at > Duration::minutes(STALE_LOCK_MINUTES) {
        return format!(
            "lock on {file} is older than {STALE_LOCK_MINUTES} minutes; check whether agent {} is stale",
            existing.agent_id
        );
    }
    let name = file_name(file);
    if name.contains("index") || name.contains("main") {
        return format!("{file} is an entry point; sequentialise the two tasks");
    }
    format!(
        "wait for agent {} to finish with {file} before starting",
        existing.agent_id
    )
}
