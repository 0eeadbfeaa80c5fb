use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Code,
    Test,
    Review,
    Doc,
    Security,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Code => "code",
            TaskType::Test => "test",
            TaskType::Review => "review",
            TaskType::Doc => "doc",
            TaskType::Security => "security",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High,
    Normal,
    Low,
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Opus,
    Sonnet,
}

impl ModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::Opus => "opus",
            ModelKind::Sonnet => "sonnet",
        }
    }
}

impl Default for ModelKind {
    fn default() -> Self {
        ModelKind::Sonnet
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Allowed transitions are forward-only, except the scheduler may revert
    /// `assigned` back to `pending` when the holding agent disappears.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Assigned) | (Pending, Cancelled) => true,
            (Assigned, Running) | (Assigned, Pending) | (Assigned, Cancelled) => true,
            (Running, Completed) | (Running, Failed) | (Running, Cancelled) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskContext {
    pub branch: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(
        rename = "baseCommit",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub base_commit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub priority: TaskPriority,
    /// Explicit model preference; `None` lets the router pick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelKind>,
    pub prompt: String,
    pub context: TaskContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub timeout_minutes: u32,
    pub budget_cents: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
    pub status: TaskStatus,
}

impl Task {
    pub fn timeout_ms(&self) -> u64 {
        u64::from(self.timeout_minutes) * 60_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_monotonic_except_reassignment() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Assigned));
        assert!(TaskStatus::Assigned.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Assigned.can_transition_to(TaskStatus::Pending));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Cancelled.can_transition_to(TaskStatus::Running));
    }

    #[test]
    fn task_serializes_with_wire_field_names() {
        let task = Task {
            id: "t-1".to_string(),
            task_type: TaskType::Code,
            priority: TaskPriority::High,
            model: None,
            prompt: "implement".to_string(),
            context: TaskContext {
                branch: "main".to_string(),
                ..TaskContext::default()
            },
            max_tokens: None,
            timeout_minutes: 30,
            budget_cents: 100,
            created_at: Utc::now(),
            parent_task_id: None,
            assigned_agent: None,
            status: TaskStatus::Pending,
        };
        let value = serde_json::to_value(&task).expect("serialize");
        assert_eq!(value.get("type").and_then(|v| v.as_str()), Some("code"));
        assert_eq!(
            value.get("budgetCents").and_then(|v| v.as_u64()),
            Some(100)
        );
        assert!(value.get("assignedAgent").is_none());
        assert!(value.get("baseCommit").is_none());
    }
}
