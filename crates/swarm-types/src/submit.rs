use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ModelKind, Task, TaskContext, TaskPriority, TaskStatus, TaskType};

pub const MAX_TASKS_PER_SUBMISSION: usize = 20;
const MAX_PROMPT_LEN: usize = 50_000;
const MAX_BRANCH_LEN: usize = 255;
const MAX_FILES: usize = 100;
const MAX_FILE_PATH_LEN: usize = 500;
const MAX_DEPENDENCIES: usize = 50;
const MAX_TOKENS_CAP: u32 = 200_000;
const MAX_TIMEOUT_MINUTES: u32 = 120;
const MAX_BUDGET_CENTS: u32 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContextInput {
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
pub struct TaskSubmission {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelKind>,
    pub prompt: String,
    pub context: ContextInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u32,
    #[serde(default = "default_budget_cents")]
    pub budget_cents: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
}

fn default_timeout_minutes() -> u32 {
    30
}

fn default_budget_cents() -> u32 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub tasks: Vec<TaskSubmission>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub task_ids: Vec<String>,
    pub estimated_cost_cents: u64,
}

impl TaskSubmission {
    pub fn into_task(self) -> Task {
        Task {
            id: Uuid::new_v4().to_string(),
            task_type: self.task_type,
            priority: self.priority,
            model: self.model,
            prompt: self.prompt,
            context: TaskContext {
                branch: self.context.branch,
                files: self.context.files,
                dependencies: self.context.dependencies,
                repository: self.context.repository,
                base_commit: self.context.base_commit,
            },
            max_tokens: self.max_tokens,
            timeout_minutes: self.timeout_minutes,
            budget_cents: self.budget_cents,
            created_at: Utc::now(),
            parent_task_id: self.parent_task_id,
            assigned_agent: None,
            status: TaskStatus::Pending,
        }
    }
}

fn is_valid_branch(branch: &str) -> bool {
    !branch.is_empty()
        && branch.len() <= MAX_BRANCH_LEN
        && branch
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'))
}

fn is_uuid(value: &str) -> bool {
    Uuid::parse_str(value).is_ok()
}

fn is_commit_hash(value: &str) -> bool {
    value.len() == 40 && value.chars().all(|c| c.is_ascii_hexdigit())
}

pub fn validate_submission(request: &SubmitRequest) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if request.tasks.is_empty() {
        errors.push(FieldError::new("tasks", "at least one task is required"));
        return errors;
    }
    if request.tasks.len() > MAX_TASKS_PER_SUBMISSION {
        errors.push(FieldError::new(
            "tasks",
            format!("at most {MAX_TASKS_PER_SUBMISSION} tasks per submission"),
        ));
        return errors;
    }

    for (index, task) in request.tasks.iter().enumerate() {
        let field = |name: &str| format!("tasks[{index}].{name}");

        if task.prompt.is_empty() || task.prompt.len() > MAX_PROMPT_LEN {
            errors.push(FieldError::new(
                field("prompt"),
                format!("prompt must be 1-{MAX_PROMPT_LEN} characters"),
            ));
        }
        if !is_valid_branch(&task.context.branch) {
            errors.push(FieldError::new(
                field("context.branch"),
                "branch must be 1-255 characters of [A-Za-z0-9._-/]",
            ));
        }
        if task.context.files.len() > MAX_FILES {
            errors.push(FieldError::new(
                field("context.files"),
                format!("at most {MAX_FILES} files"),
            ));
        }
        for (file_index, file) in task.context.files.iter().enumerate() {
            if file.is_empty() || file.len() > MAX_FILE_PATH_LEN {
                errors.push(FieldError::new(
                    format!("tasks[{index}].context.files[{file_index}]"),
                    format!("file paths must be 1-{MAX_FILE_PATH_LEN} characters"),
                ));
            }
        }
        if task.context.dependencies.len() > MAX_DEPENDENCIES {
            errors.push(FieldError::new(
                field("context.dependencies"),
                format!("at most {MAX_DEPENDENCIES} dependencies"),
            ));
        }
        for (dep_index, dep) in task.context.dependencies.iter().enumerate() {
            if !is_uuid(dep) {
                errors.push(FieldError::new(
                    format!("tasks[{index}].context.dependencies[{dep_index}]"),
                    "dependency ids must be UUIDs",
                ));
            }
        }
        if let Some(commit) = &task.context.base_commit {
            if !is_commit_hash(commit) {
                errors.push(FieldError::new(
                    field("context.baseCommit"),
                    "base commit must be a 40-character hex hash",
                ));
            }
        }
        if let Some(max_tokens) = task.max_tokens {
            if max_tokens == 0 || max_tokens > MAX_TOKENS_CAP {
                errors.push(FieldError::new(
                    field("maxTokens"),
                    format!("maxTokens must be 1-{MAX_TOKENS_CAP}"),
                ));
            }
        }
        if task.timeout_minutes == 0 || task.timeout_minutes > MAX_TIMEOUT_MINUTES {
            errors.push(FieldError::new(
                field("timeoutMinutes"),
                format!("timeoutMinutes must be 1-{MAX_TIMEOUT_MINUTES}"),
            ));
        }
        if task.budget_cents == 0 || task.budget_cents > MAX_BUDGET_CENTS {
            errors.push(FieldError::new(
                field("budgetCents"),
                format!("budgetCents must be 1-{MAX_BUDGET_CENTS}"),
            ));
        }
        if let Some(parent) = &task.parent_task_id {
            if !is_uuid(parent) {
                errors.push(FieldError::new(
                    field("parentTaskId"),
                    "parentTaskId must be a UUID",
                ));
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(prompt: &str) -> TaskSubmission {
        TaskSubmission {
            task_type: TaskType::Code,
            priority: TaskPriority::Normal,
            model: None,
            prompt: prompt.to_string(),
            context: ContextInput {
                branch: "main".to_string(),
                ..ContextInput::default()
            },
            max_tokens: None,
            timeout_minutes: 30,
            budget_cents: 100,
            parent_task_id: None,
        }
    }

    #[test]
    fn empty_submission_is_rejected() {
        let errors = validate_submission(&SubmitRequest { tasks: vec![] });
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "tasks");
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let request = SubmitRequest {
            tasks: (0..21).map(|_| submission("work")).collect(),
        };
        assert!(!validate_submission(&request).is_empty());
    }

    #[test]
    fn prompt_bounds_are_inclusive() {
        let ok = SubmitRequest {
            tasks: vec![submission("x"), submission(&"y".repeat(50_000))],
        };
        assert!(validate_submission(&ok).is_empty());

        let too_long = SubmitRequest {
            tasks: vec![submission(&"y".repeat(50_001))],
        };
        assert_eq!(validate_submission(&too_long).len(), 1);

        let empty = SubmitRequest {
            tasks: vec![submission("")],
        };
        assert_eq!(validate_submission(&empty).len(), 1);
    }

    #[test]
    fn malformed_dependency_and_commit_are_flagged() {
        let mut bad = submission("work");
        bad.context.dependencies = vec!["not-a-uuid".to_string()];
        bad.context.base_commit = Some("abc".to_string());
        let errors = validate_submission(&SubmitRequest { tasks: vec![bad] });
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.field.contains("dependencies")));
        assert!(errors.iter().any(|e| e.field.contains("baseCommit")));
    }

    #[test]
    fn defaults_apply_on_deserialization() {
        let parsed: TaskSubmission = serde_json::from_value(serde_json::json!({
            "type": "doc",
            "prompt": "write docs",
            "context": {"branch": "main"}
        }))
        .expect("parse");
        assert_eq!(parsed.priority, TaskPriority::Normal);
        assert_eq!(parsed.model, None);
        assert_eq!(parsed.timeout_minutes, 30);
        assert_eq!(parsed.budget_cents, 100);
    }

    #[test]
    fn submitting_the_same_payload_twice_mints_distinct_ids() {
        let a = submission("same").into_task();
        let b = submission("same").into_task();
        assert_ne!(a.id, b.id);
    }
}
