use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of event types pushed over the notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationType {
    TaskCreated,
    TaskAssigned,
    TaskStarted,
    TaskProgress,
    TaskCompleted,
    TaskFailed,
    AgentSpawned,
    AgentIdle,
    AgentTerminated,
    ConflictPotential,
    ConflictDetected,
    ConflictResolved,
    BudgetWarning,
    BudgetPaused,
    SystemHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl Notification {
    pub fn new(kind: NotificationType, data: Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        self.data.get("taskId").and_then(|v| v.as_str())
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.data.get("agentId").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientAction {
    Subscribe,
    Unsubscribe,
    History,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscribeFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<NotificationType>>,
    #[serde(
        rename = "taskIds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub task_ids: Option<Vec<String>>,
    #[serde(
        rename = "agentIds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub agent_ids: Option<Vec<String>>,
}

impl SubscribeFilter {
    /// Conjunctive match: every populated clause must hold. An id clause only
    /// applies when the event carries the corresponding field.
    pub fn matches(&self, notification: &Notification) -> bool {
        if let Some(types) = &self.types {
            if !types.contains(&notification.kind) {
                return false;
            }
        }
        if let Some(task_ids) = &self.task_ids {
            if let Some(task_id) = notification.task_id() {
                if !task_ids.iter().any(|id| id == task_id) {
                    return false;
                }
            }
        }
        if let Some(agent_ids) = &self.agent_ids {
            if let Some(agent_id) = notification.agent_id() {
                if !agent_ids.iter().any(|id| id == agent_id) {
                    return false;
                }
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    pub action: ClientAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<SubscribeFilter>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notification_types_use_kebab_case_on_the_wire() {
        let encoded = serde_json::to_string(&NotificationType::TaskCreated).expect("encode");
        assert_eq!(encoded, "\"task-created\"");
        let encoded = serde_json::to_string(&NotificationType::BudgetWarning).expect("encode");
        assert_eq!(encoded, "\"budget-warning\"");
    }

    #[test]
    fn filter_matching_is_conjunctive() {
        let event = Notification::new(
            NotificationType::TaskCompleted,
            json!({"taskId": "t-1", "agentId": "a-1"}),
        );

        let mut filter = SubscribeFilter::default();
        assert!(filter.matches(&event));

        filter.types = Some(vec![NotificationType::TaskCompleted]);
        filter.task_ids = Some(vec!["t-1".to_string()]);
        assert!(filter.matches(&event));

        filter.agent_ids = Some(vec!["a-2".to_string()]);
        assert!(!filter.matches(&event));

        filter.agent_ids = None;
        filter.types = Some(vec![NotificationType::TaskFailed]);
        assert!(!filter.matches(&event));
    }

    #[test]
    fn id_clauses_ignore_events_without_the_field() {
        let event = Notification::new(NotificationType::SystemHealth, json!({"mode": "mock"}));
        let filter = SubscribeFilter {
            task_ids: Some(vec!["t-1".to_string()]),
            ..SubscribeFilter::default()
        };
        assert!(filter.matches(&event));
    }
}
