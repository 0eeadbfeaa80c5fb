use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::RwLock;

use swarm_types::{Notification, NotificationType, Task, TaskResult, TaskSubmission};

use crate::event_bus::EventBus;
use crate::topology::{HubTopology, TopologyError, TopologyHandler, TopologyKind};

pub const DEFAULT_MAX_DEPTH: u32 = 3;
pub const DEFAULT_MAX_SUB_TASKS: usize = 5;

/// Hub behaviour plus parent-child tracking: agents may decompose their task
/// into bounded sub-task trees.
pub struct HierarchicalTopology {
    inner: HubTopology,
    bus: EventBus,
    max_depth: u32,
    max_sub_tasks: usize,
    depths: RwLock<HashMap<String, u32>>,
    children: RwLock<HashMap<String, HashSet<String>>>,
}

impl HierarchicalTopology {
    pub fn new(inner: HubTopology, bus: EventBus) -> Self {
        Self {
            inner,
            bus,
            max_depth: DEFAULT_MAX_DEPTH,
            max_sub_tasks: DEFAULT_MAX_SUB_TASKS,
            depths: RwLock::new(HashMap::new()),
            children: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_limits(mut self, max_depth: u32, max_sub_tasks: usize) -> Self {
        self.max_depth = max_depth;
        self.max_sub_tasks = max_sub_tasks;
        self
    }

    pub async fn depth_of(&self, task_id: &str) -> u32 {
        self.depths.read().await.get(task_id).copied().unwrap_or(0)
    }

    /// Mints a child task under `parent_id`. Rejects when the child would
    /// land at `max_depth` or the parent's fan-out is exhausted.
    pub async fn create_sub_task(
        &self,
        parent_id: &str,
        submission: TaskSubmission,
    ) -> Result<Task, TopologyError> {
        let parent_depth = {
            let depths = self.depths.read().await;
            match depths.get(parent_id) {
                Some(depth) => *depth,
                None => {
                    return Err(TopologyError::UnknownParent {
                        task_id: parent_id.to_string(),
                    })
                }
            }
        };
        let child_depth = parent_depth + 1;
        if child_depth >= self.max_depth {
            return Err(TopologyError::DepthExceeded {
                max_depth: self.max_depth,
            });
        }
        {
            let children = self.children.read().await;
            let count = children.get(parent_id).map(|c| c.len()).unwrap_or(0);
            if count >= self.max_sub_tasks {
                return Err(TopologyError::FanOutExceeded {
                    max_sub_tasks: self.max_sub_tasks,
                });
            }
        }

        let mut child = submission.into_task();
        child.parent_task_id = Some(parent_id.to_string());
        self.inner.submit_task(child.clone()).await?;

        self.depths
            .write()
            .await
            .insert(child.id.clone(), child_depth);
        self.children
            .write()
            .await
            .entry(parent_id.to_string())
            .or_default()
            .insert(child.id.clone());
        Ok(child)
    }

    /// True when every child of `parent_id` has reached a terminal status.
    async fn siblings_settled(&self, parent_id: &str) -> Result<bool, TopologyError> {
        let child_ids: Vec<String> = {
            let children = self.children.read().await;
            match children.get(parent_id) {
                Some(set) => set.iter().cloned().collect(),
                None => return Ok(true),
            }
        };
        for child_id in child_ids {
            let settled = self
                .inner
                .scheduler()
                .store()
                .get_task(&child_id)
                .await
                .map_err(TopologyError::from)?
                .map(|task| task.status.is_terminal())
                .unwrap_or(true);
            if !settled {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl TopologyHandler for HierarchicalTopology {
    fn kind(&self) -> TopologyKind {
        TopologyKind::Hierarchical
    }

    async fn submit_task(&self, task: Task) -> Result<(), TopologyError> {
        // Root submissions land at depth 0; parented submissions inherit.
        let depth = match &task.parent_task_id {
            Some(parent) => {
                let depths = self.depths.read().await;
                depths.get(parent).copied().unwrap_or(0) + 1
            }
            None => 0,
        };
        if depth >= self.max_depth {
            return Err(TopologyError::DepthExceeded {
                max_depth: self.max_depth,
            });
        }
        let task_id = task.id.clone();
        let parent = task.parent_task_id.clone();
        self.inner.submit_task(task).await?;
        self.depths.write().await.insert(task_id.clone(), depth);
        if let Some(parent) = parent {
            self.children
                .write()
                .await
                .entry(parent)
                .or_default()
                .insert(task_id);
        }
        Ok(())
    }

    async fn on_task_complete(&self, result: TaskResult) -> Result<(), TopologyError> {
        let task_id = result.task_id.clone();
        self.inner.on_task_complete(result).await?;

        let parent = self
            .inner
            .scheduler()
            .store()
            .get_task(&task_id)
            .await
            .map_err(TopologyError::from)?
            .and_then(|task| task.parent_task_id);

        if let Some(parent_id) = parent {
            if self.siblings_settled(&parent_id).await? {
                self.bus.publish(Notification::new(
                    NotificationType::TaskProgress,
                    json!({
                        "taskId": parent_id,
                        "phase": "sub-tasks-settled",
                        "readyForAggregation": true,
                    }),
                ));
            }
        }
        Ok(())
    }
}
