use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use swarm_types::{Task, TaskResult};

mod hierarchy;
mod hub;
mod mesh;

pub use hierarchy::HierarchicalTopology;
pub use hub::HubTopology;
pub use mesh::{AgentMessage, MeshTopology, MessageKind};

use crate::graph::GraphError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyKind {
    Hub,
    Hierarchical,
    Mesh,
}

impl Default for TopologyKind {
    fn default() -> Self {
        TopologyKind::Hub
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TopologyError {
    Cycle { path: Vec<String> },
    DepthExceeded { max_depth: u32 },
    FanOutExceeded { max_sub_tasks: usize },
    UnknownParent { task_id: String },
    PeerTimeout { message_id: String },
    Store { message: String },
}

impl std::fmt::Display for TopologyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyError::Cycle { path } => {
                write!(f, "dependency cycle: {}", path.join(" -> "))
            }
            TopologyError::DepthExceeded { max_depth } => {
                write!(f, "sub-task depth limit {max_depth} exceeded")
            }
            TopologyError::FanOutExceeded { max_sub_tasks } => {
                write!(f, "sub-task fan-out limit {max_sub_tasks} exceeded")
            }
            TopologyError::UnknownParent { task_id } => {
                write!(f, "unknown parent task {task_id}")
            }
            TopologyError::PeerTimeout { message_id } => {
                write!(f, "peer timeout waiting on request {message_id}")
            }
            TopologyError::Store { message } => write!(f, "store failure: {message}"),
        }
    }
}

impl std::error::Error for TopologyError {}

impl From<GraphError> for TopologyError {
    fn from(error: GraphError) -> Self {
        match error {
            GraphError::CycleDetected { path } => TopologyError::Cycle { path },
            GraphError::Store { message } => TopologyError::Store { message },
        }
    }
}

impl From<anyhow::Error> for TopologyError {
    fn from(error: anyhow::Error) -> Self {
        TopologyError::Store {
            message: error.to_string(),
        }
    }
}

/// Interposes between submission and the scheduler so hierarchical sub-task
/// spawning and peer messaging can layer over the same scheduling core.
#[async_trait]
pub trait TopologyHandler: Send + Sync {
    fn kind(&self) -> TopologyKind;

    async fn submit_task(&self, task: Task) -> Result<(), TopologyError>;

    async fn on_task_complete(&self, result: TaskResult) -> Result<(), TopologyError>;
}
