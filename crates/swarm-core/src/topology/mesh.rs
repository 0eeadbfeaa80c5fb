use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{oneshot, RwLock};
use uuid::Uuid;

use swarm_types::{Task, TaskResult};

use crate::topology::{HubTopology, TopologyError, TopologyHandler, TopologyKind};

pub const DEFAULT_PEER_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Broadcast,
    Request,
    Response,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    pub id: String,
    pub kind: MessageKind,
    pub from: String,
    pub payload: Value,
    pub sent_at: DateTime<Utc>,
}

/// Hub behaviour plus direct agent-to-agent messaging: per-agent FIFO
/// queues and request/response correlation.
pub struct MeshTopology {
    inner: HubTopology,
    peer_timeout_ms: u64,
    queues: RwLock<HashMap<String, VecDeque<AgentMessage>>>,
    pending: RwLock<HashMap<String, oneshot::Sender<Value>>>,
    parked_responses: RwLock<HashMap<String, Value>>,
}

impl MeshTopology {
    pub fn new(inner: HubTopology) -> Self {
        Self {
            inner,
            peer_timeout_ms: DEFAULT_PEER_TIMEOUT_MS,
            queues: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            parked_responses: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_peer_timeout_ms(mut self, peer_timeout_ms: u64) -> Self {
        self.peer_timeout_ms = peer_timeout_ms;
        self
    }

    /// Delivers to every agent currently assigned to `task_id`, excluding
    /// the sender. No peers means no-op.
    pub async fn broadcast(
        &self,
        from_agent: &str,
        task_id: &str,
        payload: Value,
    ) -> Result<usize, TopologyError> {
        let agents = self
            .inner
            .scheduler()
            .store()
            .list_agents()
            .await
            .map_err(TopologyError::from)?;
        let peers: Vec<String> = agents
            .into_iter()
            .filter(|agent| {
                agent.id != from_agent && agent.current_task.as_deref() == Some(task_id)
            })
            .map(|agent| agent.id)
            .collect();

        let message = AgentMessage {
            id: Uuid::new_v4().to_string(),
            kind: MessageKind::Broadcast,
            from: from_agent.to_string(),
            payload,
            sent_at: Utc::now(),
        };
        let mut queues = self.queues.write().await;
        for peer in &peers {
            queues
                .entry(peer.clone())
                .or_default()
                .push_back(message.clone());
        }
        Ok(peers.len())
    }

    /// Sends a request to a peer and awaits the correlated response. Rejects
    /// with a peer timeout when no response arrives in time.
    pub async fn send_request(
        &self,
        from_agent: &str,
        to_agent: &str,
        payload: Value,
    ) -> Result<Value, TopologyError> {
        let message_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(message_id.clone(), tx);

        let message = AgentMessage {
            id: message_id.clone(),
            kind: MessageKind::Request,
            from: from_agent.to_string(),
            payload,
            sent_at: Utc::now(),
        };
        self.queues
            .write()
            .await
            .entry(to_agent.to_string())
            .or_default()
            .push_back(message);

        match tokio::time::timeout(Duration::from_millis(self.peer_timeout_ms), rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) | Err(_) => {
                self.pending.write().await.remove(&message_id);
                Err(TopologyError::PeerTimeout { message_id })
            }
        }
    }

    /// Resolves the matching pending request, or parks the response when the
    /// requester is no longer waiting.
    pub async fn respond_to_request(&self, message_id: &str, payload: Value) {
        let sender = self.pending.write().await.remove(message_id);
        match sender {
            Some(tx) => {
                if let Err(payload) = tx.send(payload) {
                    self.parked_responses
                        .write()
                        .await
                        .insert(message_id.to_string(), payload);
                }
            }
            None => {
                self.parked_responses
                    .write()
                    .await
                    .insert(message_id.to_string(), payload);
            }
        }
    }

    /// Drains the agent's inbox, FIFO.
    pub async fn poll_messages(&self, agent_id: &str) -> Vec<AgentMessage> {
        let mut queues = self.queues.write().await;
        queues
            .remove(agent_id)
            .map(|queue| queue.into_iter().collect())
            .unwrap_or_default()
    }

    pub async fn take_parked_response(&self, message_id: &str) -> Option<Value> {
        self.parked_responses.write().await.remove(message_id)
    }
}

#[async_trait]
impl TopologyHandler for MeshTopology {
    fn kind(&self) -> TopologyKind {
        TopologyKind::Mesh
    }

    async fn submit_task(&self, task: Task) -> Result<(), TopologyError> {
        self.inner.submit_task(task).await
    }

    async fn on_task_complete(&self, result: TaskResult) -> Result<(), TopologyError> {
        self.inner.on_task_complete(result).await
    }
}
