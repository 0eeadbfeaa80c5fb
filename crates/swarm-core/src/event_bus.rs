use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use swarm_types::Notification;

const BUFFER_LIMIT: usize = 100;

/// Process-wide notification hub. Publishing never blocks and never fails;
/// slow subscribers lag and miss events rather than exerting backpressure.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Notification>,
    history: Arc<Mutex<VecDeque<Notification>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(2048);
        Self {
            tx,
            history: Arc::new(Mutex::new(VecDeque::with_capacity(BUFFER_LIMIT))),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn publish(&self, notification: Notification) {
        if let Ok(mut history) = self.history.lock() {
            if history.len() == BUFFER_LIMIT {
                history.pop_front();
            }
            history.push_back(notification.clone());
        }
        let _ = self.tx.send(notification);
    }

    /// Most recent events, oldest first, capped at `limit`.
    pub fn recent(&self, limit: usize) -> Vec<Notification> {
        let Ok(history) = self.history.lock() else {
            return Vec::new();
        };
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use swarm_types::NotificationType;

    #[test]
    fn history_is_a_bounded_fifo() {
        let bus = EventBus::new();
        for i in 0..(BUFFER_LIMIT + 5) {
            bus.publish(Notification::new(
                NotificationType::TaskProgress,
                json!({"seq": i}),
            ));
        }
        let recent = bus.recent(BUFFER_LIMIT * 2);
        assert_eq!(recent.len(), BUFFER_LIMIT);
        assert_eq!(
            recent
                .last()
                .and_then(|n| n.data.get("seq"))
                .and_then(|v| v.as_u64()),
            Some((BUFFER_LIMIT + 4) as u64)
        );
        assert_eq!(
            recent
                .first()
                .and_then(|n| n.data.get("seq"))
                .and_then(|v| v.as_u64()),
            Some(5)
        );
    }

    #[test]
    fn recent_caps_at_the_requested_limit() {
        let bus = EventBus::new();
        for i in 0..20 {
            bus.publish(Notification::new(
                NotificationType::TaskProgress,
                json!({"seq": i}),
            ));
        }
        let recent = bus.recent(10);
        assert_eq!(recent.len(), 10);
        assert_eq!(
            recent
                .first()
                .and_then(|n| n.data.get("seq"))
                .and_then(|v| v.as_u64()),
            Some(10)
        );
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(Notification::new(
            NotificationType::TaskCreated,
            json!({"taskId": "t-1"}),
        ));
        let event = rx.recv().await.expect("event");
        assert_eq!(event.kind, NotificationType::TaskCreated);
    }
}
