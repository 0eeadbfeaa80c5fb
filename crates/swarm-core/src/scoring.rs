use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use swarm_types::TaskType;

const DEFAULT_ALPHA: f64 = 0.3;
const DECAY_STEP: f64 = 0.05;
const NEUTRAL_SUCCESS_RATE: f64 = 0.5;

const WEIGHT_SUCCESS: f64 = 0.5;
const WEIGHT_SPEED: f64 = 0.25;
const WEIGHT_COST: f64 = 0.25;
const DURATION_FLOOR_MS: f64 = 10_000.0;
const DURATION_CEIL_MS: f64 = 3_600_000.0;
const COST_FLOOR_CENTS: f64 = 1.0;
const COST_CEIL_CENTS: f64 = 1_000.0;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceRecord {
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub avg_cost_cents: f64,
    pub completed_count: u64,
    pub updated_at: DateTime<Utc>,
}

impl Default for PerformanceRecord {
    fn default() -> Self {
        Self {
            success_rate: NEUTRAL_SUCCESS_RATE,
            avg_duration_ms: 300_000.0,
            avg_cost_cents: 100.0,
            completed_count: 0,
            updated_at: Utc::now(),
        }
    }
}

impl PerformanceRecord {
    /// Blend of success, speed and cost, scaled by an experience bonus.
    pub fn score(&self) -> f64 {
        let speed = 1.0
            - ((self.avg_duration_ms - DURATION_FLOOR_MS)
                / (DURATION_CEIL_MS - DURATION_FLOOR_MS))
                .clamp(0.0, 1.0);
        let cost = 1.0
            - ((self.avg_cost_cents - COST_FLOOR_CENTS) / (COST_CEIL_CENTS - COST_FLOOR_CENTS))
                .clamp(0.0, 1.0);
        let base =
            WEIGHT_SUCCESS * self.success_rate + WEIGHT_SPEED * speed + WEIGHT_COST * cost;
        let experience = 1.0 + (self.completed_count as f64 / 500.0).min(0.2);
        base * experience
    }
}

/// Per (agent, task-type) moving averages. Scheduler-lifetime state; rebuilt
/// from scratch on restart.
pub struct PerformanceTracker {
    alpha: f64,
    pub(crate) records: RwLock<HashMap<(String, TaskType), PerformanceRecord>>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::with_alpha(DEFAULT_ALPHA)
    }

    pub fn with_alpha(alpha: f64) -> Self {
        Self {
            alpha,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub async fn record_result(
        &self,
        agent_id: &str,
        task_type: TaskType,
        success: bool,
        duration_ms: u64,
        cost_cents: u64,
    ) {
        let mut records = self.records.write().await;
        let record = records
            .entry((agent_id.to_string(), task_type))
            .or_default();
        let outcome = if success { 1.0 } else { 0.0 };
        record.success_rate = self.alpha * outcome + (1.0 - self.alpha) * record.success_rate;
        record.avg_duration_ms =
            self.alpha * duration_ms as f64 + (1.0 - self.alpha) * record.avg_duration_ms;
        record.avg_cost_cents =
            self.alpha * cost_cents as f64 + (1.0 - self.alpha) * record.avg_cost_cents;
        record.completed_count += 1;
        record.updated_at = Utc::now();
    }

    pub async fn get(&self, agent_id: &str, task_type: TaskType) -> Option<PerformanceRecord> {
        self.records
            .read()
            .await
            .get(&(agent_id.to_string(), task_type))
            .cloned()
    }

    /// Record for scoring; defaults for an unseen (agent, type) pair.
    pub async fn snapshot(&self, agent_id: &str, task_type: TaskType) -> PerformanceRecord {
        self.get(agent_id, task_type).await.unwrap_or_default()
    }

    /// Stale records drift 5% towards the neutral success rate per tick.
    pub async fn decay_stale(&self, older_than: Duration) {
        let cutoff = Utc::now() - older_than;
        let mut records = self.records.write().await;
        for record in records.values_mut() {
            if record.updated_at < cutoff {
                record.success_rate +=
                    (NEUTRAL_SUCCESS_RATE - record.success_rate) * DECAY_STEP;
            }
        }
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}
