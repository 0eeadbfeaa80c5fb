use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetConfig {
    pub per_task_max_cents: u32,
    pub daily_limit_cents: u64,
    pub weekly_limit_cents: u64,
    pub alert_threshold_percent: u8,
    pub pause_threshold_percent: u8,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            per_task_max_cents: 500,
            daily_limit_cents: 10_000,
            weekly_limit_cents: 50_000,
            alert_threshold_percent: 80,
            pause_threshold_percent: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetState {
    pub config: BudgetConfig,
    pub daily_used_cents: u64,
    pub weekly_used_cents: u64,
    pub paused: bool,
    pub updated_at: DateTime<Utc>,
}

impl BudgetState {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            daily_used_cents: 0,
            weekly_used_cents: 0,
            paused: false,
            updated_at: Utc::now(),
        }
    }

    pub fn daily_used_percent(&self) -> u64 {
        if self.config.daily_limit_cents == 0 {
            return 0;
        }
        self.daily_used_cents * 100 / self.config.daily_limit_cents
    }
}

impl Default for BudgetState {
    fn default() -> Self {
        Self::new(BudgetConfig::default())
    }
}
