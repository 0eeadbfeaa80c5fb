use std::sync::Arc;

use serde_json::json;

use swarm_store::StateStore;
use swarm_types::{BudgetState, Notification, NotificationType};

use crate::event_bus::EventBus;

/// Projected cost per active agent used by the budget projection rollup.
const PROJECTED_CENTS_PER_AGENT: u64 = 150;

/// Debits completed results against the daily and weekly counters and flips
/// the paused flag once the daily cap is crossed.
#[derive(Clone)]
pub struct BudgetGuard {
    store: Arc<dyn StateStore>,
    bus: EventBus,
}

impl BudgetGuard {
    pub fn new(store: Arc<dyn StateStore>, bus: EventBus) -> Self {
        Self { store, bus }
    }

    pub async fn state(&self) -> anyhow::Result<BudgetState> {
        self.store.get_budget().await
    }

    pub async fn is_paused(&self) -> anyhow::Result<bool> {
        Ok(self.store.get_budget().await?.paused)
    }

    /// `dailyUsed + activeAgents * 150`, the rollup surfaced by the budget
    /// endpoint.
    pub async fn projection(&self) -> anyhow::Result<u64> {
        let budget = self.store.get_budget().await?;
        let active = self.store.active_agent_count().await? as u64;
        Ok(budget.daily_used_cents + active * PROJECTED_CENTS_PER_AGENT)
    }

    /// Records the cost of a completed result. Emits a warning when usage
    /// crosses the alert threshold and pauses intake at the pause threshold.
    pub async fn record_cost(&self, cents: u64) -> anyhow::Result<BudgetState> {
        let before = self.store.get_budget().await?;
        let mut after = self.store.add_spend(cents).await?;

        let alert_floor =
            after.config.daily_limit_cents * u64::from(after.config.alert_threshold_percent) / 100;
        let pause_floor =
            after.config.daily_limit_cents * u64::from(after.config.pause_threshold_percent) / 100;

        if before.daily_used_cents < alert_floor && after.daily_used_cents >= alert_floor {
            self.bus.publish(Notification::new(
                NotificationType::BudgetWarning,
                json!({
                    "dailyUsedCents": after.daily_used_cents,
                    "dailyLimitCents": after.config.daily_limit_cents,
                    "thresholdPercent": after.config.alert_threshold_percent,
                }),
            ));
        }

        if !after.paused && after.daily_used_cents >= pause_floor {
            after.paused = true;
            self.store.set_budget(after.clone()).await?;
            self.bus.publish(Notification::new(
                NotificationType::BudgetPaused,
                json!({
                    "dailyUsedCents": after.daily_used_cents,
                    "dailyLimitCents": after.config.daily_limit_cents,
                }),
            ));
            tracing::warn!(
                "budget paused: {} of {} daily cents used",
                after.daily_used_cents,
                after.config.daily_limit_cents
            );
        }

        Ok(after)
    }

    pub async fn reset_daily(&self) -> anyhow::Result<()> {
        self.store.reset_daily().await
    }

    pub async fn reset_weekly(&self) -> anyhow::Result<()> {
        self.store.reset_weekly().await
    }
}
