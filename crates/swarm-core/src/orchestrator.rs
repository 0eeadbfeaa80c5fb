use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;

use swarm_providers::{CompletionOutcome, CompletionStatus, ExecutionProvider};
use swarm_store::{StateStore, TaskFilter};
use swarm_types::{
    Agent, AgentStatus, FieldError, ModelKind, Notification, NotificationType, ResultStatus,
    SubmitRequest, SubmitResponse, Task, TaskResult, TaskStatus, TokenUsage,
    validate_submission,
};

use crate::budget::BudgetGuard;
use crate::conflict::ConflictMonitor;
use crate::event_bus::EventBus;
use crate::router::Router;
use crate::scoring::PerformanceTracker;
use crate::scheduler::{Scheduler, SchedulingDecision};
use crate::topology::{TopologyError, TopologyHandler};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Hard ceiling applied on top of per-task timeouts.
    pub max_wait_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_wait_timeout_ms: swarm_providers::DEFAULT_WAIT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubmitError {
    BudgetPaused,
    Validation { details: Vec<FieldError> },
    Rejected { error: TopologyError },
    Internal { message: String },
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::BudgetPaused => write!(f, "budget paused"),
            SubmitError::Validation { details } => {
                write!(f, "validation failed ({} errors)", details.len())
            }
            SubmitError::Rejected { error } => write!(f, "submission rejected: {error}"),
            SubmitError::Internal { message } => write!(f, "internal error: {message}"),
        }
    }
}

impl std::error::Error for SubmitError {}

/// Ties scheduling to execution: dispatches assignments through the
/// provider, monitors completions, and applies the completion batch (result,
/// status, scoring, locks, budget, notifications) as one unit.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    provider: Arc<dyn ExecutionProvider>,
    topology: Arc<dyn TopologyHandler>,
    scheduler: Scheduler,
    router: Router,
    tracker: Arc<PerformanceTracker>,
    conflicts: Arc<ConflictMonitor>,
    budget: BudgetGuard,
    bus: EventBus,
    config: OrchestratorConfig,
    executions: Arc<RwLock<HashMap<String, String>>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn StateStore>,
        provider: Arc<dyn ExecutionProvider>,
        topology: Arc<dyn TopologyHandler>,
        scheduler: Scheduler,
        router: Router,
        tracker: Arc<PerformanceTracker>,
        conflicts: Arc<ConflictMonitor>,
        budget: BudgetGuard,
        bus: EventBus,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            provider,
            topology,
            scheduler,
            router,
            tracker,
            conflicts,
            budget,
            bus,
            config,
            executions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn provider(&self) -> &Arc<dyn ExecutionProvider> {
        &self.provider
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn budget(&self) -> &BudgetGuard {
        &self.budget
    }

    pub fn conflicts(&self) -> &Arc<ConflictMonitor> {
        &self.conflicts
    }

    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Validates and accepts a batch of task submissions. Refused while the
    /// budget is paused.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse, SubmitError> {
        let paused = self.budget.is_paused().await.map_err(|e| SubmitError::Internal {
            message: e.to_string(),
        })?;
        if paused {
            return Err(SubmitError::BudgetPaused);
        }

        let details = validate_submission(&request);
        if !details.is_empty() {
            return Err(SubmitError::Validation { details });
        }

        let mut task_ids = Vec::with_capacity(request.tasks.len());
        let mut estimated_cost_cents = 0u64;
        for submission in request.tasks {
            let task = submission.into_task();
            estimated_cost_cents += u64::from(task.budget_cents);
            let task_id = task.id.clone();
            self.topology
                .submit_task(task)
                .await
                .map_err(|error| SubmitError::Rejected { error })?;
            task_ids.push(task_id);
        }
        Ok(SubmitResponse {
            task_ids,
            estimated_cost_cents,
        })
    }

    /// One scheduling pass: route ready tasks over idle agents, then
    /// dispatch every assignment and spawn fresh workers for deferred work.
    /// A failure on one task never stalls the rest of the pass.
    pub async fn run_scheduling_pass(&self) -> anyhow::Result<SchedulingDecision> {
        let idle: Vec<Agent> = self
            .store
            .list_agents()
            .await?
            .into_iter()
            .filter(|agent| agent.status == AgentStatus::Idle)
            .collect();
        let decision = self.scheduler.schedule(&idle).await?;

        for assignment in &decision.assignments {
            if let Err(error) = self
                .dispatch(&assignment.task_id, Some(assignment.agent_id.clone()), assignment.model)
                .await
            {
                tracing::warn!(
                    "dispatch of {} to {} failed: {error}",
                    assignment.task_id,
                    assignment.agent_id
                );
                self.revert_to_pending(&assignment.task_id).await;
            }
        }

        for deferred in &decision.deferred {
            let Some(task) = self.store.get_task(&deferred.task_id).await? else {
                continue;
            };
            let routed = self.router.route(&task, &[]).await;
            if let Err(error) = self.dispatch(&deferred.task_id, None, routed.model).await {
                tracing::warn!("spawn for {} failed: {error}", deferred.task_id);
                self.revert_to_pending(&deferred.task_id).await;
            }
        }

        Ok(decision)
    }

    /// Force-starts a single ready task, bypassing the periodic pass.
    pub async fn force_execute(&self, task_id: &str) -> anyhow::Result<bool> {
        let Some(task) = self.store.get_task(task_id).await? else {
            return Ok(false);
        };
        if task.status != TaskStatus::Pending
            || !self.store.dependencies_completed(task_id).await?
        {
            return Ok(false);
        }
        let routed = self.router.route(&task, &[]).await;
        self.dispatch(task_id, None, routed.model).await?;
        Ok(true)
    }

    /// Force-starts every currently-ready task; returns the started ids.
    pub async fn force_execute_batch(&self) -> anyhow::Result<Vec<String>> {
        let ready = self
            .store
            .list_tasks(&TaskFilter::with_status(TaskStatus::Pending))
            .await?;
        let mut started = Vec::new();
        for task in ready {
            match self.force_execute(&task.id).await {
                Ok(true) => started.push(task.id),
                Ok(false) => {}
                Err(error) => tracing::warn!("force execute of {} failed: {error}", task.id),
            }
        }
        Ok(started)
    }

    /// Flips the task to cancelled immediately; any in-flight execution is
    /// stopped best-effort.
    pub async fn cancel_task(&self, task_id: &str) -> anyhow::Result<bool> {
        let Some(mut task) = self.store.get_task(task_id).await? else {
            return Ok(false);
        };
        if task.status.is_terminal() {
            return Ok(false);
        }
        task.status = TaskStatus::Cancelled;
        let agent_id = task.assigned_agent.clone();
        self.store.set_task(task).await?;

        if let Some(execution_id) = self.executions.write().await.remove(task_id) {
            if let Err(error) = self.provider.cancel_execution(&execution_id).await {
                tracing::warn!("cancel of execution {execution_id} failed: {error}");
            }
        }
        if let Some(agent_id) = agent_id {
            if let Some(mut agent) = self.store.get_agent(&agent_id).await? {
                agent.status = AgentStatus::Terminated;
                agent.current_task = None;
                agent.completed_at = Some(Utc::now());
                self.store.set_agent(agent).await?;
            }
            self.conflicts.release_agent_locks(&agent_id).await;
            self.bus.publish(Notification::new(
                NotificationType::AgentTerminated,
                json!({"agentId": agent_id, "taskId": task_id, "reason": "task cancelled"}),
            ));
        }
        Ok(true)
    }

    /// Reverts the lost agent's assigned tasks and re-routes them.
    pub async fn handle_agent_loss(&self, agent_id: &str) -> anyhow::Result<()> {
        if let Some(mut agent) = self.store.get_agent(agent_id).await? {
            agent.status = AgentStatus::Terminated;
            agent.current_task = None;
            agent.completed_at = Some(Utc::now());
            self.store.set_agent(agent).await?;
        }
        self.conflicts.release_agent_locks(agent_id).await;

        let remaining: Vec<Agent> = self
            .store
            .list_agents()
            .await?
            .into_iter()
            .filter(|agent| agent.id != agent_id && agent.status == AgentStatus::Idle)
            .collect();
        let reassigned = self.scheduler.rebalance(agent_id, &remaining).await?;
        for assignment in reassigned {
            if let Err(error) = self
                .dispatch(&assignment.task_id, Some(assignment.agent_id.clone()), assignment.model)
                .await
            {
                tracing::warn!("re-dispatch of {} failed: {error}", assignment.task_id);
                self.revert_to_pending(&assignment.task_id).await;
            }
        }
        Ok(())
    }

    /// Drifts stale performance records towards neutral; called on a timer.
    pub async fn decay_tick(&self) {
        self.tracker.decay_stale(chrono::Duration::hours(24)).await;
    }

    /// Terminates agents whose execution vanished from the provider and
    /// re-routes their work. The age floor avoids racing a dispatch that is
    /// still registering its execution.
    pub async fn reap_lost_agents(&self) -> anyhow::Result<usize> {
        let live_task_ids: std::collections::HashSet<String> = self
            .provider
            .active_jobs()
            .await
            .into_iter()
            .map(|job| job.task_id)
            .collect();
        let tracked: std::collections::HashSet<String> =
            self.executions.read().await.keys().cloned().collect();

        let mut reaped = 0;
        for agent in self.store.list_agents().await? {
            if agent.status != AgentStatus::Running {
                continue;
            }
            let Some(task_id) = agent.current_task.clone() else {
                continue;
            };
            if live_task_ids.contains(&task_id) || tracked.contains(&task_id) {
                continue;
            }
            if Utc::now() - agent.started_at < chrono::Duration::minutes(5) {
                continue;
            }
            tracing::warn!(
                "agent {} lost its execution for task {task_id}; rebalancing",
                agent.id
            );
            self.handle_agent_loss(&agent.id).await?;
            reaped += 1;
        }
        Ok(reaped)
    }

    fn dispatch<'a>(
        &'a self,
        task_id: &'a str,
        agent_hint: Option<String>,
        model: ModelKind,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
        let Some(mut task) = self.store.get_task(task_id).await? else {
            anyhow::bail!("task {task_id} vanished before dispatch");
        };
        if task.status != TaskStatus::Pending {
            return Ok(());
        }

        let gate_id = agent_hint.clone().unwrap_or_default();
        let check = self.conflicts.check_task_assignment(&task, &gate_id).await;
        if !check.safe {
            self.bus.publish(Notification::new(
                NotificationType::ConflictDetected,
                json!({
                    "taskId": task.id,
                    "files": check.potential_conflicts,
                    "action": "deferred dispatch",
                }),
            ));
            return Ok(());
        }

        if task.model.is_none() {
            task.model = Some(model);
        }
        task.status = TaskStatus::Assigned;
        task.assigned_agent = agent_hint.clone();
        self.store.set_task(task.clone()).await?;

        let handle = self.provider.execute_task(&task).await?;
        let agent_id = agent_hint.unwrap_or_else(|| handle.agent_id.clone());

        let mut agent = match self.store.get_agent(&agent_id).await? {
            Some(existing) => existing,
            None => {
                let spawned = Agent::new(agent_id.clone());
                self.bus.publish(Notification::new(
                    NotificationType::AgentSpawned,
                    json!({"agentId": agent_id, "taskId": task.id}),
                ));
                spawned
            }
        };
        agent.status = AgentStatus::Running;
        agent.current_task = Some(task.id.clone());
        agent.branch = Some(task.context.branch.clone());
        self.store.set_agent(agent).await?;

        self.conflicts
            .register_file_activity(&agent_id, &task.id, &task.context.files, &task.context.branch)
            .await;

        task.status = TaskStatus::Running;
        task.assigned_agent = Some(agent_id.clone());
        self.store.set_task(task.clone()).await?;
        self.bus.publish(Notification::new(
            NotificationType::TaskStarted,
            json!({"taskId": task.id, "agentId": agent_id}),
        ));

        self.executions
            .write()
            .await
            .insert(task.id.clone(), handle.execution_id.clone());

        let this = self.clone();
        let timeout_ms = task.timeout_ms().min(self.config.max_wait_timeout_ms);
        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let outcome = this
                .provider
                .wait_for_completion(&handle.execution_id, timeout_ms)
                .await
                .unwrap_or_else(|error| {
                    tracing::error!("wait for {} failed: {error}", handle.execution_id);
                    CompletionOutcome {
                        status: CompletionStatus::Failed,
                        result: None,
                    }
                });
            let duration_ms = started.elapsed().as_millis() as u64;
            if let Err(error) = this
                .handle_completion(&task, &agent_id, outcome, duration_ms)
                .await
            {
                tracing::error!("completion handling for {} failed: {error}", task.id);
            }
        });
        Ok(())
        })
    }

    async fn handle_completion(
        &self,
        task: &Task,
        agent_id: &str,
        outcome: CompletionOutcome,
        duration_ms: u64,
    ) -> anyhow::Result<()> {
        self.executions.write().await.remove(&task.id);

        // A cancel may have landed while the execution was draining; the
        // cancelled status is final.
        if let Some(current) = self.store.get_task(&task.id).await? {
            if current.status == TaskStatus::Cancelled {
                self.conflicts.release_agent_locks(agent_id).await;
                return Ok(());
            }
        }

        let mut result = outcome
            .result
            .unwrap_or_else(|| synthesize_result(task, agent_id, outcome.status, duration_ms));
        // Attribute the result to the agent that held the task, not the
        // provider-derived worker name.
        result.agent_id = agent_id.to_string();
        let success = result.status.is_success();
        let cost_cents = result.cost_cents;

        self.topology
            .on_task_complete(result.clone())
            .await
            .map_err(|error| anyhow::anyhow!("completion write failed: {error}"))?;
        self.tracker
            .record_result(agent_id, task.task_type, success, result.duration_ms, cost_cents)
            .await;
        self.conflicts.release_agent_locks(agent_id).await;
        self.budget.record_cost(cost_cents).await?;

        if success {
            let newly_ready = self.scheduler.complete_task(&task.id).await?;
            if !newly_ready.is_empty() {
                let this = self.clone();
                tokio::spawn(async move {
                    if let Err(error) = this.run_scheduling_pass().await {
                        tracing::error!("wake scheduling pass failed: {error}");
                    }
                });
            }
        }
        Ok(())
    }

    async fn revert_to_pending(&self, task_id: &str) {
        let Ok(Some(mut task)) = self.store.get_task(task_id).await else {
            return;
        };
        if task.status == TaskStatus::Assigned || task.status == TaskStatus::Running {
            task.status = TaskStatus::Pending;
            task.assigned_agent = None;
            let _ = self.store.set_task(task).await;
        }
    }
}

fn synthesize_result(
    task: &Task,
    agent_id: &str,
    status: CompletionStatus,
    duration_ms: u64,
) -> TaskResult {
    let (result_status, error) = match status {
        CompletionStatus::Completed => (ResultStatus::Success, None),
        CompletionStatus::Failed => (
            ResultStatus::Failed,
            Some("execution reported failure".to_string()),
        ),
        CompletionStatus::Timeout => (
            ResultStatus::Failed,
            Some("execution timed out".to_string()),
        ),
    };
    TaskResult {
        task_id: task.id.clone(),
        agent_id: agent_id.to_string(),
        status: result_status,
        files: Vec::new(),
        summary: None,
        tests: None,
        review: None,
        tokens: TokenUsage::default(),
        duration_ms,
        // The worker only emitted logs, so the budgeted cost stands in for
        // the actual spend.
        cost_cents: u64::from(task.budget_cents),
        base_commit: task.context.base_commit.clone(),
        result_commit: None,
        conflicts: None,
        error,
    }
}
