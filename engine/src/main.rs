use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use swarm_core::topology::{
    HierarchicalTopology, HubTopology, MeshTopology, TopologyHandler, TopologyKind,
};
use swarm_core::{
    BudgetGuard, ConflictMonitor, DependencyGraph, EventBus, Orchestrator, OrchestratorConfig,
    PerformanceTracker, Router, Scheduler,
};
use swarm_providers::build_provider;
use swarm_server::auth::mint_token;
use swarm_server::{serve, AppState, AuthState};
use swarm_store::{FileStore, MemoryStore, StateStore};

mod config;

use config::{EngineConfig, StoreKind};

#[derive(Parser, Debug)]
#[command(name = "swarm-engine")]
#[command(about = "Orchestrator for a fleet of ephemeral coding agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the orchestrator service.
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        #[arg(long, env = "SWARM_STATE_DIR")]
        state_dir: Option<String>,
    },
    /// Mint a signed bearer token for the request surface.
    Token {
        #[arg(long, default_value = "operator")]
        sub: String,
        #[arg(long, default_value_t = 86_400)]
        ttl_secs: i64,
        #[arg(long)]
        scope: Vec<String>,
        #[arg(long, env = "SWARM_STATE_DIR")]
        state_dir: Option<String>,
    },
    /// Probe a running orchestrator's health endpoint.
    Health {
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            hostname,
            port,
            state_dir,
        } => {
            let state_dir = resolve_state_dir(state_dir);
            let (_log_info, _log_guard) =
                swarm_observability::init_logging(state_dir.join("logs"), "swarm-engine")?;
            let config = EngineConfig::load(&state_dir.join("config.json")).await?;
            let addr: SocketAddr = format!("{hostname}:{port}")
                .parse()
                .context("invalid hostname or port")?;
            let schedule_interval = Duration::from_secs(config.schedule_interval_secs.max(1));
            let state = build_state(&config, &state_dir).await?;
            info!(
                "starting swarm-engine on http://{addr} (provider {}, store {:?}, topology {:?})",
                state.orchestrator.provider().name(),
                config.store,
                config.topology
            );
            serve(addr, state, schedule_interval).await?;
        }
        Command::Token {
            sub,
            ttl_secs,
            scope,
            state_dir,
        } => {
            let state_dir = resolve_state_dir(state_dir);
            let config = EngineConfig::load(&state_dir.join("config.json")).await?;
            let secret = config
                .auth
                .jwt_secret
                .context("no signing secret configured; set SWARM_JWT_SECRET")?;
            println!("{}", mint_token(&secret, &sub, ttl_secs, &scope));
        }
        Command::Health { url } => {
            let body: serde_json::Value = reqwest::Client::new()
                .get(format!("{}/health", url.trim_end_matches('/')))
                .timeout(Duration::from_secs(5))
                .send()
                .await?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(".swarm")
}

async fn build_state(config: &EngineConfig, state_dir: &PathBuf) -> anyhow::Result<AppState> {
    let store: Arc<dyn StateStore> = match config.store {
        StoreKind::Memory => Arc::new(MemoryStore::new()),
        StoreKind::File => {
            let file_store = Arc::new(
                FileStore::new(state_dir.join("store"))
                    .await
                    .context("state store unreachable")?,
            );
            let sweeper = file_store.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(60 * 60));
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tick.tick().await;
                    match sweeper.sweep().await {
                        Ok(0) => {}
                        Ok(removed) => info!("store sweep removed {removed} expired records"),
                        Err(error) => tracing::warn!("store sweep failed: {error}"),
                    }
                }
            });
            file_store
        }
    };

    // Apply the configured caps while keeping any persisted counters.
    let mut budget = store.get_budget().await?;
    budget.config = config.budget;
    store.set_budget(budget).await?;

    let auth = if config.auth.required {
        let secret = config
            .auth
            .jwt_secret
            .clone()
            .context("SWARM_JWT_SECRET is required when auth is enabled")?;
        AuthState {
            secret: Some(secret),
        }
    } else {
        AuthState::default()
    };

    let provider = build_provider(&config.provider)?;
    let bus = EventBus::new();
    let tracker = Arc::new(PerformanceTracker::new());
    let router = Router::new(tracker.clone());
    let scheduler = Scheduler::new(
        store.clone(),
        DependencyGraph::new(store.clone()),
        router.clone(),
        bus.clone(),
    )
    .with_max_concurrent(config.max_concurrent_per_agent);
    let hub = HubTopology::new(store.clone(), scheduler.clone(), bus.clone());
    let topology: Arc<dyn TopologyHandler> = match config.topology {
        TopologyKind::Hub => Arc::new(hub),
        TopologyKind::Hierarchical => Arc::new(HierarchicalTopology::new(hub, bus.clone())),
        TopologyKind::Mesh => Arc::new(MeshTopology::new(hub)),
    };
    let conflicts = Arc::new(ConflictMonitor::new(bus.clone()));
    let budget_guard = BudgetGuard::new(store.clone(), bus.clone());

    let orchestrator = Orchestrator::new(
        store,
        provider,
        topology,
        scheduler,
        router,
        tracker,
        conflicts,
        budget_guard,
        bus,
        OrchestratorConfig::default(),
    );
    Ok(AppState::new(orchestrator, auth, config.topology))
}
