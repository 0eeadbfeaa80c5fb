use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use swarm_core::topology::TopologyKind;
use swarm_core::Orchestrator;

pub mod auth;
mod http;
mod ws;

pub use http::app_router;

/// Per-request credential configuration. `secret: None` disables the gate,
/// which is only sensible for in-process embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct AuthState {
    pub secret: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub auth: AuthState,
    pub topology_kind: TopologyKind,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, auth: AuthState, topology_kind: TopologyKind) -> Self {
        Self {
            orchestrator,
            auth,
            topology_kind,
            started_at: Utc::now(),
        }
    }
}

/// Binds the listener, starts the background scheduling loops, and serves
/// until SIGTERM/ctrl-c. Shutdown stops intake first, then aborts the loops.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    schedule_interval: Duration,
) -> anyhow::Result<()> {
    let scheduler_state = state.orchestrator.clone();
    let decay_state = state.orchestrator.clone();
    let reaper_state = state.orchestrator.clone();

    let schedule_loop = tokio::spawn(async move {
        let mut tick = tokio::time::interval(schedule_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            if let Err(error) = scheduler_state.run_scheduling_pass().await {
                tracing::error!("scheduling pass failed: {error}");
            }
        }
    });
    let decay_loop = tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60 * 60));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            decay_state.decay_tick().await;
        }
    });
    let reaper_loop = tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            match reaper_state.reap_lost_agents().await {
                Ok(0) => {}
                Ok(reaped) => tracing::info!("reaped {reaped} lost agents"),
                Err(error) => tracing::error!("agent reaper failed: {error}"),
            }
        }
    });

    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("swarm orchestrator listening on http://{addr}");
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    schedule_loop.abort();
    decay_loop.abort();
    reaper_loop.abort();
    result?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            futures::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => futures::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = futures::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received; draining");
}
