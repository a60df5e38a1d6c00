//! Open Commander server composition root — `spec.md` §2.
//!
//! Wires the external collaborators (container driver, entity store, auth)
//! and the process-wide singletons (broadcaster, presence tracker) into
//! three listening surfaces: the public front door (C8, raw TCP splice),
//! the internal HTTP API (§6.1), and the WebSocket proxy (C7). Structured
//! the way the teacher's own binary crate wires its daemon: load config,
//! build collaborators, assemble routers, run until signaled to stop.

mod auth;
mod broadcaster;
mod config;
mod entity_store;
mod errors;
mod forwarder;
mod git_workspace;
mod http;
mod ingress;
mod presence;
mod session_service;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use oc_core::driver::{BollardDriver, ContainerDriver};
use tracing_subscriber::EnvFilter;

use crate::auth::{AuthCollaborator, CookieAuth, DisabledAuth};
use crate::broadcaster::BroadcasterRegistry;
use crate::config::Config;
use crate::entity_store::{EntityStore, InMemoryEntityStore};
use crate::git_workspace::GitWorkspaceService;
use crate::ingress::NoopIngressHelper;
use crate::presence::PresenceTracker;
use crate::session_service::DynSessionService;

/// Shared, cheaply-cloneable handle passed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub driver: Arc<dyn ContainerDriver>,
    pub store: Arc<dyn EntityStore>,
    pub auth: Arc<dyn AuthCollaborator>,
    pub broadcaster: Arc<BroadcasterRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub sessions: Arc<DynSessionService>,
    pub git: Arc<GitWorkspaceService>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(Config::from_env());

    let driver: Arc<dyn ContainerDriver> = Arc::new(
        BollardDriver::connect_local()
            .map_err(|e| anyhow::anyhow!("failed to connect to container engine: {e}"))?,
    );
    let store: Arc<dyn EntityStore> = Arc::new(InMemoryEntityStore::new());
    let auth: Arc<dyn AuthCollaborator> = if config.auth_disabled {
        Arc::new(DisabledAuth {
            admin_user_id: config.admin_user_id.clone(),
        })
    } else {
        Arc::new(CookieAuth::new("oc_session"))
    };

    let broadcaster = BroadcasterRegistry::new();
    let presence = PresenceTracker::new();
    presence.spawn_gc(broadcaster.clone());

    let sessions: Arc<DynSessionService> = Arc::new(session_service::SessionService::new(
        driver.clone(),
        store.clone(),
        config.mount_planner_config(),
        broadcaster.clone(),
        "oc-agents",
        Arc::new(NoopIngressHelper),
    ));

    let git = Arc::new(GitWorkspaceService::new(
        config.workspace_root.clone(),
        config.github_token.clone(),
    ));

    let state = AppState {
        driver,
        store,
        auth,
        broadcaster,
        presence,
        sessions,
        git,
        config: config.clone(),
    };

    let (shutdown_tx, _) = tokio::sync::watch::channel(false);

    let proxy_addr = SocketAddr::from(([0, 0, 0, 0], config.proxy_port));
    let internal_addr = SocketAddr::from(([0, 0, 0, 0], config.internal_http_port));
    let front_door_addr = SocketAddr::from(([0, 0, 0, 0], config.front_door_port));

    let proxy_router = build_proxy_router(state.clone());
    let api_router = build_api_router(state.clone());

    let proxy_listener = tokio::net::TcpListener::bind(proxy_addr).await?;
    let api_listener = tokio::net::TcpListener::bind(internal_addr).await?;

    tracing::info!(%proxy_addr, %internal_addr, %front_door_addr, "starting open-commander");

    let proxy_shutdown = shutdown_signal(shutdown_tx.subscribe());
    let api_shutdown = shutdown_signal(shutdown_tx.subscribe());

    let proxy_server = axum::serve(proxy_listener, proxy_router).with_graceful_shutdown(proxy_shutdown);
    let api_server = axum::serve(api_listener, api_router).with_graceful_shutdown(api_shutdown);

    let forwarder_rx = shutdown_tx.subscribe();
    let forwarder_task = forwarder::run(front_door_addr, proxy_addr, internal_addr, forwarder_rx);

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });

    let (proxy_result, api_result, forwarder_result) =
        tokio::join!(proxy_server, api_server, forwarder_task);
    proxy_result?;
    api_result?;
    forwarder_result?;

    Ok(())
}

async fn shutdown_signal(mut rx: tokio::sync::watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn build_proxy_router(state: AppState) -> Router {
    Router::new()
        .route("/terminal/:sessionId", get(ws::terminal::handler))
        .route("/presence/:projectId", get(ws::presence_ws::handler))
        .route("/sessions/:projectId", get(ws::sessions_ws::handler))
        .with_state(state)
}

fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/tasks", get(http::tasks::list).post(http::tasks::create))
        .route("/api/tasks/:id", get(http::tasks::get))
        .route("/api/github/verify-access", post(http::github::verify_access))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
