// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! HTTP/WebSocket node for the agent team backend.
//!
//! Thin transport wrapper: REST endpoints for sessions, chat, workspace
//! files and sandbox control, plus a per-session WebSocket that replays
//! buffered events before going live.  All domain behaviour lives in the
//! other crates; this one wires them together and maps errors onto status
//! codes.

mod auth;
mod error;
mod routes;
mod runtime;
mod watcher;

use std::sync::Arc;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::info;
use troupe_config::{Config, StorageBackend};
use troupe_core::{AgentServices, ContextBuilder, TeamOrchestrator};
use troupe_model::{LlmService, ModelProvider};
use troupe_sandbox::{
    ContainerManager, ContainerRuntime, DockerCli, FileService, IdleReaper,
    SandboxCommandService,
};
use troupe_store::{
    FileSessionRepository, InMemorySessionRepository, LlmLog, SessionRepository,
    SessionStateStore,
};
use troupe_stream::SessionStreamManager;
use troupe_tools::builtin::build_tool_executor;

pub use auth::{AuthService, UserProfile};
pub use error::ApiError;
pub use watcher::FileWatcherManager;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<AuthService>,
    pub repo: Arc<dyn SessionRepository>,
    pub state_store: Arc<SessionStateStore>,
    pub manager: Arc<ContainerManager>,
    pub files: Arc<FileService>,
    pub commands: Arc<SandboxCommandService>,
    pub streams: Arc<SessionStreamManager>,
    pub orchestrator: Arc<TeamOrchestrator>,
    pub watchers: Arc<FileWatcherManager>,
}

/// Assemble the full application state from configuration and the set of
/// registered model providers (production wiring uses the Docker CLI
/// runtime; tests may call [`build_state_with_runtime`] with a stub).
pub async fn build_state(
    config: Config,
    providers: Vec<Arc<dyn ModelProvider>>,
) -> anyhow::Result<AppState> {
    build_state_with_runtime(config, providers, Arc::new(DockerCli::default())).await
}

pub async fn build_state_with_runtime(
    config: Config,
    providers: Vec<Arc<dyn ModelProvider>>,
    runtime: Arc<dyn ContainerRuntime>,
) -> anyhow::Result<AppState> {
    let config = Arc::new(config);

    let manager = Arc::new(
        ContainerManager::new(config.sandbox.clone(), runtime.clone())
            .await
            .context("initialising sandbox manager")?,
    );
    let files = Arc::new(FileService::new(manager.clone()));
    let commands = Arc::new(SandboxCommandService::new(manager.clone(), runtime));

    let repo: Arc<dyn SessionRepository> = match config.store.backend {
        StorageBackend::Memory => Arc::new(InMemorySessionRepository::new()),
        StorageBackend::File => Arc::new(
            FileSessionRepository::new(&config.store.data_path)
                .context("initialising session repository")?,
        ),
    };
    let state_store = Arc::new(
        SessionStateStore::new(&config.store.data_path).context("initialising state store")?,
    );
    let llm_log =
        Arc::new(LlmLog::new(&config.store.data_path).context("initialising llm log")?);

    let mut llm = LlmService::new(&config.llm);
    for provider in providers {
        llm.register(provider);
    }

    let tools = Arc::new(build_tool_executor(files.clone(), commands.clone()));
    let services = AgentServices {
        llm: Arc::new(llm),
        tools,
        llm_log,
    };
    let builder = ContextBuilder::new(repo.clone(), files.clone(), state_store.clone());
    let orchestrator = Arc::new(TeamOrchestrator::new(
        services,
        builder,
        state_store.clone(),
        config.disabled_roles.clone(),
    ));

    let streams = Arc::new(SessionStreamManager::new());
    let watchers = Arc::new(FileWatcherManager::new(
        streams.clone(),
        config.watcher.clone(),
    ));

    Ok(AppState {
        auth: Arc::new(AuthService::with_demo_users()),
        config,
        repo,
        state_store,
        manager,
        files,
        commands,
        streams,
        orchestrator,
        watchers,
    })
}

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    let cors = if state.config.node.cors {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };
    Router::new()
        .route("/api/auth/login", post(routes::auth::login))
        .route("/api/auth/me", get(routes::auth::me))
        .route(
            "/api/sessions",
            get(routes::sessions::list).post(routes::sessions::create),
        )
        .route(
            "/api/sessions/:session_id",
            get(routes::sessions::fetch).delete(routes::sessions::remove),
        )
        .route("/api/chat/messages", post(routes::chat::send_message))
        .route(
            "/api/chat/messages/:session_id",
            get(routes::chat::fetch_messages),
        )
        .route("/api/files/:session_id/tree", get(routes::files::tree))
        .route("/api/files/:session_id", get(routes::files::content))
        .route("/api/sandbox/launch", post(routes::sandbox::launch))
        .route("/api/sandbox/destroy", post(routes::sandbox::destroy))
        .route(
            "/api/sandbox/destroy_all",
            post(routes::sandbox::destroy_all),
        )
        .route("/api/sandbox/exec", post(routes::sandbox::exec))
        .route(
            "/api/sandbox/preview/:session_id",
            get(routes::sandbox::preview),
        )
        .route("/api/ws/sessions/:session_id", get(routes::ws::session_stream))
        .layer(cors)
        .with_state(state)
}

/// Serve the node until the process is stopped.  Runs the sandbox idle
/// reaper alongside the HTTP listener.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.node.bind_addr.clone();
    let mut reaper = IdleReaper::new(
        state.manager.clone(),
        state.config.sandbox.gc_interval_secs,
    );
    reaper.start();

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!(addr = %bind_addr, "troupe node listening");
    let router = build_router(state);
    axum::serve(listener, router).await.context("serving http")?;
    reaper.stop().await;
    Ok(())
}
