//! `a2a-server` — runs the coordination server: JSON-RPC/SSE front end,
//! task lifecycle manager, pub/sub broker, agent router, and work queue,
//! all on one axum listener.

use std::sync::Arc;

use a2a_rs::builders::AgentCardBuilder;
use a2a_rs::config::{PersistenceBackend, ServerConfig};
use a2a_rs::server::{
    a2a_router, auth_router, coordinator_router, verifier_for, AgentRouter, AuthRoutesState,
    CoordinatorState, DefaultRequestHandler, EchoHandler, InMemoryAgentTaskStore, InMemoryBroker,
    InMemoryTaskStore, SessionStore, WorkerCoordinator,
};
use clap::Parser;

/// Run the A2A coordination server.
#[derive(Debug, Parser)]
#[command(name = "a2a-server", about = "Agent-to-Agent coordination server")]
struct Cli {
    /// Address to bind to. Overrides A2A_HOST.
    #[arg(long, env = "A2A_HOST")]
    host: Option<String>,

    /// Port to bind to. Overrides A2A_PORT.
    #[arg(long, env = "A2A_PORT")]
    port: Option<u16>,

    /// Disable bearer-token authentication entirely. Overrides A2A_AUTH_DISABLED.
    #[arg(long)]
    no_auth: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::from_env()?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.no_auth {
        config.auth.disabled = true;
    }

    if matches!(config.persistence, PersistenceBackend::Sqlite { .. }) {
        tracing::warn!(
            "sqlite persistence is configured but this binary currently wires the in-memory \
             backend only; durable storage support lives behind the SqliteTaskStore/SqliteAgentTaskStore \
             adapters and is selected the same way once a migration path is set up"
        );
    }

    let task_store: Arc<dyn a2a_rs::server::TaskStore> = Arc::new(InMemoryTaskStore::new());
    let agent_task_store = Arc::new(InMemoryAgentTaskStore::new());
    let broker = Arc::new(InMemoryBroker::new());
    let workers = Arc::new(WorkerCoordinator::new(agent_task_store.clone(), config.queue.clone()));

    let router = Arc::new(AgentRouter::new(vec![], Arc::new(EchoHandler::default())));
    let handler = Arc::new(DefaultRequestHandler::new(router, task_store));

    let agent_card = AgentCardBuilder::new(
        "a2a-coordination-server",
        "JSON-RPC/SSE coordination server with a durable agent work queue",
        env!("CARGO_PKG_VERSION"),
    )
    .with_jsonrpc_interface(format!("http://{}:{}/", config.host, config.port))
    .with_streaming(true)
    .with_push_notifications(false)
    .build();

    let verifier = verifier_for(&config.auth);
    let token_endpoint = a2a_rs::server::token_endpoint_from_issuer(&config.auth.issuer);
    let sessions = Arc::new(SessionStore::new(config.auth.session_sweep_interval));
    let auth_state = AuthRoutesState::new(config.auth.clone(), token_endpoint, verifier, sessions.clone());

    let coordinator_state = CoordinatorState {
        broker,
        tasks: agent_task_store,
        workers: workers.clone(),
    };

    let sweep_handle = tokio::spawn(workers.clone().run_sweep_loop());
    let session_sweep_handle = tokio::spawn(sessions.run_sweep_loop());

    let app = a2a_router(handler, agent_card)
        .merge(auth_router(auth_state))
        .merge(coordinator_router(coordinator_state));

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(%addr, "starting a2a coordination server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    sweep_handle.abort();
    session_sweep_handle.abort();
    Ok(())
}
