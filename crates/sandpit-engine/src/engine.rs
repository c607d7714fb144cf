use crate::api::{self, ApiState};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::router;
use crate::workspace::Workspace;
use axum::Router;
use sandpit_runtime::{Executor, LanguageTable, SessionSupervisor};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Engine {
    config: EngineConfig,
    executor: Arc<Executor>,
    sessions: Arc<SessionSupervisor>,
    workspace: Workspace,
    shutdown: CancellationToken,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        info!("Initializing Sandpit engine");

        let workspace = Workspace::open_root(&config.workspace.root)?;

        let runtime_config = config.runtime_config();
        std::fs::create_dir_all(&runtime_config.scratch_root)?;
        info!(
            "Scratch root: {} (compile gate: {}, max concurrent runs: {})",
            runtime_config.scratch_root.display(),
            runtime_config.compile_gate.as_str(),
            runtime_config.max_concurrent
        );

        let languages = Arc::new(LanguageTable::builtin());
        info!("Languages: {}", languages.supported_description());

        let executor = Arc::new(Executor::new(runtime_config, languages));

        let shutdown = CancellationToken::new();
        let sessions = Arc::new(SessionSupervisor::new(
            executor.clone(),
            config.session_config(),
            shutdown.clone(),
        ));

        Ok(Self {
            config,
            executor,
            sessions,
            workspace,
            shutdown,
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Cancelling this token stops the server and terminates every session.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn router(&self) -> Router {
        let state = ApiState {
            executor: self.executor.clone(),
            sessions: self.sessions.clone(),
            workspace: self.workspace.clone(),
        };

        let mut router = router::with_tracing(api::build_router(state));

        if self.config.server.enable_cors {
            router = router::with_cors(router);
        }

        router
    }

    pub async fn start_server(&self) -> Result<()> {
        let host = self.config.server.host.as_str();
        let port = self.config.server.port;

        let listener = TcpListener::bind((host, port)).await?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener until the shutdown token fires.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("Starting HTTP server on {}", listener.local_addr()?);

        let shutdown = self.shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| EngineError::Server(e.to_string()))?;

        info!("HTTP server stopped");
        Ok(())
    }

    /// Serves until ctrl-c, then cancels the shutdown token.
    pub async fn run(&self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received ctrl-c, shutting down"),
                Err(e) => warn!("Failed to listen for ctrl-c: {}", e),
            }
            shutdown.cancel();
        });

        self.start_server().await
    }
}
