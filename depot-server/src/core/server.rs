//! Server Implementation
//!
//! HTTP + WebSocket 服务器启动和管理

use std::time::Duration;

use crate::api::build_app;
use crate::core::tasks::{BackgroundTasks, TaskKind, reconcile_sweep};
use crate::core::{Config, Result, ServerState};

/// HTTP Server
pub struct Server {
    config: Config,
    state: Option<ServerState>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: None,
        }
    }

    /// Create server with existing state
    pub fn with_state(config: Config, state: ServerState) -> Self {
        Self {
            config,
            state: Some(state),
        }
    }

    pub async fn run(&self) -> Result<()> {
        let state = match &self.state {
            Some(s) => s.clone(),
            None => ServerState::initialize(&self.config)?,
        };

        let mut tasks = BackgroundTasks::new();
        if self.config.reconcile_interval_secs > 0 {
            tasks.spawn(
                "reconcile_sweep",
                TaskKind::Periodic,
                reconcile_sweep(
                    state.reconciler.clone(),
                    Duration::from_secs(self.config.reconcile_interval_secs),
                    tasks.shutdown_token(),
                ),
            );
        }

        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Depot server listening on {}", addr);

        let app = build_app(&state).with_state(state.clone());
        let shutdown = async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down...");
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tasks.shutdown().await;
        Ok(())
    }
}
