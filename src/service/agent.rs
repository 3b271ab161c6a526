//! Operational actions coming in from the web boundary.

use crate::session::{Role, SupervisorControl};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, warn};

/// Sends raw command strings to the external control agent over its Unix socket.
#[derive(Debug, Clone)]
pub struct ControlAgentClient {
    socket_path: PathBuf,
}

impl ControlAgentClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Returns false when the agent is unreachable.
    pub async fn send(&self, command: &str) -> bool {
        if !self.socket_path.exists() {
            warn!("control agent socket not found at {}", self.socket_path.display());
            return false;
        }
        match self.write_command(command).await {
            Ok(()) => {
                info!("sent command {:?} to control agent", command);
                true
            }
            Err(e) => {
                warn!("could not send command to control agent: {}", e);
                false
            }
        }
    }

    #[cfg(unix)]
    async fn write_command(&self, command: &str) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;

        let mut stream = tokio::net::UnixStream::connect(&self.socket_path).await?;
        stream.write_all(command.as_bytes()).await?;
        stream.shutdown().await
    }

    #[cfg(not(unix))]
    async fn write_command(&self, _command: &str) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "control agent requires unix domain sockets",
        ))
    }
}

/// Role-agnostic command channel exposed to the web boundary.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn on_action(&self, action: &str) -> bool;
}

pub struct ActionDispatcher {
    agent: ControlAgentClient,
    control: Option<SupervisorControl>,
}

impl ActionDispatcher {
    pub fn new(agent: ControlAgentClient, control: Option<SupervisorControl>) -> Self {
        Self { agent, control }
    }
}

#[async_trait]
impl ActionHandler for ActionDispatcher {
    async fn on_action(&self, action: &str) -> bool {
        let action = action.trim();
        if action.is_empty() {
            return false;
        }
        info!("received action {:?}", action);
        let sent = self.agent.send(action).await;

        if action == "shutdown" {
            if let Some(control) = &self.control {
                control.stop_role(Role::Primary).await;
            }
        }
        sent
    }
}
