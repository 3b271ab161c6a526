//! Peer session roles, lifecycle and the collaborator interfaces the
//! supervisor and hub drive.

pub mod hub;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use hub::{LiveSessionHub, SessionHandle};
pub use supervisor::{SessionSupervisor, SupervisorControl, NO_PEER_RETRY_DELAY, POLL_INTERVAL, TEARDOWN_BOUND};

use crate::error::SignalingError;
use crate::turn::codec::IceServerSet;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// The two independently supervised sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Primary,
    Secondary,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Primary, Role::Secondary];

    /// Id of the remote peer this role calls.
    pub fn peer_id(self) -> u32 {
        match self {
            Role::Primary => 1,
            Role::Secondary => 3,
        }
    }

    /// Id this endpoint registers with for the role.
    pub fn local_peer_id(self) -> u32 {
        match self {
            Role::Primary => 0,
            Role::Secondary => 2,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Role::Primary => 0,
            Role::Secondary => 1,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Secondary => write!(f, "secondary"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Terminated(String),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Active => write!(f, "active"),
            SessionState::Terminated(reason) => write!(f, "terminated: {}", reason),
        }
    }
}

/// ICE server mutation on a live, possibly still negotiating, session.
pub trait PeerTransport: Send + Sync {
    fn set_stun_server(&self, uri: &str);
    fn set_turn_server(&self, uri: &str);
    fn add_turn_server(&self, uri: &str);
}

/// One media session plus its signaling connection.
#[async_trait]
pub trait PeerSession: PeerTransport {
    /// Binds the media-control object and starts pumping its event bus.
    async fn bind_pipeline(&self) -> anyhow::Result<()>;

    async fn connect(&self) -> Result<(), SignalingError>;

    async fn setup_call(&self) -> Result<(), SignalingError>;

    /// Signaling run loop; returns when the connection ends.
    async fn run(&self) -> Result<(), SignalingError>;

    async fn stop_pipeline(&self);
}

pub trait SessionFactory: Send + Sync {
    fn create(&self, role: Role, config: &IceServerSet) -> Arc<dyn PeerSession>;
}

#[async_trait]
pub trait InputController: Send + Sync {
    /// Releases every held key and button.
    async fn release_all(&self);
}
