//! Keeps the primary and secondary sessions alive.
//!
//! Each role runs connect → call setup → run loop → teardown in its own task,
//! so a stuck teardown of one role never holds up the other. The supervisor
//! polls both tasks; a finished role is reconnected right away, with no backoff
//! and no retry limit.

use super::{InputController, LiveSessionHub, PeerSession, Role, SessionFactory, SessionHandle};
use crate::error::SignalingError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Delay before call setup is retried while the remote peer has not joined.
pub const NO_PEER_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Upper bound on pipeline stop plus input release for one role.
pub const TEARDOWN_BOUND: Duration = Duration::from_secs(5);

struct RoleTask {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Handle for toggling roles while the supervisor loop owns the sessions.
#[derive(Clone)]
pub struct SupervisorControl {
    hub: Arc<LiveSessionHub>,
    secondary_enabled: Arc<AtomicBool>,
}

impl SupervisorControl {
    /// Takes effect on the next poll: a disabled secondary is torn down and
    /// not restarted, an enabled one is connected.
    pub fn set_secondary_enabled(&self, enabled: bool) {
        self.secondary_enabled.store(enabled, Ordering::SeqCst);
        info!("secondary session {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn secondary_enabled(&self) -> bool {
        self.secondary_enabled.load(Ordering::SeqCst)
    }

    /// Stops the role's pipeline; the supervisor restarts it if the role is enabled.
    pub async fn stop_role(&self, role: Role) {
        if let Some(session) = self.hub.session(role) {
            info!(%role, "stopping pipeline on request");
            session.stop_pipeline().await;
        }
    }
}

pub struct SessionSupervisor {
    hub: Arc<LiveSessionHub>,
    factory: Arc<dyn SessionFactory>,
    input: Arc<dyn InputController>,
    secondary_enabled: Arc<AtomicBool>,
    tasks: [Option<RoleTask>; 2],
}

impl SessionSupervisor {
    pub fn new(
        hub: Arc<LiveSessionHub>,
        factory: Arc<dyn SessionFactory>,
        input: Arc<dyn InputController>,
        secondary_enabled: bool,
    ) -> Self {
        Self {
            hub,
            factory,
            input,
            secondary_enabled: Arc::new(AtomicBool::new(secondary_enabled)),
            tasks: [None, None],
        }
    }

    pub fn control(&self) -> SupervisorControl {
        SupervisorControl {
            hub: Arc::clone(&self.hub),
            secondary_enabled: Arc::clone(&self.secondary_enabled),
        }
    }

    fn enabled(&self, role: Role) -> bool {
        match role {
            Role::Primary => true,
            Role::Secondary => self.secondary_enabled.load(Ordering::SeqCst),
        }
    }

    /// Polls until `token` is cancelled, then tears down both roles.
    pub async fn run(mut self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.poll_once(),
            }
        }

        self.shutdown().await;
    }

    /// One supervision step: forget finished roles, ask disabled ones to stop,
    /// then start every enabled role that has no task. Never waits on a role.
    pub fn poll_once(&mut self) {
        for role in Role::ALL {
            let idx = role.index();
            let enabled = self.enabled(role);

            match self.tasks[idx].as_ref().map(|t| t.task.is_finished()) {
                Some(true) => self.tasks[idx] = None,
                Some(false) if !enabled => {
                    if let Some(task) = &self.tasks[idx] {
                        task.stop.cancel();
                    }
                }
                _ => {}
            }

            if self.tasks[idx].is_none() && enabled {
                self.launch(role);
            }
        }
    }

    fn launch(&mut self, role: Role) {
        let config = self.hub.current();
        let session = self.factory.create(role, &config);
        let handle = self.hub.attach(role, Arc::clone(&session));
        info!(%role, peer_id = role.peer_id(), "connecting session");

        let stop = CancellationToken::new();
        let task = tokio::spawn(role_cycle(
            session,
            Arc::clone(&self.hub),
            Arc::clone(&self.input),
            handle,
            stop.clone(),
        ));
        self.tasks[role.index()] = Some(RoleTask { stop, task });
    }

    async fn shutdown(&mut self) {
        let running: Vec<JoinHandle<()>> = self
            .tasks
            .iter_mut()
            .filter_map(Option::take)
            .map(|task| {
                task.stop.cancel();
                task.task
            })
            .collect();

        // Each role bounds its own teardown.
        futures::future::join_all(running).await;
        info!("session supervisor stopped");
    }
}

/// One connect cycle of a role, ending with its teardown.
async fn role_cycle(
    session: Arc<dyn PeerSession>,
    hub: Arc<LiveSessionHub>,
    input: Arc<dyn InputController>,
    handle: SessionHandle,
    stop: CancellationToken,
) {
    let role = handle.role;
    let reason = tokio::select! {
        _ = stop.cancelled() => "stopped".to_string(),
        result = drive(Arc::clone(&session), Arc::clone(&hub), handle) => match result {
            Ok(()) => "session ended".to_string(),
            Err(e) => e.to_string(),
        },
    };

    warn!(%role, "session ended: {}, tearing down", reason);
    // Out of the hub first so no update races the teardown.
    hub.begin_teardown(handle, reason);

    let teardown = async {
        session.stop_pipeline().await;
        if role == Role::Primary {
            input.release_all().await;
        }
    };
    if tokio::time::timeout(TEARDOWN_BOUND, teardown).await.is_err() {
        warn!(%role, "teardown did not finish within {:?}, giving up on it", TEARDOWN_BOUND);
    }
}

async fn setup_call(session: &dyn PeerSession) -> Result<(), SignalingError> {
    loop {
        match session.setup_call().await {
            Err(SignalingError::NoPeer) => {
                info!("remote peer not connected yet, retrying in {:?}", NO_PEER_RETRY_DELAY);
                tokio::time::sleep(NO_PEER_RETRY_DELAY).await;
            }
            other => return other,
        }
    }
}

async fn drive(
    session: Arc<dyn PeerSession>,
    hub: Arc<LiveSessionHub>,
    handle: SessionHandle,
) -> Result<(), SignalingError> {
    session
        .bind_pipeline()
        .await
        .map_err(|e| SignalingError::Fatal(format!("pipeline bind failed: {}", e)))?;
    session.connect().await?;
    setup_call(session.as_ref()).await?;
    hub.mark_active(handle);

    loop {
        match session.run().await {
            Err(SignalingError::NoPeer) => setup_call(session.as_ref()).await?,
            Err(e) => {
                error!(role = %handle.role, "signaling error: {}", e);
                return Err(e);
            }
            Ok(()) => return Ok(()),
        }
    }
}
