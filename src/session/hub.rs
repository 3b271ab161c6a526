//! Applies refreshed ICE configurations to live sessions.
//!
//! Sessions are registered per role under a generation number. Hot-swap and
//! teardown take the same lock, so an update either reaches a session while it
//! is still `Active` or is dropped for it; a handle from an older generation
//! can never touch the session that replaced it.

use super::{PeerSession, Role, SessionState};
use crate::monitor::RtcConfigSink;
use crate::service::publisher::SignalingBoundary;
use crate::turn::codec::{decode_turn_uri, IceServerSet};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Opaque reference to one session generation of a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle {
    pub role: Role,
    generation: u64,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    state: SessionState,
    session: Option<Arc<dyn PeerSession>>,
}

struct HubInner {
    slots: [Slot; 2],
    current: IceServerSet,
    next_generation: u64,
}

pub struct LiveSessionHub {
    inner: Mutex<HubInner>,
    boundary: Arc<dyn SignalingBoundary>,
    asymmetric: bool,
}

impl LiveSessionHub {
    /// `asymmetric` skips live transport updates; the document is still published.
    pub fn new(initial: IceServerSet, boundary: Arc<dyn SignalingBoundary>, asymmetric: bool) -> Self {
        boundary.publish_rtc_config(initial.raw_shared());
        Self {
            inner: Mutex::new(HubInner {
                slots: Default::default(),
                current: initial,
                next_generation: 1,
            }),
            boundary,
            asymmetric,
        }
    }

    /// Latest configuration, used for sessions created from now on.
    pub fn current(&self) -> IceServerSet {
        self.inner.lock().current.clone()
    }

    pub fn state(&self, role: Role) -> SessionState {
        self.inner.lock().slots[role.index()].state.clone()
    }

    /// The session currently registered for `role`, if any.
    pub fn session(&self, role: Role) -> Option<Arc<dyn PeerSession>> {
        self.inner.lock().slots[role.index()].session.clone()
    }

    /// Registers a new generation for `role` in `Connecting` state.
    pub fn attach(&self, role: Role, session: Arc<dyn PeerSession>) -> SessionHandle {
        let mut inner = self.inner.lock();
        let generation = inner.next_generation;
        inner.next_generation += 1;
        inner.slots[role.index()] = Slot {
            generation,
            state: SessionState::Connecting,
            session: Some(session),
        };
        debug!(%role, generation, "session attached");
        SessionHandle { role, generation }
    }

    /// Returns false when the handle is stale or the session is not connecting.
    pub fn mark_active(&self, handle: SessionHandle) -> bool {
        let mut inner = self.inner.lock();
        let slot = &mut inner.slots[handle.role.index()];
        if slot.generation != handle.generation || slot.state != SessionState::Connecting {
            return false;
        }
        slot.state = SessionState::Active;
        info!(role = %handle.role, "session active");
        true
    }

    /// Moves the session out of the hub; later updates no longer reach it.
    pub fn begin_teardown(&self, handle: SessionHandle, reason: impl Into<String>) -> Option<Arc<dyn PeerSession>> {
        let mut inner = self.inner.lock();
        let slot = &mut inner.slots[handle.role.index()];
        if slot.generation != handle.generation {
            return None;
        }
        slot.state = SessionState::Terminated(reason.into());
        slot.session.take()
    }

    /// Hot-swaps `set` into every active session and publishes it once.
    pub fn apply(&self, set: IceServerSet) {
        let mut inner = self.inner.lock();

        if self.asymmetric {
            debug!("asymmetric ICE mode, skipping live STUN/TURN update");
        } else {
            for (role, slot) in Role::ALL.iter().zip(inner.slots.iter()) {
                if slot.state != SessionState::Active {
                    continue;
                }
                if let Some(session) = &slot.session {
                    apply_transport(*role, session.as_ref(), &set);
                }
            }
        }

        inner.current = set;
        self.boundary.publish_rtc_config(inner.current.raw_shared());
    }
}

fn apply_transport(role: Role, transport: &dyn PeerSession, set: &IceServerSet) {
    if let Some(stun) = set.stun_uris().first() {
        info!(%role, "updating STUN server {}", stun);
        transport.set_stun_server(stun);
    }
    for (i, turn) in set.turn_uris().iter().enumerate() {
        let shown = decode_turn_uri(turn).map(|p| p.redacted()).unwrap_or_default();
        if i == 0 {
            info!(%role, "updating TURN server {}", shown);
            transport.set_turn_server(turn);
        } else {
            info!(%role, "adding TURN server {}", shown);
            transport.add_turn_server(turn);
        }
    }
}

impl RtcConfigSink for LiveSessionHub {
    fn on_rtc_config(&self, set: IceServerSet) {
        self.apply(set);
    }
}
