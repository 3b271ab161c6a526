//! In-memory sessions used by the hub and supervisor tests.

use super::{InputController, PeerSession, PeerTransport, Role, SessionFactory};
use crate::error::SignalingError;
use crate::service::publisher::SignalingBoundary;
use crate::turn::codec::IceServerSet;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Stun(String),
    SetTurn(String),
    AddTurn(String),
}

pub struct FakeSession {
    pub role: Role,
    pub calls: Mutex<Vec<TransportCall>>,
    pub setup_results: Mutex<VecDeque<Result<(), SignalingError>>>,
    pub run_error: Mutex<Option<SignalingError>>,
    pub setup_calls: AtomicUsize,
    pub stopped: AtomicUsize,
    finish: Notify,
}

impl FakeSession {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            calls: Mutex::new(Vec::new()),
            setup_results: Mutex::new(VecDeque::new()),
            run_error: Mutex::new(None),
            setup_calls: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
            finish: Notify::new(),
        }
    }

    /// Ends the current `run` as if the remote peer disconnected.
    pub fn disconnect(&self) {
        self.finish.notify_one();
    }

    pub fn stop_count(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl PeerTransport for FakeSession {
    fn set_stun_server(&self, uri: &str) {
        self.calls.lock().push(TransportCall::Stun(uri.to_string()));
    }

    fn set_turn_server(&self, uri: &str) {
        self.calls.lock().push(TransportCall::SetTurn(uri.to_string()));
    }

    fn add_turn_server(&self, uri: &str) {
        self.calls.lock().push(TransportCall::AddTurn(uri.to_string()));
    }
}

#[async_trait]
impl PeerSession for FakeSession {
    async fn bind_pipeline(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn connect(&self) -> Result<(), SignalingError> {
        Ok(())
    }

    async fn setup_call(&self) -> Result<(), SignalingError> {
        self.setup_calls.fetch_add(1, Ordering::SeqCst);
        self.setup_results.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn run(&self) -> Result<(), SignalingError> {
        self.finish.notified().await;
        match self.run_error.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn stop_pipeline(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        self.finish.notify_one();
    }
}

/// Hands out [`FakeSession`]s and keeps every one it created.
#[derive(Default)]
pub struct FakeFactory {
    pub created: Mutex<Vec<Arc<FakeSession>>>,
    /// Applied to the next session created for the role.
    pub next_setup_results: Mutex<Vec<(Role, Vec<Result<(), SignalingError>>)>>,
}

impl FakeFactory {
    pub fn latest(&self, role: Role) -> Option<Arc<FakeSession>> {
        self.created.lock().iter().rev().find(|s| s.role == role).cloned()
    }

    pub fn created_for(&self, role: Role) -> usize {
        self.created.lock().iter().filter(|s| s.role == role).count()
    }
}

impl SessionFactory for FakeFactory {
    fn create(&self, role: Role, _config: &IceServerSet) -> Arc<dyn PeerSession> {
        let session = Arc::new(FakeSession::new(role));
        let mut pending = self.next_setup_results.lock();
        if let Some(pos) = pending.iter().position(|(r, _)| *r == role) {
            let (_, results) = pending.remove(pos);
            session.setup_results.lock().extend(results);
        }
        self.created.lock().push(Arc::clone(&session));
        session
    }
}

#[derive(Default)]
pub struct CountingInput {
    pub released: AtomicUsize,
}

#[async_trait]
impl InputController for CountingInput {
    async fn release_all(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingBoundary {
    pub published: Mutex<Vec<Arc<str>>>,
}

impl SignalingBoundary for RecordingBoundary {
    fn publish_rtc_config(&self, raw: Arc<str>) {
        self.published.lock().push(raw);
    }
}
