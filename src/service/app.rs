use crate::monitor::{monitor_for, CredentialMonitor, STOP_JOIN_BOUND};
use crate::service::agent::{ActionDispatcher, ControlAgentClient};
use crate::service::config_server::ConfigServer;
use crate::service::publisher::RtcConfigPublisher;
use crate::service::settings_store::SettingsStore;
use crate::session::{
    InputController, LiveSessionHub, Role, SessionFactory, SessionState, SessionSupervisor, SupervisorControl,
    TEARDOWN_BOUND,
};
use crate::turn::config::Settings;
use crate::turn::resolver::{ConfigResolver, SourceKind};
use crate::turn::rest::{RestFetcher, RtcConfigFetcher};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const APP_READY_POLL: Duration = Duration::from_millis(200);
/// Monitor join, then both role teardowns (they run concurrently), plus slack
/// for the endpoint and cleanup.
const STOP_TIMEOUT: Duration =
    Duration::from_secs(STOP_JOIN_BOUND.as_secs() + TEARDOWN_BOUND.as_secs() + 1);

/// Service run state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error(String),
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Stopped => write!(f, "stopped"),
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Stopping => write!(f, "stopping"),
            ServiceState::Error(e) => write!(f, "error: {}", e),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppStatus {
    pub state: String,
    pub uptime_secs: u64,
    pub source: Option<String>,
    pub bound_addr: Option<SocketAddr>,
    pub primary: Option<String>,
    pub secondary: Option<String>,
    pub secondary_enabled: bool,
}

/// Session backend driven by the supervisor.
#[derive(Clone)]
pub struct SessionBackend {
    pub factory: Arc<dyn SessionFactory>,
    pub input: Arc<dyn InputController>,
}

/// Owns every long-lived component and their shutdown order.
pub struct AppContext {
    settings: Settings,
    backend: Option<SessionBackend>,
    state: Arc<RwLock<ServiceState>>,
    store: SettingsStore,
    publisher: RtcConfigPublisher,

    source: Option<SourceKind>,
    hub: Option<Arc<LiveSessionHub>>,
    control: Option<SupervisorControl>,
    monitor: Option<Box<dyn CredentialMonitor>>,

    server_token: CancellationToken,
    session_token: CancellationToken,
    server_task: Option<JoinHandle<()>>,
    supervisor_task: Option<JoinHandle<()>>,

    bound_addr: Option<SocketAddr>,
    started_at: Option<Instant>,
}

impl AppContext {
    pub fn new(settings: Settings) -> Self {
        let store = SettingsStore::new(settings.json_config.clone());
        Self {
            settings,
            backend: None,
            state: Arc::new(RwLock::new(ServiceState::Stopped)),
            store,
            publisher: RtcConfigPublisher::new(),
            source: None,
            hub: None,
            control: None,
            monitor: None,
            server_token: CancellationToken::new(),
            session_token: CancellationToken::new(),
            server_task: None,
            supervisor_task: None,
            bound_addr: None,
            started_at: None,
        }
    }

    /// Sessions are only supervised when a backend is attached.
    pub fn with_sessions(mut self, backend: SessionBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub async fn state(&self) -> ServiceState {
        self.state.read().await.clone()
    }

    async fn set_state(&self, new_state: ServiceState) {
        info!("service state: {} -> {}", *self.state.read().await, new_state);
        *self.state.write().await = new_state;
    }

    pub fn publisher(&self) -> RtcConfigPublisher {
        self.publisher.clone()
    }

    pub fn hub(&self) -> Option<Arc<LiveSessionHub>> {
        self.hub.clone()
    }

    pub fn source(&self) -> Option<SourceKind> {
        self.source
    }

    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.bound_addr
    }

    pub async fn status(&self) -> AppStatus {
        let role_state = |role: Role| -> Option<String> {
            self.hub.as_ref().map(|hub| hub.state(role)).map(|s: SessionState| s.to_string())
        };
        AppStatus {
            state: self.state().await.to_string(),
            uptime_secs: self.started_at.map(|t| t.elapsed().as_secs()).unwrap_or(0),
            source: self.source.map(|s| s.to_string()),
            bound_addr: self.bound_addr,
            primary: role_state(Role::Primary),
            secondary: role_state(Role::Secondary),
            secondary_enabled: self
                .control
                .as_ref()
                .map(|c| c.secondary_enabled())
                .unwrap_or(self.settings.enable_secondary),
        }
    }

    /// Turns the secondary session on or off and persists the choice.
    pub async fn set_secondary_enabled(&mut self, enabled: bool) {
        self.settings.enable_secondary = enabled;
        if let Some(control) = &self.control {
            control.set_secondary_enabled(enabled);
        }
        if let Err(e) = self
            .store
            .set("enable_secondary", serde_json::Value::Bool(enabled))
            .await
        {
            warn!("could not persist enable_secondary: {}", e);
        }
    }
}

/// Polls until `path` exists; false when cancelled first.
pub async fn wait_for_app_ready(path: &Path, token: &CancellationToken) -> bool {
    if path.exists() {
        return true;
    }
    info!("waiting for app to become ready ({})", path.display());
    loop {
        tokio::select! {
            _ = token.cancelled() => return false,
            _ = tokio::time::sleep(APP_READY_POLL) => {}
        }
        if path.exists() {
            info!("app is ready");
            return true;
        }
    }
}

// start/stop
impl AppContext {
    /// Resolution may wait for one REST fetch, so the bound covers its timeout.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        if self.state().await != ServiceState::Stopped {
            return Err(anyhow::anyhow!("service is already running or starting"));
        }

        self.set_state(ServiceState::Starting).await;

        let bound = self.settings.rest_timeout() + Duration::from_secs(5);
        match tokio::time::timeout(bound, self.start_internal()).await {
            Ok(Ok(())) => {
                self.set_state(ServiceState::Running).await;
                self.started_at = Some(Instant::now());
                Ok(())
            }
            Ok(Err(e)) => {
                let error_msg = format!("service start failed: {}", e);
                error!("{}", error_msg);
                self.set_state(ServiceState::Error(error_msg.clone())).await;
                self.cleanup().await;
                Err(anyhow::anyhow!(error_msg))
            }
            Err(_) => {
                let error_msg = format!("service start timed out after {:?}", bound);
                error!("{}", error_msg);
                self.set_state(ServiceState::Error(error_msg.clone())).await;
                self.cleanup().await;
                Err(anyhow::anyhow!(error_msg))
            }
        }
    }

    async fn start_internal(&mut self) -> anyhow::Result<()> {
        info!("🚀 starting icewarden");
        self.server_token = CancellationToken::new();
        self.session_token = CancellationToken::new();

        let fetcher: Arc<dyn RtcConfigFetcher> = Arc::new(RestFetcher::new(self.settings.rest_timeout())?);
        let resolution = ConfigResolver::new(Arc::clone(&fetcher))
            .resolve(self.settings.source_candidates())
            .await?;
        let kind = resolution.source.kind();
        info!(source = %kind, "RTC config source selected");
        self.source = Some(kind);

        let hub = Arc::new(LiveSessionHub::new(
            resolution.initial.clone(),
            Arc::new(self.publisher.clone()),
            self.settings.asymmetric_ice_mode,
        ));
        self.hub = Some(Arc::clone(&hub));

        if let Some(mut monitor) = monitor_for(&resolution, &self.settings, fetcher, hub.clone()) {
            monitor.start()?;
            info!("✅ {} monitor started", monitor.name());
            self.monitor = Some(monitor);
        }

        if let Some(backend) = self.backend.clone() {
            let supervisor = SessionSupervisor::new(
                Arc::clone(&hub),
                backend.factory,
                backend.input,
                self.settings.enable_secondary,
            );
            self.control = Some(supervisor.control());

            let token = self.session_token.clone();
            let wait_ready = self.settings.app_wait_ready;
            let ready_file = self.settings.app_ready_file.clone();
            self.supervisor_task = Some(tokio::spawn(async move {
                if wait_ready && !wait_for_app_ready(&ready_file, &token).await {
                    return;
                }
                supervisor.run(token).await;
            }));
            info!("✅ session supervisor started");
        } else {
            info!("no session backend attached, serving RTC config only");
        }

        let actions = Arc::new(ActionDispatcher::new(
            ControlAgentClient::new(self.settings.agent_socket.clone()),
            self.control.clone(),
        ));
        let server = ConfigServer::bind(&self.settings.addr, self.settings.port, self.publisher.clone(), actions).await?;
        self.bound_addr = Some(server.local_addr()?);
        self.server_task = Some(tokio::spawn(server.run(self.server_token.clone())));
        info!("✅ RTC config endpoint started");

        Ok(())
    }

    /// Endpoint first, then monitors, then sessions, then shared handles.
    async fn stop_internal(&mut self) -> anyhow::Result<()> {
        info!("🛑 stopping icewarden");

        self.server_token.cancel();
        if let Some(task) = self.server_task.take() {
            task.await?;
        }

        if let Some(monitor) = self.monitor.as_mut() {
            monitor.stop().await;
        }

        self.session_token.cancel();
        if let Some(task) = self.supervisor_task.take() {
            task.await?;
        }

        self.cleanup().await;
        Ok(())
    }

    async fn cleanup(&mut self) {
        self.server_token.cancel();
        self.session_token.cancel();
        if let Some(task) = self.server_task.take() {
            task.abort();
        }
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop().await;
        }
        if let Some(task) = self.supervisor_task.take() {
            task.abort();
        }
        self.control = None;
        self.hub = None;
        self.bound_addr = None;
        self.started_at = None;
    }

    pub async fn stop(&mut self) -> anyhow::Result<()> {
        if self.state().await == ServiceState::Stopped {
            return Ok(());
        }

        self.set_state(ServiceState::Stopping).await;

        match tokio::time::timeout(STOP_TIMEOUT, self.stop_internal()).await {
            Ok(Ok(())) => {
                self.set_state(ServiceState::Stopped).await;
                info!("✅ icewarden stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                let error_msg = format!("service stop failed: {}", e);
                error!("{}", error_msg);
                self.set_state(ServiceState::Error(error_msg.clone())).await;
                self.cleanup().await;
                Err(anyhow::anyhow!(error_msg))
            }
            Err(_) => {
                let error_msg = format!("service stop timed out after {:?}, remaining tasks aborted", STOP_TIMEOUT);
                warn!("{}", error_msg);
                self.cleanup().await;
                self.set_state(ServiceState::Stopped).await;
                Err(anyhow::anyhow!(error_msg))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{CountingInput, FakeFactory};
    use async_trait::async_trait;
    use clap::Parser;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings(dir: &Path, extra: &[&str]) -> Settings {
        let json_config = dir.join("settings.json");
        let rtc = dir.join("rtc.json");
        let socket = dir.join("agent.sock");
        let mut argv = vec![
            "icewarden".to_string(),
            "--addr".to_string(),
            "127.0.0.1".to_string(),
            "--port".to_string(),
            "0".to_string(),
            "--json-config".to_string(),
            json_config.display().to_string(),
            "--rtc-config-json".to_string(),
            rtc.display().to_string(),
            "--agent-socket".to_string(),
            socket.display().to_string(),
        ];
        argv.extend(extra.iter().map(|s| s.to_string()));
        Settings::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_app_ready_gate() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let ready = dir.path().join("ready");
            let token = CancellationToken::new();

            std::fs::File::create(&ready).unwrap().write_all(b"1").unwrap();
            assert!(wait_for_app_ready(&ready, &token).await);

            let missing = dir.path().join("never");
            token.cancel();
            assert!(!wait_for_app_ready(&missing, &token).await);
        });
    }

    #[tokio::test]
    async fn test_start_and_stop_without_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = AppContext::new(settings(dir.path(), &[]));

        app.start().await.unwrap();
        assert_eq!(app.state().await, ServiceState::Running);
        assert_eq!(app.source(), Some(SourceKind::Default));
        assert!(app.bound_addr().is_some());
        assert!(app.publisher().current().contains("stun:stun.l.google.com:19302"));
        assert!(app.start().await.is_err(), "double start is rejected");

        app.stop().await.unwrap();
        assert_eq!(app.state().await, ServiceState::Stopped);
        app.stop().await.unwrap();
    }

    #[test]
    fn test_stop_timeout_covers_monitor_and_teardown() {
        assert!(STOP_TIMEOUT > STOP_JOIN_BOUND + TEARDOWN_BOUND);
    }

    #[tokio::test]
    async fn test_slow_teardown_completes_before_stop_returns() {
        struct SlowInput(AtomicUsize);

        #[async_trait]
        impl InputController for SlowInput {
            async fn release_all(&self) {
                tokio::time::sleep(Duration::from_millis(3500)).await;
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(FakeFactory::default());
        let input = Arc::new(SlowInput(AtomicUsize::new(0)));
        let mut app = AppContext::new(settings(dir.path(), &["--app-wait-ready", "false"])).with_sessions(
            SessionBackend {
                factory: factory.clone(),
                input: input.clone(),
            },
        );
        app.start().await.unwrap();

        let mut waited = Duration::ZERO;
        while factory.created_for(Role::Primary) == 0 && waited < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }
        let primary = factory.latest(Role::Primary).unwrap();

        app.stop().await.unwrap();
        assert_eq!(app.state().await, ServiceState::Stopped);
        assert_eq!(primary.stop_count(), 1);
        assert_eq!(input.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_legacy_settings_drive_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(FakeFactory::default());
        let input = Arc::new(CountingInput::default());
        let mut app = AppContext::new(settings(
            dir.path(),
            &[
                "--turn-host",
                "turn.example.com",
                "--turn-port",
                "3478",
                "--turn-username",
                "alice",
                "--turn-password",
                "secret",
                "--app-wait-ready",
                "false",
            ],
        ))
        .with_sessions(SessionBackend {
            factory: factory.clone(),
            input,
        });

        app.start().await.unwrap();
        assert_eq!(app.source(), Some(SourceKind::Legacy));

        let mut waited = Duration::ZERO;
        while factory.created_for(Role::Primary) == 0 && waited < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }
        let primary = factory.latest(Role::Primary).unwrap();
        assert_eq!(factory.created_for(Role::Secondary), 0);

        app.set_secondary_enabled(true).await;
        let saved = std::fs::read_to_string(dir.path().join("settings.json")).unwrap();
        assert!(saved.contains("\"enable_secondary\": true"));
        assert!(app.status().await.secondary_enabled);

        app.stop().await.unwrap();
        assert!(primary.stop_count() >= 1);
    }
}
