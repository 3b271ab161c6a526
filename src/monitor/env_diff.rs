//! Watches the long-term TURN credential environment variables for rotation.

use super::{CredentialMonitor, MonitorState, MonitorTask, RtcConfigSink, Trigger};
use crate::turn::codec::{IceServerSet, StunEndpoint, TurnEndpoint, TurnProtocol, DEFAULT_STUN_HOST};
use crate::turn::resolver::LegacySource;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

pub const TRACKED_VARS: [&str; 9] = [
    "TURN_HOST",
    "TURN_PORT",
    "TURN_USERNAME",
    "TURN_PASSWORD",
    "TURN_PROTOCOL",
    "TURN_TLS",
    "STUNNER",
    "STUN_HOST",
    "STUN_PORT",
];

pub trait EnvSource: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment.
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Raw values of [`TRACKED_VARS`], compared byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSnapshot {
    pub turn_host: String,
    pub turn_port: String,
    pub turn_username: String,
    pub turn_password: String,
    pub turn_protocol: String,
    pub turn_tls: String,
    pub stunner: String,
    pub stun_host: String,
    pub stun_port: String,
}

impl EnvSnapshot {
    pub fn read(env: &dyn EnvSource) -> Self {
        let get = |name: &str, default: &str| env.var(name).unwrap_or_else(|| default.to_string());
        Self {
            turn_host: get("TURN_HOST", ""),
            turn_port: get("TURN_PORT", ""),
            turn_username: get("TURN_USERNAME", ""),
            turn_password: get("TURN_PASSWORD", ""),
            turn_protocol: get("TURN_PROTOCOL", "udp"),
            turn_tls: get("TURN_TLS", "false"),
            stunner: get("STUNNER", "false"),
            stun_host: get("STUN_HOST", DEFAULT_STUN_HOST),
            stun_port: get("STUN_PORT", "19302"),
        }
    }

    /// `None` while host, port, username or password is missing or unusable.
    pub fn to_legacy(&self) -> Option<LegacySource> {
        if self.turn_host.is_empty() || self.turn_username.is_empty() || self.turn_password.is_empty() {
            return None;
        }
        let port = self.turn_port.parse().ok()?;
        let stun = match self.stun_port.parse() {
            Ok(port) if !self.stun_host.is_empty() => Some(StunEndpoint::new(self.stun_host.clone(), port)),
            _ => None,
        };
        Some(LegacySource {
            turn: TurnEndpoint {
                host: self.turn_host.clone(),
                port,
                protocol: TurnProtocol::from_setting(&self.turn_protocol),
                tls: is_true(&self.turn_tls),
            },
            username: self.turn_username.clone(),
            password: self.turn_password.clone(),
            relay_only: is_true(&self.stunner),
            stun,
        })
    }
}

fn is_true(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

struct DiffState {
    env: Arc<dyn EnvSource>,
    sink: Arc<dyn RtcConfigSink>,
    observed: Mutex<EnvSnapshot>,
    last_emitted: Mutex<Option<IceServerSet>>,
}

impl DiffState {
    fn tick(&self) -> bool {
        let current = EnvSnapshot::read(self.env.as_ref());
        {
            let mut observed = self.observed.lock();
            if *observed == current {
                return false;
            }
            // Recorded even if the rebuild fails so a bad value is reported once.
            *observed = current.clone();
        }

        info!("detected TURN environment variable change, rebuilding RTC config");
        let Some(source) = current.to_legacy() else {
            warn!("TURN environment is incomplete, keeping previous RTC config");
            return false;
        };
        match source.build() {
            Ok(set) => {
                *self.last_emitted.lock() = Some(set.clone());
                self.sink.on_rtc_config(set);
                true
            }
            Err(e) => {
                warn!("could not rebuild RTC config from environment: {}", e);
                false
            }
        }
    }
}

pub struct EnvDiffMonitor {
    enabled: bool,
    period: Duration,
    state: Arc<DiffState>,
    task: MonitorTask,
}

impl EnvDiffMonitor {
    /// The environment at construction time is the baseline.
    pub fn new(
        enabled: bool,
        period: Duration,
        env: Arc<dyn EnvSource>,
        sink: Arc<dyn RtcConfigSink>,
    ) -> Self {
        let observed = EnvSnapshot::read(env.as_ref());
        Self {
            enabled,
            period,
            state: Arc::new(DiffState {
                env,
                sink,
                observed: Mutex::new(observed),
                last_emitted: Mutex::new(None),
            }),
            task: MonitorTask::default(),
        }
    }

    /// Re-reads the tracked variables; returns whether a new config was emitted.
    pub fn tick(&self) -> bool {
        self.state.tick()
    }
}

#[async_trait]
impl CredentialMonitor for EnvDiffMonitor {
    fn name(&self) -> &'static str {
        "env"
    }

    fn state(&self) -> MonitorState {
        MonitorState {
            enabled: self.enabled,
            running: self.task.is_running(),
            trigger: Trigger::Periodic(self.period),
            last_emitted: self.state.last_emitted.lock().clone(),
        }
    }

    fn start(&mut self) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        info!("starting TURN environment monitor, period {:?}", self.period);
        let state = Arc::clone(&self.state);
        let period = self.period;
        self.task.spawn("env", move |token| async move {
            let mut wake = tokio::time::interval(period);
            wake.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = wake.tick() => {}
                }
                state.tick();
            }
        })
    }

    async fn stop(&mut self) {
        self.task.shutdown("env").await;
    }
}
