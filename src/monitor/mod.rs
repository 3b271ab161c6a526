//! Background credential monitors.
//!
//! Each monitor owns one tokio task and publishes refreshed configurations
//! into an [`RtcConfigSink`]. Which monitor is armed follows from the source
//! picked by the resolver; the default source arms none.

pub mod env_diff;
pub mod file_watch;
pub mod polled;

pub use env_diff::{EnvDiffMonitor, EnvSnapshot, EnvSource, ProcessEnv, TRACKED_VARS};
pub use file_watch::FileWatchMonitor;
pub use polled::{ConfigProducer, HmacProducer, PolledFetchMonitor, RestProducer};

use crate::turn::codec::IceServerSet;
use crate::turn::config::Settings;
use crate::turn::resolver::{CredentialSource, Resolution};
use crate::turn::rest::RtcConfigFetcher;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cadence at which periodic monitors check whether their period elapsed.
pub const WAKE_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound on how long `stop()` waits for a monitor task before aborting it.
pub const STOP_JOIN_BOUND: Duration = Duration::from_secs(2);

/// Observer that receives every configuration a monitor produces.
pub trait RtcConfigSink: Send + Sync {
    fn on_rtc_config(&self, set: IceServerSet);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Periodic(Duration),
    FilesystemEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorState {
    pub enabled: bool,
    pub running: bool,
    pub trigger: Trigger,
    /// Only tracked by diff-gated monitors.
    pub last_emitted: Option<IceServerSet>,
}

#[async_trait]
pub trait CredentialMonitor: Send + Sync {
    fn name(&self) -> &'static str;

    fn state(&self) -> MonitorState;

    /// Spawns the background task. A disabled monitor stays idle.
    fn start(&mut self) -> anyhow::Result<()>;

    /// Cancels the background task. Safe to call repeatedly or before `start`.
    async fn stop(&mut self);
}

/// Cancellation token plus join handle of one monitor task.
#[derive(Debug, Default)]
pub(crate) struct MonitorTask {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl MonitorTask {
    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub(crate) fn spawn<F, Fut>(&mut self, name: &'static str, body: F) -> anyhow::Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_running() {
            anyhow::bail!("{} monitor is already running", name);
        }
        self.token = CancellationToken::new();
        self.handle = Some(tokio::spawn(body(self.token.clone())));
        debug!(monitor = name, "monitor task spawned");
        Ok(())
    }

    pub(crate) async fn shutdown(&mut self, name: &'static str) {
        self.token.cancel();
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        if tokio::time::timeout(STOP_JOIN_BOUND, &mut handle).await.is_err() {
            warn!(monitor = name, "monitor did not stop within {:?}, aborting", STOP_JOIN_BOUND);
            handle.abort();
        }
    }
}

/// Fires once per period on the monotonic clock.
///
/// Missed periods collapse into a single firing and the next deadline is
/// re-anchored after `now`, so a late wake never skips a period entirely and
/// never causes a burst.
#[derive(Debug, Clone)]
pub struct PeriodClock {
    period: Duration,
    next_due: Instant,
}

impl PeriodClock {
    pub fn new(period: Duration, now: Instant) -> Self {
        let period = period.max(WAKE_INTERVAL);
        Self {
            period,
            next_due: now + period,
        }
    }

    pub fn poll(&mut self, now: Instant) -> bool {
        if now < self.next_due {
            return false;
        }
        while self.next_due <= now {
            self.next_due += self.period;
        }
        true
    }
}

/// Builds the monitor matching the active source, if that source refreshes.
pub fn monitor_for(
    resolution: &Resolution,
    settings: &Settings,
    fetcher: Arc<dyn RtcConfigFetcher>,
    sink: Arc<dyn RtcConfigSink>,
) -> Option<Box<dyn CredentialMonitor>> {
    match &resolution.source {
        CredentialSource::File(path) => Some(Box::new(FileWatchMonitor::new(path.clone(), true, sink))),
        CredentialSource::RestApi(source) => Some(Box::new(PolledFetchMonitor::new(
            "rest",
            true,
            settings.refresh_period(),
            Arc::new(RestProducer::new(fetcher, source.clone())),
            sink,
        ))),
        CredentialSource::Hmac(source) => Some(Box::new(PolledFetchMonitor::new(
            "hmac",
            true,
            settings.refresh_period(),
            Arc::new(HmacProducer::new(source.clone())),
            sink,
        ))),
        CredentialSource::Legacy(_) => Some(Box::new(EnvDiffMonitor::new(
            true,
            settings.env_poll_period(),
            Arc::new(ProcessEnv),
            sink,
        ))),
        CredentialSource::Default => None,
    }
}
