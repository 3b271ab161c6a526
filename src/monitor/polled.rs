//! Periodic re-fetch (REST) and re-derivation (HMAC) of short-lived credentials.
//!
//! Every trigger re-emits, even when the upstream answer did not change: the
//! credential's validity window is what expires, not its content.

use super::{CredentialMonitor, MonitorState, MonitorTask, PeriodClock, RtcConfigSink, Trigger, WAKE_INTERVAL};
use crate::error::FetchError;
use crate::turn::codec::IceServerSet;
use crate::turn::resolver::{HmacSource, RestSource};
use crate::turn::rest::RtcConfigFetcher;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One fetch-and-build action of a polled source.
#[async_trait]
pub trait ConfigProducer: Send + Sync {
    async fn produce(&self) -> Result<IceServerSet, FetchError>;
}

pub struct RestProducer {
    fetcher: Arc<dyn RtcConfigFetcher>,
    source: RestSource,
}

impl RestProducer {
    pub fn new(fetcher: Arc<dyn RtcConfigFetcher>, source: RestSource) -> Self {
        Self { fetcher, source }
    }
}

#[async_trait]
impl ConfigProducer for RestProducer {
    async fn produce(&self) -> Result<IceServerSet, FetchError> {
        self.fetcher.fetch(&self.source).await
    }
}

pub struct HmacProducer {
    source: HmacSource,
}

impl HmacProducer {
    pub fn new(source: HmacSource) -> Self {
        Self { source }
    }
}

#[async_trait]
impl ConfigProducer for HmacProducer {
    async fn produce(&self) -> Result<IceServerSet, FetchError> {
        self.source.build()
    }
}

pub struct PolledFetchMonitor {
    name: &'static str,
    enabled: bool,
    period: Duration,
    producer: Arc<dyn ConfigProducer>,
    sink: Arc<dyn RtcConfigSink>,
    task: MonitorTask,
}

impl PolledFetchMonitor {
    pub fn new(
        name: &'static str,
        enabled: bool,
        period: Duration,
        producer: Arc<dyn ConfigProducer>,
        sink: Arc<dyn RtcConfigSink>,
    ) -> Self {
        Self {
            name,
            enabled,
            period,
            producer,
            sink,
            task: MonitorTask::default(),
        }
    }
}

async fn poll_loop(
    name: &'static str,
    period: Duration,
    producer: Arc<dyn ConfigProducer>,
    sink: Arc<dyn RtcConfigSink>,
    token: CancellationToken,
) {
    let mut clock = PeriodClock::new(period, Instant::now());
    let mut wake = tokio::time::interval(WAKE_INTERVAL);
    wake.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = wake.tick() => {}
        }
        if !clock.poll(Instant::now()) {
            continue;
        }

        // An in-flight fetch is dropped on cancellation.
        let result = tokio::select! {
            _ = token.cancelled() => break,
            result = producer.produce() => result,
        };

        match result {
            Ok(set) => {
                info!(monitor = name, "refreshed RTC config");
                sink.on_rtc_config(set);
            }
            Err(e) => warn!(monitor = name, "RTC config refresh failed, keeping previous config: {}", e),
        }
    }
    info!(monitor = name, "RTC config monitor stopped");
}

#[async_trait]
impl CredentialMonitor for PolledFetchMonitor {
    fn name(&self) -> &'static str {
        self.name
    }

    fn state(&self) -> MonitorState {
        MonitorState {
            enabled: self.enabled,
            running: self.task.is_running(),
            trigger: Trigger::Periodic(self.period),
            last_emitted: None,
        }
    }

    fn start(&mut self) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        info!(monitor = self.name, "starting RTC config monitor, period {:?}", self.period);
        let name = self.name;
        let period = self.period;
        let producer = Arc::clone(&self.producer);
        let sink = Arc::clone(&self.sink);
        self.task
            .spawn(name, move |token| poll_loop(name, period, producer, sink, token))
    }

    async fn stop(&mut self) {
        self.task.shutdown(self.name).await;
    }
}
