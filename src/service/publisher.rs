//! Current RTC config as seen by clients that connect from now on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Where the hub publishes every document it applies.
pub trait SignalingBoundary: Send + Sync {
    fn publish_rtc_config(&self, raw: Arc<str>);
}

/// Holds the latest raw document; subscribers are woken on every publish.
#[derive(Clone)]
pub struct RtcConfigPublisher {
    tx: Arc<watch::Sender<Arc<str>>>,
    published: Arc<AtomicU64>,
}

impl RtcConfigPublisher {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::<str>::from(""));
        Self {
            tx: Arc::new(tx),
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn current(&self) -> Arc<str> {
        Arc::clone(&self.tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<str>> {
        self.tx.subscribe()
    }

    pub fn publish_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }
}

impl Default for RtcConfigPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalingBoundary for RtcConfigPublisher {
    fn publish_rtc_config(&self, raw: Arc<str>) {
        self.tx.send_replace(raw);
        let n = self.published.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(publish = n, "RTC config published");
    }
}
