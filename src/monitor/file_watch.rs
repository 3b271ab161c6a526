//! Reloads the RTC config file on filesystem notifications.

use super::{CredentialMonitor, MonitorState, MonitorTask, RtcConfigSink, Trigger};
use crate::turn::resolver::read_config_file;
use async_trait::async_trait;
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct FileWatchMonitor {
    path: PathBuf,
    enabled: bool,
    sink: Arc<dyn RtcConfigSink>,
    task: MonitorTask,
    watcher: Option<RecommendedWatcher>,
}

impl FileWatchMonitor {
    pub fn new(path: PathBuf, enabled: bool, sink: Arc<dyn RtcConfigSink>) -> Self {
        Self {
            path,
            enabled,
            sink,
            task: MonitorTask::default(),
            watcher: None,
        }
    }
}

/// Close-after-write on the watched file, or a rename that puts it in place.
/// A rename is also reported as `RenameMode::Both`; only the `To` half counts.
///
/// Data-modify events are ignored: one write raises several of them, some
/// while the file is still truncated or half written.
pub fn is_reload_event(event: &Event, path: &Path) -> bool {
    let qualifying = matches!(
        event.kind,
        EventKind::Access(AccessKind::Close(AccessMode::Write))
            | EventKind::Modify(ModifyKind::Name(RenameMode::To))
            | EventKind::Modify(ModifyKind::Name(RenameMode::Any))
    );
    qualifying
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some() && p.file_name() == path.file_name())
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[async_trait]
impl CredentialMonitor for FileWatchMonitor {
    fn name(&self) -> &'static str {
        "file"
    }

    fn state(&self) -> MonitorState {
        MonitorState {
            enabled: self.enabled,
            running: self.task.is_running(),
            trigger: Trigger::FilesystemEvent,
            last_emitted: None,
        }
    }

    fn start(&mut self) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let (tx, rx) = flume::unbounded();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default(),
        )?;
        // Watching the directory keeps notifications flowing across atomic replaces.
        let dir = watch_dir(&self.path);
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!("watching RTC config file {}", self.path.display());

        let path = self.path.clone();
        let sink = Arc::clone(&self.sink);
        self.task.spawn("file", move |token| async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = rx.recv_async() => match event {
                        Ok(event) => event,
                        Err(_) => break,
                    },
                };
                if !is_reload_event(&event, &path) {
                    continue;
                }
                debug!("RTC config file event {:?}", event.kind);
                match read_config_file(&path) {
                    Ok(set) => {
                        info!("detected RTC JSON file change: {}", path.display());
                        sink.on_rtc_config(set);
                    }
                    Err(e) => warn!("could not reload RTC config file {}: {}", path.display(), e),
                }
            }
        })?;
        self.watcher = Some(watcher);
        Ok(())
    }

    async fn stop(&mut self) {
        self.task.shutdown("file").await;
        // Dropping the watcher releases the OS watch handle.
        self.watcher = None;
    }
}
