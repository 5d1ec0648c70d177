//! Debounced single writer for the index and pattern graph.
//!
//! File events are queued; every event restarts the quiet period. Once the
//! queue has been quiet for the debounce interval, the accumulated changed and
//! deleted sets go to one incremental update. Only this task writes.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProjectConfig;
use crate::error::{FinderError, Result};
use super::index::IndexBuilder;
use super::scanner::Scanner;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Changed(PathBuf),
    Deleted(PathBuf),
}

enum Command {
    Event(FileEvent),
    /// Run any pending update now and report back
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct PendingChanges {
    changed: BTreeSet<PathBuf>,
    deleted: BTreeSet<PathBuf>,
}

impl PendingChanges {
    /// The most recent event for a path wins
    fn record(&mut self, event: FileEvent) {
        match event {
            FileEvent::Changed(path) => {
                self.deleted.remove(&path);
                self.changed.insert(path);
            }
            FileEvent::Deleted(path) => {
                self.changed.remove(&path);
                self.deleted.insert(path);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

/// Handle to the writer task
pub struct IndexScheduler {
    tx: mpsc::UnboundedSender<Command>,
    updates: broadcast::Sender<Vec<String>>,
    handle: JoinHandle<()>,
}

impl IndexScheduler {
    pub fn spawn(root: PathBuf, config: ProjectConfig, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(16);
        let handle = tokio::spawn(run_writer(root, config, debounce, rx, updates.clone()));
        Self { tx, updates, handle }
    }

    pub fn notify(&self, event: FileEvent) {
        if self.tx.send(Command::Event(event)).is_err() {
            warn!("Index scheduler is no longer running");
        }
    }

    /// Paths changed by each completed update
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<String>> {
        self.updates.subscribe()
    }

    /// Apply pending changes without waiting for the quiet period
    pub async fn flush(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Command::Flush(ack))
            .map_err(|_| FinderError::Index("index scheduler stopped".to_string()))?;
        done.await
            .map_err(|_| FinderError::Index("index scheduler stopped".to_string()))
    }

    /// Flush pending work and stop the writer
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            warn!("Index scheduler task failed: {}", e);
        }
    }
}

async fn run_writer(
    root: PathBuf,
    config: ProjectConfig,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<Command>,
    updates: broadcast::Sender<Vec<String>>,
) {
    let mut pending = PendingChanges::default();

    loop {
        let command = if pending.is_empty() {
            rx.recv().await
        } else {
            match tokio::time::timeout(debounce, rx.recv()).await {
                Ok(command) => command,
                Err(_) => {
                    apply(&root, &config, std::mem::take(&mut pending), &updates).await;
                    continue;
                }
            }
        };

        match command {
            Some(Command::Event(event)) => {
                debug!("Queued {:?}", event);
                pending.record(event);
            }
            Some(Command::Flush(ack)) => {
                if !pending.is_empty() {
                    apply(&root, &config, std::mem::take(&mut pending), &updates).await;
                }
                let _ = ack.send(());
            }
            None => {
                if !pending.is_empty() {
                    apply(&root, &config, pending, &updates).await;
                }
                break;
            }
        }
    }
}

async fn apply(root: &Path, config: &ProjectConfig, pending: PendingChanges, updates: &broadcast::Sender<Vec<String>>) {
    let root = root.to_path_buf();
    let config = config.clone();
    let changed: Vec<PathBuf> = pending.changed.into_iter().collect();
    let deleted: Vec<PathBuf> = pending.deleted.into_iter().collect();
    info!("🔄 Applying {} changed / {} deleted file event(s)", changed.len(), deleted.len());

    let result = tokio::task::spawn_blocking(move || {
        IndexBuilder::new(&config).update_index_for_files(&root, &changed, &deleted)
    })
    .await;

    match result {
        Ok(Ok(update)) => {
            if !update.changed.is_empty() {
                let _ = updates.send(update.changed);
            }
        }
        Ok(Err(e)) => warn!("Incremental index update failed: {}", e),
        Err(e) => warn!("Incremental index update panicked: {}", e),
    }
}

/// Feed file-system events under `root` into `scheduler` until `cancel` fires
pub async fn watch_project(
    root: &Path,
    config: &ProjectConfig,
    scheduler: &IndexScheduler,
    cancel: CancellationToken,
) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(256);
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.blocking_send(res);
    })
    .map_err(|e| FinderError::Index(format!("Failed to start file watcher: {}", e)))?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|e| FinderError::Index(format!("Failed to watch {}: {}", root.display(), e)))?;

    let scanner = Scanner::new(config);
    info!("👀 Watching {} for changes", root.display());

    loop {
        let res = tokio::select! {
            _ = cancel.cancelled() => break,
            res = rx.recv() => match res {
                Some(res) => res,
                None => break,
            },
        };
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                warn!("File watcher error: {}", e);
                continue;
            }
        };
        for file_event in classify(&event) {
            let path = match &file_event {
                FileEvent::Changed(p) | FileEvent::Deleted(p) => p,
            };
            if scanner.is_indexed_file(root, path) {
                scheduler.notify(file_event);
            }
        }
    }
    Ok(())
}

/// Map a notify event to queue entries; existence decides change vs delete
fn classify(event: &Event) -> Vec<FileEvent> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => event
            .paths
            .iter()
            .map(|p| {
                if p.exists() {
                    FileEvent::Changed(p.clone())
                } else {
                    FileEvent::Deleted(p.clone())
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}
