//! Folder watcher with debouncing and change coalescing.
//!
//! Raw notify events are merged per path and released once a path has been
//! quiet for the debounce period. Each release becomes one
//! [`WorkspaceEvent::FilesChanged`] on the coordinator queue.

use crate::coordinator::{EventSender, WorkspaceEvent};
use bundlesync_core::config::WatcherConfig;
use bundlesync_core::error::{Result, SyncError};
use bundlesync_core::path::normalize_path;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// File change reported by the watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

impl FileEvent {
    /// Path the event is coalesced under.
    pub fn key(&self) -> &Path {
        match self {
            Self::Created(p) | Self::Modified(p) | Self::Deleted(p) => p,
            Self::Renamed { to, .. } => to,
        }
    }

    /// Every path whose bundle entry may have changed.
    pub fn affected_paths(&self) -> Vec<PathBuf> {
        match self {
            Self::Created(p) | Self::Modified(p) | Self::Deleted(p) => vec![p.clone()],
            Self::Renamed { from, to } => vec![from.clone(), to.clone()],
        }
    }
}

#[derive(Debug, Clone)]
struct PendingEvent {
    event: FileEvent,
    last_updated: Instant,
}

/// Watches registered roots and feeds file changes to the coordinator.
pub struct FolderWatcher {
    watcher: Mutex<RecommendedWatcher>,
    watched: Mutex<BTreeSet<PathBuf>>,
    coalescer: JoinHandle<()>,
}

impl FolderWatcher {
    /// Start watching nothing; roots are added with [`watch`](Self::watch).
    pub fn start(config: &WatcherConfig, events: EventSender) -> Result<Self> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Some(file_event) = convert_event(event) {
                    let _ = raw_tx.send(file_event);
                }
            }
            Err(e) => warn!("Watch error: {}", e),
        })
        .map_err(|e| SyncError::internal(format!("Failed to create watcher: {}", e)))?;

        let coalescer = tokio::spawn(coalesce_events(
            raw_rx,
            events,
            Duration::from_millis(config.debounce_ms),
            config.max_batch_size.max(1),
        ));

        info!("Folder watcher started (debounce {}ms)", config.debounce_ms);
        Ok(Self {
            watcher: Mutex::new(watcher),
            watched: Mutex::new(BTreeSet::new()),
            coalescer,
        })
    }

    /// Watch `root` recursively. Watching a root twice is a no-op.
    pub fn watch(&self, root: &Path) -> Result<()> {
        let root = normalize_path(root);
        let mut watched = self.watched.lock();
        if watched.contains(&root) {
            return Ok(());
        }

        self.watcher
            .lock()
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| SyncError::internal(format!("Failed to watch {}: {}", root.display(), e)))?;

        debug!("Watching {}", root.display());
        watched.insert(root);
        Ok(())
    }

    pub fn unwatch(&self, root: &Path) {
        let root = normalize_path(root);
        if !self.watched.lock().remove(&root) {
            return;
        }
        if let Err(e) = self.watcher.lock().unwatch(&root) {
            debug!("Unwatch of {} failed: {}", root.display(), e);
        }
    }

    pub fn watched(&self) -> Vec<PathBuf> {
        self.watched.lock().iter().cloned().collect()
    }
}

impl Drop for FolderWatcher {
    fn drop(&mut self) {
        self.coalescer.abort();
    }
}

async fn coalesce_events(
    mut raw_rx: mpsc::UnboundedReceiver<FileEvent>,
    events: EventSender,
    debounce: Duration,
    max_batch_size: usize,
) {
    let mut pending: HashMap<PathBuf, PendingEvent> = HashMap::new();
    let mut ticker = tokio::time::interval(debounce.max(Duration::from_millis(10)));

    loop {
        let batch = tokio::select! {
            next = raw_rx.recv() => {
                let Some(event) = next else { break };
                queue_event(&mut pending, event, Instant::now());

                if pending.len() < max_batch_size {
                    continue;
                }
                warn!("Max batch size reached, forcing emission");
                pending.drain().map(|(_, p)| p.event).collect::<Vec<_>>()
            }
            _ = ticker.tick() => take_ready(&mut pending, debounce, Instant::now()),
        };

        if batch.is_empty() {
            continue;
        }

        let paths: Vec<PathBuf> = batch.iter().flat_map(FileEvent::affected_paths).collect();
        debug!("Emitting {} changed paths", paths.len());
        if events.submit(WorkspaceEvent::FilesChanged(paths)).is_err() {
            break;
        }
    }
}

fn queue_event(pending: &mut HashMap<PathBuf, PendingEvent>, event: FileEvent, now: Instant) {
    let key = event.key().to_path_buf();
    match pending.get_mut(&key) {
        Some(existing) => {
            existing.event = merge_events(&existing.event, &event);
            existing.last_updated = now;
        }
        None => {
            pending.insert(
                key,
                PendingEvent {
                    event,
                    last_updated: now,
                },
            );
        }
    }
}

fn take_ready(
    pending: &mut HashMap<PathBuf, PendingEvent>,
    debounce: Duration,
    now: Instant,
) -> Vec<FileEvent> {
    let mut ready = Vec::new();
    pending.retain(|_, p| {
        if now.duration_since(p.last_updated) >= debounce {
            ready.push(p.event.clone());
            false
        } else {
            true
        }
    });
    ready
}

/// Fold a newer event for the same path into an older one.
fn merge_events(old: &FileEvent, new: &FileEvent) -> FileEvent {
    match (old, new) {
        (FileEvent::Created(p), FileEvent::Modified(_)) => FileEvent::Created(p.clone()),
        (FileEvent::Deleted(_), FileEvent::Created(p)) => FileEvent::Modified(p.clone()),
        // A rename followed by edits still has to drop the old path
        (FileEvent::Renamed { from, .. }, FileEvent::Modified(to)) => FileEvent::Renamed {
            from: from.clone(),
            to: to.clone(),
        },
        _ => new.clone(),
    }
}

fn convert_event(event: Event) -> Option<FileEvent> {
    let first = event.paths.first()?.clone();
    match event.kind {
        EventKind::Create(_) => Some(FileEvent::Created(first)),
        EventKind::Modify(notify::event::ModifyKind::Name(_)) if event.paths.len() >= 2 => {
            Some(FileEvent::Renamed {
                from: first,
                to: event.paths[1].clone(),
            })
        }
        EventKind::Modify(_) => Some(FileEvent::Modified(first)),
        EventKind::Remove(_) => Some(FileEvent::Deleted(first)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_conversion() {
        let event = Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec![PathBuf::from("/ws/a.rs")],
            attrs: Default::default(),
        };
        assert_eq!(
            convert_event(event),
            Some(FileEvent::Created(PathBuf::from("/ws/a.rs")))
        );

        let rename = Event {
            kind: EventKind::Modify(notify::event::ModifyKind::Name(
                notify::event::RenameMode::Both,
            )),
            paths: vec![PathBuf::from("/ws/old.rs"), PathBuf::from("/ws/new.rs")],
            attrs: Default::default(),
        };
        assert_eq!(
            convert_event(rename).unwrap().affected_paths(),
            vec![PathBuf::from("/ws/old.rs"), PathBuf::from("/ws/new.rs")]
        );
    }

    #[test]
    fn test_event_merging() {
        let path = PathBuf::from("/ws/a.rs");

        let merged = merge_events(&FileEvent::Created(path.clone()), &FileEvent::Modified(path.clone()));
        assert_eq!(merged, FileEvent::Created(path.clone()));

        let merged = merge_events(&FileEvent::Deleted(path.clone()), &FileEvent::Created(path.clone()));
        assert_eq!(merged, FileEvent::Modified(path.clone()));

        let merged = merge_events(&FileEvent::Modified(path.clone()), &FileEvent::Deleted(path.clone()));
        assert_eq!(merged, FileEvent::Deleted(path.clone()));
    }

    #[test]
    fn test_debounce_releases_quiet_paths_only() {
        let mut pending = HashMap::new();
        let start = Instant::now();
        let debounce = Duration::from_millis(100);

        queue_event(&mut pending, FileEvent::Modified(PathBuf::from("/ws/a.rs")), start);
        queue_event(
            &mut pending,
            FileEvent::Modified(PathBuf::from("/ws/b.rs")),
            start + Duration::from_millis(80),
        );

        let ready = take_ready(&mut pending, debounce, start + Duration::from_millis(120));
        assert_eq!(ready, vec![FileEvent::Modified(PathBuf::from("/ws/a.rs"))]);
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_repeated_events_coalesce() {
        let mut pending = HashMap::new();
        let now = Instant::now();
        for _ in 0..5 {
            queue_event(&mut pending, FileEvent::Modified(PathBuf::from("/ws/a.rs")), now);
        }
        assert_eq!(pending.len(), 1);
    }
}
