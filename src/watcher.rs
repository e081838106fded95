//! Note tree watching.
//!
//! Raw filesystem events from `notify` are bridged into the runtime and fed
//! to a [`Debouncer`], which holds additions and edits back until the file
//! size has stopped changing for a quiet window. Settled changes go out as
//! [`ChangeEvent`]s on a bounded channel read by a single indexing loop.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use notify::{
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    event::{CreateKind, ModifyKind, RemoveKind, RenameMode},
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    error::Result,
    events::{ChangeEvent, ChangeKind},
    note_id,
    service::SemanticService,
    walker,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    /// How long a file's size must stay unchanged before it is reported.
    pub quiet_window: Duration,
    /// How often pending files are checked.
    pub poll_interval: Duration,
    /// Capacity of the change-event channel.
    pub channel_capacity: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            quiet_window: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
            channel_capacity: 256,
        }
    }
}

#[derive(Debug)]
struct Pending {
    kind: ChangeKind,
    note_id: String,
    size: Option<u64>,
    stable_since: Instant,
}

/// Filesystem queries the debouncer makes about changed paths.
pub trait FsView {
    /// Size of the regular file at `path`, or `None` if there is none.
    fn size(&self, path: &Path) -> Option<u64>;

    fn is_dir(&self, path: &Path) -> bool;

    /// Note files anywhere below `dir`, or `None` if `dir` is not a
    /// directory.
    fn notes_under(&self, dir: &Path) -> Option<Vec<PathBuf>>;
}

/// Answers [`FsView`] queries from the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskView;

impl FsView for DiskView {
    fn size(&self, path: &Path) -> Option<u64> {
        std::fs::metadata(path)
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len())
    }

    // Symlinked directories are not followed, matching the walker.
    fn is_dir(&self, path: &Path) -> bool {
        std::fs::symlink_metadata(path).is_ok_and(|m| m.is_dir())
    }

    fn notes_under(&self, dir: &Path) -> Option<Vec<PathBuf>> {
        if !self.is_dir(dir) {
            return None;
        }
        match walker::discover_notes(dir) {
            Ok(files) => Some(
                files
                    .iter()
                    .map(|file| note_id::resolve(dir, &file.note_id))
                    .collect(),
            ),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "failed to scan new folder");
                Some(Vec::new())
            }
        }
    }
}

/// Turns raw filesystem events into settled note changes.
///
/// A folder that appears (created, or renamed into place) is scanned and
/// every note inside it is queued as an addition. A folder that goes away
/// is reported once as [`ChangeKind::FolderRemoved`] with the folder's id,
/// since its contents can no longer be listed.
#[derive(Debug)]
pub struct Debouncer {
    root: PathBuf,
    quiet_window: Duration,
    pending: HashMap<PathBuf, Pending>,
}

impl Debouncer {
    pub fn new(root: &Path, quiet_window: Duration) -> Self {
        Self {
            root: root.to_path_buf(),
            quiet_window,
            pending: HashMap::new(),
        }
    }

    /// Record a raw event. Removals are returned right away; additions and
    /// edits wait for [`Debouncer::poll`].
    pub fn observe(
        &mut self,
        event: &Event,
        now: Instant,
        fs: &impl FsView,
    ) -> Vec<ChangeEvent> {
        let mut ready = Vec::new();

        // Only events that name a file explicitly rule out a folder.
        let file_only = matches!(
            event.kind,
            EventKind::Create(CreateKind::File) | EventKind::Remove(RemoveKind::File)
        );

        let changes: Vec<(ChangeKind, &PathBuf)> = match &event.kind {
            EventKind::Create(_) => {
                event.paths.iter().map(|p| (ChangeKind::Added, p)).collect()
            }
            EventKind::Remove(_) => {
                event.paths.iter().map(|p| (ChangeKind::Removed, p)).collect()
            }
            EventKind::Modify(ModifyKind::Name(mode)) => match mode {
                RenameMode::From => {
                    event.paths.iter().map(|p| (ChangeKind::Removed, p)).collect()
                }
                RenameMode::To => {
                    event.paths.iter().map(|p| (ChangeKind::Added, p)).collect()
                }
                RenameMode::Both => {
                    let mut both = Vec::new();
                    if let Some(from) = event.paths.first() {
                        both.push((ChangeKind::Removed, from));
                    }
                    if let Some(to) = event.paths.get(1) {
                        both.push((ChangeKind::Added, to));
                    }
                    both
                }
                // Backends that cannot tell which side of a rename a path
                // is on.
                _ => event
                    .paths
                    .iter()
                    .map(|p| {
                        if fs.size(p).is_some() || fs.is_dir(p) {
                            (ChangeKind::Added, p)
                        } else {
                            (ChangeKind::Removed, p)
                        }
                    })
                    .collect(),
            },
            EventKind::Modify(_) => {
                event.paths.iter().map(|p| (ChangeKind::Changed, p)).collect()
            }
            _ => Vec::new(),
        };

        for (kind, path) in changes {
            if walker::is_hidden(&self.root, path) {
                continue;
            }
            let Some(id) = note_id::from_path(&self.root, path) else {
                continue;
            };
            let is_note = walker::is_note_path(path);

            match kind {
                ChangeKind::Removed if is_note => {
                    self.pending.remove(path);
                    ready.push(ChangeEvent {
                        kind,
                        note_id: id,
                        path: path.clone(),
                    });
                }
                ChangeKind::Removed if !file_only => {
                    self.pending.retain(|pending, _| !pending.starts_with(path));
                    ready.push(ChangeEvent {
                        kind: ChangeKind::FolderRemoved,
                        note_id: id,
                        path: path.clone(),
                    });
                }
                ChangeKind::Added if !file_only => {
                    match fs.notes_under(path) {
                        Some(notes) => {
                            tracing::debug!(
                                folder = %id,
                                notes = notes.len(),
                                "folder appeared"
                            );
                            for note in notes {
                                self.queue(ChangeKind::Added, note, now, fs);
                            }
                        }
                        None if is_note => {
                            self.queue(kind, path.clone(), now, fs);
                        }
                        None => {}
                    }
                }
                _ if is_note => self.queue(kind, path.clone(), now, fs),
                _ => {}
            }
        }

        ready
    }

    /// Emit every pending file whose size has held steady for the quiet
    /// window.
    pub fn poll(&mut self, now: Instant, fs: &impl FsView) -> Vec<ChangeEvent> {
        let mut settled = Vec::new();

        for (path, pending) in &mut self.pending {
            let size = fs.size(path);
            if size != pending.size {
                pending.size = size;
                pending.stable_since = now;
                continue;
            }
            if now.duration_since(pending.stable_since) >= self.quiet_window {
                settled.push(path.clone());
            }
        }

        let mut ready = Vec::with_capacity(settled.len());
        for path in settled {
            if let Some(pending) = self.pending.remove(&path) {
                let kind = if pending.size.is_none() {
                    ChangeKind::Removed
                } else {
                    pending.kind
                };
                ready.push(ChangeEvent {
                    kind,
                    note_id: pending.note_id,
                    path,
                });
            }
        }
        ready.sort_by(|a, b| a.note_id.cmp(&b.note_id));
        ready
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn queue(
        &mut self,
        kind: ChangeKind,
        path: PathBuf,
        now: Instant,
        fs: &impl FsView,
    ) {
        let Some(id) = self.note_id_for(&path) else {
            return;
        };
        let size = fs.size(&path);
        self.pending
            .entry(path)
            .and_modify(|p| {
                if kind == ChangeKind::Added {
                    p.kind = kind;
                }
                p.size = size;
                p.stable_since = now;
            })
            .or_insert(Pending {
                kind,
                note_id: id,
                size,
                stable_since: now,
            });
    }

    fn note_id_for(&self, path: &Path) -> Option<String> {
        if !walker::is_note_path(path) || walker::is_hidden(&self.root, path) {
            return None;
        }
        note_id::from_path(&self.root, path)
    }
}

/// A running watch over one note root.
pub struct NoteWatcher {
    root: PathBuf,
    watcher: RecommendedWatcher,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl NoteWatcher {
    /// Start watching `root` recursively, sending settled changes to
    /// `events`. Only changes made after this call are reported.
    pub fn start(
        root: &Path,
        config: WatchConfig,
        events: mpsc::Sender<ChangeEvent>,
    ) -> Result<Self> {
        let root = root.canonicalize()?;
        let (raw_tx, raw_rx) = mpsc::channel(config.channel_capacity);

        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<Event>| {
                // Runs on the notify thread. A closed channel means the
                // watcher is stopping.
                let _ = raw_tx.blocking_send(res);
            })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let (shutdown, shutdown_rx) = oneshot::channel();
        let debouncer = Debouncer::new(&root, config.quiet_window);
        let task = tokio::spawn(debounce_loop(
            raw_rx,
            debouncer,
            events,
            shutdown_rx,
            config.poll_interval,
        ));

        tracing::info!(root = %root.display(), "watching notes");
        Ok(Self {
            root,
            watcher,
            shutdown,
            task,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stop watching and wait until the debounce task has exited.
    pub async fn stop(self) {
        let Self {
            root,
            watcher,
            shutdown,
            task,
        } = self;

        drop(watcher);
        let _ = shutdown.send(());
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "watch task ended abnormally");
        }
        tracing::info!(root = %root.display(), "stopped watching notes");
    }
}

impl std::fmt::Debug for NoteWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteWatcher")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

async fn debounce_loop(
    mut raw: mpsc::Receiver<notify::Result<Event>>,
    mut debouncer: Debouncer,
    events: mpsc::Sender<ChangeEvent>,
    mut shutdown: oneshot::Receiver<()>,
    poll_interval: Duration,
) {
    let mut tick = tokio::time::interval(poll_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let ready = tokio::select! {
            _ = &mut shutdown => break,
            received = raw.recv() => match received {
                Some(Ok(event)) => {
                    debouncer.observe(&event, Instant::now(), &DiskView)
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "file watcher error");
                    continue;
                }
                None => break,
            },
            _ = tick.tick() => debouncer.poll(Instant::now(), &DiskView),
        };

        for change in ready {
            tracing::debug!(
                note_id = %change.note_id,
                kind = ?change.kind,
                "note changed"
            );
            if events.send(change).await.is_err() {
                return;
            }
        }
    }
}

/// Apply change events to the index until the channel closes.
///
/// Additions and edits read the file and reindex it; removals delete the
/// note's rows, or the rows of every note under a removed folder. A file
/// that vanished before it could be read counts as removed.
pub async fn run_indexing_loop(
    service: Arc<SemanticService>,
    mut events: mpsc::Receiver<ChangeEvent>,
) {
    while let Some(change) = events.recv().await {
        match change.kind {
            ChangeKind::Added | ChangeKind::Changed => {
                service.index_file(&change.note_id, &change.path).await;
            }
            ChangeKind::Removed => {
                service.delete_note_index(&change.note_id).await;
            }
            ChangeKind::FolderRemoved => {
                service.delete_folder_index(&change.note_id).await;
            }
        }
    }
    tracing::debug!("indexing loop finished");
}
