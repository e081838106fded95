use std::path::PathBuf;

/// What happened to a note file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
    /// A folder was moved away or deleted. `note_id` holds the folder's id
    /// and every indexed note under it is gone.
    FolderRemoved,
}

/// A settled change to a note file, produced by the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub note_id: String,
    pub path: PathBuf,
}

/// Refresh signals for whoever displays the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    NoteIndexed { note_id: String },
    NoteRemoved { note_id: String },
    /// An add or change could not be indexed. The note's previous rows may
    /// already be gone.
    NoteIndexFailed { note_id: String, error: String },
    /// A query found rows for notes whose files are gone. Their rows are
    /// being removed in the background.
    GhostIndexDetected { note_ids: Vec<String> },
}
