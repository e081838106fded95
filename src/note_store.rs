use std::{
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use crate::{
    error::Result,
    frontmatter::{self, Decoded},
    note_id, walker,
};

/// A note as read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub tags: Vec<String>,
    /// Modification time in seconds since the Unix epoch.
    pub timestamp: u64,
    pub body: String,
    /// The full file text, header included.
    pub raw: String,
}

impl Note {
    pub fn from_raw(id: &str, raw: String, timestamp: u64) -> Self {
        let Decoded { metadata, body } = frontmatter::decode(&raw);
        let title = frontmatter::resolve_title(&metadata, &body, id);
        Self {
            id: id.to_string(),
            title,
            tags: metadata.tags,
            timestamp,
            body,
            raw,
        }
    }
}

/// Source of the note list used for rebuilds.
///
/// Rebuilds list ids first and read each note only when its turn comes, so
/// an edit made while earlier notes are being embedded is picked up.
pub trait NoteStore: Send + Sync {
    /// Ids of every note, sorted.
    fn note_ids(&self) -> Result<Vec<String>>;

    /// Current content of one note, or `None` if it no longer exists.
    fn read_note(&self, note_id: &str) -> Result<Option<Note>>;

    fn load_all_notes(&self) -> Result<Vec<Note>> {
        let mut notes = Vec::new();
        for id in self.note_ids()? {
            if let Some(note) = self.read_note(&id)? {
                notes.push(note);
            }
        }
        Ok(notes)
    }
}

/// Notes stored as markdown files under a root directory.
#[derive(Debug, Clone)]
pub struct FsNoteStore {
    root: PathBuf,
}

impl FsNoteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl NoteStore for FsNoteStore {
    /// A missing root is an error.
    fn note_ids(&self) -> Result<Vec<String>> {
        Ok(walker::discover_notes(&self.root)?
            .into_iter()
            .map(|file| file.note_id)
            .collect())
    }

    fn read_note(&self, note_id: &str) -> Result<Option<Note>> {
        let path = note_id::resolve(&self.root, note_id);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let timestamp = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());
        Ok(Some(Note::from_raw(note_id, raw, timestamp)))
    }

    /// Read every note under the root. Unreadable files are logged and
    /// skipped.
    fn load_all_notes(&self) -> Result<Vec<Note>> {
        let mut notes = Vec::new();
        for id in self.note_ids()? {
            match self.read_note(&id) {
                Ok(Some(note)) => notes.push(note),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        note_id = %id,
                        error = %e,
                        "skipping unreadable note"
                    );
                }
            }
        }
        Ok(notes)
    }
}

/// Fixed list of notes.
impl NoteStore for Vec<Note> {
    fn note_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.iter().map(|n| n.id.clone()).collect();
        ids.sort();
        Ok(ids)
    }

    fn read_note(&self, note_id: &str) -> Result<Option<Note>> {
        Ok(self.iter().find(|n| n.id == note_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_notes_with_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("work")).unwrap();
        std::fs::write(
            tmp.path().join("work").join("plan.md"),
            "---\ntitle: Q3 plan\ntags: [work]\n---\nShip it.",
        )
        .unwrap();
        std::fs::write(tmp.path().join("idea.md"), "# Idea\nSomething").unwrap();

        let notes = FsNoteStore::new(tmp.path()).load_all_notes().unwrap();
        assert_eq!(notes.len(), 2);

        assert_eq!(notes[0].id, "idea.md");
        assert_eq!(notes[0].title, "Idea");
        assert!(notes[0].tags.is_empty());

        assert_eq!(notes[1].id, "work/plan.md");
        assert_eq!(notes[1].title, "Q3 plan");
        assert_eq!(notes[1].tags, vec!["work"]);
        assert_eq!(notes[1].body, "Ship it.");
        assert!(notes[1].raw.starts_with("---"));
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsNoteStore::new(tmp.path().join("absent"));
        assert!(store.load_all_notes().is_err());
    }

    #[test]
    fn reads_single_notes_on_demand() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("work")).unwrap();
        std::fs::write(tmp.path().join("work").join("plan.md"), "v1").unwrap();
        let store = FsNoteStore::new(tmp.path());

        assert_eq!(store.note_ids().unwrap(), vec!["work/plan.md"]);
        std::fs::write(tmp.path().join("work").join("plan.md"), "v2").unwrap();
        let note = store.read_note("work/plan.md").unwrap().unwrap();
        assert_eq!(note.body, "v2");
        assert!(note.timestamp > 0);

        assert_eq!(store.read_note("work/gone.md").unwrap(), None);
    }
}
