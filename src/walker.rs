use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use crate::{error::Result, note_id};

/// A note file found under the note root.
#[derive(Debug, Clone)]
pub struct NoteFile {
    /// Note id derived from the path relative to the root.
    pub note_id: String,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    /// Last modification time as seconds since the Unix epoch.
    pub mtime: u64,
}

/// File extensions treated as notes.
pub const NOTE_EXTENSIONS: &[&str] = &["md", "markdown"];

/// Whether `path` has a note extension.
pub fn is_note_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            NOTE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Whether any component of `path` below `root` starts with a dot.
pub fn is_hidden(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
}

/// Recursively collect note files under `root`, sorted by note id.
///
/// Hidden files and directories are skipped. Symlinked files are followed;
/// symlinked directories inside the root are not, to avoid cycles.
pub fn discover_notes(root: &Path) -> Result<Vec<NoteFile>> {
    let mut results = Vec::new();
    walk_dir(root, root, &mut results)?;
    results.sort_by(|a, b| a.note_id.cmp(&b.note_id));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<NoteFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &path, results)?;
            continue;
        }

        let target = if file_type.is_symlink() {
            match path.canonicalize() {
                Ok(resolved) if resolved.is_file() => resolved,
                // Broken links and linked directories.
                _ => continue,
            }
        } else if file_type.is_file() {
            path.clone()
        } else {
            continue;
        };

        if !is_note_path(&path) {
            continue;
        }
        let Some(id) = note_id::from_path(root, &path) else {
            continue;
        };

        let mtime = std::fs::metadata(&target)?
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH)
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        results.push(NoteFile {
            note_id: id,
            absolute_path: target,
            mtime,
        });
    }

    Ok(())
}
