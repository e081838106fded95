//! Note identifiers.
//!
//! A note id is the note's path relative to the note root, with `/` as the
//! separator on every platform. Ids are compared after NFC normalization so
//! that paths reported by the filesystem in decomposed form still match.

use std::path::{Component, Path, PathBuf};

use unicode_normalization::UnicodeNormalization;

/// Build a note id from a path relative to the note root.
///
/// Returns `None` for paths that are absolute, empty, or escape the root.
pub fn from_relative(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Build a note id for `path` if it lies under `root`.
pub fn from_path(root: &Path, path: &Path) -> Option<String> {
    from_relative(path.strip_prefix(root).ok()?)
}

/// Location of a note on disk under `root`.
pub fn resolve(root: &Path, note_id: &str) -> PathBuf {
    note_id
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |path, part| path.join(part))
}

/// NFC form of a note id.
pub fn normalize(note_id: &str) -> String {
    note_id.nfc().collect()
}

/// Whether two ids name the same note.
pub fn same_note(a: &str, b: &str) -> bool {
    a == b || a.nfc().eq(b.nfc())
}

/// Whether `note_id` lies inside the folder whose id is `folder`.
pub fn is_within(folder: &str, note_id: &str) -> bool {
    let folder = normalize(folder.trim_end_matches('/'));
    if folder.is_empty() {
        return false;
    }
    normalize(note_id)
        .strip_prefix(folder.as_str())
        .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_use_forward_slashes() {
        let path: PathBuf = ["projects", "rust", "notes.md"].iter().collect();
        assert_eq!(
            from_relative(&path).as_deref(),
            Some("projects/rust/notes.md")
        );
    }

    #[test]
    fn rejects_escaping_paths() {
        assert_eq!(from_relative(Path::new("../outside.md")), None);
        assert_eq!(from_relative(Path::new("")), None);
    }

    #[test]
    fn from_path_strips_root() {
        let root = Path::new("/notes");
        assert_eq!(
            from_path(root, Path::new("/notes/a/b.md")).as_deref(),
            Some("a/b.md")
        );
        assert_eq!(from_path(root, Path::new("/elsewhere/b.md")), None);
    }

    #[test]
    fn resolve_joins_under_root() {
        let root = Path::new("/notes");
        assert_eq!(resolve(root, "a/b.md"), Path::new("/notes/a/b.md"));
    }

    #[test]
    fn decomposed_ids_match_composed() {
        let composed = "caf\u{e9}.md";
        let decomposed = "cafe\u{301}.md";
        assert_ne!(composed, decomposed);
        assert!(same_note(composed, decomposed));
        assert_eq!(normalize(decomposed), composed);
        assert!(!same_note("cafe.md", composed));
    }

    #[test]
    fn folder_membership_is_by_whole_segment() {
        assert!(is_within("projects", "projects/plan.md"));
        assert!(is_within("projects/", "projects/deep/plan.md"));
        assert!(!is_within("projects", "projects.md"));
        assert!(!is_within("projects", "projects-old/plan.md"));
        assert!(!is_within("", "plan.md"));
        assert!(is_within("cafe\u{301}", "caf\u{e9}/menu.md"));
    }
}
