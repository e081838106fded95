//! YAML frontmatter codec for note files.
//!
//! A note may start with a YAML header between `---` lines:
//!
//! ```text
//! ---
//! title: Weekly review
//! date: 2024-01-15T10:30:00Z
//! tags:
//! - work
//! ---
//! Body content here...
//! ```
//!
//! Decoding never fails: a missing or malformed header leaves the whole
//! input as body with empty metadata.

use serde::Serialize;
use serde_yaml::Value;

/// Header fields the indexing engine cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Frontmatter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Frontmatter {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.date.is_none() && self.tags.is_empty()
    }
}

/// A note split into its header metadata and body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    pub metadata: Frontmatter,
    pub body: String,
}

/// Split raw note text into metadata and body.
///
/// # Examples
///
/// ```
/// use notebert::frontmatter::decode;
///
/// let decoded = decode("---\ntitle: Hi\ntags: [a, b]\n---\nBody");
/// assert_eq!(decoded.metadata.title.as_deref(), Some("Hi"));
/// assert_eq!(decoded.metadata.tags, vec!["a", "b"]);
/// assert_eq!(decoded.body, "Body");
///
/// // Malformed headers fall back to the whole input.
/// let decoded = decode("---\ntitle: [unclosed\n---\nBody");
/// assert!(decoded.metadata.is_empty());
/// assert!(decoded.body.starts_with("---"));
/// ```
pub fn decode(raw: &str) -> Decoded {
    split_header(raw)
        .and_then(|(yaml, body)| {
            let metadata = parse_header(yaml)?;
            Some(Decoded {
                metadata,
                body: body.to_string(),
            })
        })
        .unwrap_or_else(|| Decoded {
            metadata: Frontmatter::default(),
            body: raw.to_string(),
        })
}

/// Render metadata and body back into note text.
///
/// Field order is fixed (title, date, tags) and empty fields are omitted, so
/// identical inputs always produce identical output.
pub fn encode(body: &str, metadata: &Frontmatter) -> String {
    if metadata.is_empty() {
        return format!("---\n---\n{body}");
    }

    match serde_yaml::to_string(metadata) {
        Ok(yaml) => format!("---\n{yaml}---\n{body}"),
        // A struct of strings always serializes; keep the body regardless.
        Err(_) => format!("---\n---\n{body}"),
    }
}

/// Locate the YAML block and the body that follows it.
fn split_header(raw: &str) -> Option<(&str, &str)> {
    let content = raw.strip_prefix('\u{feff}').unwrap_or(raw);

    let after_opening = content
        .strip_prefix("---\r\n")
        .or_else(|| content.strip_prefix("---\n"))?;

    let mut pos = 0;
    while pos <= after_opening.len() {
        let line_end = after_opening[pos..]
            .find('\n')
            .map(|offset| pos + offset)
            .unwrap_or(after_opening.len());
        let line = after_opening[pos..line_end].trim_end_matches('\r');

        if line == "---" {
            let yaml = &after_opening[..pos];
            let body_start = (line_end + 1).min(after_opening.len());
            return Some((yaml, &after_opening[body_start..]));
        }

        if line_end == after_opening.len() {
            break;
        }
        pos = line_end + 1;
    }

    None
}

fn parse_header(yaml: &str) -> Option<Frontmatter> {
    if yaml.trim().is_empty() {
        return Some(Frontmatter::default());
    }

    let value: Value = serde_yaml::from_str(yaml).ok()?;

    let mapping = match value {
        Value::Null => return Some(Frontmatter::default()),
        Value::Mapping(mapping) => mapping,
        _ => return None,
    };

    let title = mapping.get("title").and_then(scalar_to_string);
    let date = mapping.get("date").and_then(scalar_to_string);
    let tags = match mapping.get("tags") {
        Some(Value::Sequence(items)) => {
            items.iter().filter_map(scalar_to_string).collect()
        }
        Some(other) => scalar_to_string(other).into_iter().collect(),
        None => Vec::new(),
    };

    Some(Frontmatter { title, date, tags })
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Resolve the display title for a note.
///
/// Prefers the frontmatter title, then the first markdown heading
/// (`# ...`) in the body, then the file stem of the note id.
pub fn resolve_title(
    metadata: &Frontmatter,
    body: &str,
    note_id: &str,
) -> String {
    if let Some(title) = metadata.title.as_deref().map(str::trim)
        && !title.is_empty()
    {
        return title.to_string();
    }

    for line in body.lines() {
        if let Some(heading) = line.trim().strip_prefix("# ") {
            let heading = heading.trim();
            if !heading.is_empty() {
                return heading.to_string();
            }
        }
    }

    std::path::Path::new(note_id)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string()
}
