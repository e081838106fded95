//! Persistent vector store for note chunks.
//!
//! Rows live in a redb table keyed by `(note_id, chunk_id)`. Each logical
//! table has its vector width recorded in a schema table when it is
//! created, and every row written afterwards must match it.
//!
//! Binary format per row value:
//! - 4 bytes: vector width D (u32 LE)
//! - D * 4 bytes: f32 LE vector components
//! - 4 bytes: title length L in bytes (u32 LE)
//! - L bytes: title (UTF-8)
//! - remaining bytes: chunk text (UTF-8)

use std::{
    path::Path,
    sync::{Arc, RwLock},
};

use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition,
};

use crate::error::{Error, Result};

/// Name of the table holding note chunks.
pub const NOTES_TABLE: &str = "notes_vectors";

/// File name of the database inside the vector directory.
pub const DB_FILE: &str = "vectors.redb";

const SCHEMAS: TableDefinition<&str, u32> =
    TableDefinition::new("vector_schemas");

const PROBE_NOTE_ID: &str = "__schema_probe__";

type RowTable<'a> = TableDefinition<'a, (&'static str, u32), &'static [u8]>;

/// A chunk and its embedding, as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub vector: Vec<f32>,
    pub note_id: String,
    pub chunk_id: u32,
    pub text: String,
    pub title: String,
}

/// A row returned by [`VectorTable::search`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub note_id: String,
    pub chunk_id: u32,
    pub text: String,
    pub title: String,
    /// Cosine distance to the query, in `[0, 2]`.
    pub distance: f32,
}

/// Predicate over a row's note id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteFilter {
    Is(String),
    IsNot(String),
}

impl NoteFilter {
    pub fn matches(&self, note_id: &str) -> bool {
        match self {
            Self::Is(id) => id == note_id,
            Self::IsNot(id) => id != note_id,
        }
    }
}

/// Handle to the vector database file.
pub struct VectorDb {
    db: Arc<Database>,
}

impl VectorDb {
    /// Open or create the vector database inside `dir`, creating the
    /// directory if needed.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let db = Database::create(dir.join(DB_FILE))?;

        let txn = db.begin_write()?;
        txn.open_table(SCHEMAS)?;
        txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Width recorded for `name`, if the table exists.
    pub fn table_dimension(&self, name: &str) -> Result<Option<usize>> {
        let txn = self.db.begin_read()?;
        let schemas = txn.open_table(SCHEMAS)?;
        Ok(schemas.get(name)?.map(|v| v.value() as usize))
    }

    /// Open `name`, or create it with vectors of width `dimension`.
    ///
    /// Creation writes a zero-vector probe row to fix the width and deletes
    /// it straight away. An existing table keeps the width it was created
    /// with.
    pub fn ensure_table(&self, name: &str, dimension: usize) -> Result<VectorTable> {
        if let Some(existing) = self.table_dimension(name)? {
            if existing != dimension {
                tracing::warn!(
                    table = name,
                    stored = existing,
                    requested = dimension,
                    "opening vector table with a different width than the model"
                );
            }
            tracing::debug!(table = name, dimension = existing, "opened vector table");
            return Ok(VectorTable {
                db: Arc::clone(&self.db),
                name: name.to_string(),
                dimension: existing,
            });
        }

        let table = VectorTable {
            db: Arc::clone(&self.db),
            name: name.to_string(),
            dimension,
        };

        let txn = self.db.begin_write()?;
        {
            let mut schemas = txn.open_table(SCHEMAS)?;
            schemas.insert(name, dimension as u32)?;
            let mut rows = txn.open_table(table.definition())?;
            let probe = VectorRecord {
                vector: vec![0.0; dimension],
                note_id: PROBE_NOTE_ID.to_string(),
                chunk_id: 0,
                text: String::new(),
                title: String::new(),
            };
            rows.insert(
                (probe.note_id.as_str(), probe.chunk_id),
                encode_row(&probe).as_slice(),
            )?;
        }
        txn.commit()?;

        table.delete_where(&NoteFilter::Is(PROBE_NOTE_ID.to_string()))?;
        tracing::info!(table = name, dimension, "created vector table");
        Ok(table)
    }
}

impl std::fmt::Debug for VectorDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorDb").finish_non_exhaustive()
    }
}

/// One logical table of chunk vectors with a fixed width.
pub struct VectorTable {
    db: Arc<Database>,
    name: String,
    dimension: usize,
}

impl VectorTable {
    fn definition(&self) -> RowTable<'_> {
        TableDefinition::new(&self.name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Append records in a single transaction.
    ///
    /// Records with an existing `(note_id, chunk_id)` overwrite the stored
    /// row; callers delete a note's rows before rewriting them.
    pub fn add(&self, records: &[VectorRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        for record in records {
            self.check_width(record.vector.len())?;
        }

        let txn = self.db.begin_write()?;
        {
            let mut rows = txn.open_table(self.definition())?;
            for record in records {
                rows.insert(
                    (record.note_id.as_str(), record.chunk_id),
                    encode_row(record).as_slice(),
                )?;
            }
        }
        txn.commit()?;
        Ok(records.len())
    }

    /// Remove every row whose note id matches `filter`. Returns the number
    /// of rows removed; no match is not an error.
    pub fn delete_where(&self, filter: &NoteFilter) -> Result<usize> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut rows = txn.open_table(self.definition())?;

            let mut keys: Vec<(String, u32)> = Vec::new();
            match filter {
                NoteFilter::Is(note_id) => {
                    let range = (note_id.as_str(), 0u32)
                        ..=(note_id.as_str(), u32::MAX);
                    for entry in rows.range(range)? {
                        let (key, _) = entry?;
                        let (id, chunk_id) = key.value();
                        keys.push((id.to_string(), chunk_id));
                    }
                }
                NoteFilter::IsNot(_) => {
                    for entry in rows.iter()? {
                        let (key, _) = entry?;
                        let (id, chunk_id) = key.value();
                        if filter.matches(id) {
                            keys.push((id.to_string(), chunk_id));
                        }
                    }
                }
            }

            for (note_id, chunk_id) in &keys {
                rows.remove((note_id.as_str(), *chunk_id))?;
            }
            keys.len()
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Return up to `limit` rows nearest to `query`, closest first.
    ///
    /// Rows failing `filter` are skipped before ranking.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        filter: Option<&NoteFilter>,
    ) -> Result<Vec<SearchHit>> {
        self.check_width(query.len())?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let txn = self.db.begin_read()?;
        let rows = txn.open_table(self.definition())?;

        let mut hits = Vec::new();
        for entry in rows.iter()? {
            let (key, value) = entry?;
            let (note_id, chunk_id) = key.value();
            if filter.is_some_and(|f| !f.matches(note_id)) {
                continue;
            }

            let record = decode_row(note_id, chunk_id, value.value())?;
            hits.push(SearchHit {
                distance: cosine_distance(query, &record.vector),
                note_id: record.note_id,
                chunk_id: record.chunk_id,
                text: record.text,
                title: record.title,
            });
        }

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.note_id.cmp(&b.note_id))
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Load every stored chunk of a note in chunk order.
    pub fn records_for(&self, note_id: &str) -> Result<Vec<VectorRecord>> {
        let txn = self.db.begin_read()?;
        let rows = txn.open_table(self.definition())?;

        let mut records = Vec::new();
        for entry in rows.range((note_id, 0u32)..=(note_id, u32::MAX))? {
            let (key, value) = entry?;
            let (id, chunk_id) = key.value();
            records.push(decode_row(id, chunk_id, value.value())?);
        }
        Ok(records)
    }

    pub fn count_for(&self, note_id: &str) -> Result<usize> {
        Ok(self.records_for(note_id)?.len())
    }

    pub fn count(&self) -> Result<usize> {
        let txn = self.db.begin_read()?;
        let rows = txn.open_table(self.definition())?;
        Ok(rows.len()? as usize)
    }

    /// Distinct note ids with at least one row, in key order.
    pub fn note_ids(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let rows = txn.open_table(self.definition())?;

        let mut ids: Vec<String> = Vec::new();
        for entry in rows.iter()? {
            let (key, _) = entry?;
            let (note_id, _) = key.value();
            if ids.last().map(String::as_str) != Some(note_id) {
                ids.push(note_id.to_string());
            }
        }
        Ok(ids)
    }

    /// Run `op` against this table on the blocking pool.
    ///
    /// Every redb call does file I/O and may fsync on commit, so async
    /// callers go through here instead of touching the table on a runtime
    /// worker.
    pub async fn run_blocking<T, F>(self: &Arc<Self>, op: F) -> Result<T>
    where
        F: FnOnce(&VectorTable) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let table = Arc::clone(self);
        tokio::task::spawn_blocking(move || op(&table)).await?
    }

    fn check_width(&self, actual: usize) -> Result<()> {
        if actual != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for VectorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorTable")
            .field("name", &self.name)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

/// The table handle shared between the indexer and the retriever. Empty
/// until the service has been initialized.
#[derive(Debug, Default)]
pub struct SharedTable {
    inner: RwLock<Option<Arc<VectorTable>>>,
}

impl SharedTable {
    pub fn get(&self) -> Option<Arc<VectorTable>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set(&self, table: VectorTable) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) =
            Some(Arc::new(table));
    }

    pub fn is_ready(&self) -> bool {
        self.get().is_some()
    }
}

fn encode_row(record: &VectorRecord) -> Vec<u8> {
    let vector_bytes: &[u8] = bytemuck::cast_slice(&record.vector);
    let mut buf = Vec::with_capacity(
        8 + vector_bytes.len() + record.title.len() + record.text.len(),
    );
    buf.extend_from_slice(&(record.vector.len() as u32).to_le_bytes());
    buf.extend_from_slice(vector_bytes);
    buf.extend_from_slice(&(record.title.len() as u32).to_le_bytes());
    buf.extend_from_slice(record.title.as_bytes());
    buf.extend_from_slice(record.text.as_bytes());
    buf
}

fn decode_row(note_id: &str, chunk_id: u32, bytes: &[u8]) -> Result<VectorRecord> {
    let corrupt = || Error::CorruptRecord {
        note_id: note_id.to_string(),
        chunk_id,
    };

    let read_u32 = |at: usize| -> Option<usize> {
        let raw: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
        Some(u32::from_le_bytes(raw) as usize)
    };

    let width = read_u32(0).ok_or_else(corrupt)?;
    let vector_end = 4 + width * 4;
    let vector_bytes = bytes.get(4..vector_end).ok_or_else(corrupt)?;
    let vector: Vec<f32> = bytemuck::pod_collect_to_vec(vector_bytes);

    let title_len = read_u32(vector_end).ok_or_else(corrupt)?;
    let title_start = vector_end + 4;
    let title_bytes = bytes
        .get(title_start..title_start + title_len)
        .ok_or_else(corrupt)?;
    let text_bytes = &bytes[title_start + title_len..];

    Ok(VectorRecord {
        vector,
        note_id: note_id.to_string(),
        chunk_id,
        text: String::from_utf8(text_bytes.to_vec()).map_err(|_| corrupt())?,
        title: String::from_utf8(title_bytes.to_vec()).map_err(|_| corrupt())?,
    })
}

/// `1 - cos(a, b)`; a zero vector is at distance 1 from everything.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}
