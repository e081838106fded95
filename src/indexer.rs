//! Per-note indexing: delete, chunk, embed, write.
//!
//! Every write to the table goes through one lock, so a rebuild and the
//! watcher never interleave their delete and add steps for the same note.
//! Content is read under that lock, which means the last write for a note
//! always carries the newest content seen so far.

use std::{collections::HashSet, path::Path, sync::Arc};

use tokio::sync::{Mutex, broadcast};

use crate::{
    chunking::{self, ChunkingConfig},
    error::{Error, Result},
    events::Notification,
    frontmatter,
    model_manager::ModelManager,
    note_id,
    note_store::NoteStore,
    vector_db::{NoteFilter, SharedTable, VectorRecord, VectorTable},
};

/// Outcome of a full rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReindexReport {
    /// Notes indexed without error.
    pub processed: usize,
    /// Notes whose indexing failed and was skipped.
    pub failed: usize,
    /// Chunks written across all notes.
    pub chunks: usize,
    /// Notes whose rows were purged because they are no longer in the store.
    pub purged: usize,
}

/// What [`Indexer::index_file`] did with a note file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileUpdate {
    Indexed { chunks: usize },
    /// The file was gone by the time it was read.
    Removed { rows: usize },
}

#[derive(Debug, Clone)]
pub struct Indexer {
    models: Arc<ModelManager>,
    table: Arc<SharedTable>,
    chunking: ChunkingConfig,
    writes: Arc<Mutex<()>>,
    notifications: broadcast::Sender<Notification>,
}

impl Indexer {
    pub fn new(
        models: Arc<ModelManager>,
        table: Arc<SharedTable>,
        chunking: ChunkingConfig,
        notifications: broadcast::Sender<Notification>,
    ) -> Self {
        Self {
            models,
            table,
            chunking,
            writes: Arc::new(Mutex::new(())),
            notifications,
        }
    }

    /// Replace the stored chunks of `note_id` with chunks of `raw`.
    ///
    /// Existing rows are removed first. If embedding fails part way, the
    /// note is left with no rows and the error is returned; nothing is
    /// restored.
    pub async fn try_index_note(&self, note_id: &str, raw: &str) -> Result<usize> {
        let table = self.ready_table()?;
        let _guard = self.writes.lock().await;
        self.write_note(&table, note_id, raw).await
    }

    /// Index a note, logging and swallowing any failure. Returns the number
    /// of chunks written, or `None` on failure. Subscribers are told either
    /// way.
    pub async fn index_note(&self, note_id: &str, raw: &str) -> Option<usize> {
        let result = self.try_index_note(note_id, raw).await;
        self.report_index(note_id, result)
    }

    /// Read `path` and index it as `note_id`. A file that has disappeared
    /// since its change was reported is removed from the index instead.
    pub async fn index_file(&self, note_id: &str, path: &Path) -> Option<FileUpdate> {
        let result: Result<FileUpdate> = async {
            let table = self.ready_table()?;
            let _guard = self.writes.lock().await;
            match tokio::fs::read_to_string(path).await {
                Ok(raw) => self
                    .write_note(&table, note_id, &raw)
                    .await
                    .map(|chunks| FileUpdate::Indexed { chunks }),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    remove_rows(&table, note_id)
                        .await
                        .map(|rows| FileUpdate::Removed { rows })
                }
                Err(e) => Err(e.into()),
            }
        }
        .await;

        match result {
            Ok(FileUpdate::Indexed { chunks }) => {
                self.report_index(note_id, Ok(chunks));
                Some(FileUpdate::Indexed { chunks })
            }
            Ok(FileUpdate::Removed { rows }) => {
                tracing::debug!(note_id, rows, "note vanished before indexing");
                self.notify(Notification::NoteRemoved {
                    note_id: note_id.to_string(),
                });
                Some(FileUpdate::Removed { rows })
            }
            Err(e) => {
                self.report_index(note_id, Err(e));
                None
            }
        }
    }

    /// Remove every row of `note_id`. Idempotent; failures are logged.
    pub async fn delete_note_index(&self, note_id: &str) -> usize {
        let removed = match self.table.get() {
            None => {
                tracing::debug!(note_id, "vector index not ready, nothing to delete");
                0
            }
            Some(table) => {
                let _guard = self.writes.lock().await;
                match remove_rows(&table, note_id).await {
                    Ok(removed) => {
                        tracing::debug!(note_id, removed, "removed note from index");
                        removed
                    }
                    Err(e) => {
                        tracing::error!(
                            note_id,
                            error = %e,
                            "failed to remove note from index"
                        );
                        0
                    }
                }
            }
        };
        self.notify(Notification::NoteRemoved {
            note_id: note_id.to_string(),
        });
        removed
    }

    /// Remove every note stored under `folder`. Returns how many notes were
    /// removed.
    pub async fn delete_folder_index(&self, folder: &str) -> usize {
        let Some(table) = self.table.get() else {
            return 0;
        };
        let ids = match table.run_blocking(|t| t.note_ids()).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(folder, error = %e, "failed to list indexed notes");
                return 0;
            }
        };

        let inside: Vec<String> = ids
            .into_iter()
            .filter(|id| note_id::is_within(folder, id))
            .collect();
        for id in &inside {
            self.delete_note_index(id).await;
        }
        tracing::debug!(folder, notes = inside.len(), "removed folder from index");
        inside.len()
    }

    /// Rebuild the index from every note in `store`, one note at a time.
    ///
    /// Rows of notes the store no longer lists are purged first. Each note
    /// is read right before it is embedded. Per-note failures are counted
    /// and skipped.
    pub async fn reindex_all(&self, store: &dyn NoteStore) -> Result<ReindexReport> {
        let table = self.ready_table()?;
        let ids = store.note_ids()?;
        tracing::info!(notes = ids.len(), "reindexing all notes");

        let known: HashSet<String> =
            ids.iter().map(|id| note_id::normalize(id)).collect();
        let mut report = ReindexReport::default();
        for stale in table.run_blocking(|t| t.note_ids()).await? {
            if !known.contains(&note_id::normalize(&stale)) {
                report.purged += 1;
                let _guard = self.writes.lock().await;
                if let Err(e) = remove_rows(&table, &stale).await {
                    tracing::warn!(note_id = %stale, error = %e, "failed to purge note");
                }
            }
        }

        for id in &ids {
            let _guard = self.writes.lock().await;
            let note = match store.read_note(id) {
                Ok(Some(note)) => note,
                Ok(None) => {
                    tracing::debug!(note_id = %id, "note vanished during rebuild");
                    if let Err(e) = remove_rows(&table, id).await {
                        tracing::warn!(note_id = %id, error = %e, "failed to purge note");
                    }
                    continue;
                }
                Err(e) => {
                    tracing::warn!(note_id = %id, error = %e, "skipping unreadable note");
                    report.failed += 1;
                    continue;
                }
            };

            match self.write_note(&table, id, &note.raw).await {
                Ok(chunks) => {
                    report.processed += 1;
                    report.chunks += chunks;
                }
                Err(e) => {
                    tracing::error!(note_id = %id, error = %e, "failed to index note");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            processed = report.processed,
            failed = report.failed,
            chunks = report.chunks,
            purged = report.purged,
            "reindex complete"
        );
        Ok(report)
    }

    pub fn chunking(&self) -> &ChunkingConfig {
        &self.chunking
    }

    fn ready_table(&self) -> Result<Arc<VectorTable>> {
        self.table.get().ok_or(Error::IndexNotReady)
    }

    /// Caller holds `self.writes`.
    async fn write_note(
        &self,
        table: &Arc<VectorTable>,
        note_id: &str,
        raw: &str,
    ) -> Result<usize> {
        if let Err(e) = remove_rows(table, note_id).await {
            tracing::warn!(note_id, error = %e, "failed to clear previous chunks");
        }

        let decoded = frontmatter::decode(raw);
        let chunks = chunking::chunk_body(&decoded.body, &self.chunking);
        if chunks.is_empty() {
            tracing::debug!(note_id, "note body is empty, nothing to index");
            return Ok(0);
        }
        let title =
            frontmatter::resolve_title(&decoded.metadata, &decoded.body, note_id);

        let mut records = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let vector = self.models.create_embedding(&chunk.text).await?;
            records.push(VectorRecord {
                vector,
                note_id: note_id.to_string(),
                chunk_id: chunk.index as u32,
                text: chunk.text,
                title: title.clone(),
            });
        }

        let written = table.run_blocking(move |t| t.add(&records)).await?;
        tracing::debug!(note_id, chunks = written, "indexed note");
        Ok(written)
    }

    fn report_index(&self, note_id: &str, result: Result<usize>) -> Option<usize> {
        let note_id = note_id.to_string();
        match result {
            Ok(chunks) => {
                self.notify(Notification::NoteIndexed { note_id });
                Some(chunks)
            }
            Err(e) => {
                tracing::error!(%note_id, error = %e, "failed to index note");
                self.notify(Notification::NoteIndexFailed {
                    note_id,
                    error: e.to_string(),
                });
                None
            }
        }
    }

    fn notify(&self, notification: Notification) {
        // No subscribers is fine.
        let _ = self.notifications.send(notification);
    }
}

async fn remove_rows(table: &Arc<VectorTable>, note_id: &str) -> Result<usize> {
    let filter = NoteFilter::Is(note_id.to_string());
    table.run_blocking(move |t| t.delete_where(&filter)).await
}
