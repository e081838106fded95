use std::{collections::HashSet, sync::Arc};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::{
    cleanup::CleanupTasks,
    config_db::ConfigDb,
    error::Result,
    events::Notification,
    indexer::Indexer,
    model_manager::ModelManager,
    note_id,
    vector_db::{NoteFilter, SearchHit, SharedTable},
};

/// Tunables for similar-note retrieval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalConfig {
    /// Rows fetched from the store per requested result.
    pub overfetch_factor: usize,
    /// Results at or above this similarity are near-duplicates and dropped.
    pub similarity_ceiling: f32,
    /// Result count used when the caller does not ask for one.
    pub default_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            overfetch_factor: 5,
            similarity_ceiling: 0.995,
            default_limit: 5,
        }
    }
}

/// A note related to the query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimilarNote {
    pub id: String,
    /// Text of the closest matching chunk.
    pub snippet: String,
    pub title: String,
    /// Similarity as a whole percentage.
    pub similarity: u32,
}

/// Runs similar-note queries against the vector index.
#[derive(Debug, Clone)]
pub struct Retriever {
    models: Arc<ModelManager>,
    table: Arc<SharedTable>,
    config_db: Arc<ConfigDb>,
    config: RetrievalConfig,
    cleanup: Arc<CleanupTasks>,
    /// Ghost rows are removed through the indexer so subscribers hear
    /// about each removal.
    indexer: Indexer,
    notifications: broadcast::Sender<Notification>,
    /// Skip the excluded note inside the store scan as well as afterwards.
    push_down_exclusion: bool,
}

impl Retriever {
    pub fn new(
        models: Arc<ModelManager>,
        table: Arc<SharedTable>,
        config_db: Arc<ConfigDb>,
        config: RetrievalConfig,
        cleanup: Arc<CleanupTasks>,
        indexer: Indexer,
        notifications: broadcast::Sender<Notification>,
    ) -> Self {
        Self {
            models,
            table,
            config_db,
            config,
            cleanup,
            indexer,
            notifications,
            push_down_exclusion: true,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Find up to `limit` notes similar to `query`, closest first.
    ///
    /// 1. Over-fetch `limit * overfetch_factor` rows, skipping `exclude`
    /// 2. Drop rows of the excluded note, compared in NFC form
    /// 3. Drop rows of notes whose file is gone and remember them as ghosts
    /// 4. Keep only the closest row per note
    /// 5. Drop near-duplicates at or above the similarity ceiling
    ///
    /// Ghost rows are deleted in the background after the query returns.
    /// An index that is not initialized yet yields no results.
    pub async fn search_similar_notes(
        &self,
        query: &str,
        exclude: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SimilarNote>> {
        let Some(table) = self.table.get() else {
            tracing::debug!("vector index not ready, returning no results");
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.models.create_embedding(query).await?;
        let fetch_limit = limit.saturating_mul(self.config.overfetch_factor);
        let filter = exclude
            .filter(|_| self.push_down_exclusion)
            .map(|id| NoteFilter::IsNot(id.to_string()));
        let hits: Vec<SearchHit> = table
            .run_blocking(move |t| {
                t.search(&query_vector, fetch_limit, filter.as_ref())
            })
            .await?;

        let root = self.config_db.notes_root()?;
        let mut seen: HashSet<String> = HashSet::new();
        let mut ghosts: Vec<String> = Vec::new();
        let mut results = Vec::with_capacity(limit);

        for hit in hits {
            if results.len() >= limit {
                break;
            }
            if exclude.is_some_and(|id| note_id::same_note(id, &hit.note_id)) {
                continue;
            }
            if ghosts.contains(&hit.note_id) {
                continue;
            }
            if let Some(root) = &root
                && !note_exists(root, &hit.note_id).await
            {
                ghosts.push(hit.note_id);
                continue;
            }
            if !seen.insert(hit.note_id.clone()) {
                continue;
            }

            let similarity = similarity(&hit);
            if similarity >= self.config.similarity_ceiling {
                tracing::trace!(
                    note_id = %hit.note_id,
                    similarity,
                    "skipping near-duplicate"
                );
                continue;
            }

            results.push(SimilarNote {
                id: hit.note_id,
                snippet: hit.text,
                title: hit.title,
                similarity: (similarity * 100.0).round() as u32,
            });
        }

        if !ghosts.is_empty() {
            self.schedule_ghost_cleanup(ghosts).await;
        }

        Ok(results)
    }

    async fn schedule_ghost_cleanup(&self, ghosts: Vec<String>) {
        tracing::info!(count = ghosts.len(), "removing rows of deleted notes");
        // No receivers is fine.
        let _ = self.notifications.send(Notification::GhostIndexDetected {
            note_ids: ghosts.clone(),
        });

        let indexer = self.indexer.clone();
        self.cleanup
            .spawn(async move {
                let mut removed = 0;
                for id in &ghosts {
                    removed += indexer.delete_note_index(id).await;
                }
                Ok(removed)
            })
            .await;
    }
}

async fn note_exists(root: &std::path::Path, id: &str) -> bool {
    // Errors other than not-found keep the row.
    tokio::fs::try_exists(note_id::resolve(root, id))
        .await
        .unwrap_or(true)
}

/// `1 - distance`, clamped at zero.
fn similarity(hit: &SearchHit) -> f32 {
    (1.0 - hit.distance).max(0.0)
}

/// Format results for human-readable terminal output.
pub fn format_human(results: &[SimilarNote]) {
    if results.is_empty() {
        println!("No similar notes found.");
        return;
    }

    for (i, r) in results.iter().enumerate() {
        println!("{:>3}. [{:>3}%] {}", i + 1, r.similarity, r.id);
        if !r.title.is_empty() {
            println!("     {}", r.title);
        }
        let snippet: String = r
            .snippet
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(100)
            .collect();
        println!("     {snippet}");
    }
    println!("\n{} result(s)", results.len());
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    query: &'a str,
    result_count: usize,
    results: &'a [SimilarNote],
}

/// Format results as JSON output.
pub fn format_json(results: &[SimilarNote], query: &str) -> Result<()> {
    let output = JsonOutput {
        query,
        result_count: results.len(),
        results,
    };
    let json = serde_json::to_string(&output).map_err(|e| {
        crate::error::Error::Config(format!("failed to serialize results: {e}"))
    })?;
    println!("{json}");
    Ok(())
}
