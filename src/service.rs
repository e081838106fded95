//! The engine facade owned by the application shell.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::sync::{Mutex, broadcast};

use crate::{
    cleanup::CleanupTasks,
    config_db::{ConfigDb, EngineSettings},
    data_dir::DataDir,
    embedding::{ColbertLoader, ModelLoader},
    error::{Error, Result},
    events::Notification,
    indexer::{FileUpdate, Indexer, ReindexReport},
    model_manager::ModelManager,
    note_store::{FsNoteStore, NoteStore},
    search::{Retriever, SimilarNote},
    vector_db::{DB_FILE, NOTES_TABLE, SharedTable, VectorDb, VectorTable},
};

const NOTIFICATION_CAPACITY: usize = 64;

/// Snapshot of the engine state for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub notes_root: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    pub dimension: Option<usize>,
    pub indexed_notes: usize,
    pub indexed_chunks: usize,
}

/// Owns the embedding model, the vector table and the background work of
/// the semantic engine.
///
/// Construction is cheap; nothing is loaded until [`initialize`] is
/// called. Before that, writes fail with [`Error::IndexNotReady`] and
/// queries return no results.
///
/// [`initialize`]: SemanticService::initialize
pub struct SemanticService {
    data_dir: DataDir,
    config_db: Arc<ConfigDb>,
    settings: EngineSettings,
    models: Arc<ModelManager>,
    table: Arc<SharedTable>,
    indexer: Indexer,
    retriever: Retriever,
    cleanup: Arc<CleanupTasks>,
    notifications: broadcast::Sender<Notification>,
    init_lock: Mutex<()>,
}

impl SemanticService {
    /// Open the service over `data_dir` with the ColBERT model backend.
    pub fn open(data_dir: DataDir) -> Result<Self> {
        Self::with_loader(data_dir, Arc::new(ColbertLoader))
    }

    pub fn with_loader(
        data_dir: DataDir,
        loader: Arc<dyn ModelLoader>,
    ) -> Result<Self> {
        let config_db = Arc::new(ConfigDb::open(&data_dir.config_db())?);
        let settings = EngineSettings::load(&config_db)?;

        let models = Arc::new(ModelManager::with_loader(loader));
        let table = Arc::new(SharedTable::default());
        let cleanup = Arc::new(CleanupTasks::new());
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let indexer = Indexer::new(
            Arc::clone(&models),
            Arc::clone(&table),
            settings.chunking,
            notifications.clone(),
        );
        let retriever = Retriever::new(
            Arc::clone(&models),
            Arc::clone(&table),
            Arc::clone(&config_db),
            settings.retrieval,
            Arc::clone(&cleanup),
            indexer.clone(),
            notifications.clone(),
        );

        Ok(Self {
            data_dir,
            config_db,
            settings,
            models,
            table,
            indexer,
            retriever,
            cleanup,
            notifications,
            init_lock: Mutex::new(()),
        })
    }

    /// Load the model at `model_path` and open the vector table, creating
    /// it with the model's width on first use.
    ///
    /// Calling it again with another model swaps the model; the table keeps
    /// the width it was created with.
    pub async fn initialize(&self, model_path: &Path) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        let dimension = self.models.load(model_path).await?;

        if !self.table.is_ready() {
            let vectors_dir = self.data_dir.vectors_dir();
            let (table, rows) = tokio::task::spawn_blocking(move || {
                let db = VectorDb::open(&vectors_dir)?;
                let table = db.ensure_table(NOTES_TABLE, dimension)?;
                let rows = table.count()?;
                Ok::<_, Error>((table, rows))
            })
            .await??;
            tracing::info!(
                table = NOTES_TABLE,
                dimension = table.dimension(),
                rows,
                "vector index ready"
            );
            self.table.set(table);
        }
        Ok(())
    }

    /// Open the vector table if it was created earlier, without loading a
    /// model. Returns whether a table was found.
    pub async fn open_existing_index(&self) -> Result<bool> {
        let _guard = self.init_lock.lock().await;
        if self.table.is_ready() {
            return Ok(true);
        }

        let vectors_dir = self.data_dir.vectors_dir();
        let existing = tokio::task::spawn_blocking(
            move || -> Result<Option<VectorTable>> {
                if !vectors_dir.join(DB_FILE).is_file() {
                    return Ok(None);
                }
                let db = VectorDb::open(&vectors_dir)?;
                let Some(dimension) = db.table_dimension(NOTES_TABLE)? else {
                    return Ok(None);
                };
                db.ensure_table(NOTES_TABLE, dimension).map(Some)
            },
        )
        .await??;

        let found = existing.is_some();
        if let Some(table) = existing {
            self.table.set(table);
        }
        Ok(found)
    }

    /// Initialize with the model path stored in the settings.
    pub async fn initialize_from_settings(&self) -> Result<()> {
        let model_path = self.config_db.model_path()?.ok_or_else(|| {
            Error::Config(
                "no model configured; run `notebert config set-model <path>`"
                    .into(),
            )
        })?;
        self.initialize(&model_path).await
    }

    pub fn is_ready(&self) -> bool {
        self.table.is_ready()
    }

    /// Reindex one note from its raw text. Failures are logged, and
    /// subscribers hear about the note whether or not it succeeded.
    pub async fn index_note(&self, note_id: &str, raw: &str) -> Option<usize> {
        self.indexer.index_note(note_id, raw).await
    }

    /// Reindex one note from the file at `path`.
    pub async fn index_file(&self, note_id: &str, path: &Path) -> Option<FileUpdate> {
        self.indexer.index_file(note_id, path).await
    }

    /// Remove one note from the index. Idempotent; failures are logged.
    pub async fn delete_note_index(&self, note_id: &str) -> usize {
        self.indexer.delete_note_index(note_id).await
    }

    /// Remove every note under a folder that was moved away or deleted.
    pub async fn delete_folder_index(&self, folder: &str) -> usize {
        self.indexer.delete_folder_index(folder).await
    }

    /// Notes similar to `query`. `limit` defaults to the configured result
    /// count.
    pub async fn search_similar_notes(
        &self,
        query: &str,
        exclude: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<SimilarNote>> {
        let limit = limit.unwrap_or(self.settings.retrieval.default_limit);
        self.retriever
            .search_similar_notes(query, exclude, limit)
            .await
    }

    /// Rebuild the index from the configured note root.
    pub async fn reindex_all(&self) -> Result<ReindexReport> {
        let root = self.notes_root()?;
        self.reindex_from(&FsNoteStore::new(root)).await
    }

    pub async fn reindex_from(
        &self,
        store: &dyn NoteStore,
    ) -> Result<ReindexReport> {
        self.indexer.reindex_all(store).await
    }

    /// The configured note root, required for rebuilds and watching.
    pub fn notes_root(&self) -> Result<PathBuf> {
        self.config_db.notes_root()?.ok_or_else(|| {
            Error::Config(
                "no notes root configured; run `notebert config set-root <path>`"
                    .into(),
            )
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    pub fn config_db(&self) -> &ConfigDb {
        &self.config_db
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub async fn status(&self) -> Result<ServiceStatus> {
        let (indexed_notes, indexed_chunks) = match self.table.get() {
            Some(table) => {
                table
                    .run_blocking(|t| Ok((t.note_ids()?.len(), t.count()?)))
                    .await?
            }
            None => (0, 0),
        };
        Ok(ServiceStatus {
            notes_root: self.config_db.notes_root()?,
            model_path: self.models.loaded_path().await,
            dimension: self.models.dimension().await,
            indexed_notes,
            indexed_chunks,
        })
    }

    /// Wait for background cleanup and release the model.
    pub async fn shutdown(&self) {
        self.cleanup.shutdown().await;
        self.models.unload().await;
        tracing::debug!("semantic service stopped");
    }
}

impl std::fmt::Debug for SemanticService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticService")
            .field("data_dir", &self.data_dir)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingLoader;

    fn service() -> (tempfile::TempDir, SemanticService) {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(&tmp.path().join("data"))).unwrap();
        let service = SemanticService::with_loader(
            data_dir,
            Arc::new(HashingLoader { dimension: 48 }),
        )
        .unwrap();
        (tmp, service)
    }

    #[tokio::test]
    async fn operations_before_initialize() {
        let (_tmp, service) = service();
        assert!(!service.is_ready());
        assert_eq!(service.index_note("a.md", "text").await, None);
        assert_eq!(service.delete_note_index("a.md").await, 0);
        assert!(
            service
                .search_similar_notes("text", None, None)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn initialize_creates_table_once() {
        let (_tmp, service) = service();
        service.initialize(Path::new("hashing")).await.unwrap();
        service.initialize(Path::new("hashing")).await.unwrap();

        let status = service.status().await.unwrap();
        assert_eq!(status.dimension, Some(48));
        assert_eq!(status.indexed_chunks, 0);
        assert!(service.data_dir().vectors_dir().is_dir());
    }

    #[tokio::test]
    async fn existing_index_opens_without_model() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        {
            let service = SemanticService::with_loader(
                DataDir::resolve(Some(&data)).unwrap(),
                Arc::new(HashingLoader { dimension: 48 }),
            )
            .unwrap();
            assert!(!service.open_existing_index().await.unwrap());
            service.initialize(Path::new("hashing")).await.unwrap();
            service.index_note("a.md", "hello").await.unwrap();
        }

        let service = SemanticService::with_loader(
            DataDir::resolve(Some(&data)).unwrap(),
            Arc::new(HashingLoader { dimension: 48 }),
        )
        .unwrap();
        assert!(service.open_existing_index().await.unwrap());
        let status = service.status().await.unwrap();
        assert_eq!(status.indexed_chunks, 1);
        assert_eq!(status.dimension, None);
    }

    #[tokio::test]
    async fn initialize_from_settings_requires_model() {
        let (_tmp, service) = service();
        assert!(matches!(
            service.initialize_from_settings().await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn index_and_delete_notify_subscribers() {
        let (_tmp, service) = service();
        service.initialize(Path::new("hashing")).await.unwrap();
        let mut events = service.subscribe();

        assert_eq!(service.index_note("a.md", "hello").await, Some(1));
        assert_eq!(service.delete_note_index("a.md").await, 1);

        assert_eq!(
            events.recv().await.unwrap(),
            Notification::NoteIndexed {
                note_id: "a.md".into()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            Notification::NoteRemoved {
                note_id: "a.md".into()
            }
        );
    }

    #[tokio::test]
    async fn failed_index_is_still_announced() {
        let (_tmp, service) = service();
        let mut events = service.subscribe();

        assert_eq!(service.index_note("a.md", "hello").await, None);
        match events.recv().await.unwrap() {
            Notification::NoteIndexFailed { note_id, error } => {
                assert_eq!(note_id, "a.md");
                assert!(error.contains("not ready"));
            }
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    #[tokio::test]
    async fn folder_removal_drops_its_notes() {
        let (_tmp, service) = service();
        service.initialize(Path::new("hashing")).await.unwrap();
        service.index_note("projects/a.md", "alpha").await.unwrap();
        service.index_note("projects/b.md", "beta").await.unwrap();
        service.index_note("inbox.md", "gamma").await.unwrap();

        assert_eq!(service.delete_folder_index("projects").await, 2);
        assert_eq!(service.status().await.unwrap().indexed_notes, 1);
    }

    #[tokio::test]
    async fn reindex_requires_notes_root() {
        let (_tmp, service) = service();
        service.initialize(Path::new("hashing")).await.unwrap();
        assert!(matches!(
            service.reindex_all().await,
            Err(Error::Config(_))
        ));
    }
}
