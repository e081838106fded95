//! Startup and note-root lifecycle.
//!
//! The controller brings the service up, runs the full rebuild and keeps a
//! single watcher plus indexing loop running for the configured note root.
//! Changing the root stops the old watcher completely before anything
//! about the new root is touched.

use std::{path::Path, sync::Arc};

use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};

use crate::{
    error::Result,
    indexer::ReindexReport,
    service::SemanticService,
    watcher::{self, NoteWatcher, WatchConfig},
};

struct Running {
    watcher: NoteWatcher,
    indexing: JoinHandle<()>,
}

pub struct Controller {
    service: Arc<SemanticService>,
    config: WatchConfig,
    running: Mutex<Option<Running>>,
}

impl Controller {
    pub fn new(service: Arc<SemanticService>, config: WatchConfig) -> Self {
        Self {
            service,
            config,
            running: Mutex::new(None),
        }
    }

    pub fn service(&self) -> &Arc<SemanticService> {
        &self.service
    }

    /// Load the model, start watching the note root and rebuild the index.
    ///
    /// The watcher runs during the rebuild. Both paths read a note's file
    /// under the indexer's write lock, so an edit saved mid-rebuild ends up
    /// indexed whichever path gets to it last.
    pub async fn start(&self, model_path: &Path) -> Result<ReindexReport> {
        self.service.initialize(model_path).await?;
        self.start_watching().await?;
        self.service.reindex_all().await
    }

    /// Point the engine at a new note root and rebuild the index from it.
    pub async fn change_root(&self, root: &Path) -> Result<ReindexReport> {
        self.stop_watching().await;
        self.service.config_db().set_notes_root(root)?;
        tracing::info!(root = %root.display(), "notes root changed");

        self.start_watching().await?;
        self.service.reindex_all().await
    }

    /// (Re)start the watcher on the configured note root.
    pub async fn start_watching(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            shutdown(previous).await;
        }

        let root = self.service.notes_root()?;
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let watcher = NoteWatcher::start(&root, self.config, tx)?;
        let indexing = tokio::spawn(watcher::run_indexing_loop(
            Arc::clone(&self.service),
            rx,
        ));

        *running = Some(Running { watcher, indexing });
        Ok(())
    }

    /// Stop the watcher and wait for queued changes to be applied.
    pub async fn stop_watching(&self) {
        if let Some(running) = self.running.lock().await.take() {
            shutdown(running).await;
        }
    }

    pub async fn is_watching(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Stop watching and shut the service down.
    pub async fn stop(&self) {
        self.stop_watching().await;
        self.service.shutdown().await;
    }
}

async fn shutdown(running: Running) {
    // The indexing loop ends once the watcher drops its sender.
    running.watcher.stop().await;
    if let Err(e) = running.indexing.await {
        tracing::warn!(error = %e, "indexing loop ended abnormally");
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
