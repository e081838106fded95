use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::sync::{Mutex, Semaphore};

use crate::{
    embedding::{ColbertLoader, Embedder, ModelLoader},
    error::{Error, Result},
};

/// Number of embedding calls allowed to run at once.
const EMBEDDING_CONTEXTS: usize = 1;

struct LoadedModel {
    path: PathBuf,
    embedder: Arc<dyn Embedder>,
}

/// Owns the active embedding model.
///
/// At most one model is loaded at a time, keyed by its path. Each
/// embedding call holds a context permit for its whole duration, so
/// inference is serialized and the permit is returned on every exit path.
pub struct ModelManager {
    loader: Arc<dyn ModelLoader>,
    active: Mutex<Option<LoadedModel>>,
    contexts: Arc<Semaphore>,
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelManager {
    /// Creates a `ModelManager` backed by the ColBERT loader. No model is
    /// loaded until [`ModelManager::load`] is called.
    pub fn new() -> Self {
        Self::with_loader(Arc::new(ColbertLoader))
    }

    pub fn with_loader(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            active: Mutex::new(None),
            contexts: Arc::new(Semaphore::new(EMBEDDING_CONTEXTS)),
        }
    }

    /// Load the model at `path`, returning its dimensionality.
    ///
    /// Loading the path that is already active is a no-op. Loading a
    /// different path drops the previous model before the new one is built.
    pub async fn load(&self, path: &Path) -> Result<usize> {
        let mut active = self.active.lock().await;

        if let Some(current) = active.as_ref()
            && current.path == path
        {
            tracing::debug!(path = %path.display(), "model already loaded");
            return Ok(current.embedder.dimension());
        }

        if let Some(previous) = active.take() {
            tracing::info!(
                path = %previous.path.display(),
                "disposing previous embedding model"
            );
            drop(previous);
        }

        let loader = Arc::clone(&self.loader);
        let owned_path = path.to_path_buf();
        let embedder =
            tokio::task::spawn_blocking(move || loader.load(&owned_path))
                .await
                .map_err(|e| Error::ModelLoad {
                    path: path.to_path_buf(),
                    reason: format!("loader task failed: {e}"),
                })??;

        let dimension = embedder.dimension();
        tracing::info!(path = %path.display(), dimension, "loaded embedding model");

        *active = Some(LoadedModel {
            path: path.to_path_buf(),
            embedder,
        });
        Ok(dimension)
    }

    /// Drop the active model, if any.
    pub async fn unload(&self) {
        self.active.lock().await.take();
    }

    pub async fn is_loaded(&self) -> bool {
        self.active.lock().await.is_some()
    }

    pub async fn loaded_path(&self) -> Option<PathBuf> {
        self.active.lock().await.as_ref().map(|m| m.path.clone())
    }

    pub async fn dimension(&self) -> Option<usize> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|m| m.embedder.dimension())
    }

    /// Embed `text` with the active model.
    pub async fn create_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let embedder = self
            .active
            .lock()
            .await
            .as_ref()
            .map(|m| Arc::clone(&m.embedder))
            .ok_or(Error::ModelNotLoaded)?;

        let context = Arc::clone(&self.contexts)
            .acquire_owned()
            .await
            .map_err(|_| Error::Embedding("embedding runtime closed".into()))?;

        let text = text.to_string();
        tokio::task::spawn_blocking(move || {
            let _context = context;
            embedder.embed(&text)
        })
        .await
        .map_err(|e| Error::Embedding(format!("embedding task failed: {e}")))?
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::embedding::HashingEmbedder;

    struct CountingLoader {
        loads: AtomicUsize,
    }

    impl ModelLoader for CountingLoader {
        fn load(&self, path: &Path) -> Result<Arc<dyn Embedder>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if path.ends_with("broken") {
                return Err(Error::ModelLoad {
                    path: path.to_path_buf(),
                    reason: "unreadable".into(),
                });
            }
            Ok(Arc::new(HashingEmbedder::new(16)))
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn dimension(&self) -> usize {
            4
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::Embedding("runtime failure".into()))
        }
    }

    struct FailingLoader;

    impl ModelLoader for FailingLoader {
        fn load(&self, _path: &Path) -> Result<Arc<dyn Embedder>> {
            Ok(Arc::new(FailingEmbedder))
        }
    }

    fn counting() -> (Arc<CountingLoader>, ModelManager) {
        let loader = Arc::new(CountingLoader {
            loads: AtomicUsize::new(0),
        });
        let manager = ModelManager::with_loader(loader.clone());
        (loader, manager)
    }

    #[tokio::test]
    async fn embedding_without_model_fails() {
        let (_loader, manager) = counting();
        assert!(!manager.is_loaded().await);
        assert!(matches!(
            manager.create_embedding("hello").await,
            Err(Error::ModelNotLoaded)
        ));
    }

    #[tokio::test]
    async fn reloading_same_path_is_noop() {
        let (loader, manager) = counting();

        assert_eq!(manager.load(Path::new("/models/a")).await.unwrap(), 16);
        assert_eq!(manager.load(Path::new("/models/a")).await.unwrap(), 16);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn loading_new_path_replaces_model() {
        let (loader, manager) = counting();

        manager.load(Path::new("/models/a")).await.unwrap();
        manager.load(Path::new("/models/b")).await.unwrap();

        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
        assert_eq!(
            manager.loaded_path().await,
            Some(PathBuf::from("/models/b"))
        );
    }

    #[tokio::test]
    async fn failed_load_leaves_no_model() {
        let (_loader, manager) = counting();
        manager.load(Path::new("/models/a")).await.unwrap();

        let err = manager.load(Path::new("/models/broken")).await;
        assert!(matches!(err, Err(Error::ModelLoad { .. })));
        assert!(!manager.is_loaded().await);
    }

    #[tokio::test]
    async fn embedding_uses_loaded_model() {
        let (_loader, manager) = counting();
        manager.load(Path::new("/models/a")).await.unwrap();

        let vector = manager.create_embedding("hello world").await.unwrap();
        assert_eq!(vector.len(), 16);
        assert_eq!(manager.dimension().await, Some(16));
    }

    #[tokio::test]
    async fn context_is_released_after_failure() {
        let manager = ModelManager::with_loader(Arc::new(FailingLoader));
        manager.load(Path::new("/models/failing")).await.unwrap();

        for _ in 0..3 {
            assert!(matches!(
                manager.create_embedding("x").await,
                Err(Error::Embedding(_))
            ));
        }
        assert_eq!(manager.contexts.available_permits(), EMBEDDING_CONTEXTS);
    }
}
