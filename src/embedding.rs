//! Embedding backends.
//!
//! A [`ModelLoader`] turns a model path into an [`Embedder`]. The production
//! loader runs a ColBERT model through pylate-rs and mean-pools its
//! per-token matrix into a single normalized vector. [`HashingLoader`]
//! provides a deterministic feature-hashing embedder that needs no model
//! files.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    path::Path,
    sync::{Arc, Mutex, OnceLock},
};

use candle_core::Device;
use pylate_rs::ColBERT;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Width used when the model directory does not describe its output size.
pub const FALLBACK_DIMENSION: usize = 128;

/// Produces one fixed-width vector per input text.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    /// Embed a single text. Blocking; callers run it off the async runtime.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Builds an [`Embedder`] from a model path.
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Arc<dyn Embedder>>;
}

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// The process-wide compute device, initialized on first use.
pub fn compute_device() -> &'static Device {
    static DEVICE: OnceLock<Device> = OnceLock::new();
    DEVICE.get_or_init(|| {
        let device = default_device();
        tracing::info!(?device, "initialized embedding compute device");
        device
    })
}

#[derive(Debug, Deserialize)]
struct DenseLayerConfig {
    out_features: Option<usize>,
}

/// Read the output width of a sentence-transformers model directory from
/// its `1_Dense/config.json`, if present.
pub fn read_model_dimension(model_dir: &Path) -> Option<usize> {
    let config_path = model_dir.join("1_Dense").join("config.json");
    let contents = std::fs::read_to_string(config_path).ok()?;
    let config: DenseLayerConfig = serde_json::from_str(&contents).ok()?;
    config.out_features.filter(|&d| d > 0)
}

/// Loads ColBERT models from a local directory or HuggingFace model id.
#[derive(Debug, Default, Clone, Copy)]
pub struct ColbertLoader;

impl ModelLoader for ColbertLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn Embedder>> {
        let model_id = path.to_string_lossy().to_string();
        let device = compute_device().clone();

        let model: ColBERT = ColBERT::from(&model_id)
            .with_device(device)
            .try_into()
            .map_err(|e| Error::ModelLoad {
                path: path.to_path_buf(),
                reason: format!("{e}"),
            })?;

        let mut embedder = ColbertEmbedder {
            model: Mutex::new(model),
            dimension: FALLBACK_DIMENSION,
        };
        embedder.dimension = resolve_dimension(
            embedder.embed(WIDTH_SAMPLE).map(|v| v.len()),
            read_model_dimension(path),
        );
        tracing::debug!(
            path = %path.display(),
            dimension = embedder.dimension,
            "loaded ColBERT model"
        );

        Ok(Arc::new(embedder))
    }
}

/// Text embedded once at load time to learn the model's real output width.
const WIDTH_SAMPLE: &str = "width";

/// Pick the vector width from a measured sample embedding, falling back to
/// the width declared in the model metadata and then to
/// [`FALLBACK_DIMENSION`] when the sample could not be produced.
fn resolve_dimension(measured: Result<usize>, declared: Option<usize>) -> usize {
    match measured {
        Ok(width) if width > 0 => {
            if let Some(declared) = declared
                && declared != width
            {
                tracing::warn!(
                    declared,
                    measured = width,
                    "model metadata disagrees with its output width"
                );
            }
            width
        }
        other => {
            let width = declared.unwrap_or(FALLBACK_DIMENSION);
            tracing::warn!(
                error = ?other.err(),
                width,
                "could not measure model output width"
            );
            width
        }
    }
}

/// A ColBERT model reduced to single-vector embeddings by mean pooling.
pub struct ColbertEmbedder {
    model: Mutex<ColBERT>,
    dimension: usize,
}

impl Embedder for ColbertEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut model = self.model.lock().map_err(|e| {
            Error::Embedding(format!("failed to acquire model lock: {e}"))
        })?;

        // [1, tokens, dim] -> [dim]
        let embeddings = model
            .encode(&[text.to_string()], false)
            .map_err(|e| Error::Embedding(format!("{e}")))?;
        let pooled = embeddings
            .squeeze(0)
            .and_then(|t| t.mean(0))
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| {
                Error::Embedding(format!("failed to pool token embeddings: {e}"))
            })?;

        Ok(l2_normalize(pooled))
    }
}

impl std::fmt::Debug for ColbertEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColbertEmbedder")
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

/// Bag-of-words feature hashing into a fixed number of buckets.
///
/// Texts sharing words land close together, identical texts produce
/// identical vectors, and a text without words maps to the zero vector.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let idx = (hasher.finish() % self.dimension as u64) as usize;
            vector[idx] += 1.0;
        }
        Ok(l2_normalize(vector))
    }
}

/// Loader for [`HashingEmbedder`]; the path only identifies the "model".
#[derive(Debug, Clone, Copy)]
pub struct HashingLoader {
    pub dimension: usize,
}

impl ModelLoader for HashingLoader {
    fn load(&self, _path: &Path) -> Result<Arc<dyn Embedder>> {
        Ok(Arc::new(HashingEmbedder::new(self.dimension)))
    }
}

fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_embedder_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("Rust ownership and borrowing").unwrap();
        let b = embedder.embed("Rust ownership and borrowing").unwrap();

        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hashing_embedder_ignores_case_and_punctuation() {
        let embedder = HashingEmbedder::new(32);
        assert_eq!(
            embedder.embed("Hello, World!").unwrap(),
            embedder.embed("hello world").unwrap()
        );
    }

    #[test]
    fn hashing_embedder_blank_text_is_zero() {
        let embedder = HashingEmbedder::new(8);
        assert!(embedder.embed("  ...  ").unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn measured_width_wins_over_metadata() {
        assert_eq!(resolve_dimension(Ok(96), Some(128)), 96);
        assert_eq!(resolve_dimension(Ok(96), None), 96);
    }

    #[test]
    fn unmeasurable_width_falls_back() {
        let failed = || Err(Error::Embedding("tokenizer missing".into()));
        assert_eq!(resolve_dimension(failed(), Some(64)), 64);
        assert_eq!(resolve_dimension(failed(), None), FALLBACK_DIMENSION);
        assert_eq!(resolve_dimension(Ok(0), None), FALLBACK_DIMENSION);
    }

    #[test]
    fn reads_dimension_from_dense_config() {
        let dir = tempfile::tempdir().unwrap();
        let dense = dir.path().join("1_Dense");
        std::fs::create_dir_all(&dense).unwrap();
        std::fs::write(
            dense.join("config.json"),
            r#"{"in_features": 768, "out_features": 96}"#,
        )
        .unwrap();

        assert_eq!(read_model_dimension(dir.path()), Some(96));
    }

    #[test]
    fn missing_dense_config_has_no_dimension() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_model_dimension(dir.path()), None);
    }

    #[test]
    fn compute_device_is_initialized_once() {
        let first = compute_device() as *const Device;
        let second = compute_device() as *const Device;
        assert_eq!(first, second);
    }
}
