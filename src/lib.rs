//! notebert - semantic indexing and related-note retrieval for a folder of
//! markdown notes.
//!
//! Note bodies are split into overlapping windows, embedded with a
//! [ColBERT](https://github.com/stanford-futuredata/ColBERT) model and
//! stored in a local vector table. A watcher keeps the table in sync with
//! the note tree, and queries return the closest other notes with
//! near-duplicates and stale rows filtered out.
//!
//! # Quick start
//!
//! ```no_run
//! use std::path::Path;
//!
//! use notebert::{DataDir, SemanticService};
//!
//! # async fn run() -> notebert::Result<()> {
//! let data_dir = DataDir::resolve(None)?;
//! let service = SemanticService::open(data_dir)?;
//! service
//!     .config_db()
//!     .set_notes_root(Path::new("/home/me/notes"))?;
//!
//! service.initialize(Path::new("/models/colbert")).await?;
//! service.reindex_all().await?;
//!
//! let related = service
//!     .search_similar_notes("ownership and borrowing", Some("rust.md"), None)
//!     .await?;
//! for note in &related {
//!     println!("{} ({}%)", note.id, note.similarity);
//! }
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod chunking;
pub mod cleanup;
pub mod cli;
pub mod config_db;
pub mod controller;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod events;
pub mod frontmatter;
pub mod indexer;
pub mod model_manager;
pub mod note_id;
pub mod note_store;
pub mod search;
pub mod service;
pub mod vector_db;
pub mod walker;
pub mod watcher;

pub use config_db::ConfigDb;
pub use controller::Controller;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use model_manager::ModelManager;
pub use service::SemanticService;
pub use vector_db::VectorDb;
