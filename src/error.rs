use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("no embedding model is loaded")]
    ModelNotLoaded,

    #[error("failed to load embedding model {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("vector index is not ready")]
    IndexNotReady,

    #[error("vector width mismatch: table has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("corrupt vector record for {note_id}#{chunk_id}")]
    CorruptRecord { note_id: String, chunk_id: u32 },

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    /// Whether this error comes from the underlying vector/config store.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            Self::Redb(_)
                | Self::RedbDatabase(_)
                | Self::RedbStorage(_)
                | Self::RedbTransaction(_)
                | Self::RedbTable(_)
                | Self::RedbCommit(_)
        )
    }
}
