use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{
    chunking::ChunkingConfig,
    error::{Error, Result},
    search::RetrievalConfig,
};

const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

pub const NOTES_ROOT: &str = "notes_root";
pub const MODEL_PATH: &str = "model_path";
pub const CHUNK_SIZE: &str = "chunk_size";
pub const CHUNK_OVERLAP: &str = "chunk_overlap";
pub const SIMILARITY_CEILING: &str = "similarity_ceiling";
pub const OVERFETCH_FACTOR: &str = "overfetch_factor";

/// Persistent key/value settings owned by the application shell.
pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    /// Get a setting, returning the default if not set.
    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }

    /// The configured note root, read fresh on every call.
    pub fn notes_root(&self) -> Result<Option<PathBuf>> {
        Ok(self.get_setting(NOTES_ROOT)?.map(PathBuf::from))
    }

    pub fn set_notes_root(&self, root: &Path) -> Result<()> {
        self.set_setting(NOTES_ROOT, &root.to_string_lossy())
    }

    pub fn model_path(&self) -> Result<Option<PathBuf>> {
        Ok(self.get_setting(MODEL_PATH)?.map(PathBuf::from))
    }

    fn parsed_setting<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get_setting(key)? {
            None => Ok(None),
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
                Error::Config(format!("invalid value for {key}: {raw:?}"))
            }),
        }
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}

/// Tunables for the indexing and retrieval pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineSettings {
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
}

impl EngineSettings {
    /// Read tunables from the settings table, falling back to defaults for
    /// any key that is not set.
    pub fn load(config_db: &ConfigDb) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(size) = config_db.parsed_setting(CHUNK_SIZE)? {
            settings.chunking.chunk_size = size;
        }
        if let Some(overlap) = config_db.parsed_setting(CHUNK_OVERLAP)? {
            settings.chunking.overlap = overlap;
        }
        if let Some(ceiling) = config_db.parsed_setting(SIMILARITY_CEILING)? {
            settings.retrieval.similarity_ceiling = ceiling;
        }
        if let Some(factor) = config_db.parsed_setting(OVERFETCH_FACTOR)? {
            settings.retrieval.overfetch_factor = factor;
        }

        settings.chunking.validate()?;
        if settings.retrieval.overfetch_factor == 0 {
            return Err(Error::Config(
                "overfetch_factor must be at least 1".to_string(),
            ));
        }
        let ceiling = settings.retrieval.similarity_ceiling;
        if !(ceiling > 0.0 && ceiling <= 1.0) {
            return Err(Error::Config(format!(
                "similarity_ceiling must be in (0, 1], got {ceiling}"
            )));
        }
        Ok(settings)
    }
}
