// src/database.rs
// A data directory holding one JSON file per collection

use dashmap::DashMap;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::collection_core::CollectionCore;
use crate::config::StoreConfig;
use crate::error::{DocFileError, Result};

pub struct DatabaseCore {
    config: StoreConfig,
    collections: DashMap<String, Arc<CollectionCore>>,
}

impl DatabaseCore {
    /// Open (and create if needed) a data directory with default settings
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        Self::with_config(StoreConfig::new(data_dir.as_ref()))
    }

    pub fn with_config(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;
        debug!("Opened data dir {}", config.data_dir.display());
        Ok(DatabaseCore {
            config,
            collections: DashMap::new(),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.config.data_dir
    }

    /// Handle for a collection; the file is created on first write
    pub fn collection(&self, name: &str) -> Result<Arc<CollectionCore>> {
        validate_name(name)?;
        let handle = self
            .collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CollectionCore::new(name, &self.config)));
        Ok(Arc::clone(handle.value()))
    }

    /// Names of collections with a file on disk, sorted
    pub fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.config.data_dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a collection's file and forget its handle
    pub fn drop_collection(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        let removed = match self.collections.remove(name) {
            Some((_, collection)) => collection.drop_collection_file()?,
            None => CollectionCore::new(name, &self.config).drop_collection_file()?,
        };
        Ok(removed)
    }
}

/// Collection names become file names
fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(|c: char| c == '/' || c == '\\' || c == '\0');
    if bad {
        return Err(DocFileError::InvalidPath(format!("invalid collection name '{}'", name)));
    }
    Ok(())
}
