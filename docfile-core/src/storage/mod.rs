// storage/mod.rs
// Collection files: one JSON array of documents per collection

mod io;

use std::path::{Path, PathBuf};

use crate::config::StoreConfig;

/// Backing file of a single collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionFile {
    path: PathBuf,
    pretty: bool,
}

impl CollectionFile {
    pub fn new(path: impl Into<PathBuf>, pretty: bool) -> Self {
        CollectionFile {
            path: path.into(),
            pretty,
        }
    }

    /// `<data_dir>/<collection>.json`
    pub fn for_collection(config: &StoreConfig, collection: &str) -> Self {
        Self::new(config.collection_path(collection), config.pretty)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}
