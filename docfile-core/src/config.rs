// src/config.rs
// Store configuration

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

pub const DATA_DIR_ENV: &str = "DOCFILE_DATA_DIR";
pub const PRETTY_ENV: &str = "DOCFILE_PRETTY";

/// Where collection files live and how they are written
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one `<collection>.json` file per collection
    pub data_dir: PathBuf,
    /// Pretty-print collection files
    pub pretty: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            data_dir: PathBuf::from("./data"),
            pretty: true,
        }
    }
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        StoreConfig {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Defaults overridden by `DOCFILE_DATA_DIR` and `DOCFILE_PRETTY`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(dir) = lookup(DATA_DIR_ENV).filter(|d| !d.is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(flag) = lookup(PRETTY_ENV) {
            let flag = flag.trim().to_ascii_lowercase();
            config.pretty = !(flag == "0" || flag == "false");
        }
        config
    }

    /// Path of a collection's backing file
    pub fn collection_path(&self, collection: &str) -> PathBuf {
        collection_path(&self.data_dir, collection)
    }
}

pub fn collection_path(data_dir: &Path, collection: &str) -> PathBuf {
    data_dir.join(format!("{}.json", collection))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert!(config.pretty);
        assert_eq!(config.collection_path("users"), PathBuf::from("./data/users.json"));
    }

    #[test]
    fn test_lookup_overrides() {
        let config = StoreConfig::from_lookup(|key| match key {
            DATA_DIR_ENV => Some("/tmp/store".to_string()),
            PRETTY_ENV => Some("false".to_string()),
            _ => None,
        });
        assert_eq!(config.data_dir, PathBuf::from("/tmp/store"));
        assert!(!config.pretty);

        let unset = StoreConfig::from_lookup(|_| None);
        assert_eq!(unset, StoreConfig::default());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: StoreConfig = serde_json::from_str(r#"{"pretty": false}"#).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert!(!config.pretty);
    }
}
