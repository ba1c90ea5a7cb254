// storage/io.rs
// Whole-file reads and writes for collection files

use log::debug;
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;

use super::CollectionFile;
use crate::error::{DocFileError, Result};

impl CollectionFile {
    /// Read every document. A missing file is an empty collection.
    pub fn load(&self) -> Result<Vec<Value>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} does not exist, treating as empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let parsed: Value = serde_json::from_slice(&bytes)?;
        let docs = match parsed {
            Value::Array(docs) => docs,
            other => {
                return Err(DocFileError::Corruption(format!(
                    "{}: expected a JSON array, found {}",
                    self.path.display(),
                    json_kind(&other)
                )))
            }
        };

        if let Some(pos) = docs.iter().position(|doc| !doc.is_object()) {
            return Err(DocFileError::Corruption(format!(
                "{}: element {} is not an object",
                self.path.display(),
                pos
            )));
        }

        debug!("Loaded {} documents from {}", docs.len(), self.path.display());
        Ok(docs)
    }

    /// Rewrite the whole file. Not atomic: a crash mid-write can truncate it.
    pub fn save(&self, docs: &[Value]) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let bytes = if self.pretty {
            serde_json::to_vec_pretty(docs)?
        } else {
            serde_json::to_vec(docs)?
        };
        fs::write(&self.path, bytes)?;

        debug!("Saved {} documents to {}", docs.len(), self.path.display());
        Ok(())
    }

    /// Delete the backing file; a missing file is not an error
    pub fn remove(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Removed {}", self.path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let file = CollectionFile::new(dir.path().join("nope.json"), true);
        assert!(file.load().unwrap().is_empty());
        assert!(!file.exists());
    }

    #[test]
    fn test_save_creates_dir_and_roundtrips() {
        let dir = TempDir::new().unwrap();
        let file = CollectionFile::new(dir.path().join("nested/users.json"), true);
        let docs = vec![json!({"_id": "1", "name": "Alice"})];

        file.save(&docs).unwrap();

        assert_eq!(file.load().unwrap(), docs);
        let text = fs::read_to_string(file.path()).unwrap();
        assert!(text.contains('\n'));
    }

    #[test]
    fn test_compact_output() {
        let dir = TempDir::new().unwrap();
        let file = CollectionFile::new(dir.path().join("c.json"), false);
        file.save(&[json!({"a": 1})]).unwrap();
        assert_eq!(fs::read_to_string(file.path()).unwrap(), r#"[{"a":1}]"#);
    }

    #[test]
    fn test_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        let file = CollectionFile::new(&path, true);

        fs::write(&path, r#"{"not": "an array"}"#).unwrap();
        assert!(matches!(file.load(), Err(DocFileError::Corruption(_))));

        fs::write(&path, r#"[{"ok": 1}, 5]"#).unwrap();
        assert!(matches!(file.load(), Err(DocFileError::Corruption(_))));

        fs::write(&path, "[{").unwrap();
        assert!(matches!(file.load(), Err(DocFileError::Serialization(_))));
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let file = CollectionFile::new(dir.path().join("gone.json"), true);
        file.save(&[]).unwrap();
        assert!(file.remove().unwrap());
        assert!(!file.remove().unwrap());
    }
}
