// src/document.rs
use chrono::Utc;
use serde::{Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::bulk::IdIndex;
use crate::error::{DocFileError, Result};
use crate::path::{FieldPath, Segment};
use crate::storage::CollectionFile;

/// New document id: 8 hex digits of the unix time in seconds followed by
/// 16 random hex digits
pub fn generate_id() -> String {
    let seconds = Utc::now().timestamp().max(0) as u32;
    let random = Uuid::new_v4().simple().to_string();
    format!("{:08x}{}", seconds, &random[..16])
}

/// A stored document bound to the collection file it came from
#[derive(Debug, Clone)]
pub struct Document {
    value: Value,
    file: CollectionFile,
}

impl Document {
    pub(crate) fn new(value: Value, file: CollectionFile) -> Self {
        Document { value, file }
    }

    pub fn id(&self) -> Option<&Value> {
        self.value.get("_id")
    }

    /// Field lookup by dotted path
    pub fn get(&self, path: &str) -> Result<Option<&Value>> {
        Ok(FieldPath::parse(path)?.get(&self.value))
    }

    /// Change a field locally; call `save` to persist. `_id` cannot be changed.
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        let field = FieldPath::parse(path)?;
        if field.segments().first() == Some(&Segment::Key("_id".into())) {
            return Err(DocFileError::TypeMismatch("_id is immutable".into()));
        }
        field.set(&mut self.value, value)
    }

    /// Write this document back: replaces the stored copy with the same `_id`,
    /// or appends it if the collection no longer has one
    pub fn save(&self) -> Result<()> {
        let id = self
            .id()
            .ok_or_else(|| DocFileError::NotFound("document has no _id".into()))?;

        let mut docs = self.file.load()?;
        match IdIndex::build(&docs).get(id) {
            Some(position) => docs[position] = self.value.clone(),
            None => docs.push(self.value.clone()),
        }
        self.file.save(&docs)
    }

    pub fn to_value(&self) -> Value {
        self.value.clone()
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        doc.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn bound(dir: &TempDir, value: Value) -> Document {
        Document::new(value, CollectionFile::new(dir.path().join("docs.json"), true))
    }

    #[test]
    fn test_generate_id_shape() {
        let a = generate_id();
        let b = generate_id();

        assert_eq!(a.len(), 24);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_get_and_set() {
        let dir = TempDir::new().unwrap();
        let mut doc = bound(&dir, json!({"_id": "1", "profile": {"name": "Alice"}}));

        assert_eq!(doc.get("profile.name").unwrap(), Some(&json!("Alice")));
        doc.set("profile.age", json!(30)).unwrap();
        assert_eq!(doc.get("profile.age").unwrap(), Some(&json!(30)));

        assert!(matches!(doc.set("_id", json!("2")), Err(DocFileError::TypeMismatch(_))));
        assert_eq!(doc.id(), Some(&json!("1")));
    }

    #[test]
    fn test_save_replaces_or_appends() {
        let dir = TempDir::new().unwrap();
        let file = CollectionFile::new(dir.path().join("docs.json"), true);
        file.save(&[json!({"_id": "1", "n": 1}), json!({"_id": "2", "n": 2})]).unwrap();

        let mut doc = Document::new(json!({"_id": "2", "n": 2}), file.clone());
        doc.set("n", json!(20)).unwrap();
        doc.save().unwrap();

        let fresh = Document::new(json!({"_id": "3"}), file.clone());
        fresh.save().unwrap();

        assert_eq!(
            file.load().unwrap(),
            vec![json!({"_id": "1", "n": 1}), json!({"_id": "2", "n": 20}), json!({"_id": "3"})]
        );
    }

    #[test]
    fn test_serializes_as_value() {
        let dir = TempDir::new().unwrap();
        let doc = bound(&dir, json!({"_id": "1", "a": [1, 2]}));
        assert_eq!(serde_json::to_value(&doc).unwrap(), json!({"_id": "1", "a": [1, 2]}));
        assert_eq!(doc.into_value(), json!({"_id": "1", "a": [1, 2]}));
    }
}
