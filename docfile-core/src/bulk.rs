// src/bulk.rs
// Ordered bulk writes over an in-memory document list

use ahash::AHashMap;
use log::{trace, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::document::generate_id;
use crate::error::{DocFileError, Result};
use crate::path::FieldPath;
use crate::query::Query;
use crate::update::{apply_update, set_on_insert_fields};
use crate::value::{is_scalar_object, values_equal};

/// One bulk operation, in the driver's `{"updateOne": {...}}` shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteModel {
    InsertOne {
        document: Value,
    },
    UpdateOne {
        filter: Value,
        update: Value,
        #[serde(default)]
        upsert: bool,
    },
    UpdateMany {
        filter: Value,
        update: Value,
        #[serde(default)]
        upsert: bool,
    },
    ReplaceOne {
        filter: Value,
        replacement: Value,
        #[serde(default)]
        upsert: bool,
    },
    DeleteOne {
        filter: Value,
    },
    DeleteMany {
        filter: Value,
    },
}

impl WriteModel {
    pub fn from_json(json: &Value) -> Result<Self> {
        Ok(serde_json::from_value(json.clone())?)
    }

    /// Parse a JSON array of operations
    pub fn list_from_json(json: &Value) -> Result<Vec<Self>> {
        Ok(serde_json::from_value(json.clone())?)
    }

    fn name(&self) -> &'static str {
        match self {
            WriteModel::InsertOne { .. } => "insertOne",
            WriteModel::UpdateOne { .. } => "updateOne",
            WriteModel::UpdateMany { .. } => "updateMany",
            WriteModel::ReplaceOne { .. } => "replaceOne",
            WriteModel::DeleteOne { .. } => "deleteOne",
            WriteModel::DeleteMany { .. } => "deleteMany",
        }
    }
}

/// Counters for a bulk write
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkWriteResult {
    pub inserted_count: u64,
    pub matched_count: u64,
    pub modified_count: u64,
    pub deleted_count: u64,
    pub upserted_count: u64,
    /// Operation index → id of the upserted document
    pub upserted_ids: BTreeMap<usize, Value>,
}

/// `_id` → position in the document list
#[derive(Debug, Default)]
pub(crate) struct IdIndex {
    positions: AHashMap<String, usize>,
}

impl IdIndex {
    pub(crate) fn build(docs: &[Value]) -> Self {
        let mut positions = AHashMap::with_capacity(docs.len());
        for (i, doc) in docs.iter().enumerate() {
            if let Some(id) = doc.get("_id") {
                positions.entry(id_key(id)).or_insert(i);
            }
        }
        IdIndex { positions }
    }

    pub(crate) fn get(&self, id: &Value) -> Option<usize> {
        self.positions.get(&id_key(id)).copied()
    }

    pub(crate) fn contains(&self, id: &Value) -> bool {
        self.positions.contains_key(&id_key(id))
    }

    fn insert(&mut self, id: &Value, position: usize) {
        self.positions.insert(id_key(id), position);
    }
}

/// Index key for an id; strings and numbers never collide
fn id_key(id: &Value) -> String {
    id.to_string()
}

/// Assign a generated `_id` when the document has none. Returns the id.
pub(crate) fn ensure_id(doc: &mut Value) -> Result<Value> {
    let map = doc.as_object_mut().ok_or_else(|| {
        DocFileError::TypeMismatch("documents must be JSON objects".into())
    })?;
    match map.get("_id") {
        Some(id) if !id.is_null() => Ok(id.clone()),
        _ => {
            let id = Value::String(generate_id());
            map.insert("_id".to_string(), id.clone());
            Ok(id)
        }
    }
}

/// Positions of documents matching `filter`, in list order
pub(crate) fn matching_positions(
    docs: &[Value],
    index: &IdIndex,
    filter: &Value,
    first_only: bool,
) -> Result<Vec<usize>> {
    // {_id: "<string>"} goes through the index
    if let Some(map) = filter.as_object() {
        if map.len() == 1 {
            if let Some(id @ Value::String(_)) = map.get("_id") {
                return Ok(index.get(id).into_iter().collect());
            }
        }
    }

    let query = Query::from_json(filter)?;
    let mut positions = Vec::new();
    for (i, doc) in docs.iter().enumerate() {
        if query.matches(doc)? {
            positions.push(i);
            if first_only {
                break;
            }
        }
    }
    Ok(positions)
}

/// What an update-style operation does to a matched document
#[derive(Debug, Clone, Copy)]
pub(crate) enum Change<'a> {
    Update(&'a Value),
    Replace(&'a Value),
}

impl Change<'_> {
    /// New version of `doc`; `_id` is always carried over
    pub(crate) fn apply(&self, doc: &Value) -> Result<Value> {
        let mut updated = match self {
            Change::Update(spec) => apply_update(doc, spec)?,
            Change::Replace(replacement) => {
                if !replacement.is_object() {
                    return Err(DocFileError::TypeMismatch(
                        "replacement must be a JSON object".into(),
                    ));
                }
                (*replacement).clone()
            }
        };

        if let (Some(id), Some(map)) = (doc.get("_id"), updated.as_object_mut()) {
            match map.get("_id") {
                Some(new_id) if values_equal(new_id, id) => {}
                Some(new_id) if matches!(self, Change::Update(_)) => {
                    warn!("Ignoring attempt to change _id from {} to {}", id, new_id);
                    map.insert("_id".to_string(), id.clone());
                }
                Some(_) => {
                    map.insert("_id".to_string(), id.clone());
                }
                None => {
                    // Dropped by the change: restore it where it was, or first
                    let position = match self {
                        Change::Update(_) => doc
                            .as_object()
                            .and_then(|original| original.keys().position(|k| k == "_id"))
                            .unwrap_or(0),
                        Change::Replace(_) => 0,
                    };
                    let position = position.min(map.len());
                    map.shift_insert(position, "_id".to_string(), id.clone());
                }
            }
        }
        Ok(updated)
    }

    /// Document inserted when an upsert finds nothing
    fn upsert_document(&self, filter: &Value) -> Result<Value> {
        match self {
            Change::Update(spec) => {
                let mut seed = seed_from_filter(filter);
                if let Some(fields) = set_on_insert_fields(spec) {
                    for (path, value) in fields {
                        FieldPath::parse(path)?.set(&mut seed, value.clone())?;
                    }
                }
                apply_update(&seed, spec)
            }
            Change::Replace(_) => {
                let mut doc = self.apply(&Value::Object(Map::new()))?;
                if doc.get("_id").is_none() {
                    if let (Some(id), Some(map)) = (filter.get("_id"), doc.as_object_mut()) {
                        if !id.is_object() {
                            map.shift_insert(0, "_id".to_string(), id.clone());
                        }
                    }
                }
                Ok(doc)
            }
        }
    }
}

/// Top-level equality fields of a filter: no operators, no nested objects
fn seed_from_filter(filter: &Value) -> Value {
    let mut seed = Map::new();
    if let Some(map) = filter.as_object() {
        for (key, value) in map {
            if key.starts_with('$') {
                continue;
            }
            let scalar = match value {
                Value::Object(_) => is_scalar_object(value),
                Value::Array(_) => false,
                _ => true,
            };
            if scalar {
                seed.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(seed)
}

/// Outcome of an update-style write
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct WriteOutcome {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<Value>,
}

/// Apply `change` to the first (or every) match, upserting if nothing matched
pub(crate) fn update_documents(
    docs: &mut Vec<Value>,
    index: &mut IdIndex,
    filter: &Value,
    change: Change<'_>,
    many: bool,
    upsert: bool,
) -> Result<WriteOutcome> {
    let positions = matching_positions(docs, index, filter, !many)?;
    let mut outcome = WriteOutcome {
        matched: positions.len() as u64,
        ..Default::default()
    };

    for position in positions {
        let updated = change.apply(&docs[position])?;
        if updated != docs[position] {
            docs[position] = updated;
            outcome.modified += 1;
        }
    }

    if outcome.matched == 0 && upsert {
        let mut doc = change.upsert_document(filter)?;
        let id = ensure_id(&mut doc)?;
        if index.contains(&id) {
            return Err(DocFileError::DuplicateId(id.to_string()));
        }
        index.insert(&id, docs.len());
        docs.push(doc);
        outcome.upserted_id = Some(id);
    }

    Ok(outcome)
}

/// Remove the first (or every) match. Returns the removed documents in list order.
pub(crate) fn delete_documents(
    docs: &mut Vec<Value>,
    index: &mut IdIndex,
    filter: &Value,
    many: bool,
) -> Result<Vec<Value>> {
    let positions = matching_positions(docs, index, filter, !many)?;
    if positions.is_empty() {
        return Ok(Vec::new());
    }

    let mut removed = Vec::with_capacity(positions.len());
    for &position in positions.iter().rev() {
        removed.push(docs.remove(position));
    }
    removed.reverse();

    *index = IdIndex::build(docs);
    Ok(removed)
}

/// Insert a document, assigning an id if needed
pub(crate) fn insert_document(docs: &mut Vec<Value>, index: &mut IdIndex, document: &Value) -> Result<Value> {
    let mut doc = document.clone();
    let id = ensure_id(&mut doc)?;
    if index.contains(&id) {
        return Err(DocFileError::DuplicateId(id.to_string()));
    }
    index.insert(&id, docs.len());
    docs.push(doc);
    Ok(id)
}

/// Run `ops` in order against `docs`. Stops at the first error; earlier
/// operations stay applied.
pub fn bulk_write(docs: &mut Vec<Value>, ops: &[WriteModel]) -> Result<BulkWriteResult> {
    let mut result = BulkWriteResult::default();
    let mut index = IdIndex::build(docs);

    for (op_index, op) in ops.iter().enumerate() {
        trace!("bulk op #{} {}", op_index, op.name());

        let (filter, change, many, upsert) = match op {
            WriteModel::InsertOne { document } => {
                insert_document(docs, &mut index, document)?;
                result.inserted_count += 1;
                continue;
            }
            WriteModel::DeleteOne { filter } | WriteModel::DeleteMany { filter } => {
                let many = matches!(op, WriteModel::DeleteMany { .. });
                let removed = delete_documents(docs, &mut index, filter, many)?;
                result.deleted_count += removed.len() as u64;
                continue;
            }
            WriteModel::UpdateOne { filter, update, upsert } => (filter, Change::Update(update), false, *upsert),
            WriteModel::UpdateMany { filter, update, upsert } => (filter, Change::Update(update), true, *upsert),
            WriteModel::ReplaceOne { filter, replacement, upsert } => {
                (filter, Change::Replace(replacement), false, *upsert)
            }
        };

        let outcome = update_documents(docs, &mut index, filter, change, many, upsert)?;
        result.matched_count += outcome.matched;
        result.modified_count += outcome.modified;
        if let Some(id) = outcome.upserted_id {
            result.upserted_count += 1;
            result.upserted_ids.insert(op_index, id);
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ops(json: Value) -> Vec<WriteModel> {
        WriteModel::list_from_json(&json).unwrap()
    }

    #[test]
    fn test_write_model_parsing() {
        let parsed = ops(json!([
            {"insertOne": {"document": {"a": 1}}},
            {"updateOne": {"filter": {"a": 1}, "update": {"$set": {"b": 2}}}},
            {"replaceOne": {"filter": {}, "replacement": {"c": 3}, "upsert": true}},
            {"deleteMany": {"filter": {}}}
        ]));

        assert_eq!(parsed.len(), 4);
        assert_eq!(
            parsed[1],
            WriteModel::UpdateOne {
                filter: json!({"a": 1}),
                update: json!({"$set": {"b": 2}}),
                upsert: false
            }
        );
        assert!(WriteModel::from_json(&json!({"explode": {}})).is_err());
    }

    #[test]
    fn test_insert_then_delete_keeps_length() {
        let mut docs = vec![json!({"_id": "a", "n": 1})];

        let result = bulk_write(
            &mut docs,
            &ops(json!([
                {"insertOne": {"document": {"_id": "tmp", "n": 2}}},
                {"deleteOne": {"filter": {"_id": "tmp"}}}
            ])),
        )
        .unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(result.inserted_count, 1);
        assert_eq!(result.deleted_count, 1);
    }

    #[test]
    fn test_insert_assigns_id_and_rejects_duplicates() {
        let mut docs = vec![json!({"_id": "a"})];

        bulk_write(&mut docs, &ops(json!([{"insertOne": {"document": {"x": 1}}}]))).unwrap();
        assert!(docs[1]["_id"].is_string());

        let err = bulk_write(
            &mut docs,
            &ops(json!([
                {"insertOne": {"document": {"_id": "b"}}},
                {"insertOne": {"document": {"_id": "a"}}}
            ])),
        );
        assert!(matches!(err, Err(DocFileError::DuplicateId(_))));
        // First insert stays applied
        assert_eq!(docs.len(), 3);
    }

    #[test]
    fn test_update_counts_only_real_modifications() {
        let mut docs = vec![
            json!({"_id": "1", "status": "new"}),
            json!({"_id": "2", "status": "done"}),
        ];

        let result = bulk_write(
            &mut docs,
            &ops(json!([{"updateMany": {"filter": {}, "update": {"$set": {"status": "done"}}}}])),
        )
        .unwrap();

        assert_eq!(result.matched_count, 2);
        assert_eq!(result.modified_count, 1);
    }

    #[test]
    fn test_update_cannot_change_id() {
        let mut docs = vec![json!({"_id": "1", "n": 1})];
        bulk_write(
            &mut docs,
            &ops(json!([{"updateOne": {"filter": {"_id": "1"}, "update": {"$set": {"_id": "2", "n": 2}}}}])),
        )
        .unwrap();
        assert_eq!(docs[0], json!({"_id": "1", "n": 2}));
    }

    #[test]
    fn test_dropped_id_keeps_its_position() {
        fn keys(doc: &Value) -> Vec<&str> {
            doc.as_object().unwrap().keys().map(String::as_str).collect()
        }

        let mut docs = vec![json!({"a": 1, "_id": "1", "b": 2}), json!({"_id": "2", "c": 1})];
        bulk_write(
            &mut docs,
            &ops(json!([
                {"updateOne": {"filter": {"_id": "1"}, "update": {"$unset": {"_id": ""}, "$set": {"z": 0}}}},
                {"replaceOne": {"filter": {"_id": "2"}, "replacement": {"x": 1, "y": 2}}},
                {"replaceOne": {"filter": {"_id": "3"}, "replacement": {"w": 1}, "upsert": true}}
            ])),
        )
        .unwrap();

        assert_eq!(keys(&docs[0]), vec!["a", "_id", "b", "z"]);
        assert_eq!(keys(&docs[1]), vec!["_id", "x", "y"]);
        assert_eq!(keys(&docs[2]), vec!["_id", "w"]);
    }

    #[test]
    fn test_upsert_seeds_from_filter() {
        let mut docs = Vec::new();

        let result = bulk_write(
            &mut docs,
            &ops(json!([
                {"deleteMany": {"filter": {}}},
                {"updateOne": {
                    "filter": {"email": "a@x.io", "age": {"$gt": 3}},
                    "update": {"$set": {"name": "A"}, "$setOnInsert": {"created": true}},
                    "upsert": true
                }}
            ])),
        )
        .unwrap();

        assert_eq!(result.upserted_count, 1);
        assert_eq!(result.upserted_ids.get(&1), docs[0].get("_id"));
        assert_eq!(docs[0]["email"], "a@x.io");
        assert_eq!(docs[0]["name"], "A");
        assert_eq!(docs[0]["created"], true);
        assert!(docs[0].get("age").is_none());
    }

    #[test]
    fn test_replace_keeps_id_and_upserts() {
        let mut docs = vec![json!({"_id": "1", "a": 1, "b": 2})];

        let result = bulk_write(
            &mut docs,
            &ops(json!([
                {"replaceOne": {"filter": {"_id": "1"}, "replacement": {"c": 3}}},
                {"replaceOne": {"filter": {"_id": "9"}, "replacement": {"d": 4}, "upsert": true}}
            ])),
        )
        .unwrap();

        assert_eq!(docs[0], json!({"c": 3, "_id": "1"}));
        assert_eq!(docs[1], json!({"d": 4, "_id": "9"}));
        assert_eq!(result.matched_count, 1);
        assert_eq!(result.modified_count, 1);
        assert_eq!(result.upserted_ids.get(&1), Some(&json!("9")));
    }

    #[test]
    fn test_delete_many_and_index_rebuild() {
        let mut docs = vec![
            json!({"_id": "1", "k": "x"}),
            json!({"_id": "2", "k": "y"}),
            json!({"_id": "3", "k": "x"}),
        ];

        let result = bulk_write(
            &mut docs,
            &ops(json!([
                {"deleteMany": {"filter": {"k": "x"}}},
                {"updateOne": {"filter": {"_id": "2"}, "update": {"$set": {"k": "z"}}}}
            ])),
        )
        .unwrap();

        assert_eq!(result.deleted_count, 2);
        assert_eq!(result.modified_count, 1);
        assert_eq!(docs, vec![json!({"_id": "2", "k": "z"})]);
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let mut result = BulkWriteResult::default();
        result.upserted_ids.insert(2, json!("abc"));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["insertedCount"], 0);
        assert_eq!(json["upsertedIds"], json!({"2": "abc"}));
    }
}
