// src/collection_core.rs
// Collection operations over a single JSON file

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::aggregation::Pipeline;
use crate::bulk::{self, BulkWriteResult, Change, IdIndex, WriteModel};
use crate::config::StoreConfig;
use crate::document::Document;
use crate::error::{DocFileError, Result};
use crate::find_options::{FindOptions, SortSpec};
use crate::path::FieldPath;
use crate::query::Query;
use crate::storage::CollectionFile;
use crate::value::values_equal;

/// Options for `update_one` / `update_many`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UpdateOptions {
    pub upsert: bool,
}

impl UpdateOptions {
    pub fn upsert() -> Self {
        UpdateOptions { upsert: true }
    }
}

/// Which version `find_one_and_update` hands back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnDocument {
    #[default]
    Before,
    After,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindOneAndUpdateOptions {
    pub upsert: bool,
    pub return_document: ReturnDocument,
}

impl FindOneAndUpdateOptions {
    /// Accepts `{upsert, new, returnDocument: "before" | "after"}`
    pub fn from_json(options: &Value) -> Result<Self> {
        let map = match options {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => {
                return Err(DocFileError::InvalidQuery(format!(
                    "findOneAndUpdate options must be an object, got {}",
                    other
                )))
            }
        };

        let mut parsed = Self::default();
        if let Some(upsert) = map.get("upsert") {
            parsed.upsert = flag(upsert, "upsert")?;
        }
        if let Some(new) = map.get("new") {
            if flag(new, "new")? {
                parsed.return_document = ReturnDocument::After;
            }
        }
        if let Some(which) = map.get("returnDocument") {
            parsed.return_document = match which.as_str() {
                Some("before") => ReturnDocument::Before,
                Some("after") => ReturnDocument::After,
                _ => {
                    return Err(DocFileError::InvalidQuery(format!(
                        "returnDocument must be \"before\" or \"after\", got {}",
                        which
                    )))
                }
            };
        }
        Ok(parsed)
    }
}

fn flag(value: &Value, name: &str) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| DocFileError::InvalidQuery(format!("option '{}' must be a boolean", name)))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub deleted_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertManyResult {
    pub inserted_ids: Vec<Value>,
    pub inserted_count: u64,
}

/// A collection backed by `<data_dir>/<name>.json`.
///
/// Every operation reads the whole file, works in memory and writes the
/// whole file back. Calls are not serialised against each other.
#[derive(Debug, Clone)]
pub struct CollectionCore {
    pub name: String,
    file: CollectionFile,
}

impl CollectionCore {
    pub fn new(name: impl Into<String>, config: &StoreConfig) -> Self {
        let name = name.into();
        let file = CollectionFile::for_collection(config, &name);
        CollectionCore { name, file }
    }

    pub fn with_file(name: impl Into<String>, file: CollectionFile) -> Self {
        CollectionCore {
            name: name.into(),
            file,
        }
    }

    pub fn file(&self) -> &CollectionFile {
        &self.file
    }

    fn load(&self) -> Result<Vec<Value>> {
        self.file.load()
    }

    fn save(&self, docs: &[Value]) -> Result<()> {
        self.file.save(docs)
    }

    fn bind(&self, value: Value) -> Document {
        Document::new(value, self.file.clone())
    }

    // ========== READS ==========

    /// Start a find query; chain `filter`, `sort`, `limit`, `skip`, `select`
    pub fn find(&self, filter: &Value) -> FindQuery<'_> {
        FindQuery::new(self).filter(filter)
    }

    pub fn find_one(&self, filter: &Value) -> Result<Option<Document>> {
        let query = Query::from_json(filter)?;
        for doc in self.load()? {
            if query.matches(&doc)? {
                return Ok(Some(self.bind(doc)));
            }
        }
        Ok(None)
    }

    pub fn find_by_id(&self, id: impl Into<Value>) -> Result<Option<Document>> {
        let id = id.into();
        let docs = self.load()?;
        let found = IdIndex::build(&docs).get(&id);
        Ok(found.map(|position| self.bind(docs[position].clone())))
    }

    /// Like `find_by_id`, but a missing document is an error
    pub fn get_by_id(&self, id: impl Into<Value>) -> Result<Document> {
        let id = id.into();
        self.find_by_id(id.clone())?
            .ok_or_else(|| DocFileError::NotFound(format!("{} in collection '{}'", id, self.name)))
    }

    pub fn count_documents(&self, filter: &Value) -> Result<u64> {
        let query = Query::from_json(filter)?;
        let mut count = 0;
        for doc in self.load()? {
            if query.matches(&doc)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Distinct values of a field across matching documents; array values
    /// contribute their elements
    pub fn distinct(&self, field: &str, filter: &Value) -> Result<Vec<Value>> {
        let path = FieldPath::parse(field)?;
        let query = Query::from_json(filter)?;

        let mut distinct_values: Vec<Value> = Vec::new();
        let mut push = |value: &Value| {
            if !distinct_values.iter().any(|seen| values_equal(seen, value)) {
                distinct_values.push(value.clone());
            }
        };

        for doc in self.load()? {
            if !query.matches(&doc)? {
                continue;
            }
            match path.get(&doc) {
                Some(Value::Array(items)) => items.iter().for_each(&mut push),
                Some(value) => push(value),
                None => {}
            }
        }

        Ok(distinct_values)
    }

    /// Run an aggregation pipeline over every document in the collection
    pub fn aggregate(&self, pipeline_json: &Value) -> Result<Vec<Value>> {
        let pipeline = Pipeline::from_json(pipeline_json)?;
        pipeline.execute(self.load()?)
    }

    // ========== WRITES ==========

    /// Insert a document and return its id
    pub fn insert_one(&self, doc: &Value) -> Result<Value> {
        let mut docs = self.load()?;
        let mut index = IdIndex::build(&docs);
        let id = bulk::insert_document(&mut docs, &mut index, doc)?;
        self.save(&docs)?;
        debug!("Inserted {} into '{}'", id, self.name);
        Ok(id)
    }

    /// Insert a document and return it bound to this collection
    pub fn create(&self, doc: &Value) -> Result<Document> {
        let mut docs = self.load()?;
        let mut index = IdIndex::build(&docs);
        bulk::insert_document(&mut docs, &mut index, doc)?;
        self.save(&docs)?;
        let created = docs.pop().unwrap_or_default();
        Ok(self.bind(created))
    }

    /// All-or-nothing: a duplicate `_id` anywhere aborts before writing
    pub fn insert_many(&self, new_docs: &[Value]) -> Result<InsertManyResult> {
        let mut docs = self.load()?;
        let mut index = IdIndex::build(&docs);

        let mut inserted_ids = Vec::with_capacity(new_docs.len());
        for doc in new_docs {
            inserted_ids.push(bulk::insert_document(&mut docs, &mut index, doc)?);
        }

        self.save(&docs)?;
        Ok(InsertManyResult {
            inserted_count: inserted_ids.len() as u64,
            inserted_ids,
        })
    }

    pub fn update_one(&self, filter: &Value, update: &Value, options: UpdateOptions) -> Result<UpdateResult> {
        self.update(filter, update, false, options)
    }

    pub fn update_many(&self, filter: &Value, update: &Value, options: UpdateOptions) -> Result<UpdateResult> {
        self.update(filter, update, true, options)
    }

    fn update(&self, filter: &Value, update: &Value, many: bool, options: UpdateOptions) -> Result<UpdateResult> {
        let mut docs = self.load()?;
        let mut index = IdIndex::build(&docs);

        let outcome = bulk::update_documents(
            &mut docs,
            &mut index,
            filter,
            Change::Update(update),
            many,
            options.upsert,
        )?;

        if outcome.modified > 0 || outcome.upserted_id.is_some() {
            self.save(&docs)?;
        }

        Ok(UpdateResult {
            matched_count: outcome.matched,
            modified_count: outcome.modified,
            upserted_id: outcome.upserted_id,
        })
    }

    /// Update the first match and return it, before or after the change
    pub fn find_one_and_update(
        &self,
        filter: &Value,
        update: &Value,
        options: FindOneAndUpdateOptions,
    ) -> Result<Option<Document>> {
        let mut docs = self.load()?;
        let mut index = IdIndex::build(&docs);

        if let Some(&position) = bulk::matching_positions(&docs, &index, filter, true)?.first() {
            let before = docs[position].clone();
            let after = Change::Update(update).apply(&before)?;
            if after != before {
                docs[position] = after.clone();
                self.save(&docs)?;
            }
            let returned = match options.return_document {
                ReturnDocument::Before => before,
                ReturnDocument::After => after,
            };
            return Ok(Some(self.bind(returned)));
        }

        if !options.upsert {
            return Ok(None);
        }

        let outcome = bulk::update_documents(&mut docs, &mut index, filter, Change::Update(update), false, true)?;
        self.save(&docs)?;

        match (options.return_document, outcome.upserted_id) {
            (ReturnDocument::After, Some(id)) => {
                let inserted = index.get(&id).map(|position| docs[position].clone());
                Ok(inserted.map(|doc| self.bind(doc)))
            }
            _ => Ok(None),
        }
    }

    pub fn delete_one(&self, filter: &Value) -> Result<DeleteResult> {
        self.delete(filter, false)
    }

    pub fn delete_many(&self, filter: &Value) -> Result<DeleteResult> {
        self.delete(filter, true)
    }

    fn delete(&self, filter: &Value, many: bool) -> Result<DeleteResult> {
        let mut docs = self.load()?;
        let mut index = IdIndex::build(&docs);

        let removed = bulk::delete_documents(&mut docs, &mut index, filter, many)?;
        if !removed.is_empty() {
            self.save(&docs)?;
        }

        Ok(DeleteResult {
            deleted_count: removed.len() as u64,
        })
    }

    /// Apply `ops` in order. Whatever was applied before a failing
    /// operation is written out before the error is returned.
    pub fn bulk_write(&self, ops: &[WriteModel]) -> Result<BulkWriteResult> {
        let mut docs = self.load()?;
        let outcome = bulk::bulk_write(&mut docs, ops);
        self.save(&docs)?;
        outcome
    }

    /// Delete the backing file. Returns false if there was nothing to drop.
    pub fn drop_collection_file(&self) -> Result<bool> {
        self.file.remove()
    }
}

/// Chainable find
pub struct FindQuery<'a> {
    collection: &'a CollectionCore,
    filter: Map<String, Value>,
    options: FindOptions,
    invalid: Option<DocFileError>,
}

impl<'a> FindQuery<'a> {
    fn new(collection: &'a CollectionCore) -> Self {
        FindQuery {
            collection,
            filter: Map::new(),
            options: FindOptions::default(),
            invalid: None,
        }
    }

    fn reject(&mut self, err: DocFileError) {
        if self.invalid.is_none() {
            self.invalid = Some(err);
        }
    }

    /// Merge more clauses into the filter; later keys win
    pub fn filter(mut self, clause: &Value) -> Self {
        match clause {
            Value::Object(map) => {
                for (key, value) in map {
                    self.filter.insert(key.clone(), value.clone());
                }
            }
            Value::Null => {}
            other => self.reject(DocFileError::InvalidQuery(format!(
                "filter must be an object, got {}",
                other
            ))),
        }
        self
    }

    /// `"field"`, `"-field"` or `{"field": 1 | -1}`
    pub fn sort(mut self, spec: &Value) -> Self {
        match SortSpec::from_json(spec) {
            Ok(sort) => self.options.sort = Some(sort),
            Err(e) => self.reject(e),
        }
        self
    }

    pub fn sort_by(mut self, sort: SortSpec) -> Self {
        self.options.sort = Some(sort);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.options.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.options.skip = Some(skip);
        self
    }

    /// Projection: `{field: 1}` includes, `{field: 0}` excludes
    pub fn select(mut self, projection: &Value) -> Self {
        match projection {
            Value::Object(map) => self.options.projection = Some(map.clone()),
            other => self.reject(DocFileError::InvalidQuery(format!(
                "projection must be an object, got {}",
                other
            ))),
        }
        self
    }

    fn matching(&mut self) -> Result<Vec<Value>> {
        if let Some(err) = self.invalid.take() {
            return Err(err);
        }
        let query = Query::new(Value::Object(std::mem::take(&mut self.filter)));
        let mut matched = Vec::new();
        for doc in self.collection.load()? {
            if query.matches(&doc)? {
                matched.push(doc);
            }
        }
        Ok(matched)
    }

    /// Plain JSON results
    pub fn lean(mut self) -> Result<Vec<Value>> {
        let matched = self.matching()?;
        self.options.apply(matched)
    }

    /// Results bound to the collection file
    pub fn exec(self) -> Result<Vec<Document>> {
        let collection = self.collection;
        Ok(self.lean()?.into_iter().map(|doc| collection.bind(doc)).collect())
    }

    /// Number of documents matching the filter; sort/skip/limit are ignored
    pub fn count(mut self) -> Result<u64> {
        Ok(self.matching()?.len() as u64)
    }
}
