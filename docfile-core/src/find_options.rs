// src/find_options.rs
// Find query options: projection, sort, limit, skip

use log::warn;
use serde_json::{Map, Value};

use crate::error::{DocFileError, Result};
use crate::path::FieldPath;
use crate::value::sort_cmp;

/// Single-key sort: `"field"`, `"-field"` or `{"field": 1 | -1}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

impl SortSpec {
    pub fn ascending(field: impl Into<String>) -> Self {
        SortSpec {
            field: field.into(),
            descending: false,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        SortSpec {
            field: field.into(),
            descending: true,
        }
    }

    /// `"name"` sorts ascending, `"-name"` descending
    pub fn parse(spec: &str) -> Result<Self> {
        let (field, descending) = match spec.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (spec, false),
        };
        if field.is_empty() {
            return Err(DocFileError::InvalidQuery(format!("invalid sort spec '{}'", spec)));
        }
        Ok(SortSpec {
            field: field.to_string(),
            descending,
        })
    }

    pub fn from_json(spec: &Value) -> Result<Self> {
        match spec {
            Value::String(s) => Self::parse(s),
            Value::Object(map) => {
                let mut entries = map.iter();
                let (field, direction) = entries
                    .next()
                    .ok_or_else(|| DocFileError::InvalidQuery("empty sort object".into()))?;
                if map.len() > 1 {
                    let ignored: Vec<&str> = entries.map(|(k, _)| k.as_str()).collect();
                    warn!("Only one sort key is supported; ignoring {:?}", ignored);
                }
                let descending = match direction.as_f64() {
                    Some(n) if n > 0.0 => false,
                    Some(n) if n < 0.0 => true,
                    _ => {
                        return Err(DocFileError::InvalidQuery(format!(
                            "sort direction for '{}' must be 1 or -1",
                            field
                        )))
                    }
                };
                Ok(SortSpec {
                    field: field.clone(),
                    descending,
                })
            }
            other => Err(DocFileError::InvalidQuery(format!("invalid sort spec {}", other))),
        }
    }
}

/// Options for find queries
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Projection: field → 1 (include) or 0 (exclude)
    /// Special case: _id can be excluded in include mode
    pub projection: Option<Map<String, Value>>,

    pub sort: Option<SortSpec>,

    /// Limit: maximum number of documents to return
    pub limit: Option<usize>,

    /// Skip: number of documents to skip (for pagination)
    pub skip: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projection(mut self, projection: Map<String, Value>) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Sort, then skip/limit, then project
    pub fn apply(&self, mut docs: Vec<Value>) -> Result<Vec<Value>> {
        if let Some(sort) = &self.sort {
            apply_sort(&mut docs, sort)?;
        }
        let docs = apply_limit_skip(docs, self.limit, self.skip);
        match &self.projection {
            Some(projection) => docs.iter().map(|doc| apply_projection(doc, projection)).collect(),
            None => Ok(docs),
        }
    }
}

fn is_excluded(flag: &Value) -> bool {
    matches!(flag, Value::Bool(false)) || flag.as_f64() == Some(0.0)
}

/// Apply projection to a document
pub fn apply_projection(doc: &Value, projection: &Map<String, Value>) -> Result<Value> {
    if projection.is_empty() {
        return Ok(doc.clone());
    }

    let exclude_mode = projection
        .iter()
        .any(|(field, flag)| field != "_id" && is_excluded(flag));

    if exclude_mode {
        let mut result = doc.clone();
        for (field, flag) in projection {
            if is_excluded(flag) {
                FieldPath::parse(field)?.remove(&mut result);
            }
        }
        return Ok(result);
    }

    let mut result = Value::Object(Map::new());

    // Include _id unless explicitly excluded
    if !projection.get("_id").map_or(false, is_excluded) {
        if let Some(id) = doc.get("_id") {
            FieldPath::parse("_id")?.set(&mut result, id.clone())?;
        }
    }

    for (field, flag) in projection {
        if field == "_id" || is_excluded(flag) {
            continue;
        }
        let path = FieldPath::parse(field)?;
        if let Some(value) = path.get(doc) {
            path.set(&mut result, value.clone())?;
        }
    }

    Ok(result)
}

/// Apply sort to documents (stable)
pub fn apply_sort(docs: &mut [Value], sort: &SortSpec) -> Result<()> {
    let path = FieldPath::parse(&sort.field)?;
    docs.sort_by(|a, b| {
        let cmp = sort_cmp(path.get(a), path.get(b));
        if sort.descending {
            cmp.reverse()
        } else {
            cmp
        }
    });
    Ok(())
}

/// Apply limit and skip to documents
pub fn apply_limit_skip(docs: Vec<Value>, limit: Option<usize>, skip: Option<usize>) -> Vec<Value> {
    docs.into_iter()
        .skip(skip.unwrap_or(0))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn projection(json: Value) -> Map<String, Value> {
        json.as_object().cloned().unwrap()
    }

    #[test]
    fn test_sort_spec_forms() {
        assert_eq!(SortSpec::parse("age").unwrap(), SortSpec::ascending("age"));
        assert_eq!(SortSpec::parse("-age").unwrap(), SortSpec::descending("age"));
        assert_eq!(SortSpec::from_json(&json!({"age": -1})).unwrap(), SortSpec::descending("age"));
        assert_eq!(
            SortSpec::from_json(&json!({"age": 1, "name": -1})).unwrap(),
            SortSpec::ascending("age")
        );

        assert!(SortSpec::parse("-").is_err());
        assert!(SortSpec::from_json(&json!({})).is_err());
        assert!(SortSpec::from_json(&json!({"age": "up"})).is_err());
        assert!(SortSpec::from_json(&json!(5)).is_err());
    }

    #[test]
    fn test_projection_include_mode() {
        let doc = json!({"name": "Alice", "age": 30, "city": "NYC", "_id": 1});

        let result = apply_projection(&doc, &projection(json!({"name": 1, "age": 1}))).unwrap();
        assert!(result.get("name").is_some());
        assert!(result.get("age").is_some());
        assert!(result.get("_id").is_some()); // Included by default
        assert!(result.get("city").is_none());
    }

    #[test]
    fn test_projection_exclude_id() {
        let doc = json!({"name": "Alice", "age": 30, "_id": 1});

        let result = apply_projection(&doc, &projection(json!({"name": 1, "_id": 0}))).unwrap();
        assert!(result.get("name").is_some());
        assert!(result.get("_id").is_none()); // Excluded
    }

    #[test]
    fn test_projection_exclude_mode() {
        let doc = json!({"name": "Alice", "age": 30, "city": "NYC", "_id": 1});

        let result = apply_projection(&doc, &projection(json!({"city": 0}))).unwrap();
        assert_eq!(result, json!({"name": "Alice", "age": 30, "_id": 1}));
    }

    #[test]
    fn test_projection_nested_paths() {
        let doc = json!({"_id": 1, "profile": {"name": "Alice", "email": "a@x.io"}});

        let included = apply_projection(&doc, &projection(json!({"profile.name": 1}))).unwrap();
        assert_eq!(included, json!({"_id": 1, "profile": {"name": "Alice"}}));

        let excluded = apply_projection(&doc, &projection(json!({"profile.email": 0}))).unwrap();
        assert_eq!(excluded, included);
    }

    #[test]
    fn test_sort_stable_and_descending() {
        let mut docs = vec![
            json!({"age": 30, "name": "Bob"}),
            json!({"age": 25, "name": "Alice"}),
            json!({"age": 30, "name": "Carol"}),
            json!({"name": "Nobody"}),
        ];

        apply_sort(&mut docs, &SortSpec::ascending("age")).unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Nobody", "Alice", "Bob", "Carol"]);

        apply_sort(&mut docs, &SortSpec::descending("age")).unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Bob", "Carol", "Alice", "Nobody"]);
    }

    #[test]
    fn test_limit_skip() {
        let docs: Vec<Value> = (1..=5).map(|n| json!({"n": n})).collect();

        let result = apply_limit_skip(docs.clone(), Some(2), Some(1));
        assert_eq!(result, vec![json!({"n": 2}), json!({"n": 3})]);

        assert_eq!(apply_limit_skip(docs.clone(), Some(3), None).len(), 3);
        assert_eq!(apply_limit_skip(docs.clone(), None, Some(2)).len(), 3);
        assert!(apply_limit_skip(docs, None, Some(10)).is_empty());
    }

    #[test]
    fn test_options_apply_order() {
        let docs: Vec<Value> = vec![
            json!({"_id": "a", "n": 3, "x": true}),
            json!({"_id": "b", "n": 1, "x": true}),
            json!({"_id": "c", "n": 2, "x": true}),
        ];

        let options = FindOptions::new()
            .with_sort(SortSpec::descending("n"))
            .with_skip(1)
            .with_limit(1)
            .with_projection(projection(json!({"x": 0})));

        assert_eq!(options.apply(docs).unwrap(), vec![json!({"_id": "c", "n": 2})]);
    }
}
