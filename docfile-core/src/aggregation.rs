// src/aggregation.rs
// Aggregation pipeline implementation

use ahash::AHashMap;
use log::{debug, warn};
use serde_json::{Map, Value};

use crate::error::{DocFileError, Result};
use crate::expression::eval_expr;
use crate::path::FieldPath;
use crate::query::Query;
use crate::value::{number_value, sort_cmp, values_equal};

/// Aggregation pipeline
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

/// Pipeline stage
#[derive(Debug, Clone)]
pub enum Stage {
    Match(MatchStage),
    Project(ProjectStage),
    Group(GroupStage),
    Sort(SortStage),
    Limit(LimitStage),
    Skip(SkipStage),
    Unwind(UnwindStage),
    AddFields(AddFieldsStage),
    ReplaceRoot(ReplaceRootStage),
    Lookup(LookupStage),
    /// Unrecognised stage name; documents pass through unchanged
    Unknown(String),
}

/// $match stage - filter documents
#[derive(Debug, Clone)]
pub struct MatchStage {
    query: Query,
}

/// $project stage - reshape documents
#[derive(Debug, Clone)]
pub struct ProjectStage {
    fields: Vec<(String, Value)>,
    exclude_mode: bool,
}

/// $group stage - group documents and compute aggregates
#[derive(Debug, Clone)]
pub struct GroupStage {
    id: Value,
    accumulators: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorKind {
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
    Push,
    AddToSet,
}

#[derive(Debug, Clone)]
pub struct Accumulator {
    kind: AccumulatorKind,
    expr: Value,
}

/// $sort stage - sort documents
#[derive(Debug, Clone)]
pub struct SortStage {
    fields: Vec<(FieldPath, SortDirection)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// $limit stage - limit number of documents
#[derive(Debug, Clone)]
pub struct LimitStage {
    limit: usize,
}

/// $skip stage - skip documents
#[derive(Debug, Clone)]
pub struct SkipStage {
    skip: usize,
}

/// $unwind stage - one output document per array element
#[derive(Debug, Clone)]
pub struct UnwindStage {
    path: FieldPath,
    preserve_null_and_empty: bool,
}

/// $addFields stage - set computed fields
#[derive(Debug, Clone)]
pub struct AddFieldsStage {
    fields: Vec<(FieldPath, Value)>,
}

/// $replaceRoot stage - promote an embedded object
#[derive(Debug, Clone)]
pub struct ReplaceRootStage {
    new_root: Value,
}

/// $lookup stage - accepted but not joined
#[derive(Debug, Clone)]
pub struct LookupStage {
    spec: Value,
}

fn agg_error(msg: impl Into<String>) -> DocFileError {
    DocFileError::AggregationError(msg.into())
}

impl Pipeline {
    /// Create pipeline from JSON array
    pub fn from_json(pipeline_json: &Value) -> Result<Self> {
        if let Value::Array(stages_array) = pipeline_json {
            let stages = stages_array
                .iter()
                .map(Stage::from_json)
                .collect::<Result<Vec<_>>>()?;
            Ok(Pipeline { stages })
        } else {
            Err(agg_error("Pipeline must be an array"))
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Execute pipeline on documents
    pub fn execute(&self, mut docs: Vec<Value>) -> Result<Vec<Value>> {
        for stage in &self.stages {
            docs = stage.execute(docs)?;
        }
        Ok(docs)
    }
}

/// Parse and run a pipeline in one call
pub fn aggregate(docs: Vec<Value>, pipeline_json: &Value) -> Result<Vec<Value>> {
    Pipeline::from_json(pipeline_json)?.execute(docs)
}

impl Stage {
    /// Parse stage from JSON
    fn from_json(stage_json: &Value) -> Result<Self> {
        let obj = stage_json
            .as_object()
            .ok_or_else(|| agg_error("Stage must be an object"))?;

        // Each stage should have exactly one key
        let (stage_name, stage_spec) = match obj.iter().next() {
            Some(entry) if obj.len() == 1 => entry,
            _ => return Err(agg_error("Each stage must have exactly one operator")),
        };

        let stage = match stage_name.as_str() {
            "$match" => Stage::Match(MatchStage::from_json(stage_spec)?),
            "$project" => Stage::Project(ProjectStage::from_json(stage_spec)?),
            "$group" => Stage::Group(GroupStage::from_json(stage_spec)?),
            "$sort" => Stage::Sort(SortStage::from_json(stage_spec)?),
            "$limit" => Stage::Limit(LimitStage::from_json(stage_spec)?),
            "$skip" => Stage::Skip(SkipStage::from_json(stage_spec)?),
            "$unwind" => Stage::Unwind(UnwindStage::from_json(stage_spec)?),
            "$addFields" | "$set" => Stage::AddFields(AddFieldsStage::from_json(stage_spec)?),
            "$replaceRoot" => Stage::ReplaceRoot(ReplaceRootStage::from_json(stage_spec)?),
            "$lookup" => Stage::Lookup(LookupStage {
                spec: stage_spec.clone(),
            }),
            other => Stage::Unknown(other.to_string()),
        };
        Ok(stage)
    }

    /// Execute this stage
    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        match self {
            Stage::Match(stage) => stage.execute(docs),
            Stage::Project(stage) => stage.execute(docs),
            Stage::Group(stage) => stage.execute(docs),
            Stage::Sort(stage) => stage.execute(docs),
            Stage::Limit(stage) => stage.execute(docs),
            Stage::Skip(stage) => stage.execute(docs),
            Stage::Unwind(stage) => stage.execute(docs),
            Stage::AddFields(stage) => stage.execute(docs),
            Stage::ReplaceRoot(stage) => stage.execute(docs),
            Stage::Lookup(stage) => {
                debug!("$lookup is not supported, passing {} documents through: {}", docs.len(), stage.spec);
                Ok(docs)
            }
            Stage::Unknown(name) => {
                warn!("Unknown pipeline stage '{}' ignored", name);
                Ok(docs)
            }
        }
    }
}

impl MatchStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let query = Query::from_json(spec)?;
        Ok(MatchStage { query })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut results = Vec::new();
        for doc in docs {
            if self.query.matches(&doc)? {
                results.push(doc);
            }
        }
        Ok(results)
    }
}

fn is_inclusion(spec: &Value) -> bool {
    matches!(spec, Value::Bool(true)) || spec.as_f64() == Some(1.0)
}

fn is_exclusion(spec: &Value) -> bool {
    spec.is_number() && spec.as_f64() == Some(0.0)
}

impl ProjectStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| agg_error("$project must be an object"))?;

        let fields: Vec<(String, Value)> = obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        let exclude_mode = fields.iter().any(|(_, value)| is_exclusion(value));

        Ok(ProjectStage { fields, exclude_mode })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        docs.iter().map(|doc| self.project_document(doc)).collect()
    }

    fn project_document(&self, doc: &Value) -> Result<Value> {
        if self.exclude_mode {
            let mut result = doc.clone();
            for (field, value) in &self.fields {
                if is_exclusion(value) {
                    FieldPath::parse(field)?.remove(&mut result);
                }
            }
            return Ok(result);
        }

        let mut result = Value::Object(Map::new());

        let id_spec = self
            .fields
            .iter()
            .find(|(field, _)| field == "_id")
            .map(|(_, value)| value);
        match id_spec {
            Some(spec) if is_exclusion(spec) => {}
            Some(spec) if !is_inclusion(spec) => {
                if let Some(value) = eval_expr(doc, spec)? {
                    FieldPath::parse("_id")?.set(&mut result, value)?;
                }
            }
            _ => {
                if let Some(id) = doc.get("_id") {
                    FieldPath::parse("_id")?.set(&mut result, id.clone())?;
                }
            }
        }

        for (field, spec) in &self.fields {
            if field == "_id" {
                continue;
            }
            let path = FieldPath::parse(field)?;
            let value = if is_inclusion(spec) {
                path.get(doc).cloned()
            } else {
                eval_expr(doc, spec)?
            };
            if let Some(value) = value {
                path.set(&mut result, value)?;
            }
        }

        Ok(result)
    }
}

impl GroupStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| agg_error("$group must be an object"))?;

        let id = obj
            .get("_id")
            .cloned()
            .ok_or_else(|| agg_error("Group stage must have _id field"))?;

        // Parse accumulators
        let mut accumulators = Vec::new();
        for (field, value) in obj {
            if field == "_id" {
                continue; // Already parsed
            }
            if let Some(accumulator) = Accumulator::from_json(field, value)? {
                accumulators.push((field.clone(), accumulator));
            }
        }

        Ok(GroupStage { id, accumulators })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        // Step 1: Group documents by _id expression, in first-seen order
        let mut index: AHashMap<String, usize> = AHashMap::new();
        let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();

        for doc in docs {
            let key_value = eval_expr(&doc, &self.id)?.unwrap_or(Value::Null);
            let key = serde_json::to_string(&key_value)?;
            match index.get(&key) {
                Some(&slot) => groups[slot].1.push(doc),
                None => {
                    index.insert(key, groups.len());
                    groups.push((key_value, vec![doc]));
                }
            }
        }

        // Step 2: Compute accumulators for each group
        let mut results = Vec::with_capacity(groups.len());
        for (key_value, group_docs) in groups {
            let mut result = Map::new();
            result.insert("_id".to_string(), key_value);

            for (field, accumulator) in &self.accumulators {
                let value = accumulator.compute(&group_docs)?;
                result.insert(field.clone(), value);
            }

            results.push(Value::Object(result));
        }

        Ok(results)
    }
}

impl Accumulator {
    /// `Ok(None)` for an unknown accumulator, which is skipped
    fn from_json(field: &str, spec: &Value) -> Result<Option<Self>> {
        let obj = spec
            .as_object()
            .ok_or_else(|| agg_error(format!("Accumulator for '{}' must be an object", field)))?;

        let (op, expr) = match obj.iter().next() {
            Some(entry) if obj.len() == 1 => entry,
            _ => {
                return Err(agg_error(format!(
                    "Accumulator for '{}' must have exactly one operator",
                    field
                )))
            }
        };

        let kind = match op.as_str() {
            "$sum" => AccumulatorKind::Sum,
            "$avg" => AccumulatorKind::Avg,
            "$min" => AccumulatorKind::Min,
            "$max" => AccumulatorKind::Max,
            "$first" => AccumulatorKind::First,
            "$last" => AccumulatorKind::Last,
            "$push" => AccumulatorKind::Push,
            "$addToSet" => AccumulatorKind::AddToSet,
            other => {
                warn!("Unknown accumulator '{}' for field '{}' ignored", other, field);
                return Ok(None);
            }
        };

        Ok(Some(Accumulator {
            kind,
            expr: expr.clone(),
        }))
    }

    fn values(&self, docs: &[Value]) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(docs.len());
        for doc in docs {
            if let Some(value) = eval_expr(doc, &self.expr)? {
                values.push(value);
            }
        }
        Ok(values)
    }

    fn compute(&self, docs: &[Value]) -> Result<Value> {
        match self.kind {
            AccumulatorKind::Sum => {
                // {"$sum": 1} counts
                if let Some(n) = self.expr.as_f64() {
                    if let Some(i) = self.expr.as_i64() {
                        if let Some(total) = i.checked_mul(docs.len() as i64) {
                            return Ok(Value::from(total));
                        }
                    }
                    return Ok(number_value(n * docs.len() as f64));
                }

                let mut sum_int: i64 = 0;
                let mut sum_float: f64 = 0.0;
                let mut has_float = false;

                for value in self.values(docs)? {
                    if let Some(n) = value.as_i64() {
                        match sum_int.checked_add(n) {
                            Some(s) => sum_int = s,
                            None => {
                                sum_float += n as f64;
                                has_float = true;
                            }
                        }
                    } else if let Some(f) = value.as_f64() {
                        sum_float += f;
                        has_float = true;
                    }
                }

                if has_float {
                    Ok(number_value(sum_float + sum_int as f64))
                } else {
                    Ok(Value::from(sum_int))
                }
            }

            AccumulatorKind::Avg => {
                let numbers: Vec<f64> = self
                    .values(docs)?
                    .iter()
                    .filter_map(Value::as_f64)
                    .collect();

                if numbers.is_empty() {
                    Ok(Value::Null)
                } else {
                    Ok(number_value(numbers.iter().sum::<f64>() / numbers.len() as f64))
                }
            }

            AccumulatorKind::Min | AccumulatorKind::Max => {
                let wanted = if self.kind == AccumulatorKind::Min {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Greater
                };

                let mut best: Option<Value> = None;
                for value in self.values(docs)? {
                    if value.is_null() {
                        continue;
                    }
                    let replace = match &best {
                        None => true,
                        Some(current) => sort_cmp(Some(&value), Some(current)) == wanted,
                    };
                    if replace {
                        best = Some(value);
                    }
                }

                Ok(best.unwrap_or(Value::Null))
            }

            AccumulatorKind::First => match docs.first() {
                Some(doc) => Ok(eval_expr(doc, &self.expr)?.unwrap_or(Value::Null)),
                None => Ok(Value::Null),
            },

            AccumulatorKind::Last => match docs.last() {
                Some(doc) => Ok(eval_expr(doc, &self.expr)?.unwrap_or(Value::Null)),
                None => Ok(Value::Null),
            },

            AccumulatorKind::Push => Ok(Value::Array(self.values(docs)?)),

            AccumulatorKind::AddToSet => {
                let mut set: Vec<Value> = Vec::new();
                for value in self.values(docs)? {
                    if !set.iter().any(|existing| values_equal(existing, &value)) {
                        set.push(value);
                    }
                }
                Ok(Value::Array(set))
            }
        }
    }
}

impl SortStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| agg_error("$sort must be an object"))?;

        let mut fields = Vec::with_capacity(obj.len());
        for (field, value) in obj {
            let direction = match value.as_f64() {
                Some(n) if n > 0.0 => SortDirection::Ascending,
                Some(n) if n < 0.0 => SortDirection::Descending,
                _ => return Err(agg_error("Sort direction must be 1 or -1")),
            };
            fields.push((FieldPath::parse(field)?, direction));
        }

        Ok(SortStage { fields })
    }

    fn execute(&self, mut docs: Vec<Value>) -> Result<Vec<Value>> {
        // One full stable sort per key: the last key ends up dominant
        for (path, direction) in &self.fields {
            docs.sort_by(|a, b| {
                let cmp = sort_cmp(path.get(a), path.get(b));
                match direction {
                    SortDirection::Ascending => cmp,
                    SortDirection::Descending => cmp.reverse(),
                }
            });
        }
        Ok(docs)
    }
}

impl LimitStage {
    fn from_json(spec: &Value) -> Result<Self> {
        if let Some(n) = spec.as_u64() {
            Ok(LimitStage { limit: n as usize })
        } else {
            Err(agg_error("$limit must be a non-negative integer"))
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        Ok(docs.into_iter().take(self.limit).collect())
    }
}

impl SkipStage {
    fn from_json(spec: &Value) -> Result<Self> {
        if let Some(n) = spec.as_u64() {
            Ok(SkipStage { skip: n as usize })
        } else {
            Err(agg_error("$skip must be a non-negative integer"))
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        Ok(docs.into_iter().skip(self.skip).collect())
    }
}

fn field_reference(raw: &str, stage: &str) -> Result<FieldPath> {
    match raw.strip_prefix('$') {
        Some(path) => FieldPath::parse(path),
        None => Err(agg_error(format!("{} path must start with $", stage))),
    }
}

impl UnwindStage {
    fn from_json(spec: &Value) -> Result<Self> {
        match spec {
            Value::String(raw) => Ok(UnwindStage {
                path: field_reference(raw, "$unwind")?,
                preserve_null_and_empty: false,
            }),
            Value::Object(obj) => {
                let raw = obj
                    .get("path")
                    .and_then(Value::as_str)
                    .ok_or_else(|| agg_error("$unwind requires a path"))?;
                let preserve = obj
                    .get("preserveNullAndEmptyArrays")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Ok(UnwindStage {
                    path: field_reference(raw, "$unwind")?,
                    preserve_null_and_empty: preserve,
                })
            }
            _ => Err(agg_error("$unwind must be a string or object")),
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut results = Vec::with_capacity(docs.len());

        for doc in docs {
            let items = match self.path.get(&doc) {
                Some(Value::Array(items)) => items.clone(),
                _ => {
                    results.push(doc);
                    continue;
                }
            };

            if items.is_empty() {
                if self.preserve_null_and_empty {
                    let mut kept = doc;
                    self.path.remove(&mut kept);
                    results.push(kept);
                }
                continue;
            }

            for item in items {
                let mut unwound = doc.clone();
                self.path.set(&mut unwound, item)?;
                results.push(unwound);
            }
        }

        Ok(results)
    }
}

impl AddFieldsStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| agg_error("$addFields must be an object"))?;

        let fields = obj
            .iter()
            .map(|(field, expr)| Ok((FieldPath::parse(field)?, expr.clone())))
            .collect::<Result<Vec<_>>>()?;

        Ok(AddFieldsStage { fields })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut results = Vec::with_capacity(docs.len());
        for doc in docs {
            let mut updated = doc.clone();
            for (path, expr) in &self.fields {
                if let Some(value) = eval_expr(&doc, expr)? {
                    path.set(&mut updated, value)?;
                }
            }
            results.push(updated);
        }
        Ok(results)
    }
}

impl ReplaceRootStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let new_root = spec
            .get("newRoot")
            .cloned()
            .ok_or_else(|| agg_error("$replaceRoot requires newRoot"))?;
        Ok(ReplaceRootStage { new_root })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        docs.iter()
            .map(|doc| match eval_expr(doc, &self.new_root)? {
                Some(root @ Value::Object(_)) => Ok(root),
                other => Err(DocFileError::TypeMismatch(format!(
                    "$replaceRoot newRoot must evaluate to an object, got {}",
                    other.map_or_else(|| "undefined".to_string(), |v| v.to_string())
                ))),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn staff() -> Vec<Value> {
        vec![
            json!({"name": "Alice", "dept": "Eng", "salary": 50000, "active": true}),
            json!({"name": "Bob", "dept": "Eng", "salary": 60000, "active": true}),
            json!({"name": "Carol", "dept": "Ops", "salary": 40000, "active": true}),
            json!({"name": "Dan", "dept": "Eng", "salary": 70000, "active": false}),
        ]
    }

    #[test]
    fn test_match_stage() {
        let docs = vec![
            json!({"name": "Alice", "age": 25}),
            json!({"name": "Bob", "age": 30}),
            json!({"name": "Charlie", "age": 35}),
        ];

        let stage = MatchStage::from_json(&json!({"age": {"$gte": 30}})).unwrap();
        let results = stage.execute(docs).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["name"], "Bob");
        assert_eq!(results[1]["name"], "Charlie");
    }

    #[test]
    fn test_project_stage_include() {
        let docs = vec![json!({"_id": "1", "name": "Alice", "age": 25, "city": "NYC"})];

        let stage = ProjectStage::from_json(&json!({"name": 1, "years": "$age"})).unwrap();
        let results = stage.execute(docs).unwrap();

        assert_eq!(results, vec![json!({"_id": "1", "name": "Alice", "years": 25})]);
    }

    #[test]
    fn test_project_stage_exclude() {
        let docs = vec![json!({"_id": "1", "name": "Alice", "secret": "x", "meta": {"a": 1, "b": 2}})];

        let stage = ProjectStage::from_json(&json!({"secret": 0, "meta.b": 0, "_id": 0})).unwrap();
        let results = stage.execute(docs).unwrap();

        assert_eq!(results, vec![json!({"name": "Alice", "meta": {"a": 1}})]);
    }

    #[test]
    fn test_project_id_exclusion_switches_to_exclude_mode() {
        let docs = vec![json!({"_id": "1", "name": "Alice", "age": 25})];

        // Any literal 0 selects exclude mode; the 1 entries are then ignored
        let stage = ProjectStage::from_json(&json!({"_id": 0, "name": 1})).unwrap();
        let results = stage.execute(docs).unwrap();

        assert_eq!(results, vec![json!({"name": "Alice", "age": 25})]);
    }

    #[test]
    fn test_group_sum_example() {
        let pipeline = json!([
            {"$match": {"active": true}},
            {"$group": {"_id": "$dept", "total": {"$sum": "$salary"}}},
            {"$match": {"_id": "Eng"}}
        ]);

        let results = aggregate(staff(), &pipeline).unwrap();
        assert_eq!(results, vec![json!({"_id": "Eng", "total": 110000})]);
    }

    #[test]
    fn test_group_first_seen_order_and_accumulators() {
        let stage = GroupStage::from_json(&json!({
            "_id": "$dept",
            "count": {"$sum": 1},
            "avg": {"$avg": "$salary"},
            "low": {"$min": "$salary"},
            "high": {"$max": "$salary"},
            "first": {"$first": "$name"},
            "last": {"$last": "$name"},
            "names": {"$push": "$name"},
            "flags": {"$addToSet": "$active"}
        }))
        .unwrap();

        let results = stage.execute(staff()).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["_id"], "Eng");
        assert_eq!(results[0]["count"], 3);
        assert_eq!(results[0]["avg"], 60000);
        assert_eq!(results[0]["low"], 50000);
        assert_eq!(results[0]["high"], 70000);
        assert_eq!(results[0]["first"], "Alice");
        assert_eq!(results[0]["last"], "Dan");
        assert_eq!(results[0]["names"], json!(["Alice", "Bob", "Dan"]));
        assert_eq!(results[0]["flags"], json!([true, false]));
        assert_eq!(results[1]["_id"], "Ops");
    }

    #[test]
    fn test_group_null_and_compound_id() {
        let all = GroupStage::from_json(&json!({"_id": null, "n": {"$sum": 1}}))
            .unwrap()
            .execute(staff())
            .unwrap();
        assert_eq!(all, vec![json!({"_id": null, "n": 4})]);

        let compound = GroupStage::from_json(&json!({"_id": {"d": "$dept", "a": "$active"}}))
            .unwrap()
            .execute(staff())
            .unwrap();
        assert_eq!(compound.len(), 3);
        assert_eq!(compound[0]["_id"], json!({"d": "Eng", "a": true}));
    }

    #[test]
    fn test_group_unknown_accumulator_skipped() {
        let stage = GroupStage::from_json(&json!({"_id": "$dept", "x": {"$median": "$salary"}})).unwrap();
        let results = stage.execute(staff()).unwrap();
        assert!(results[0].get("x").is_none());
    }

    #[test]
    fn test_sort_stage() {
        let docs = vec![
            json!({"name": "Charlie", "age": 35}),
            json!({"name": "Alice", "age": 25}),
            json!({"name": "Bob", "age": 30}),
        ];

        let stage = SortStage::from_json(&json!({"age": 1})).unwrap();
        let results = stage.execute(docs).unwrap();

        assert_eq!(results[0]["name"], "Alice");
        assert_eq!(results[1]["name"], "Bob");
        assert_eq!(results[2]["name"], "Charlie");
    }

    #[test]
    fn test_multi_key_sort_last_key_dominates() {
        let docs = vec![
            json!({"a": 1, "b": 2}),
            json!({"a": 2, "b": 1}),
            json!({"a": 1, "b": 1}),
        ];

        let stage = SortStage::from_json(&json!({"a": 1, "b": 1})).unwrap();
        let results = stage.execute(docs).unwrap();

        assert_eq!(
            results,
            vec![
                json!({"a": 1, "b": 1}),
                json!({"a": 2, "b": 1}),
                json!({"a": 1, "b": 2}),
            ]
        );
    }

    #[test]
    fn test_limit_and_skip() {
        let docs = vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})];

        let limited = LimitStage::from_json(&json!(2)).unwrap().execute(docs.clone()).unwrap();
        assert_eq!(limited.len(), 2);

        let skipped = SkipStage::from_json(&json!(1)).unwrap().execute(docs).unwrap();
        assert_eq!(skipped.len(), 2);
        assert_eq!(skipped[0]["id"], 2);

        assert!(LimitStage::from_json(&json!(-1)).is_err());
        assert!(SkipStage::from_json(&json!("2")).is_err());
    }

    #[test]
    fn test_unwind() {
        let docs = vec![
            json!({"_id": "a", "tags": ["x", "y"]}),
            json!({"_id": "b", "tags": []}),
            json!({"_id": "c", "tags": "solo"}),
            json!({"_id": "d"}),
        ];

        let plain = UnwindStage::from_json(&json!("$tags")).unwrap().execute(docs.clone()).unwrap();
        assert_eq!(
            plain,
            vec![
                json!({"_id": "a", "tags": "x"}),
                json!({"_id": "a", "tags": "y"}),
                json!({"_id": "c", "tags": "solo"}),
                json!({"_id": "d"}),
            ]
        );

        let preserved = UnwindStage::from_json(&json!({"path": "$tags", "preserveNullAndEmptyArrays": true}))
            .unwrap()
            .execute(docs)
            .unwrap();
        assert_eq!(preserved.len(), 5);
        assert_eq!(preserved[2], json!({"_id": "b"}));

        assert!(UnwindStage::from_json(&json!("tags")).is_err());
    }

    #[test]
    fn test_add_fields_and_replace_root() {
        let docs = vec![json!({"a": 2, "b": 3, "inner": {"k": "v"}})];

        let added = aggregate(
            docs.clone(),
            &json!([{"$addFields": {"sum": {"$add": ["$a", "$b"]}, "meta.tag": "t"}}]),
        )
        .unwrap();
        assert_eq!(added[0]["sum"], 5);
        assert_eq!(added[0]["meta"], json!({"tag": "t"}));

        let replaced = aggregate(docs.clone(), &json!([{"$replaceRoot": {"newRoot": "$inner"}}])).unwrap();
        assert_eq!(replaced, vec![json!({"k": "v"})]);

        assert!(matches!(
            aggregate(docs, &json!([{"$replaceRoot": {"newRoot": "$a"}}])),
            Err(DocFileError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_lookup_and_unknown_pass_through() {
        let docs = vec![json!({"a": 1})];
        let results = aggregate(
            docs.clone(),
            &json!([
                {"$lookup": {"from": "other", "localField": "a", "foreignField": "b", "as": "joined"}},
                {"$bucketAuto": {"groupBy": "$a"}}
            ]),
        )
        .unwrap();
        assert_eq!(results, docs);
    }

    #[test]
    fn test_malformed_pipelines() {
        assert!(matches!(Pipeline::from_json(&json!({})), Err(DocFileError::AggregationError(_))));
        assert!(matches!(Pipeline::from_json(&json!([1])), Err(DocFileError::AggregationError(_))));
        assert!(matches!(
            Pipeline::from_json(&json!([{"$match": {}, "$limit": 1}])),
            Err(DocFileError::AggregationError(_))
        ));
        assert!(Pipeline::from_json(&json!([])).unwrap().execute(vec![json!({})]).is_ok());
    }

    #[test]
    fn test_full_pipeline() {
        let docs = vec![
            json!({"name": "Alice", "age": 25, "city": "NYC"}),
            json!({"name": "Bob", "age": 30, "city": "LA"}),
            json!({"name": "Charlie", "age": 35, "city": "NYC"}),
            json!({"name": "David", "age": 20, "city": "LA"}),
        ];

        let pipeline = Pipeline::from_json(&json!([
            {"$match": {"age": {"$gte": 25}}},
            {"$group": {"_id": "$city", "count": {"$sum": 1}, "avgAge": {"$avg": "$age"}}},
            {"$sort": {"count": -1}}
        ]))
        .unwrap();

        let results = pipeline.execute(docs).unwrap();

        assert_eq!(results.len(), 2);
        // NYC should be first (2 people)
        assert_eq!(results[0]["_id"], "NYC");
        assert_eq!(results[0]["count"], 2);
        assert_eq!(results[0]["avgAge"], 30);
    }
}
