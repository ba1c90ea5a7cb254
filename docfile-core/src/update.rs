// src/update.rs
// Update operators: pure `apply_update(doc, spec) -> new doc`

use log::warn;
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::error::{DocFileError, Result};
use crate::path::FieldPath;
use crate::query;
use crate::value::{compare_values, is_scalar_object, now_value, number_value, values_equal};

/// Update operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOperator {
    // Field
    Set,         // $set
    Unset,       // $unset
    Rename,      // $rename
    SetOnInsert, // $setOnInsert
    CurrentDate, // $currentDate

    // Math
    Inc,         // $inc
    Mul,         // $mul
    Min,         // $min
    Max,         // $max
    Bit,         // $bit

    // Array
    Push,        // $push
    AddToSet,    // $addToSet
    Pop,         // $pop
    Pull,        // $pull
    PullAll,     // $pullAll
}

impl UpdateOperator {
    pub fn parse(op: &str) -> Option<Self> {
        let operator = match op {
            "$set" => UpdateOperator::Set,
            "$unset" => UpdateOperator::Unset,
            "$rename" => UpdateOperator::Rename,
            "$setOnInsert" => UpdateOperator::SetOnInsert,
            "$currentDate" => UpdateOperator::CurrentDate,
            "$inc" => UpdateOperator::Inc,
            "$mul" => UpdateOperator::Mul,
            "$min" => UpdateOperator::Min,
            "$max" => UpdateOperator::Max,
            "$bit" => UpdateOperator::Bit,
            "$push" => UpdateOperator::Push,
            "$addToSet" => UpdateOperator::AddToSet,
            "$pop" => UpdateOperator::Pop,
            "$pull" => UpdateOperator::Pull,
            "$pullAll" => UpdateOperator::PullAll,
            _ => return None,
        };
        Some(operator)
    }

    fn name(self) -> &'static str {
        match self {
            UpdateOperator::Set => "$set",
            UpdateOperator::Unset => "$unset",
            UpdateOperator::Rename => "$rename",
            UpdateOperator::SetOnInsert => "$setOnInsert",
            UpdateOperator::CurrentDate => "$currentDate",
            UpdateOperator::Inc => "$inc",
            UpdateOperator::Mul => "$mul",
            UpdateOperator::Min => "$min",
            UpdateOperator::Max => "$max",
            UpdateOperator::Bit => "$bit",
            UpdateOperator::Push => "$push",
            UpdateOperator::AddToSet => "$addToSet",
            UpdateOperator::Pop => "$pop",
            UpdateOperator::Pull => "$pull",
            UpdateOperator::PullAll => "$pullAll",
        }
    }
}

/// True when the update uses `$` operators; otherwise it is an implicit `$set`
pub fn is_operator_update(spec: &Value) -> bool {
    spec.as_object()
        .map_or(false, |map| map.keys().any(|k| k.starts_with('$')))
}

/// Apply an update spec to a copy of `doc`. The input is never modified.
pub fn apply_update(doc: &Value, spec: &Value) -> Result<Value> {
    if !doc.is_object() {
        return Err(DocFileError::TypeMismatch(
            "update target must be an object document".into(),
        ));
    }
    let ops = match spec {
        Value::Object(map) => map,
        Value::Array(_) => {
            return Err(DocFileError::TypeMismatch(
                "update pipelines are not supported".into(),
            ))
        }
        other => {
            return Err(DocFileError::TypeMismatch(format!(
                "update spec must be an object, got {}",
                other
            )))
        }
    };

    let mut result = doc.clone();

    if !is_operator_update(spec) {
        for (path, value) in ops {
            apply_field(&mut result, UpdateOperator::Set, path, value)?;
        }
        return Ok(result);
    }

    for (op_name, fields) in ops {
        let op = match UpdateOperator::parse(op_name) {
            Some(op) => op,
            None => {
                warn!("Unsupported update operator '{}' ignored", op_name);
                continue;
            }
        };

        let fields = fields.as_object().ok_or_else(|| {
            DocFileError::TypeMismatch(format!("{} requires an object of field paths", op_name))
        })?;

        for (path, operand) in fields {
            apply_field(&mut result, op, path, operand)?;
        }
    }

    Ok(result)
}

/// Field/value pairs of a `$setOnInsert` clause, if any
pub fn set_on_insert_fields(spec: &Value) -> Option<&Map<String, Value>> {
    spec.get("$setOnInsert").and_then(Value::as_object)
}

fn apply_field(doc: &mut Value, op: UpdateOperator, path: &str, operand: &Value) -> Result<()> {
    let field = FieldPath::parse(path)?;

    match op {
        UpdateOperator::Set => field.set(doc, operand.clone())?,

        UpdateOperator::Unset => {
            field.remove(doc);
        }

        UpdateOperator::Rename => {
            let target = operand.as_str().ok_or_else(|| {
                DocFileError::TypeMismatch(format!("$rename target for '{}' must be a string", path))
            })?;
            let target = FieldPath::parse(target)?;
            if let Some(moved) = field.remove(doc) {
                target.set(doc, moved)?;
            }
        }

        // Applied by upsert seeding only
        UpdateOperator::SetOnInsert => {}

        UpdateOperator::CurrentDate => field.set(doc, now_value())?,

        UpdateOperator::Inc => {
            let updated = arithmetic(field.get(doc), operand, op, path, i64::checked_add, |a, b| a + b)?;
            field.set(doc, updated)?;
        }

        UpdateOperator::Mul => {
            let updated = arithmetic(field.get(doc), operand, op, path, i64::checked_mul, |a, b| a * b)?;
            field.set(doc, updated)?;
        }

        UpdateOperator::Min | UpdateOperator::Max => {
            let wanted = if op == UpdateOperator::Min {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let replace = match field.get(doc) {
                None => true,
                Some(current) => compare_values(operand, current) == Some(wanted),
            };
            if replace {
                field.set(doc, operand.clone())?;
            }
        }

        UpdateOperator::Bit => {
            let updated = apply_bitwise(field.get(doc), operand, path)?;
            field.set(doc, updated)?;
        }

        UpdateOperator::Push => {
            let mut array = existing_array(field.get(doc), op, path)?.unwrap_or_default();
            if let Value::Object(modifiers) = operand {
                for unsupported in ["$slice", "$sort", "$position"] {
                    if modifiers.contains_key(unsupported) {
                        warn!("$push modifier '{}' on '{}' is not supported and was ignored", unsupported, path);
                    }
                }
            }
            array.extend(each_items(operand));
            field.set(doc, Value::Array(array))?;
        }

        UpdateOperator::AddToSet => {
            let mut array = existing_array(field.get(doc), op, path)?.unwrap_or_default();
            for item in each_items(operand) {
                if !array.iter().any(|existing| values_equal(existing, &item)) {
                    array.push(item);
                }
            }
            field.set(doc, Value::Array(array))?;
        }

        UpdateOperator::Pop => {
            if let Some(mut array) = existing_array(field.get(doc), op, path)? {
                match operand.as_i64() {
                    Some(1) => {
                        array.pop();
                    }
                    Some(-1) => {
                        if !array.is_empty() {
                            array.remove(0);
                        }
                    }
                    _ => {
                        return Err(DocFileError::TypeMismatch(format!(
                            "$pop value for '{}' must be 1 or -1, got {}",
                            path, operand
                        )))
                    }
                }
                field.set(doc, Value::Array(array))?;
            }
        }

        UpdateOperator::Pull => {
            if let Some(array) = existing_array(field.get(doc), op, path)? {
                let mut kept = Vec::with_capacity(array.len());
                for item in array {
                    if !pull_matches(&item, operand)? {
                        kept.push(item);
                    }
                }
                field.set(doc, Value::Array(kept))?;
            }
        }

        UpdateOperator::PullAll => {
            let removals = operand.as_array().ok_or_else(|| {
                DocFileError::TypeMismatch(format!("$pullAll value for '{}' must be an array", path))
            })?;
            if let Some(mut array) = existing_array(field.get(doc), op, path)? {
                array.retain(|item| !removals.iter().any(|r| values_equal(item, r)));
                field.set(doc, Value::Array(array))?;
            }
        }
    }

    Ok(())
}

/// Current array at a path: `None` if missing, error if present but not an array
fn existing_array(current: Option<&Value>, op: UpdateOperator, path: &str) -> Result<Option<Vec<Value>>> {
    match current {
        None => Ok(None),
        Some(Value::Array(arr)) => Ok(Some(arr.clone())),
        Some(other) => Err(DocFileError::TypeMismatch(format!(
            "{}: field '{}' is not an array (found {})",
            op.name(),
            path,
            other
        ))),
    }
}

/// `{$each: [...]}` expands to its items; anything else is a single item
fn each_items(operand: &Value) -> Vec<Value> {
    match operand.get("$each") {
        Some(Value::Array(items)) if operand.is_object() => items.clone(),
        Some(single) if operand.is_object() => vec![single.clone()],
        _ => vec![operand.clone()],
    }
}

/// `$pull` condition: deep equality, field subset for plain objects, query for `$` objects
fn pull_matches(item: &Value, condition: &Value) -> Result<bool> {
    if let Value::Object(fields) = condition {
        if !is_scalar_object(condition) {
            if fields.keys().any(|k| k.starts_with('$')) {
                return query::matches(item, condition);
            }
            if let Value::Object(obj) = item {
                return Ok(fields
                    .iter()
                    .all(|(k, v)| obj.get(k).map_or(false, |x| values_equal(x, v))));
            }
            return Ok(false);
        }
    }
    Ok(values_equal(item, condition))
}

fn arithmetic(
    current: Option<&Value>,
    operand: &Value,
    op: UpdateOperator,
    path: &str,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    let zero = Value::from(0);
    let current = match current {
        None | Some(Value::Null) => &zero,
        Some(v) => v,
    };

    let (a, b) = match (current.as_f64(), operand.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        (None, _) => {
            return Err(DocFileError::TypeMismatch(format!(
                "{}: field '{}' is not numeric (found {})",
                op.name(),
                path,
                current
            )))
        }
        (_, None) => {
            return Err(DocFileError::TypeMismatch(format!(
                "{}: operand for '{}' must be a number",
                op.name(),
                path
            )))
        }
    };

    // Try int first to preserve integer types
    if let (Some(x), Some(y)) = (current.as_i64(), operand.as_i64()) {
        if let Some(result) = int_op(x, y) {
            return Ok(Value::from(result));
        }
    }

    Ok(number_value(float_op(a, b)))
}

/// `$bit`: and, then or, then xor
fn apply_bitwise(current: Option<&Value>, operand: &Value, path: &str) -> Result<Value> {
    let mut bits = match current {
        None => 0,
        Some(v) => v.as_i64().ok_or_else(|| {
            DocFileError::TypeMismatch(format!("$bit: field '{}' is not an integer", path))
        })?,
    };

    let spec = operand.as_object().ok_or_else(|| {
        DocFileError::TypeMismatch(format!("$bit value for '{}' must be an object", path))
    })?;

    let mask = |name: &str| -> Result<Option<i64>> {
        match spec.get(name) {
            None => Ok(None),
            Some(v) => v.as_i64().map(Some).ok_or_else(|| {
                DocFileError::TypeMismatch(format!("$bit {} mask for '{}' must be an integer", name, path))
            }),
        }
    };

    if let Some(m) = mask("and")? {
        bits &= m;
    }
    if let Some(m) = mask("or")? {
        bits |= m;
    }
    if let Some(m) = mask("xor")? {
        bits ^= m;
    }

    Ok(Value::from(bits))
}
