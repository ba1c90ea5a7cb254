// src/expression.rs
// Aggregation expressions: "$path" references and {$op: args} evaluation

use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::error::{DocFileError, Result};
use crate::path::FieldPath;
use crate::value::{is_scalar_object, is_truthy, number_value, sort_cmp, values_equal};

/// Expression operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExprOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Concat,
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    And,
    Or,
    Not,
    IfNull,
}

impl ExprOperator {
    fn parse(op: &str) -> Option<Self> {
        let operator = match op {
            "$add" => ExprOperator::Add,
            "$subtract" => ExprOperator::Subtract,
            "$multiply" => ExprOperator::Multiply,
            "$divide" => ExprOperator::Divide,
            "$concat" => ExprOperator::Concat,
            "$eq" => ExprOperator::Eq,
            "$ne" => ExprOperator::Ne,
            "$gt" => ExprOperator::Gt,
            "$gte" => ExprOperator::Gte,
            "$lt" => ExprOperator::Lt,
            "$lte" => ExprOperator::Lte,
            "$and" => ExprOperator::And,
            "$or" => ExprOperator::Or,
            "$not" => ExprOperator::Not,
            "$ifNull" => ExprOperator::IfNull,
            _ => return None,
        };
        Some(operator)
    }
}

/// Evaluate an expression against a document. `None` means undefined.
pub fn eval_expr(doc: &Value, expr: &Value) -> Result<Option<Value>> {
    match expr {
        Value::String(s) if s.starts_with('$') && s.len() > 1 => {
            Ok(FieldPath::parse(&s[1..])?.get(doc).cloned())
        }

        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_expr(doc, item)?.unwrap_or(Value::Null));
            }
            Ok(Some(Value::Array(out)))
        }

        Value::Object(map) if map.is_empty() || is_scalar_object(expr) => Ok(Some(expr.clone())),

        Value::Object(map) if map.len() == 1 => {
            let (key, arg) = match map.iter().next() {
                Some(entry) => entry,
                None => return Ok(Some(expr.clone())),
            };

            if let Some(op) = ExprOperator::parse(key) {
                return eval_operator(doc, op, arg);
            }

            // {"$field": 1} / {"field": 1}
            if arg.as_f64() == Some(1.0) {
                let path = key.strip_prefix('$').unwrap_or(key);
                return Ok(FieldPath::parse(path)?.get(doc).cloned());
            }

            if key.starts_with('$') {
                return eval_expr(doc, arg);
            }

            object_literal(doc, map)
        }

        Value::Object(map) => object_literal(doc, map),

        literal => Ok(Some(literal.clone())),
    }
}

fn object_literal(doc: &Value, map: &Map<String, Value>) -> Result<Option<Value>> {
    let mut out = Map::new();
    for (field, sub) in map {
        if let Some(value) = eval_expr(doc, sub)? {
            out.insert(field.clone(), value);
        }
    }
    Ok(Some(Value::Object(out)))
}

/// Evaluate operator arguments; a non-array argument counts as a single argument
fn eval_args(doc: &Value, arg: &Value) -> Result<Vec<Option<Value>>> {
    match arg {
        Value::Array(items) => items.iter().map(|item| eval_expr(doc, item)).collect(),
        single => Ok(vec![eval_expr(doc, single)?]),
    }
}

fn binary(name: &str, args: Vec<Option<Value>>) -> Result<(Option<Value>, Option<Value>)> {
    if args.len() != 2 {
        return Err(DocFileError::AggregationError(format!(
            "{} requires exactly 2 arguments, got {}",
            name,
            args.len()
        )));
    }
    let mut it = args.into_iter();
    let lhs = it.next().flatten();
    let rhs = it.next().flatten();
    Ok((lhs, rhs))
}

/// Numeric argument; `Ok(None)` for null/missing
fn numeric(name: &str, value: &Option<Value>) -> Result<Option<f64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            DocFileError::TypeMismatch(format!("{} only supports numeric arguments, got {}", name, v))
        }),
    }
}

fn eval_operator(doc: &Value, op: ExprOperator, arg: &Value) -> Result<Option<Value>> {
    let args = eval_args(doc, arg)?;

    let result = match op {
        ExprOperator::Add | ExprOperator::Multiply => {
            let name = if op == ExprOperator::Add { "$add" } else { "$multiply" };
            let mut acc = if op == ExprOperator::Add { 0.0 } else { 1.0 };
            for value in &args {
                match numeric(name, value)? {
                    Some(n) if op == ExprOperator::Add => acc += n,
                    Some(n) => acc *= n,
                    None => return Ok(Some(Value::Null)),
                }
            }
            number_value(acc)
        }

        ExprOperator::Subtract | ExprOperator::Divide => {
            let name = if op == ExprOperator::Subtract { "$subtract" } else { "$divide" };
            let (lhs, rhs) = binary(name, args)?;
            match (numeric(name, &lhs)?, numeric(name, &rhs)?) {
                (Some(a), Some(b)) if op == ExprOperator::Subtract => number_value(a - b),
                (Some(_), Some(b)) if b == 0.0 => Value::Null,
                (Some(a), Some(b)) => number_value(a / b),
                _ => Value::Null,
            }
        }

        ExprOperator::Concat => {
            let mut out = String::new();
            for value in &args {
                match value {
                    None | Some(Value::Null) => return Ok(Some(Value::Null)),
                    Some(Value::String(s)) => out.push_str(s),
                    Some(other) => {
                        return Err(DocFileError::TypeMismatch(format!(
                            "$concat only supports strings, got {}",
                            other
                        )))
                    }
                }
            }
            Value::String(out)
        }

        ExprOperator::Eq | ExprOperator::Ne => {
            let (lhs, rhs) = binary(if op == ExprOperator::Eq { "$eq" } else { "$ne" }, args)?;
            let equal = match (&lhs, &rhs) {
                (Some(a), Some(b)) => values_equal(a, b),
                (None, None) => true,
                _ => false,
            };
            Value::Bool(equal == (op == ExprOperator::Eq))
        }

        ExprOperator::Gt | ExprOperator::Gte | ExprOperator::Lt | ExprOperator::Lte => {
            let (lhs, rhs) = binary("comparison", args)?;
            let ord = sort_cmp(lhs.as_ref(), rhs.as_ref());
            let hit = match op {
                ExprOperator::Gt => ord == Ordering::Greater,
                ExprOperator::Gte => ord != Ordering::Less,
                ExprOperator::Lt => ord == Ordering::Less,
                _ => ord != Ordering::Greater,
            };
            Value::Bool(hit)
        }

        ExprOperator::And => Value::Bool(args.iter().all(|v| is_truthy(v.as_ref()))),
        ExprOperator::Or => Value::Bool(args.iter().any(|v| is_truthy(v.as_ref()))),
        ExprOperator::Not => {
            let first = args.first().and_then(|v| v.as_ref());
            Value::Bool(!is_truthy(first))
        }

        ExprOperator::IfNull => {
            return Ok(Some(
                args.into_iter()
                    .flatten()
                    .find(|v| !v.is_null())
                    .unwrap_or(Value::Null),
            ))
        }
    };

    Ok(Some(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(doc: &Value, expr: Value) -> Option<Value> {
        eval_expr(doc, &expr).unwrap()
    }

    #[test]
    fn test_path_and_literals() {
        let doc = json!({"a": {"b": 3}, "name": "x"});

        assert_eq!(eval(&doc, json!("$a.b")), Some(json!(3)));
        assert_eq!(eval(&doc, json!("$missing")), None);
        assert_eq!(eval(&doc, json!("plain")), Some(json!("plain")));
        assert_eq!(eval(&doc, json!(7)), Some(json!(7)));
        assert_eq!(eval(&doc, json!(["$name", "$missing"])), Some(json!(["x", null])));
    }

    #[test]
    fn test_arithmetic() {
        let doc = json!({"price": 10, "qty": 3, "zero": 0});

        assert_eq!(eval(&doc, json!({"$add": ["$price", "$qty", 1]})), Some(json!(14)));
        assert_eq!(eval(&doc, json!({"$subtract": ["$price", "$qty"]})), Some(json!(7)));
        assert_eq!(eval(&doc, json!({"$multiply": ["$price", "$qty"]})), Some(json!(30)));
        assert_eq!(eval(&doc, json!({"$divide": ["$price", 4]})), Some(json!(2.5)));
        assert_eq!(eval(&doc, json!({"$divide": ["$price", "$zero"]})), Some(Value::Null));
        assert_eq!(eval(&doc, json!({"$add": ["$price", "$nope"]})), Some(Value::Null));
    }

    #[test]
    fn test_arithmetic_rejects_strings() {
        let doc = json!({"s": "x"});
        assert!(matches!(
            eval_expr(&doc, &json!({"$add": ["$s", 1]})),
            Err(DocFileError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_concat_and_if_null() {
        let doc = json!({"first": "Ada", "last": "Lovelace", "nick": null});

        assert_eq!(
            eval(&doc, json!({"$concat": ["$first", " ", "$last"]})),
            Some(json!("Ada Lovelace"))
        );
        assert_eq!(eval(&doc, json!({"$concat": ["$first", "$none"]})), Some(Value::Null));
        assert_eq!(eval(&doc, json!({"$ifNull": ["$nick", "$first"]})), Some(json!("Ada")));
    }

    #[test]
    fn test_comparisons_and_logic() {
        let doc = json!({"age": 30, "active": true});

        assert_eq!(eval(&doc, json!({"$gt": ["$age", 18]})), Some(json!(true)));
        assert_eq!(eval(&doc, json!({"$lte": ["$age", 18]})), Some(json!(false)));
        assert_eq!(eval(&doc, json!({"$eq": ["$age", 30.0]})), Some(json!(true)));
        assert_eq!(eval(&doc, json!({"$ne": ["$missing", null]})), Some(json!(true)));
        assert_eq!(
            eval(&doc, json!({"$and": ["$active", {"$gte": ["$age", 21]}]})),
            Some(json!(true))
        );
        assert_eq!(eval(&doc, json!({"$or": [false, "$missing"]})), Some(json!(false)));
        assert_eq!(eval(&doc, json!({"$not": ["$active"]})), Some(json!(false)));
    }

    #[test]
    fn test_binary_arity() {
        let doc = json!({});
        assert!(matches!(
            eval_expr(&doc, &json!({"$subtract": [1]})),
            Err(DocFileError::AggregationError(_))
        ));
    }

    #[test]
    fn test_field_shorthand_and_unknown_operator() {
        let doc = json!({"name": "x", "n": 2});

        assert_eq!(eval(&doc, json!({"$name": 1})), Some(json!("x")));
        assert_eq!(eval(&doc, json!({"name": 1})), Some(json!("x")));
        assert_eq!(eval(&doc, json!({"$custom": "$n"})), Some(json!(2)));
    }

    #[test]
    fn test_object_literal() {
        let doc = json!({"a": 1, "b": 2});
        assert_eq!(
            eval(&doc, json!({"x": "$a", "y": {"$add": ["$a", "$b"]}, "z": "$missing"})),
            Some(json!({"x": 1, "y": 3}))
        );
    }
}
