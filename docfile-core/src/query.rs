// src/query.rs
// MongoDB-style query matcher over serde_json::Value documents

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::error::{DocFileError, Result};
use crate::path::FieldPath;
use crate::value::{
    compare_values, is_regex, is_scalar_object, is_truthy, number_value, type_matches,
    values_equal, REGEX_KEY, REGEX_OPTIONS_KEY,
};

/// Query operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOperator {
    // Comparison
    Eq,        // $eq
    Ne,        // $ne
    Gt,        // $gt
    Gte,       // $gte
    Lt,        // $lt
    Lte,       // $lte
    In,        // $in
    Nin,       // $nin

    // Element
    Exists,    // $exists
    Type,      // $type

    // Array
    All,       // $all
    ElemMatch, // $elemMatch
    Size,      // $size

    // Evaluation
    Regex,     // $regex
    Options,   // $options (modifier of $regex)
    Expr,      // $expr

    // Logical
    And,       // $and
    Or,        // $or
    Not,       // $not
    Nor,       // $nor
}

impl QueryOperator {
    pub fn parse(op: &str) -> Result<Self> {
        let operator = match op {
            "$eq" => QueryOperator::Eq,
            "$ne" => QueryOperator::Ne,
            "$gt" => QueryOperator::Gt,
            "$gte" => QueryOperator::Gte,
            "$lt" => QueryOperator::Lt,
            "$lte" => QueryOperator::Lte,
            "$in" => QueryOperator::In,
            "$nin" => QueryOperator::Nin,
            "$exists" => QueryOperator::Exists,
            "$type" => QueryOperator::Type,
            "$all" => QueryOperator::All,
            "$elemMatch" => QueryOperator::ElemMatch,
            "$size" => QueryOperator::Size,
            "$regex" => QueryOperator::Regex,
            "$options" => QueryOperator::Options,
            "$expr" => QueryOperator::Expr,
            "$and" => QueryOperator::And,
            "$or" => QueryOperator::Or,
            "$not" => QueryOperator::Not,
            "$nor" => QueryOperator::Nor,
            _ => return Err(DocFileError::UnknownOperator(op.to_string())),
        };
        Ok(operator)
    }

    /// Operators evaluated against an array value as a whole instead of per element
    fn sees_whole_array(self) -> bool {
        matches!(self, QueryOperator::All | QueryOperator::Options)
    }

    fn is_comparison(self) -> bool {
        matches!(
            self,
            QueryOperator::Eq
                | QueryOperator::Ne
                | QueryOperator::Gt
                | QueryOperator::Gte
                | QueryOperator::Lt
                | QueryOperator::Lte
                | QueryOperator::In
                | QueryOperator::Nin
        )
    }
}

/// Query - a filter clause evaluated against documents
#[derive(Debug, Clone)]
pub struct Query {
    clause: Value,
}

impl Query {
    pub fn new(clause: Value) -> Self {
        Query { clause }
    }

    /// Query from a JSON filter. `null` is accepted as the empty filter.
    pub fn from_json(json: &Value) -> Result<Self> {
        match json {
            Value::Object(_) => Ok(Query::new(json.clone())),
            Value::Null => Ok(Query::default()),
            other => Err(DocFileError::InvalidQuery(format!(
                "filter must be an object, got {}",
                other
            ))),
        }
    }

    pub fn clause(&self) -> &Value {
        &self.clause
    }

    /// Does the document satisfy this query
    pub fn matches(&self, document: &Value) -> Result<bool> {
        matches(document, &self.clause)
    }
}

impl Default for Query {
    fn default() -> Self {
        Query::new(Value::Object(Map::new()))
    }
}

/// Evaluate `clause` against `value`
pub fn matches(value: &Value, clause: &Value) -> Result<bool> {
    matches_opt(Some(value), clause)
}

/// Evaluate `clause` against a possibly undefined value
pub fn matches_opt(value: Option<&Value>, clause: &Value) -> Result<bool> {
    let is_operator_object = clause.is_object() && !is_scalar_object(clause);

    if let Some(v) = value {
        if !is_operator_object && !clause.is_array() && values_equal(v, clause) {
            return Ok(true);
        }
    }

    match (value, clause) {
        (Some(Value::Array(items)), Value::Array(expected)) => {
            if items.len() != expected.len() {
                return Ok(false);
            }
            for (item, wanted) in items.iter().zip(expected) {
                if !matches_opt(Some(item), wanted)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
        // Implicit "array contains"
        (Some(Value::Array(items)), c) if !is_operator_object => {
            return Ok(items.iter().any(|item| values_equal(item, c)));
        }
        _ => {}
    }

    let conditions = match clause {
        Value::Object(map) if is_operator_object => map,
        _ => return Ok(false),
    };

    for (key, operand) in conditions {
        let satisfied = if key.starts_with('$') {
            let op = QueryOperator::parse(key)?;
            match_operator(value, op, operand, conditions)?
        } else {
            let child = match value {
                Some(v) => FieldPath::parse(key)?.get(v),
                None => None,
            };
            if operand.is_array() || (operand.is_object() && !is_scalar_object(operand)) {
                matches_opt(child, operand)?
            } else {
                match_operator(child, QueryOperator::Eq, operand, conditions)?
            }
        };

        if !satisfied {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Apply one operator, spreading over array elements where required
fn match_operator(
    value: Option<&Value>,
    op: QueryOperator,
    operand: &Value,
    siblings: &Map<String, Value>,
) -> Result<bool> {
    if let Some(Value::Array(items)) = value {
        match op {
            QueryOperator::Ne => {
                return Ok(!items.iter().any(|item| values_equal(item, operand)));
            }
            QueryOperator::Size => {
                return matches_opt(Some(&Value::from(items.len())), operand);
            }
            op if op.sees_whole_array() => {}
            _ => return any_element(items, op, operand, siblings),
        }
    }

    eval_operator(value, op, operand, siblings)
}

fn any_element(
    items: &[Value],
    op: QueryOperator,
    operand: &Value,
    siblings: &Map<String, Value>,
) -> Result<bool> {
    for item in items {
        if match_operator(Some(item), op, operand, siblings)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn eval_operator(
    value: Option<&Value>,
    op: QueryOperator,
    operand: &Value,
    siblings: &Map<String, Value>,
) -> Result<bool> {
    let result = match op {
        QueryOperator::Eq => value.map_or(false, |v| values_equal(v, operand)),
        QueryOperator::Ne => value.map_or(true, |v| !values_equal(v, operand)),
        QueryOperator::Gt => compare(value, operand, |o| o == Ordering::Greater),
        QueryOperator::Gte => compare(value, operand, |o| o != Ordering::Less),
        QueryOperator::Lt => compare(value, operand, |o| o == Ordering::Less),
        QueryOperator::Lte => compare(value, operand, |o| o != Ordering::Greater),
        QueryOperator::In => in_list(value, operand)?,
        QueryOperator::Nin => !in_list(value, operand)?,
        QueryOperator::Exists => value.is_some() == is_truthy(Some(operand)),
        QueryOperator::Type => match operand.as_str() {
            Some(tag) => type_matches(value, tag),
            None => {
                return Err(DocFileError::InvalidQuery("$type requires a string tag".into()));
            }
        },
        QueryOperator::All => match_all(value, operand)?,
        QueryOperator::ElemMatch => matches_opt(value, operand)?,
        // Arrays are handled by the caller
        QueryOperator::Size => false,
        QueryOperator::Regex => {
            let re = build_regex(operand, siblings.get(REGEX_OPTIONS_KEY))?;
            value.and_then(Value::as_str).map_or(false, |s| re.is_match(s))
        }
        QueryOperator::Options => true,
        QueryOperator::Expr => match value {
            Some(doc) => eval_expr_clause(doc, operand)?,
            None => false,
        },
        QueryOperator::And => {
            for sub in clause_list(operand, "$and")? {
                if !matches_opt(value, sub)? {
                    return Ok(false);
                }
            }
            true
        }
        QueryOperator::Or => {
            for sub in clause_list(operand, "$or")? {
                if matches_opt(value, sub)? {
                    return Ok(true);
                }
            }
            false
        }
        QueryOperator::Nor => {
            for sub in clause_list(operand, "$nor")? {
                if matches_opt(value, sub)? {
                    return Ok(false);
                }
            }
            true
        }
        QueryOperator::Not => !matches_opt(value, operand)?,
    };

    Ok(result)
}

fn compare(value: Option<&Value>, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    value
        .and_then(|v| compare_values(v, operand))
        .map_or(false, accept)
}

fn clause_list<'a>(operand: &'a Value, op: &str) -> Result<&'a [Value]> {
    match operand {
        Value::Array(arr) => Ok(arr),
        _ => Err(DocFileError::InvalidQuery(format!("{} requires array", op))),
    }
}

/// `$in` membership; regex members test string values
fn in_list(value: Option<&Value>, operand: &Value) -> Result<bool> {
    let candidates = match operand {
        Value::Array(arr) => arr.as_slice(),
        other => std::slice::from_ref(other),
    };
    let value = match value {
        Some(v) => v,
        None => return Ok(false),
    };

    for candidate in candidates {
        if is_regex(candidate) {
            if let Some(s) = value.as_str() {
                let re = build_regex(&candidate[REGEX_KEY], candidate.get(REGEX_OPTIONS_KEY))?;
                if re.is_match(s) {
                    return Ok(true);
                }
            }
        } else if values_equal(value, candidate) {
            return Ok(true);
        }
    }

    Ok(false)
}

fn match_all(value: Option<&Value>, operand: &Value) -> Result<bool> {
    match operand {
        Value::Array(required) => {
            for wanted in required {
                if !matches_opt(value, wanted)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        scalar => match value {
            Some(Value::Array(items)) => {
                for item in items {
                    if !matches_opt(Some(item), scalar)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            other => matches_opt(other, scalar),
        },
    }
}

/// Compile a `$regex` pattern with optional `$options` flags (i, m, s, x)
pub fn build_regex(pattern: &Value, options: Option<&Value>) -> Result<Regex> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| DocFileError::InvalidQuery("$regex requires string".into()))?;
    let flags = options.and_then(Value::as_str).unwrap_or("");

    RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .ignore_whitespace(flags.contains('x'))
        .build()
        .map_err(|e| DocFileError::InvalidQuery(format!("invalid $regex '{}': {}", pattern, e)))
}

// ========== $expr ==========

/// Arithmetic available inside `$expr`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExprOp {
    Add,
    Divide,
    Cmp,
    Pow,
    Sqrt,
    Ceil,
    Floor,
    Abs,
}

impl ExprOp {
    fn parse(name: &str) -> Option<Self> {
        let op = match name.trim_start_matches('$') {
            "add" => ExprOp::Add,
            "divide" => ExprOp::Divide,
            "cmp" => ExprOp::Cmp,
            "pow" => ExprOp::Pow,
            "sqrt" => ExprOp::Sqrt,
            "ceil" => ExprOp::Ceil,
            "floor" => ExprOp::Floor,
            "abs" => ExprOp::Abs,
            _ => return None,
        };
        Some(op)
    }
}

/// `{$gt: [lhs, rhs]}` compares two evaluated operands; anything else is tested for truthiness
fn eval_expr_clause(doc: &Value, expr: &Value) -> Result<bool> {
    if let Value::Object(map) = expr {
        if let (1, Some((key, Value::Array(args)))) = (map.len(), map.iter().next()) {
            if let Ok(op) = QueryOperator::parse(key) {
                if op.is_comparison() && args.len() == 2 {
                    let lhs = eval_expr_value(doc, &args[0])?;
                    let rhs = eval_expr_value(doc, &args[1])?.unwrap_or(Value::Null);
                    let mut clause = Map::new();
                    clause.insert(key.clone(), rhs);
                    return matches_opt(lhs.as_ref(), &Value::Object(clause));
                }
            }
        }
    }

    Ok(is_truthy(eval_expr_value(doc, expr)?.as_ref()))
}

fn eval_expr_value(doc: &Value, expr: &Value) -> Result<Option<Value>> {
    match expr {
        Value::String(s) if s.starts_with('$') => Ok(FieldPath::parse(&s[1..])?.get(doc).cloned()),
        Value::Object(map) if map.len() == 1 => {
            let (key, args) = match map.iter().next() {
                Some(entry) => entry,
                None => return Ok(Some(expr.clone())),
            };
            match ExprOp::parse(key) {
                Some(op) => eval_expr_op(doc, op, args),
                None if key.starts_with('$') => Err(DocFileError::UnknownOperator(key.clone())),
                None => Ok(Some(expr.clone())),
            }
        }
        other => Ok(Some(other.clone())),
    }
}

fn eval_expr_op(doc: &Value, op: ExprOp, args: &Value) -> Result<Option<Value>> {
    match op {
        ExprOp::Add | ExprOp::Divide | ExprOp::Pow | ExprOp::Cmp => {
            let (lhs, rhs) = match args {
                Value::Array(pair) if pair.len() == 2 => (
                    eval_expr_value(doc, &pair[0])?,
                    eval_expr_value(doc, &pair[1])?,
                ),
                _ => {
                    return Err(DocFileError::InvalidQuery(format!(
                        "$expr {:?} requires two arguments",
                        op
                    )))
                }
            };

            if op == ExprOp::Cmp {
                let ordering = match (lhs.as_ref(), rhs.as_ref()) {
                    (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                return Ok(Some(Value::from(ordering as i64)));
            }

            let (a, b) = match (
                lhs.as_ref().and_then(Value::as_f64),
                rhs.as_ref().and_then(Value::as_f64),
            ) {
                (Some(a), Some(b)) => (a, b),
                _ => return Ok(Some(Value::Null)),
            };

            let result = match op {
                ExprOp::Add => a + b,
                // `$divide` yields lhs - rhs in `$expr` filters
                ExprOp::Divide => a - b,
                _ => a.powf(b),
            };
            Ok(Some(number_value(result)))
        }
        ExprOp::Sqrt | ExprOp::Ceil | ExprOp::Floor | ExprOp::Abs => {
            let arg = match args {
                Value::Array(single) if single.len() == 1 => &single[0],
                other => other,
            };
            let n = match eval_expr_value(doc, arg)?.as_ref().and_then(Value::as_f64) {
                Some(n) => n,
                None => return Ok(Some(Value::Null)),
            };
            let result = match op {
                ExprOp::Sqrt => n.sqrt(),
                ExprOp::Ceil => n.ceil(),
                ExprOp::Floor => n.floor(),
                _ => n.abs(),
            };
            Ok(Some(number_value(result)))
        }
    }
}
