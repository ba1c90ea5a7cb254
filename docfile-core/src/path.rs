// src/path.rs
// Dot/bracket field paths: "a.b[0].c", "meta['dotted.key']"

use serde_json::{Map, Value};
use std::borrow::Cow;
use std::iter::Peekable;
use std::str::Chars;

use crate::error::{DocFileError, Result};

/// One step of a field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    /// Plain dotted segment; canonical decimals ("0", "12", not "007") address array slots
    fn from_dotted(raw: String) -> Self {
        let canonical = match raw.as_bytes() {
            [b'0'] => true,
            [first, rest @ ..] => *first != b'0' && first.is_ascii_digit() && rest.iter().all(u8::is_ascii_digit),
            [] => false,
        };
        if canonical {
            if let Ok(i) = raw.parse::<usize>() {
                return Segment::Index(i);
            }
        }
        Segment::Key(raw)
    }

    /// Object key for this segment (indices address objects by their decimal form)
    fn key(&self) -> Cow<'_, str> {
        match self {
            Segment::Key(k) => Cow::Borrowed(k.as_str()),
            Segment::Index(i) => Cow::Owned(i.to_string()),
        }
    }

    /// Container created when this segment has to be written into a missing parent
    fn empty_container(&self) -> Value {
        match self {
            Segment::Index(_) => Value::Array(Vec::new()),
            Segment::Key(_) => Value::Object(Map::new()),
        }
    }
}

/// Parsed field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

fn invalid(path: &str, reason: &str) -> DocFileError {
    DocFileError::InvalidPath(format!("'{}': {}", path, reason))
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

/// How many null slots a write may pad onto the end of an array
const MAX_ARRAY_GAP: usize = 10_000;

/// Slot `index` of `arr`, padding with nulls when it lies just past the end
fn array_slot(arr: &mut Vec<Value>, index: usize) -> Result<&mut Value> {
    if index >= arr.len() {
        if index - arr.len() > MAX_ARRAY_GAP {
            return Err(DocFileError::InvalidPath(format!(
                "array index {} is too far past the end (length {})",
                index,
                arr.len()
            )));
        }
        arr.resize(index + 1, Value::Null);
    }
    Ok(&mut arr[index])
}

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(invalid(path, "empty path"));
        }

        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = path.chars().peekable();
        let mut after_bracket = false;

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if current.is_empty() {
                        if !after_bracket {
                            return Err(invalid(path, "empty segment"));
                        }
                    } else {
                        segments.push(Segment::from_dotted(std::mem::take(&mut current)));
                    }
                    if chars.peek().is_none() {
                        return Err(invalid(path, "trailing '.'"));
                    }
                    after_bracket = false;
                }
                '[' => {
                    if !current.is_empty() {
                        segments.push(Segment::from_dotted(std::mem::take(&mut current)));
                    }
                    segments.push(Self::parse_bracket(&mut chars, path)?);
                    after_bracket = true;
                }
                _ => {
                    if after_bracket {
                        return Err(invalid(path, "expected '.' or '[' after ']'"));
                    }
                    current.push(c);
                }
            }
        }

        if !current.is_empty() {
            segments.push(Segment::from_dotted(current));
        }

        Ok(FieldPath { segments })
    }

    /// `[3]`, `['key']` or `["key"]`; the opening bracket is already consumed
    fn parse_bracket(chars: &mut Peekable<Chars<'_>>, path: &str) -> Result<Segment> {
        match chars.peek().copied() {
            Some(quote @ ('\'' | '"')) => {
                chars.next();
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some(c) if c == quote => break,
                        Some(c) => key.push(c),
                        None => return Err(invalid(path, "unterminated quoted key")),
                    }
                }
                match chars.next() {
                    Some(']') => Ok(Segment::Key(key)),
                    _ => Err(invalid(path, "expected ']' after quoted key")),
                }
            }
            _ => {
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(c) => digits.push(c),
                        None => return Err(invalid(path, "unterminated '['")),
                    }
                }
                digits
                    .trim()
                    .parse::<usize>()
                    .map(Segment::Index)
                    .map_err(|_| invalid(path, "bracket index must be a non-negative integer"))
            }
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Resolve the path; `None` means undefined
    pub fn get<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        let mut current = value;
        for segment in &self.segments {
            current = match (current, segment) {
                (Value::Object(map), seg) => map.get(seg.key().as_ref())?,
                (Value::Array(arr), Segment::Index(i)) => arr.get(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Assign in place, creating intermediate containers as needed
    pub fn set(&self, root: &mut Value, new_value: Value) -> Result<()> {
        let (last, parents) = match self.segments.split_last() {
            Some(split) => split,
            None => return Err(invalid("", "empty path")),
        };

        if !is_container(root) {
            *root = self.segments[0].empty_container();
        }

        let mut current = root;
        for (i, segment) in parents.iter().enumerate() {
            let next = &self.segments[i + 1];
            current = Self::child_mut(current, segment, next)?;
        }

        match current {
            Value::Object(map) => {
                map.insert(last.key().into_owned(), new_value);
                Ok(())
            }
            Value::Array(arr) => match last {
                Segment::Index(i) => {
                    *array_slot(arr, *i)? = new_value;
                    Ok(())
                }
                Segment::Key(k) => Err(DocFileError::TypeMismatch(format!(
                    "cannot create field '{}' in an array",
                    k
                ))),
            },
            _ => Err(DocFileError::TypeMismatch("path parent is not a container".into())),
        }
    }

    fn child_mut<'a>(container: &'a mut Value, segment: &Segment, next: &Segment) -> Result<&'a mut Value> {
        let slot = match container {
            Value::Object(map) => map
                .entry(segment.key().into_owned())
                .or_insert_with(|| next.empty_container()),
            Value::Array(arr) => match segment {
                Segment::Index(i) => array_slot(arr, *i)?,
                Segment::Key(k) => {
                    return Err(DocFileError::TypeMismatch(format!(
                        "cannot create field '{}' in an array",
                        k
                    )))
                }
            },
            _ => return Err(DocFileError::TypeMismatch("path parent is not a container".into())),
        };

        if !is_container(slot) {
            *slot = next.empty_container();
        }
        Ok(slot)
    }

    /// Remove in place. Object keys are deleted, array slots are nulled.
    pub fn remove(&self, root: &mut Value) -> Option<Value> {
        let (last, parents) = self.segments.split_last()?;

        let mut current = root;
        for segment in parents {
            current = match (current, segment) {
                (Value::Object(map), seg) => map.get_mut(seg.key().as_ref())?,
                (Value::Array(arr), Segment::Index(i)) => arr.get_mut(*i)?,
                _ => return None,
            };
        }

        match (current, last) {
            (Value::Object(map), seg) => map.shift_remove(seg.key().as_ref()),
            (Value::Array(arr), Segment::Index(i)) => {
                arr.get_mut(*i).map(|slot| std::mem::replace(slot, Value::Null))
            }
            _ => None,
        }
    }
}

/// Read a dotted path
pub fn get_path<'a>(value: &'a Value, path: &str) -> Result<Option<&'a Value>> {
    Ok(FieldPath::parse(path)?.get(value))
}

/// Write a dotted path into a copy of `value`
pub fn set_path(value: &Value, path: &str, new_value: Value) -> Result<Value> {
    let mut copy = value.clone();
    set_path_mut(&mut copy, path, new_value)?;
    Ok(copy)
}

pub fn set_path_mut(value: &mut Value, path: &str, new_value: Value) -> Result<()> {
    FieldPath::parse(path)?.set(value, new_value)
}

pub fn remove_path_mut(value: &mut Value, path: &str) -> Result<Option<Value>> {
    Ok(FieldPath::parse(path)?.remove(value))
}
