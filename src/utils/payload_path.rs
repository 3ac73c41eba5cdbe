//! # Payload Paths
//!
//! Dot/bracket addressing into JSON payloads, e.g. `customer.address.city`
//! or `items[2].quantity`. Used by operators to patch a halted execution's
//! payload before resuming it.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PayloadPathError {
    #[error("Invalid payload path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Cannot traverse '{segment}' in '{path}': not an {expected}")]
    TypeMismatch {
        path: String,
        segment: String,
        expected: &'static str,
    },

    #[error("Index {index} out of bounds in '{path}' (length {len})")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn invalid(path: &str, reason: impl Into<String>) -> PayloadPathError {
    PayloadPathError::InvalidPath {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn parse(path: &str) -> Result<Vec<Segment>, PayloadPathError> {
    if path.trim().is_empty() {
        return Err(invalid(path, "path is empty"));
    }

    let mut segments = Vec::new();
    for part in path.split('.') {
        let (key, mut rest) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };

        if key.is_empty() && rest.is_empty() {
            return Err(invalid(path, "empty segment"));
        }
        if !key.is_empty() {
            segments.push(Segment::Key(key.to_string()));
        }

        while !rest.is_empty() {
            let close = rest
                .find(']')
                .ok_or_else(|| invalid(path, "unclosed '['"))?;
            let index = rest[1..close]
                .trim()
                .parse::<usize>()
                .map_err(|_| invalid(path, format!("'{}' is not an index", &rest[1..close])))?;
            segments.push(Segment::Index(index));
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return Err(invalid(path, "unexpected characters after ']'"));
            }
        }
    }
    Ok(segments)
}

/// Value at `path`, if present
pub fn get<'a>(payload: &'a Value, path: &str) -> Result<Option<&'a Value>, PayloadPathError> {
    let segments = parse(path)?;
    let mut current = payload;
    for segment in &segments {
        let next = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key),
            (Segment::Index(index), Value::Array(items)) => items.get(*index),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

pub fn has(payload: &Value, path: &str) -> Result<bool, PayloadPathError> {
    Ok(get(payload, path)?.is_some())
}

/// Set the value at `path`, returning the value it replaced
///
/// Missing object keys along the way are created as objects; a null root
/// becomes an object. Array indices must already exist.
pub fn set(payload: &mut Value, path: &str, value: Value) -> Result<Option<Value>, PayloadPathError> {
    let segments = parse(path)?;
    let Some((last, parents)) = segments.split_last() else {
        return Err(invalid(path, "path is empty"));
    };

    let mut current = payload;
    for segment in parents {
        current = descend(current, segment, path)?;
    }

    match last {
        Segment::Key(key) => {
            let map = as_object(current, key, path)?;
            Ok(map.insert(key.clone(), value))
        }
        Segment::Index(index) => match current {
            Value::Array(items) => {
                let len = items.len();
                let slot = items
                    .get_mut(*index)
                    .ok_or_else(|| PayloadPathError::IndexOutOfBounds {
                        path: path.to_string(),
                        index: *index,
                        len,
                    })?;
                Ok(Some(std::mem::replace(slot, value)))
            }
            _ => Err(PayloadPathError::TypeMismatch {
                path: path.to_string(),
                segment: format!("[{index}]"),
                expected: "array",
            }),
        },
    }
}

fn as_object<'a>(
    value: &'a mut Value,
    key: &str,
    path: &str,
) -> Result<&'a mut Map<String, Value>, PayloadPathError> {
    if value.is_null() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(PayloadPathError::TypeMismatch {
            path: path.to_string(),
            segment: key.to_string(),
            expected: "object",
        }),
    }
}

fn descend<'a>(
    current: &'a mut Value,
    segment: &Segment,
    path: &str,
) -> Result<&'a mut Value, PayloadPathError> {
    match segment {
        Segment::Key(key) => {
            let map = as_object(current, key, path)?;
            Ok(map
                .entry(key.clone())
                .or_insert_with(|| Value::Object(Map::new())))
        }
        Segment::Index(index) => match current {
            Value::Array(items) => {
                let len = items.len();
                items
                    .get_mut(*index)
                    .ok_or_else(|| PayloadPathError::IndexOutOfBounds {
                        path: path.to_string(),
                        index: *index,
                        len,
                    })
            }
            _ => Err(PayloadPathError::TypeMismatch {
                path: path.to_string(),
                segment: format!("[{index}]"),
                expected: "array",
            }),
        },
    }
}
