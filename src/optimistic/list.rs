//! List Helpers
//!
//! Item-level edits on a JSON array cached under a data kind. Items are
//! identified by their `id` field, which may be a string or a number.

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::kind::DataKind;

/// Prefix of client-generated ids for items the server has not seen yet
pub const TEMP_ID_PREFIX: &str = "temp-";

pub fn temp_id() -> String {
    format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4())
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// The `id` of an item as a string.
pub fn item_id(item: &Value) -> Option<String> {
    match item.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

pub fn position(list: &[Value], id: &str) -> Option<usize> {
    list.iter()
        .position(|item| item_id(item).as_deref() == Some(id))
}

/// Copies the cached list. A missing value counts as an empty list.
pub fn to_list(kind: &DataKind, value: Option<&Value>) -> Result<Vec<Value>> {
    match value {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(SyncError::InvalidRequest(format!(
            "'{kind}' does not hold a list"
        ))),
    }
}

/// Sets the item's `id`, turning non-objects into `{ "id": .., "value": .. }`.
pub fn with_id(item: Value, id: &str) -> Value {
    let mut fields = match item {
        Value::Object(fields) => fields,
        other => {
            let mut fields = Map::new();
            fields.insert("value".to_string(), other);
            fields
        }
    };
    fields.insert("id".to_string(), Value::String(id.to_string()));
    Value::Object(fields)
}

/// Shallow merge of `patch` over `item`. Non-object patches replace the item.
pub fn merge(item: &Value, patch: &Value) -> Value {
    match (item, patch) {
        (Value::Object(base), Value::Object(changes)) => {
            let mut merged = base.clone();
            for (key, value) in changes {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => patch.clone(),
    }
}

/// Replaces the item with `id` in place. Returns false when it is gone.
pub fn replace(list: &mut [Value], id: &str, item: Value) -> bool {
    match position(list, id) {
        Some(index) => {
            list[index] = item;
            true
        }
        None => false,
    }
}

/// Puts an item back the way it was before the first speculative edit.
///
/// `None` means the item did not exist (an addition) and removes it.
/// A removed item is reinserted at its old index, clamped to the list.
pub fn restore(list: &mut Vec<Value>, id: &str, original: Option<Value>, index: Option<usize>) {
    match (original, position(list, id)) {
        (None, Some(current)) => {
            list.remove(current);
        }
        (None, None) => {}
        (Some(item), Some(current)) => list[current] = item,
        (Some(item), None) => {
            let at = index.unwrap_or(list.len()).min(list.len());
            list.insert(at, item);
        }
    }
}
