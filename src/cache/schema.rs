//! Schema Registry Module
//!
//! Payloads are loosely typed JSON. Each base kind may declare the shape it
//! must have; the fetch path checks it before anything reaches the cache.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::FetchError;
use crate::kind::DataKind;

// == Value Shape ==
/// Expected top-level JSON shape of a kind's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    /// Anything goes
    Any,
    /// A JSON array of objects
    Collection,
    /// A JSON object
    Document,
}

impl ValueShape {
    fn check(&self, value: &Value) -> Result<(), String> {
        match self {
            ValueShape::Any => Ok(()),
            ValueShape::Document if value.is_object() => Ok(()),
            ValueShape::Document => Err(format!("expected an object, got {}", type_name(value))),
            ValueShape::Collection => {
                let items = value
                    .as_array()
                    .ok_or_else(|| format!("expected an array, got {}", type_name(value)))?;
                match items.iter().position(|item| !item.is_object()) {
                    Some(index) => Err(format!(
                        "item {index} is {}, expected an object",
                        type_name(&items[index])
                    )),
                    None => Ok(()),
                }
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// == Schema Registry ==
/// Shape expectations keyed by base kind. Unregistered kinds accept any value.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    shapes: HashMap<String, ValueShape>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for the built-in dashboard kinds.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in ["appointments", "notifications", "clients", "staff", "services"] {
            registry.register(kind, ValueShape::Collection);
        }
        registry.register("dashboard_stats", ValueShape::Document);
        registry
    }

    pub fn register(&mut self, base_kind: impl Into<String>, shape: ValueShape) {
        self.shapes.insert(base_kind.into(), shape);
    }

    pub fn shape(&self, kind: &DataKind) -> ValueShape {
        self.shapes
            .get(kind.base())
            .copied()
            .unwrap_or(ValueShape::Any)
    }

    /// Validates a fetched payload against its kind's shape.
    pub fn validate(&self, kind: &DataKind, value: &Value) -> Result<(), FetchError> {
        self.shape(kind)
            .check(value)
            .map_err(|reason| FetchError::new(kind.clone(), format!("schema mismatch: {reason}")))
    }
}
