//! Shared types for logscope
//!
//! This crate contains data structures used across multiple logscope crates.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Reserved Fields
// ============================================================================

/// Field set by the parser when a line could not be fully understood
pub const PARSE_ERROR_FIELD: &str = "_parse_err";

/// Field holding the raw line when it could not be parsed at all
pub const TEXT_PAYLOAD_FIELD: &str = "_text_payload";

/// Check whether a field name is one of the parser's synthetic fields
pub fn is_reserved_field(name: &str) -> bool {
    name == PARSE_ERROR_FIELD || name == TEXT_PAYLOAD_FIELD
}

// ============================================================================
// Record Types
// ============================================================================

/// A single parsed log entry: field name to JSON value
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    fields: Map<String, Value>,
}

/// Shared handle to an appended record
pub type ArcRecord = Arc<Record>;

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record holding only the failure fields
    pub fn unparsed(reason: impl Into<String>, raw: &str) -> Self {
        let mut fields = Map::new();
        fields.insert(PARSE_ERROR_FIELD.to_string(), Value::String(reason.into()));
        fields.insert(TEXT_PAYLOAD_FIELD.to_string(), Value::String(raw.to_string()));
        Self { fields }
    }

    /// Look up a top-level field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Look up a field, falling back to a dotted path into nested objects
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        if let Some(value) = self.fields.get(key) {
            return Some(value);
        }
        if !key.contains('.') {
            return None;
        }

        let mut parts = key.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    /// All fields in key order
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Parse error note, if the parser attached one
    pub fn parse_error(&self) -> Option<&str> {
        self.fields.get(PARSE_ERROR_FIELD).and_then(Value::as_str)
    }

    /// Raw text of a line that could not be parsed
    pub fn text_payload(&self) -> Option<&str> {
        self.fields.get(TEXT_PAYLOAD_FIELD).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Object(record.fields)
    }
}

impl Serialize for Record {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

// ============================================================================
// Schema Types
// ============================================================================

/// Scalar kind of a field, used to pick comparison semantics
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Text,
    Number,
    Boolean,
}

impl FieldKind {
    /// Kind of a single JSON value (None for null)
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Boolean),
            Value::Number(_) => Some(Self::Number),
            _ => Some(Self::Text),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

/// Field name to kind lookup. Replaced wholesale, never edited in place.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyMap {
    kinds: HashMap<String, FieldKind>,
}

impl KeyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(&self, field: &str) -> Option<FieldKind> {
        self.kinds.get(field).copied()
    }

    pub fn is_numeric(&self, field: &str) -> bool {
        self.kind(field) == Some(FieldKind::Number)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, FieldKind)> for KeyMap {
    fn from_iter<I: IntoIterator<Item = (K, FieldKind)>>(iter: I) -> Self {
        Self {
            kinds: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// A known field in the schema
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub name: String,
    #[serde(default)]
    pub kind: FieldKind,
}

impl Key {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Key list, either inferred from samples or loaded from a saved template
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Name of the saved template this schema came from (None = inferred)
    #[serde(default)]
    pub last_saved_name: Option<String>,

    /// Known keys in display order
    #[serde(default)]
    pub keys: Vec<Key>,
}

impl SchemaConfig {
    /// Whether this schema was loaded from a named template
    pub fn is_saved(&self) -> bool {
        self.last_saved_name
            .as_deref()
            .is_some_and(|name| !name.is_empty())
    }

    /// Build the kind lookup for this key list
    pub fn key_map(&self) -> KeyMap {
        self.keys
            .iter()
            .map(|k| (k.name.clone(), k.kind))
            .collect()
    }
}
