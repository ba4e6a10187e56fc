//! Entity references, keys, records, and resolution outcomes
//!
//! These are the values that cross the subsystem boundary: a [`EntityRef`]
//! comes in from the federation layer, a [`Key`] is derived from it for
//! deduplication, a [`Record`] comes back from the store, and an
//! [`EntityOutcome`] goes out to the caller, one per reference, in the
//! original reference order.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ResolveError;

/// An opaque typed reference: "resolve this entity".
///
/// Carries the entity type name as its discriminant plus whatever identity
/// fields the upstream layer supplied. Supplied fresh per incoming request,
/// never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "__typename")]
    pub typename: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EntityRef {
    pub fn new(typename: &str, fields: Map<String, Value>) -> Self {
        Self {
            typename: typename.to_string(),
            fields,
        }
    }

    /// Shorthand for the common `{ __typename, id }` reference shape
    pub fn with_id(typename: &str, id: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("id".to_string(), Value::String(id.to_string()));
        Self::new(typename, fields)
    }

    /// Get an identity field by name
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Canonical identifier derived from a reference.
///
/// Used purely for deduplication and result lookup within one coalescing
/// window; carries no ordering semantics. Must be joinable against the
/// store's own identity field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Str(String),
    Int(i64),
}

impl Key {
    /// Derive a key from a scalar identity-field value.
    ///
    /// Returns `None` for non-scalar values (objects, arrays, null, floats);
    /// those cannot be joined against a store identity field.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::String(s) => Some(Key::Str(s.clone())),
            Value::Number(n) => n.as_i64().map(Key::Int),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(s) => write!(f, "{s}"),
            Key::Int(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

/// One record returned by a batch fetch.
///
/// `key` is the store's identity field for the record; it is what the loader
/// joins fetch results back to the submitted keys with. The store gives no
/// ordering guarantee, so the key is the only way to rebuild the mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: Key,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(key: impl Into<Key>, fields: Map<String, Value>) -> Self {
        Self {
            key: key.into(),
            fields,
        }
    }
}

/// A resolved entity, tagged with its type name for upstream type resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    #[serde(rename = "__typename")]
    pub typename: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Per-reference resolution result.
///
/// `Missing` is the explicit "no record found" marker: the benign
/// outcome for a key absent from fetch results, distinct from `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum EntityOutcome {
    Found(Entity),
    Missing,
    Failed { code: String, message: String },
}

impl EntityOutcome {
    pub fn found(typename: &str, record: Record) -> Self {
        EntityOutcome::Found(Entity {
            typename: typename.to_string(),
            fields: record.fields,
        })
    }

    pub fn failed(err: &ResolveError) -> Self {
        EntityOutcome::Failed {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, EntityOutcome::Found(_))
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, EntityOutcome::Missing)
    }
}
