//! Records and query filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::key::{KeyPart, NaturalKey};
use crate::table::Table;

/// Whether a record has been confirmed by the remote authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Written locally, not yet acknowledged by the remote authority.
    Pending,
    /// Acknowledged by (or received from) the remote authority.
    Confirmed,
}

/// A canonical table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Natural key (carries the table).
    pub key: NaturalKey,
    /// Local monotonically increasing version of this key.
    pub version: u64,
    /// Last version number the remote authority reported for this key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_version: Option<u64>,
    /// Opaque template-defined payload.
    pub payload: Value,
    /// Confirmation state.
    pub origin: Origin,
    /// When this version was written locally.
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Returns the table of the record.
    #[must_use]
    pub const fn table(&self) -> Table {
        self.key.table()
    }

    /// Returns true if the record has been confirmed remotely.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.origin == Origin::Confirmed
    }

    /// Returns true if the record matches every field of `filter`.
    ///
    /// Key fields are compared after key normalization, so a filter of
    /// `{"team": "118"}` matches a record keyed by team `118`. Other fields
    /// compare against the payload's top-level fields by JSON equality.
    #[must_use]
    pub fn matches(&self, filter: &Filter) -> bool {
        filter.iter().all(|(field, expected)| {
            if let Some(part) = self.key.get(field) {
                return KeyPart::from_value(expected).as_ref() == Some(part);
            }
            self.payload.get(field) == Some(expected)
        })
    }

    /// Returns the record as the JSON object handed to UI collaborators:
    /// the payload's fields with the key fields overlaid.
    #[must_use]
    pub fn to_document(&self) -> Value {
        let mut doc = match &self.payload {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                map.insert("data".into(), other.clone());
                map
            }
        };
        doc.extend(self.key.to_map());
        Value::Object(doc)
    }
}

/// Field-equality filter for queries.
///
/// An empty filter matches every record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(Map<String, Value>);

impl Filter {
    /// Creates a filter that matches everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds an equality constraint.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Returns true when the filter has no constraints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(field, expected)` constraints.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for Filter {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
