//! Natural keys.
//!
//! Records are identified by a composite of domain fields rather than an
//! opaque id: `(event, team)` for a pit document, `(event, team, match)` for a
//! match observation. The key fields of each table are fixed by
//! [`Table::key_fields`].
//!
//! Key values are integers or short strings. A decimal string that round-trips
//! through `i64` is normalized to an integer, so a team entered as `"118"` and
//! one entered as `118` address the same record.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::table::Table;

const MAX_KEY_PART_LEN: usize = 128;

/// One component of a natural key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    /// Integer component (team and match numbers).
    Int(i64),
    /// String component (event keys).
    Str(String),
}

impl KeyPart {
    /// Converts a JSON value into a key part.
    ///
    /// Returns `None` for values that cannot be key components (floats,
    /// booleans, null, arrays, objects).
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Int),
            Value::String(s) => Some(Self::from_str_normalized(s)),
            _ => None,
        }
    }

    fn from_str_normalized(s: &str) -> Self {
        match s.parse::<i64>() {
            Ok(n) if n.to_string() == s => Self::Int(n),
            _ => Self::Str(s.to_string()),
        }
    }

    /// Returns the part as a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(n) => Value::from(*n),
            Self::Str(s) => Value::from(s.as_str()),
        }
    }

    /// Returns the integer value, if this is an integer part.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Str(_) => None,
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let Self::Str(s) = self else {
            return Ok(());
        };
        if s.is_empty() {
            return Err("empty value".into());
        }
        if s.len() > MAX_KEY_PART_LEN {
            return Err(format!("value longer than {MAX_KEY_PART_LEN} bytes"));
        }
        if s == "." || s == ".." {
            return Err(format!("reserved value `{s}`"));
        }
        if s
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '=' || c.is_control())
        {
            return Err(format!("value `{s}` contains a reserved character"));
        }
        Ok(())
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        Self::from_str_normalized(value)
    }
}

/// Composite natural key of a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    table: Table,
    values: Vec<KeyPart>,
}

impl NaturalKey {
    /// Builds a key from its ordered parts.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKey` if the number of parts does not match the
    /// table's key fields or a part carries an unusable value.
    pub fn new(table: Table, values: Vec<KeyPart>) -> Result<Self> {
        let fields = table.key_fields();
        if values.len() != fields.len() {
            return Err(Error::invalid_key(
                table,
                format!("expected {} key parts, got {}", fields.len(), values.len()),
            ));
        }
        for (field, part) in fields.iter().zip(&values) {
            part.validate()
                .map_err(|reason| Error::invalid_key(table, format!("`{field}`: {reason}")))?;
        }
        Ok(Self { table, values })
    }

    /// Extracts the key fields of `table` from a JSON object.
    ///
    /// Fields that are not part of the key are ignored.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKey` if a key field is missing or unusable.
    pub fn from_fields(table: Table, fields: &Map<String, Value>) -> Result<Self> {
        let values = table
            .key_fields()
            .iter()
            .map(|field| {
                let value = fields
                    .get(*field)
                    .ok_or_else(|| Error::invalid_key(table, format!("missing field `{field}`")))?;
                KeyPart::from_value(value).ok_or_else(|| {
                    Error::invalid_key(
                        table,
                        format!("`{field}` must be a string or integer, got {value}"),
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(table, values)
    }

    /// Returns the table this key belongs to.
    #[must_use]
    pub const fn table(&self) -> Table {
        self.table
    }

    /// Returns `(field, part)` pairs in key order.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &KeyPart)> {
        self.table.key_fields().iter().copied().zip(self.values.iter())
    }

    /// Returns the part for `field`, if it is a key field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&KeyPart> {
        self.fields().find(|(f, _)| *f == field).map(|(_, p)| p)
    }

    /// Returns the key as a JSON object.
    #[must_use]
    pub fn to_map(&self) -> Map<String, Value> {
        self.fields()
            .map(|(f, p)| (f.to_string(), p.to_value()))
            .collect()
    }

    /// Re-keys this key onto `target`, taking the target's key fields from
    /// this key.
    ///
    /// Used to map a run `(event, team, match)` onto its processed team
    /// `(event, team)`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKey` if this key lacks one of the target fields.
    pub fn reproject(&self, target: Table) -> Result<Self> {
        let values = target
            .key_fields()
            .iter()
            .map(|field| {
                self.get(field).cloned().ok_or_else(|| {
                    Error::invalid_key(target, format!("{self} has no field `{field}`"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            table: target,
            values,
        })
    }

    /// Returns the relative storage path segments, e.g. `event=e1/team=118`.
    #[must_use]
    pub fn path_segments(&self) -> String {
        self.fields()
            .map(|(f, p)| format!("{f}={p}"))
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.table)?;
        for (i, (field, part)) in self.fields().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{field}={part}")?;
        }
        f.write_str("]")
    }
}
