//! The closed set of tables scout knows about.
//!
//! Tables are either *source-of-truth* (authored on devices, queued and synced),
//! *reference* (authored on the remote authority only, delivered by pulls), or
//! *derived* (computed locally by the projection pipeline, never queued).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A readable table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Competition events. Reference data pulled from the remote authority.
    Events,
    /// Pit/team documents, one per (event, team).
    Teams,
    /// Match observations, one per (event, team, match).
    Runs,
    /// Per-team aggregates derived from confirmed runs.
    ProcessedTeams,
}

/// How a table's records come into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// Written locally through the queue and confirmed by the remote authority.
    SourceOfTruth,
    /// Delivered only by the remote authority.
    Reference,
    /// Computed from other tables.
    Derived,
}

impl Table {
    /// Every table, in declaration order.
    pub const ALL: [Self; 4] = [Self::Events, Self::Teams, Self::Runs, Self::ProcessedTeams];

    /// Returns the stable storage name of the table.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Events => "events",
            Self::Teams => "teams",
            Self::Runs => "runs",
            Self::ProcessedTeams => "processed_teams",
        }
    }

    /// Returns the ordered natural key fields of the table.
    #[must_use]
    pub const fn key_fields(self) -> &'static [&'static str] {
        match self {
            Self::Events => &["key"],
            Self::Teams | Self::ProcessedTeams => &["event", "team"],
            Self::Runs => &["event", "team", "match"],
        }
    }

    /// Returns how records of this table are produced.
    #[must_use]
    pub const fn kind(self) -> TableKind {
        match self {
            Self::Events => TableKind::Reference,
            Self::Teams | Self::Runs => TableKind::SourceOfTruth,
            Self::ProcessedTeams => TableKind::Derived,
        }
    }

    /// Returns the queue table for this table, if it accepts queued writes.
    #[must_use]
    pub const fn as_queue_table(self) -> Option<QueueTable> {
        match self {
            Self::Teams => Some(QueueTable::Teams),
            Self::Runs => Some(QueueTable::Runs),
            Self::Events | Self::ProcessedTeams => None,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownTable { name: s.to_string() })
    }
}

/// How a newer enqueue for an already-queued key is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Whole-document overwrite: a newer pending write replaces the older one
    /// in place.
    Overwrite,
    /// Append-only: every enqueue is its own entry.
    Append,
}

/// A table eligible for local queued writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueTable {
    /// Pit/team documents.
    Teams,
    /// Match observations.
    Runs,
}

impl QueueTable {
    /// Every queue table, in declaration order.
    pub const ALL: [Self; 2] = [Self::Teams, Self::Runs];

    /// Returns the readable table backing this queue table.
    #[must_use]
    pub const fn table(self) -> Table {
        match self {
            Self::Teams => Table::Teams,
            Self::Runs => Table::Runs,
        }
    }

    /// Returns the coalescing policy of the table.
    #[must_use]
    pub const fn write_policy(self) -> WritePolicy {
        match self {
            Self::Teams => WritePolicy::Overwrite,
            Self::Runs => WritePolicy::Append,
        }
    }
}

impl fmt::Display for QueueTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.table().fmt(f)
    }
}

impl FromStr for QueueTable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let table: Table = s.parse()?;
        table.as_queue_table().ok_or_else(|| Error::NotQueueable {
            table: table.to_string(),
        })
    }
}

/// Tables callers may read through `query_db`.
#[must_use]
pub const fn readable_tables() -> &'static [Table] {
    &Table::ALL
}

/// Tables callers may write through `add_to_queue`.
#[must_use]
pub const fn queue_tables() -> &'static [QueueTable] {
    &QueueTable::ALL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_storage_names() {
        assert_eq!("runs".parse::<Table>().unwrap(), Table::Runs);
        assert_eq!(
            "PROCESSED_TEAMS".parse::<Table>().unwrap(),
            Table::ProcessedTeams
        );
        assert!(matches!(
            "robots".parse::<Table>(),
            Err(Error::UnknownTable { .. })
        ));
    }

    #[test]
    fn derived_tables_are_not_queueable() {
        assert!(matches!(
            "processed_teams".parse::<QueueTable>(),
            Err(Error::NotQueueable { .. })
        ));
        assert!(matches!(
            "events".parse::<QueueTable>(),
            Err(Error::NotQueueable { .. })
        ));
        assert_eq!("teams".parse::<QueueTable>().unwrap(), QueueTable::Teams);
    }

    #[test]
    fn enumerations_are_closed() {
        assert_eq!(readable_tables().len(), 4);
        assert_eq!(queue_tables(), &[QueueTable::Teams, QueueTable::Runs]);
        for qt in queue_tables() {
            assert_eq!(qt.table().kind(), TableKind::SourceOfTruth);
        }
        assert_eq!(QueueTable::Teams.write_policy(), WritePolicy::Overwrite);
        assert_eq!(QueueTable::Runs.write_policy(), WritePolicy::Append);
    }
}
