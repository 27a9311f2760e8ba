//! Structured results of a sync pass.

use serde::{Deserialize, Serialize};

use scout_core::key::NaturalKey;

/// Whole-pass failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncFailure {
    /// The credential was rejected. Nothing further was pushed; remaining
    /// entries stay queued untouched.
    #[error("credential rejected: {message}")]
    Auth {
        /// Description from the remote authority.
        message: String,
    },

    /// Pulling remote changes failed after the pushes were processed.
    #[error("failed to pull remote changes: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// The pass was cancelled. Unprocessed entries stay queued.
    #[error("sync cancelled")]
    Cancelled,
}

/// Collapsed status of an outcome, for user notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Everything was confirmed.
    Clean,
    /// Everything was acknowledged, but some edits were overridden remotely.
    Overridden,
    /// Some entries remain queued for a later sync.
    Pending,
    /// The pass failed as a whole.
    Failed,
}

impl SyncStatus {
    /// Returns the metric label of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Overridden => "overridden",
            Self::Pending => "pending",
            Self::Failed => "failed",
        }
    }
}

/// Result of one sync pass.
///
/// A pass always resolves with an outcome; partial failure is a value, not an
/// error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    /// Keys confirmed by the remote authority.
    pub succeeded: Vec<NaturalKey>,
    /// Keys whose local edit was overridden by a newer remote version.
    pub conflicted: Vec<NaturalKey>,
    /// Keys still queued after the pass.
    pub pending: Vec<NaturalKey>,
    /// Whole-pass failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal: Option<SyncFailure>,
    /// Number of remote records merged by the pull.
    #[serde(default)]
    pub pulled: usize,
}

impl SyncOutcome {
    /// Returns true when every drained entry was acknowledged and nothing failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.fatal.is_none() && self.pending.is_empty()
    }

    /// Collapses the outcome for notifications.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        if self.fatal.is_some() {
            SyncStatus::Failed
        } else if !self.pending.is_empty() {
            SyncStatus::Pending
        } else if !self.conflicted.is_empty() {
            SyncStatus::Overridden
        } else {
            SyncStatus::Clean
        }
    }

    pub(crate) fn push_unique(list: &mut Vec<NaturalKey>, key: &NaturalKey) {
        if !list.contains(key) {
            list.push(key.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_core::key::KeyPart;
    use scout_core::table::Table;

    fn key() -> NaturalKey {
        NaturalKey::new(Table::Teams, vec!["e1".into(), KeyPart::Int(118)]).unwrap()
    }

    #[test]
    fn status_precedence() {
        let mut outcome = SyncOutcome::default();
        assert_eq!(outcome.status(), SyncStatus::Clean);
        assert!(outcome.is_success());

        outcome.conflicted.push(key());
        assert_eq!(outcome.status(), SyncStatus::Overridden);
        assert!(outcome.is_success());

        outcome.pending.push(key());
        assert_eq!(outcome.status(), SyncStatus::Pending);
        assert!(!outcome.is_success());

        outcome.fatal = Some(SyncFailure::Cancelled);
        assert_eq!(outcome.status(), SyncStatus::Failed);
    }

    #[test]
    fn serializes_failure_kind() {
        let failure = SyncFailure::Auth {
            message: "expired".into(),
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "auth");
    }
}
