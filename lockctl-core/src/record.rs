//! Versioned record model
//!
//! A `VersionedRecord` is a mutable row under concurrency control. The
//! `version` column is the optimistic-locking precondition and is bumped
//! exactly once per committed update.

use serde::{Deserialize, Serialize};

/// Record identifier (primary key of the `programs` table)
pub type RecordId = i64;

/// Version assigned to freshly inserted records
pub const INITIAL_VERSION: i64 = 0;

/// Row under version-column concurrency control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub id: RecordId,
    pub name: String,
    pub description: Option<String>,
    pub version: i64,
}

impl VersionedRecord {
    /// Version the next committed update of this record will carry.
    ///
    /// `None` once the version column is exhausted.
    pub fn next_version(&self) -> Option<i64> {
        self.version.checked_add(1)
    }
}

/// New field values for an update.
///
/// Deliberately carries no id or version: both come from the stored row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordChanges {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RecordChanges {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Build the row that replaces `current`, stamped with the next version.
    ///
    /// Returns `None` if `current` already carries the largest version.
    pub fn apply_to(&self, current: &VersionedRecord) -> Option<VersionedRecord> {
        Some(VersionedRecord {
            id: current.id,
            name: self.name.clone(),
            description: self.description.clone(),
            version: current.next_version()?,
        })
    }
}

/// Field values for inserting a record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NewRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
