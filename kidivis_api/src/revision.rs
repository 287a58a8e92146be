use std::fmt;

use serde::{Deserialize, Serialize};

/// Name accepted on input for the checked-out working tree.
pub const WORKING_TREE_REF: &str = "WORK";

/// What a revision points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "oid", rename_all = "snake_case")]
pub enum RevisionId {
    /// A commit, by full object id.
    Commit(String),
    /// The files currently on disk.
    WorkingTree,
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commit(oid) => f.write_str(oid),
            Self::WorkingTree => f.write_str(WORKING_TREE_REF),
        }
    }
}

/// A resolved revision. Never mutates once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Immutable identity of the revision.
    pub id: RevisionId,
    /// Symbolic name the revision was resolved from, if any.
    #[serde(default)]
    pub reference: Option<String>,
    /// Summary line of the commit message.
    #[serde(default)]
    pub summary: Option<String>,
    /// Commit time in unix seconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl Revision {
    /// Revision describing the working tree.
    #[must_use]
    pub fn working_tree() -> Self {
        Self {
            id: RevisionId::WorkingTree,
            reference: Some(WORKING_TREE_REF.to_owned()),
            summary: None,
            timestamp: None,
        }
    }

    /// Bare commit revision without metadata.
    #[must_use]
    pub fn commit(oid: impl Into<String>) -> Self {
        Self {
            id: RevisionId::Commit(oid.into()),
            reference: None,
            summary: None,
            timestamp: None,
        }
    }

    /// Commit id, unless this is the working tree.
    #[must_use]
    pub fn oid(&self) -> Option<&str> {
        match &self.id {
            RevisionId::Commit(oid) => Some(oid),
            RevisionId::WorkingTree => None,
        }
    }

    /// Abbreviated label suitable for file names and log lines.
    #[must_use]
    pub fn short_label(&self) -> String {
        match &self.id {
            RevisionId::Commit(oid) => oid.chars().take(8).collect(),
            RevisionId::WorkingTree => WORKING_TREE_REF.to_owned(),
        }
    }
}

/// The OLD/NEW pair of revisions compared by a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionPair {
    /// Baseline revision.
    pub old: Revision,
    /// Revision being reviewed.
    pub new: Revision,
}
