// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

mod index_set;
mod table_manager;
mod table_source;

pub use index_set::{ColumnIndex, IndexSet, RowNumber};
pub use table_manager::TableManager;
pub(crate) use table_manager::{CommitSet, TableJournal};
pub use table_source::{SourceStats, TableSource};
pub(crate) use table_source::{CheckFailure, CheckTable};

use std::fmt::{Display, Formatter};
use tablebox_common::{FieldError, ObjectName, RowId, SchemaError, TableId};
use tracing::debug;

/// A point on the composite's commit clock.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Ord, PartialOrd, Hash)]
pub struct Timestamp(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Ord, PartialOrd, Hash)]
pub struct TxId(pub u64);

impl Display for TxId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, strum::Display)]
pub enum IsolationLevel {
    /// Snapshot reads, plus refusal when a table this transaction selected was changed by a
    /// transaction that committed after this one began.
    #[default]
    Serializable,
    /// Snapshot reads; only write/write collisions refuse the commit.
    Snapshot,
}

/// What a table manager knows about the transaction it serves. A value, not a handle: the
/// composite keeps the registry of open transactions by id.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TxContext {
    pub id: TxId,
    /// Commit clock value when the transaction began.
    pub start: Timestamp,
    pub isolation: IsolationLevel,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
pub enum ConflictType {
    /// A table read or written here was changed by a commit after this transaction began.
    TableModified,
    /// A row removed here was already removed by a concurrent commit.
    RowRemoved,
    /// The table was dropped or replaced by a concurrent commit.
    TableDropped,
    /// A table of the same name was created by a concurrent commit.
    TableCreated,
    /// Merging with concurrently committed rows breaks a unique constraint.
    UniqueViolation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictInfo {
    pub table: ObjectName,
    pub conflict_type: ConflictType,
    pub detail: Option<String>,
}

impl ConflictInfo {
    pub fn new(table: &ObjectName, conflict_type: ConflictType) -> Self {
        Self {
            table: table.clone(),
            conflict_type,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: String) -> Self {
        self.detail = Some(detail);
        self
    }
}

impl Display for ConflictInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on {}", self.conflict_type, self.table)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResult {
    /// Changes were merged, or there was nothing to merge.
    Success { mutations_made: bool, timestamp: u64 },
    /// Nothing was merged; the caller should retry the transaction from the start.
    ConflictRetry { conflict_info: ConflictInfo },
}

impl CommitResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CommitResult::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Table not found: {0}")]
    TableNotFound(ObjectName),
    #[error("Table already exists: {0}")]
    TableAlreadyExists(ObjectName),
    #[error("Table {0} is not mutable")]
    NotMutable(ObjectName),
    #[error("Ambiguous name {0}")]
    AmbiguousName(ObjectName),
    #[error("Sequence not found: {0}")]
    SequenceNotFound(ObjectName),
    #[error("Sequence already exists: {0}")]
    SequenceAlreadyExists(ObjectName),
    #[error("Sequence {0} out of bounds")]
    SequenceOutOfBounds(ObjectName),
    #[error("Invalid sequence {name}: {reason}")]
    InvalidSequence { name: ObjectName, reason: String },
    #[error("Transaction is read-only")]
    ReadOnly,
    #[error("Transaction is no longer open")]
    TransactionClosed,
    #[error("Row {0} not found")]
    RowNotFound(RowId),
    #[error("Column {column} not found in {table}")]
    ColumnNotFound { table: ObjectName, column: String },
    #[error("Constraint {constraint} violated on {table}: {detail}")]
    ConstraintViolation {
        table: ObjectName,
        constraint: String,
        detail: String,
    },
    #[error("Commit conflict: {0}")]
    Conflict(ConflictInfo),
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("Invariant violated: {0}")]
    Invariant(String),
    #[error("Store failure when writing to backing store: {0}")]
    StorageFailure(String),
    #[error("Retrieval error from backing store: {0}")]
    RetrievalFailure(String),
    #[error("Encoding error: {0}")]
    EncodingFailure(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Database does not exist")]
    DatabaseNotFound,
    #[error("Database already exists")]
    DatabaseExists,
    #[error("Database is closed")]
    DatabaseClosed,
}

/// Callbacks a table manager raises as the transaction touches tables. The recorded entries
/// double as the commit-time record of what changed shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    TableCreated { table_id: TableId, name: ObjectName },
    TableDropped { table_id: TableId, name: ObjectName },
    TableAccessed { table_id: TableId, name: ObjectName },
    ConstraintAltered { table_id: TableId, name: ObjectName },
}

#[derive(Debug, Clone)]
pub struct TransactionJournal {
    tx: TxId,
    entries: Vec<JournalEntry>,
}

impl TransactionJournal {
    pub fn new(tx: TxId) -> Self {
        Self {
            tx,
            entries: vec![],
        }
    }

    pub fn on_table_created(&mut self, table_id: TableId, name: &ObjectName) {
        debug!(tx = %self.tx, table = %name, id = %table_id, "table created");
        self.entries.push(JournalEntry::TableCreated {
            table_id,
            name: name.clone(),
        });
    }

    pub fn on_table_dropped(&mut self, table_id: TableId, name: &ObjectName) {
        debug!(tx = %self.tx, table = %name, id = %table_id, "table dropped");
        self.entries.push(JournalEntry::TableDropped {
            table_id,
            name: name.clone(),
        });
    }

    pub fn on_table_accessed(&mut self, table_id: TableId, name: &ObjectName) {
        self.entries.push(JournalEntry::TableAccessed {
            table_id,
            name: name.clone(),
        });
    }

    pub fn on_table_constraint_altered(&mut self, table_id: TableId, name: &ObjectName) {
        debug!(tx = %self.tx, table = %name, "constraints checked");
        self.entries.push(JournalEntry::ConstraintAltered {
            table_id,
            name: name.clone(),
        });
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn was_accessed(&self, table_id: TableId) -> bool {
        self.entries.iter().any(|e| {
            matches!(e, JournalEntry::TableAccessed { table_id: id, .. } if *id == table_id)
        })
    }
}
