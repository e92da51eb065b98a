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

use crate::tx_management::{Error, RowNumber, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tablebox_common::{Row, TableId, TableInfo};

pub mod fjall_provider;
pub mod memory_provider;

/// Catalog record for one committed table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTable {
    pub table_id: TableId,
    pub info: TableInfo,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CounterKey {
    NextTableId,
    UniqueId(TableId),
}

#[derive(Debug, Clone)]
pub enum StoreOp {
    PutTable(StoredTable),
    /// Removes the catalog record, every row and the table's counters.
    RemoveTable(TableId),
    PutRow(TableId, RowNumber, Arc<Row>),
    DeleteRow(TableId, RowNumber),
    PutCounter(CounterKey, i64),
}

/// The writes of a single commit, applied atomically.
#[derive(Debug, Clone)]
pub struct CommitBatch {
    pub timestamp: Timestamp,
    pub operations: Vec<StoreOp>,
}

impl CommitBatch {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            operations: vec![],
        }
    }

    pub fn push(&mut self, op: StoreOp) {
        self.operations.push(op);
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// The lower-level store table sources write through to on commit.
///
/// It only ever holds committed state: the catalog of committed tables, their live rows and the
/// counters. Uncommitted and removed rows live in the in-memory row heaps alone.
pub trait RowStore: Send + Sync {
    fn is_initialized(&self) -> Result<bool, Error>;

    fn initialize(&self) -> Result<(), Error>;

    fn load_tables(&self) -> Result<Vec<StoredTable>, Error>;

    fn load_rows(&self, table_id: TableId) -> Result<Vec<(RowNumber, Row)>, Error>;

    fn load_counter(&self, key: CounterKey) -> Result<Option<i64>, Error>;

    fn write_batch(&self, batch: CommitBatch) -> Result<(), Error>;

    /// Make everything written so far durable.
    fn flush(&self) -> Result<(), Error>;
}
