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

//! A transient `RowStore`. Contents survive `close`/`open` of the same instance, not the
//! process.

use crate::provider::{CommitBatch, CounterKey, RowStore, StoreOp, StoredTable};
use crate::tx_management::{Error, RowNumber};
use ahash::AHasher;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasherDefault;
use std::sync::Arc;
use tablebox_common::{Row, TableId};

#[derive(Default)]
struct MemoryState {
    initialized: bool,
    tables: BTreeMap<TableId, StoredTable>,
    rows: BTreeMap<(TableId, RowNumber), Arc<Row>>,
    counters: HashMap<CounterKey, i64, BuildHasherDefault<AHasher>>,
    batches_written: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commit batches applied so far.
    pub fn batches_written(&self) -> usize {
        self.state.lock().batches_written
    }

    pub fn row_count(&self, table_id: TableId) -> usize {
        self.state
            .lock()
            .rows
            .range((table_id, 0)..=(table_id, RowNumber::MAX))
            .count()
    }
}

impl RowStore for MemoryStore {
    fn is_initialized(&self) -> Result<bool, Error> {
        Ok(self.state.lock().initialized)
    }

    fn initialize(&self) -> Result<(), Error> {
        self.state.lock().initialized = true;
        Ok(())
    }

    fn load_tables(&self) -> Result<Vec<StoredTable>, Error> {
        Ok(self.state.lock().tables.values().cloned().collect())
    }

    fn load_rows(&self, table_id: TableId) -> Result<Vec<(RowNumber, Row)>, Error> {
        Ok(self
            .state
            .lock()
            .rows
            .range((table_id, 0)..=(table_id, RowNumber::MAX))
            .map(|((_, rn), row)| (*rn, row.as_ref().clone()))
            .collect())
    }

    fn load_counter(&self, key: CounterKey) -> Result<Option<i64>, Error> {
        Ok(self.state.lock().counters.get(&key).copied())
    }

    fn write_batch(&self, batch: CommitBatch) -> Result<(), Error> {
        let mut state = self.state.lock();
        for op in batch.operations {
            match op {
                StoreOp::PutTable(table) => {
                    state.tables.insert(table.table_id, table);
                }
                StoreOp::RemoveTable(table_id) => {
                    state.tables.remove(&table_id);
                    let keys: Vec<_> = state
                        .rows
                        .range((table_id, 0)..=(table_id, RowNumber::MAX))
                        .map(|(k, _)| *k)
                        .collect();
                    for key in keys {
                        state.rows.remove(&key);
                    }
                    state.counters.remove(&CounterKey::UniqueId(table_id));
                }
                StoreOp::PutRow(table_id, row_number, row) => {
                    state.rows.insert((table_id, row_number), row);
                }
                StoreOp::DeleteRow(table_id, row_number) => {
                    state.rows.remove(&(table_id, row_number));
                }
                StoreOp::PutCounter(key, value) => {
                    state.counters.insert(key, value);
                }
            }
        }
        state.batches_written += 1;
        Ok(())
    }

    fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}
