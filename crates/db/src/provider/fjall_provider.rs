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

//! Fjall-backed `RowStore`.
//!
//! Layout, one partition each:
//!
//! - `catalog`: table id (big endian) to the JSON-encoded `StoredTable`.
//! - `rows`: table id ++ row number (both big endian) to the JSON-encoded `Row`. Big endian keeps
//!   a table's rows contiguous and ordered, so a table scan is a prefix scan.
//! - `counters`: named `i64` counters, little endian, plus the initialization marker.
//!
//! Each commit becomes one fjall write batch.

use crate::config::DatabaseConfig;
use crate::provider::{CommitBatch, CounterKey, RowStore, StoreOp, StoredTable};
use crate::tx_management::{Error, RowNumber};
use fjall::{Keyspace, PartitionHandle, PersistMode};
use std::path::Path;
use tablebox_common::{Row, TableId};
use tracing::{debug, info};

const INITIALIZED_KEY: &[u8] = b"initialized";
const NEXT_TABLE_ID_KEY: &[u8] = b"next_table_id";
const UNIQUE_ID_PREFIX: u8 = b'u';

fn storage(e: fjall::Error) -> Error {
    Error::StorageFailure(e.to_string())
}

fn retrieval(e: fjall::Error) -> Error {
    Error::RetrievalFailure(e.to_string())
}

fn table_key(table_id: TableId) -> Vec<u8> {
    table_id.0.to_be_bytes().to_vec()
}

fn row_key(table_id: TableId, row_number: RowNumber) -> Vec<u8> {
    let mut key = Vec::with_capacity(12);
    key.extend_from_slice(&table_id.0.to_be_bytes());
    key.extend_from_slice(&row_number.to_be_bytes());
    key
}

fn counter_key(key: CounterKey) -> Vec<u8> {
    match key {
        CounterKey::NextTableId => NEXT_TABLE_ID_KEY.to_vec(),
        CounterKey::UniqueId(table_id) => {
            let mut k = vec![UNIQUE_ID_PREFIX];
            k.extend_from_slice(&table_id.0.to_be_bytes());
            k
        }
    }
}

fn decode_counter(bytes: &[u8]) -> Result<i64, Error> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::EncodingFailure(format!("counter of {} bytes", bytes.len())))?;
    Ok(i64::from_le_bytes(raw))
}

pub struct FjallStore {
    keyspace: Keyspace,
    catalog: PartitionHandle,
    rows: PartitionHandle,
    counters: PartitionHandle,
    commit_persist_mode: PersistMode,
}

impl FjallStore {
    pub fn open(path: &Path, config: &DatabaseConfig) -> Result<Self, Error> {
        let keyspace = fjall::Config::new(path).open().map_err(storage)?;
        let catalog = keyspace
            .open_partition("catalog", config.catalog_partition_options())
            .map_err(storage)?;
        let rows = keyspace
            .open_partition("rows", config.rows_partition_options())
            .map_err(storage)?;
        let counters = keyspace
            .open_partition("counters", Default::default())
            .map_err(storage)?;
        info!("Opened fjall row store at {}", path.display());
        let commit_persist_mode = if config.sync_on_commit {
            PersistMode::SyncAll
        } else {
            PersistMode::Buffer
        };
        Ok(Self {
            keyspace,
            catalog,
            rows,
            counters,
            commit_persist_mode,
        })
    }
}

impl RowStore for FjallStore {
    fn is_initialized(&self) -> Result<bool, Error> {
        Ok(self
            .counters
            .get(INITIALIZED_KEY)
            .map_err(retrieval)?
            .is_some())
    }

    fn initialize(&self) -> Result<(), Error> {
        self.counters
            .insert(INITIALIZED_KEY, 1i64.to_le_bytes().to_vec())
            .map_err(storage)?;
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(storage)
    }

    fn load_tables(&self) -> Result<Vec<StoredTable>, Error> {
        let mut tables = vec![];
        for entry in self.catalog.iter() {
            let (_, value) = entry.map_err(retrieval)?;
            let table: StoredTable = serde_json::from_slice(&value)
                .map_err(|e| Error::EncodingFailure(e.to_string()))?;
            tables.push(table);
        }
        Ok(tables)
    }

    fn load_rows(&self, table_id: TableId) -> Result<Vec<(RowNumber, Row)>, Error> {
        let mut rows = vec![];
        for entry in self.rows.prefix(table_key(table_id)) {
            let (key, value) = entry.map_err(retrieval)?;
            let rn_bytes: [u8; 8] = key
                .get(4..12)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| Error::EncodingFailure(format!("row key of {} bytes", key.len())))?;
            let row: Row = serde_json::from_slice(&value)
                .map_err(|e| Error::EncodingFailure(e.to_string()))?;
            rows.push((RowNumber::from_be_bytes(rn_bytes), row));
        }
        Ok(rows)
    }

    fn load_counter(&self, key: CounterKey) -> Result<Option<i64>, Error> {
        match self.counters.get(counter_key(key)).map_err(retrieval)? {
            Some(bytes) => Ok(Some(decode_counter(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_batch(&self, batch: CommitBatch) -> Result<(), Error> {
        let op_count = batch.len();
        let mut fjall_batch = self.keyspace.batch();
        for op in batch.operations {
            match op {
                StoreOp::PutTable(table) => {
                    let value = serde_json::to_vec(&table)
                        .map_err(|e| Error::EncodingFailure(e.to_string()))?;
                    fjall_batch.insert(&self.catalog, table_key(table.table_id), value);
                }
                StoreOp::RemoveTable(table_id) => {
                    fjall_batch.remove(&self.catalog, table_key(table_id));
                    for entry in self.rows.prefix(table_key(table_id)) {
                        let (key, _) = entry.map_err(retrieval)?;
                        fjall_batch.remove(&self.rows, key);
                    }
                    fjall_batch.remove(&self.counters, counter_key(CounterKey::UniqueId(table_id)));
                }
                StoreOp::PutRow(table_id, row_number, row) => {
                    let value = serde_json::to_vec(row.as_ref())
                        .map_err(|e| Error::EncodingFailure(e.to_string()))?;
                    fjall_batch.insert(&self.rows, row_key(table_id, row_number), value);
                }
                StoreOp::DeleteRow(table_id, row_number) => {
                    fjall_batch.remove(&self.rows, row_key(table_id, row_number));
                }
                StoreOp::PutCounter(key, value) => {
                    fjall_batch.insert(&self.counters, counter_key(key), value.to_le_bytes().to_vec());
                }
            }
        }
        fjall_batch.commit().map_err(storage)?;
        self.keyspace
            .persist(self.commit_persist_mode)
            .map_err(storage)?;
        debug!(
            "Wrote commit batch ts {} with {op_count} operations",
            batch.timestamp.0
        );
        Ok(())
    }

    fn flush(&self) -> Result<(), Error> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(storage)
    }
}
