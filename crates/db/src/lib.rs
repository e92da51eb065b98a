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

//! Transactional table storage.
//!
//! Every committed table lives in a shared `TableSource`: a heap of rows, each tagged with a
//! record state. Transactions never touch that state directly; each gets its own `IndexSet` per
//! table, a snapshot of which rows it can see, and records what it adds and removes in a journal.
//! The `Composite` checks those journals against what committed in the meantime, then publishes
//! the winners' index sets as the new committed ones.

use std::path::Path;
use std::sync::Arc;

mod config;
mod constraints;
pub mod composite;
pub mod provider;
pub mod sequences;
pub mod system_tables;
pub mod table;
mod transaction;
mod tx_management;

#[cfg(test)]
mod composite_tests;
#[cfg(test)]
mod table_manager_tests;

pub use composite::Composite;
pub use config::{CompactionConfig, DatabaseConfig, TableConfig};
pub use provider::RowStore;
pub use provider::fjall_provider::FjallStore;
pub use provider::memory_provider::MemoryStore;
pub use sequences::{SequenceInfo, SequenceType};
pub use table::{GeneratedTable, MutableTable, Table, TableContainer, TableRef};
pub use transaction::Transaction;
pub use tx_management::{
    ColumnIndex, CommitResult, ConflictInfo, ConflictType, Error, IndexSet, IsolationLevel,
    JournalEntry, RowNumber, SourceStats, TableManager, TableSource, Timestamp, TransactionJournal,
    TxContext, TxId,
};

/// An open database.
pub struct Database {
    composite: Arc<Composite>,
}

impl Database {
    /// Open the database at `path`, creating it if needed, or a transient in-memory one when no
    /// path is given. Returns whether it was freshly created.
    pub fn open(path: Option<&Path>, config: DatabaseConfig) -> Result<(Self, bool), Error> {
        let store: Arc<dyn RowStore> = match path {
            Some(path) => Arc::new(FjallStore::open(path, &config)?),
            None => Arc::new(MemoryStore::new()),
        };
        Self::open_with_store(store, config)
    }

    pub fn open_with_store(
        store: Arc<dyn RowStore>,
        config: DatabaseConfig,
    ) -> Result<(Self, bool), Error> {
        let (composite, fresh) = Composite::open_or_create(store, config)?;
        Ok((Self { composite }, fresh))
    }

    /// A serializable, writable transaction.
    pub fn begin(&self) -> Result<Transaction, Error> {
        self.begin_with(IsolationLevel::Serializable, false)
    }

    pub fn begin_with(
        &self,
        isolation: IsolationLevel,
        read_only: bool,
    ) -> Result<Transaction, Error> {
        Transaction::begin(self.composite.clone(), isolation, read_only)
    }

    pub fn composite(&self) -> &Arc<Composite> {
        &self.composite
    }

    pub fn close(&self) -> Result<(), Error> {
        self.composite.close()
    }
}
