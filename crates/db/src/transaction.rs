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

use crate::composite::Composite;
use crate::sequences::{SequenceInfo, SequenceManager, SequenceTableContainer};
use crate::system_tables::SystemTableContainer;
use crate::tx_management::{CommitResult, Error, IsolationLevel, TableManager, TxContext};
use std::sync::Arc;
use tablebox_common::ObjectName;

/// A unit of work against the database: the transaction's tables plus its view of sequences.
///
/// Dropping an unfinished transaction rolls it back.
pub struct Transaction {
    tables: TableManager,
    sequences: SequenceManager,
    finished: bool,
}

impl Transaction {
    pub(crate) fn begin(
        composite: Arc<Composite>,
        isolation: IsolationLevel,
        read_only: bool,
    ) -> Result<Self, Error> {
        let mut tables = TableManager::begin(composite, isolation, read_only)?;
        tables.add_internal_tables(Arc::new(SystemTableContainer));
        tables.add_internal_tables(Arc::new(SequenceTableContainer));
        Ok(Self {
            tables,
            sequences: SequenceManager::new(),
            finished: false,
        })
    }

    pub fn context(&self) -> TxContext {
        self.tables.context()
    }

    pub fn tables(&mut self) -> &mut TableManager {
        &mut self.tables
    }

    pub fn tables_ref(&self) -> &TableManager {
        &self.tables
    }

    pub fn create_sequence(&mut self, info: SequenceInfo) -> Result<(), Error> {
        self.sequences.create_sequence(&mut self.tables, info)
    }

    pub fn drop_sequence(&mut self, name: &ObjectName) -> Result<bool, Error> {
        self.sequences.drop_sequence(&mut self.tables, name)
    }

    pub fn sequence_exists(&self, name: &ObjectName) -> Result<bool, Error> {
        self.sequences.sequence_exists(&self.tables, name)
    }

    pub fn sequence_info(&mut self, name: &ObjectName) -> Result<SequenceInfo, Error> {
        self.sequences.sequence_info(&self.tables, name)
    }

    pub fn next_sequence_value(&mut self, name: &ObjectName) -> Result<i64, Error> {
        self.sequences.next_value(&mut self.tables, name)
    }

    pub fn current_sequence_value(&mut self, name: &ObjectName) -> Result<i64, Error> {
        self.sequences.current_value(&self.tables, name)
    }

    pub fn set_sequence_value(&mut self, name: &ObjectName, value: i64) -> Result<(), Error> {
        self.sequences.set_value(&mut self.tables, name, value)
    }

    pub fn commit(mut self) -> Result<CommitResult, Error> {
        self.finished = true;
        let result = self.tables.commit()?;
        if result.is_success() {
            let dropped = self.sequences.dropped_ids().to_vec();
            self.tables.composite().sequences().forget(dropped);
        }
        Ok(result)
    }

    pub fn rollback(mut self) {
        self.finished = true;
        self.tables.rollback();
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            self.tables.rollback();
        }
    }
}
