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

//! Table views handed to executors.
//!
//! A real table is seen through a `TableView` (read) or `MutableTableView` (read/write), both of
//! which pair a shared `TableSource` with the transaction's own `IndexSet`. Dynamic tables come
//! from registered `TableContainer` providers and are materialized as `GeneratedTable`s.

use crate::constraints::{check_row, find_unique_violation};
use crate::tx_management::{
    ColumnIndex, Error, IndexSet, RowNumber, TableJournal, TableManager, TableSource, TxContext,
};
use std::sync::Arc;
use tablebox_common::{Field, ObjectName, Row, RowId, TableId, TableInfo};

pub trait Table {
    fn table_info(&self) -> &TableInfo;

    /// `None` for dynamic tables, which have no backing source.
    fn table_id(&self) -> Option<TableId>;

    fn row_count(&self) -> usize;

    /// Visible row numbers, ascending.
    fn row_numbers(&self) -> Vec<RowNumber>;

    fn get_row(&self, row: RowNumber) -> Option<Arc<Row>>;

    fn get_index(&self, column: usize) -> Option<&ColumnIndex>;

    fn name(&self) -> &ObjectName {
        self.table_info().name()
    }

    fn find_column(&self, name: &str) -> Option<usize> {
        self.table_info().index_of_column(name)
    }

    fn get_value(&self, row: RowNumber, column: usize) -> Result<Field, Error> {
        let info = self.table_info();
        if column >= info.column_count() {
            return Err(Error::ColumnNotFound {
                table: info.name().clone(),
                column: format!("#{column}"),
            });
        }
        let r = self.get_row(row).ok_or(Error::RowNotFound(RowId::new(
            self.table_id().unwrap_or(TableId(0)),
            row,
        )))?;
        Ok(r.get(column).cloned().unwrap_or(Field::Null))
    }

    /// Every visible row, in row number order.
    fn rows(&self) -> Vec<(RowNumber, Arc<Row>)> {
        self.row_numbers()
            .into_iter()
            .filter_map(|rn| self.get_row(rn).map(|r| (rn, r)))
            .collect()
    }
}

pub trait MutableTable: Table {
    /// A row holding each column's default.
    fn new_row(&self) -> Row {
        Row::with_defaults(self.table_info())
    }

    fn add_row(&mut self, row: Row) -> Result<RowId, Error>;

    /// Replace a row. The result has a new row number.
    fn update_row(&mut self, row: RowNumber, new: Row) -> Result<RowId, Error>;

    fn remove_row(&mut self, row: RowNumber) -> Result<(), Error>;
}

/// Read access to a real table as of the owning transaction.
pub struct TableView<'a> {
    source: &'a Arc<TableSource>,
    indexes: &'a IndexSet,
}

impl<'a> TableView<'a> {
    pub(crate) fn new(source: &'a Arc<TableSource>, indexes: &'a IndexSet) -> Self {
        Self { source, indexes }
    }

    pub fn source(&self) -> &Arc<TableSource> {
        self.source
    }
}

impl Table for TableView<'_> {
    fn table_info(&self) -> &TableInfo {
        self.source.table_info()
    }

    fn table_id(&self) -> Option<TableId> {
        Some(self.source.table_id())
    }

    fn row_count(&self) -> usize {
        self.indexes.row_count()
    }

    fn row_numbers(&self) -> Vec<RowNumber> {
        self.indexes.rows().collect()
    }

    fn get_row(&self, row: RowNumber) -> Option<Arc<Row>> {
        if !self.indexes.contains(row) {
            return None;
        }
        self.source.get_row(row)
    }

    fn get_index(&self, column: usize) -> Option<&ColumnIndex> {
        self.indexes.column_index(column)
    }
}

/// Read/write access to a real table, bound to one transaction's `IndexSet` and row journal.
pub struct MutableTableView<'a> {
    ctx: TxContext,
    source: &'a Arc<TableSource>,
    indexes: &'a mut IndexSet,
    journal: &'a mut TableJournal,
}

impl<'a> MutableTableView<'a> {
    pub(crate) fn new(
        ctx: TxContext,
        source: &'a Arc<TableSource>,
        indexes: &'a mut IndexSet,
        journal: &'a mut TableJournal,
    ) -> Self {
        Self {
            ctx,
            source,
            indexes,
            journal,
        }
    }

    fn check_writable(&self) -> Result<(), Error> {
        if self.ctx.read_only {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    fn row_id(&self, row: RowNumber) -> RowId {
        RowId::new(self.source.table_id(), row)
    }

    /// Store an already coerced row and index it, refusing it if it collides with a visible row
    /// on a unique key.
    fn insert_checked(&mut self, row: Row) -> Result<RowNumber, Error> {
        let rn = self.source.add_row(row);
        let stored = self
            .source
            .get_row(rn)
            .ok_or_else(|| Error::Invariant(format!("row {rn} vanished after insert")))?;
        self.indexes.insert_row(rn, &stored);
        let source = self.source;
        if let Some((constraint, detail)) =
            find_unique_violation(source.table_info(), self.indexes, &[rn], |r| source.get_row(r))
        {
            self.indexes.remove_row(rn, &stored);
            source.reclaim_uncommitted([rn]);
            return Err(Error::ConstraintViolation {
                table: source.name().clone(),
                constraint,
                detail,
            });
        }
        self.journal.record_add(rn);
        Ok(rn)
    }
}

impl Table for MutableTableView<'_> {
    fn table_info(&self) -> &TableInfo {
        self.source.table_info()
    }

    fn table_id(&self) -> Option<TableId> {
        Some(self.source.table_id())
    }

    fn row_count(&self) -> usize {
        self.indexes.row_count()
    }

    fn row_numbers(&self) -> Vec<RowNumber> {
        self.indexes.rows().collect()
    }

    fn get_row(&self, row: RowNumber) -> Option<Arc<Row>> {
        if !self.indexes.contains(row) {
            return None;
        }
        self.source.get_row(row)
    }

    fn get_index(&self, column: usize) -> Option<&ColumnIndex> {
        self.indexes.column_index(column)
    }
}

impl MutableTable for MutableTableView<'_> {
    fn add_row(&mut self, row: Row) -> Result<RowId, Error> {
        self.check_writable()?;
        let row = check_row(self.source.table_info(), row)?;
        let rn = self.insert_checked(row)?;
        Ok(self.row_id(rn))
    }

    fn update_row(&mut self, row: RowNumber, new: Row) -> Result<RowId, Error> {
        self.check_writable()?;
        let old = self
            .get_row(row)
            .ok_or(Error::RowNotFound(self.row_id(row)))?;
        let new = check_row(self.source.table_info(), new)?;
        self.indexes.remove_row(row, &old);
        let was_local = self.journal.record_remove(row);
        match self.insert_checked(new) {
            Ok(rn) => Ok(self.row_id(rn)),
            Err(e) => {
                self.journal.undo_remove(row, was_local);
                self.indexes.insert_row(row, &old);
                Err(e)
            }
        }
    }

    fn remove_row(&mut self, row: RowNumber) -> Result<(), Error> {
        self.check_writable()?;
        let old = self
            .get_row(row)
            .ok_or(Error::RowNotFound(self.row_id(row)))?;
        self.indexes.remove_row(row, &old);
        self.journal.record_remove(row);
        Ok(())
    }
}

/// A computed, read-only table produced by a `TableContainer`.
#[derive(Debug, Clone)]
pub struct GeneratedTable {
    info: TableInfo,
    rows: Vec<Arc<Row>>,
}

impl GeneratedTable {
    pub fn new(info: TableInfo, rows: Vec<Row>) -> Self {
        Self {
            info,
            rows: rows.into_iter().map(Arc::new).collect(),
        }
    }
}

impl Table for GeneratedTable {
    fn table_info(&self) -> &TableInfo {
        &self.info
    }

    fn table_id(&self) -> Option<TableId> {
        None
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn row_numbers(&self) -> Vec<RowNumber> {
        (0..self.rows.len() as RowNumber).collect()
    }

    fn get_row(&self, row: RowNumber) -> Option<Arc<Row>> {
        self.rows.get(row as usize).cloned()
    }

    fn get_index(&self, _column: usize) -> Option<&ColumnIndex> {
        None
    }
}

/// What `TableManager::get_table` resolves a name to.
pub enum TableRef<'a> {
    Real(TableView<'a>),
    Dynamic(GeneratedTable),
}

impl TableRef<'_> {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, TableRef::Dynamic(_))
    }
}

impl Table for TableRef<'_> {
    fn table_info(&self) -> &TableInfo {
        match self {
            TableRef::Real(t) => t.table_info(),
            TableRef::Dynamic(t) => t.table_info(),
        }
    }

    fn table_id(&self) -> Option<TableId> {
        match self {
            TableRef::Real(t) => t.table_id(),
            TableRef::Dynamic(t) => t.table_id(),
        }
    }

    fn row_count(&self) -> usize {
        match self {
            TableRef::Real(t) => t.row_count(),
            TableRef::Dynamic(t) => t.row_count(),
        }
    }

    fn row_numbers(&self) -> Vec<RowNumber> {
        match self {
            TableRef::Real(t) => t.row_numbers(),
            TableRef::Dynamic(t) => t.row_numbers(),
        }
    }

    fn get_row(&self, row: RowNumber) -> Option<Arc<Row>> {
        match self {
            TableRef::Real(t) => t.get_row(row),
            TableRef::Dynamic(t) => t.get_row(row),
        }
    }

    fn get_index(&self, column: usize) -> Option<&ColumnIndex> {
        match self {
            TableRef::Real(t) => t.get_index(column),
            TableRef::Dynamic(t) => t.get_index(column),
        }
    }
}

/// A provider of dynamic tables, e.g. catalog views. Consulted only for names no real table
/// claims, in registration order.
pub trait TableContainer: Send + Sync {
    fn table_names(&self, tables: &TableManager) -> Vec<ObjectName>;

    fn contains_table(&self, tables: &TableManager, name: &ObjectName) -> bool {
        self.table_names(tables).contains(name)
    }

    /// The type reported by `TableManager::get_table_type`.
    fn table_type(&self, name: &ObjectName) -> &'static str;

    fn table_info(&self, tables: &TableManager, name: &ObjectName)
    -> Result<Option<TableInfo>, Error>;

    fn get_table(
        &self,
        tables: &TableManager,
        name: &ObjectName,
    ) -> Result<Option<GeneratedTable>, Error>;
}
