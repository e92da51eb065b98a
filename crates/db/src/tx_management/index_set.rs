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

//! Per-transaction index snapshots.
//!
//! An `IndexSet` is a row-presence index plus optional secondary indexes over individual columns.
//! All of it is held in `imbl` persistent collections, so cloning is constant time and the clone
//! and its origin diverge structurally from the first mutation on either side.

use std::ops::Bound;
use tablebox_common::{Field, Row, TableId, TableInfo};

pub type RowNumber = u64;

/// Secondary index from column value to the rows holding it.
#[derive(Clone, Default)]
pub struct ColumnIndex {
    entries: imbl::OrdMap<Field, imbl::OrdSet<RowNumber>>,
}

impl ColumnIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, key: &Field, row: RowNumber) {
        let mut rows = self.entries.get(key).cloned().unwrap_or_default();
        rows.insert(row);
        self.entries.insert(key.clone(), rows);
    }

    fn remove(&mut self, key: &Field, row: RowNumber) {
        if let Some(mut rows) = self.entries.remove(key) {
            rows.remove(&row);
            // Only reinsert if non-empty; empty sets would otherwise accumulate.
            if !rows.is_empty() {
                self.entries.insert(key.clone(), rows);
            }
        }
    }

    /// Rows whose column equals `key`, ascending.
    pub fn lookup(&self, key: &Field) -> Vec<RowNumber> {
        self.entries
            .get(key)
            .map(|rows| rows.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Rows whose column falls in the range, ordered by value then row number.
    pub fn range(&self, lower: Bound<Field>, upper: Bound<Field>) -> Vec<RowNumber> {
        self.entries
            .range((lower, upper))
            .flat_map(|(_, rows)| rows.iter().copied())
            .collect()
    }

    pub fn distinct_values(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A table's indexes as seen by one transaction.
#[derive(Clone)]
pub struct IndexSet {
    table_id: TableId,
    rows: imbl::OrdSet<RowNumber>,
    /// One slot per column; `Some` for indexed columns.
    columns: Vec<Option<ColumnIndex>>,
}

impl IndexSet {
    pub(crate) fn new(table_id: TableId, info: &TableInfo) -> Self {
        let columns = (0..info.column_count())
            .map(|i| info.is_indexed(i).then(ColumnIndex::new))
            .collect();
        Self {
            table_id,
            rows: imbl::OrdSet::new(),
            columns,
        }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn contains(&self, row: RowNumber) -> bool {
        self.rows.contains(&row)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row numbers in ascending order.
    pub fn rows(&self) -> impl Iterator<Item = RowNumber> + '_ {
        self.rows.iter().copied()
    }

    pub fn column_index(&self, column: usize) -> Option<&ColumnIndex> {
        self.columns.get(column).and_then(|c| c.as_ref())
    }

    pub(crate) fn insert_row(&mut self, row_number: RowNumber, row: &Row) {
        self.rows.insert(row_number);
        for (column, index) in self.columns.iter_mut().enumerate() {
            if let (Some(index), Some(value)) = (index.as_mut(), row.get(column)) {
                index.insert(value, row_number);
            }
        }
    }

    pub(crate) fn remove_row(&mut self, row_number: RowNumber, row: &Row) {
        self.rows.remove(&row_number);
        for (column, index) in self.columns.iter_mut().enumerate() {
            if let (Some(index), Some(value)) = (index.as_mut(), row.get(column)) {
                index.remove(value, row_number);
            }
        }
    }

    /// Release this snapshot. Shared structure stays alive for whoever else holds it.
    pub fn dispose(self) {}
}
