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

use crate::{Field, FieldError, TableInfo};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::ops::Index;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u32);

impl Display for TableId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a physical row within its table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId {
    pub table_id: TableId,
    pub row_number: u64,
}

impl RowId {
    pub fn new(table_id: TableId, row_number: u64) -> Self {
        Self {
            table_id,
            row_number,
        }
    }
}

impl Display for RowId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.table_id, self.row_number)
    }
}

/// Commit status of a physical row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum RecordState {
    /// Written by a transaction that has not committed.
    Uncommitted,
    CommittedAdded,
    /// Removed by a committed transaction, retained until no snapshot can see it.
    CommittedRemoved,
}

impl RecordState {
    pub fn as_u8(self) -> u8 {
        match self {
            RecordState::Uncommitted => 0,
            RecordState::CommittedAdded => 1,
            RecordState::CommittedRemoved => 2,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(RecordState::Uncommitted),
            1 => Some(RecordState::CommittedAdded),
            2 => Some(RecordState::CommittedRemoved),
            _ => None,
        }
    }
}

/// The values of one row, in column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    values: Vec<Field>,
}

impl Row {
    pub fn new(values: Vec<Field>) -> Self {
        Self { values }
    }

    /// A row holding each column's default.
    pub fn with_defaults(info: &TableInfo) -> Self {
        Self {
            values: info.columns().iter().map(|c| c.default_value()).collect(),
        }
    }

    pub fn get(&self, column: usize) -> Option<&Field> {
        self.values.get(column)
    }

    pub fn set(&mut self, column: usize, value: Field) -> Result<(), FieldError> {
        let slot = self
            .values
            .get_mut(column)
            .ok_or(FieldError::ColumnOutOfRange(column))?;
        *slot = value;
        Ok(())
    }

    pub fn values(&self) -> &[Field] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Field> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Index<usize> for Row {
    type Output = Field;

    fn index(&self, column: usize) -> &Self::Output {
        &self.values[column]
    }
}

impl From<Vec<Field>> for Row {
    fn from(values: Vec<Field>) -> Self {
        Self::new(values)
    }
}
