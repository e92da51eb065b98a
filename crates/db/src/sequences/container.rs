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

use crate::sequences::SequenceType;
use crate::sequences::catalog;
use crate::table::{GeneratedTable, TableContainer};
use crate::tx_management::{Error, TableManager};
use tablebox_common::{ColumnInfo, Field, FieldType, ObjectName, Row, TableInfo};

/// Exposes every custom sequence as a one-row table of its parameters and current value.
pub struct SequenceTableContainer;

impl SequenceTableContainer {
    fn info(name: &ObjectName) -> Result<TableInfo, Error> {
        Ok(TableInfo::builder(name.clone())
            .column(ColumnInfo::new("last_value", FieldType::Integer))
            .column(ColumnInfo::new("current_value", FieldType::Integer))
            .column(ColumnInfo::new("increment", FieldType::Integer))
            .column(ColumnInfo::new("min_value", FieldType::Integer))
            .column(ColumnInfo::new("max_value", FieldType::Integer))
            .column(ColumnInfo::new("start", FieldType::Integer))
            .column(ColumnInfo::new("cache", FieldType::Integer))
            .column(ColumnInfo::new("cycle", FieldType::Boolean))
            .build()?)
    }

    fn custom_id(tables: &TableManager, name: &ObjectName) -> Result<Option<i64>, Error> {
        Ok(catalog::find(tables, name)?
            .filter(|entry| entry.seq_type == SequenceType::Custom)
            .map(|entry| entry.id))
    }
}

impl TableContainer for SequenceTableContainer {
    fn table_names(&self, tables: &TableManager) -> Vec<ObjectName> {
        catalog::list(tables)
            .into_iter()
            .filter(|(_, seq_type)| *seq_type == SequenceType::Custom)
            .map(|(name, _)| name)
            .collect()
    }

    fn contains_table(&self, tables: &TableManager, name: &ObjectName) -> bool {
        matches!(Self::custom_id(tables, name), Ok(Some(_)))
    }

    fn table_type(&self, _name: &ObjectName) -> &'static str {
        "SEQUENCE"
    }

    fn table_info(
        &self,
        tables: &TableManager,
        name: &ObjectName,
    ) -> Result<Option<TableInfo>, Error> {
        if Self::custom_id(tables, name)?.is_none() {
            return Ok(None);
        }
        Ok(Some(Self::info(name)?))
    }

    fn get_table(
        &self,
        tables: &TableManager,
        name: &ObjectName,
    ) -> Result<Option<GeneratedTable>, Error> {
        let Some(id) = Self::custom_id(tables, name)? else {
            return Ok(None);
        };
        let Some(record) = catalog::load(tables, name, id)? else {
            return Ok(None);
        };
        let current = tables
            .composite()
            .sequences()
            .peek(id)
            .map(|state| state.current_value)
            .unwrap_or(record.last_value);
        let info = record.info;
        let row = Row::new(vec![
            Field::Integer(record.last_value),
            Field::Integer(current),
            Field::Integer(info.increment),
            Field::Integer(info.min_value),
            Field::Integer(info.max_value),
            Field::Integer(info.start),
            Field::Integer(info.cache_size()),
            Field::Boolean(info.cycle),
        ]);
        Ok(Some(GeneratedTable::new(Self::info(name)?, vec![row])))
    }
}
