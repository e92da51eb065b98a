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

//! Catalog views over the transaction's own table set.

use crate::table::{GeneratedTable, TableContainer};
use crate::tx_management::{Error, TableManager};
use tablebox_common::{ColumnInfo, Field, FieldType, ObjectName, Row, SYSTEM_SCHEMA, TableInfo};

pub fn tables_name() -> ObjectName {
    ObjectName::qualified(SYSTEM_SCHEMA, "TABLES")
}

/// Provides `SYSTEM.TABLES`: one row per table visible to the transaction, dynamic ones included.
pub struct SystemTableContainer;

impl SystemTableContainer {
    fn tables_info() -> Result<TableInfo, Error> {
        Ok(TableInfo::builder(tables_name())
            .column(ColumnInfo::new("schema", FieldType::String))
            .column(ColumnInfo::new("name", FieldType::String).not_null())
            .column(ColumnInfo::new("type", FieldType::String).not_null())
            .column(ColumnInfo::new("column_count", FieldType::Integer).not_null())
            .build()?)
    }

    fn tables_rows(tables: &TableManager) -> Result<Vec<Row>, Error> {
        let mut rows = vec![];
        for name in tables.get_table_names() {
            let column_count = tables.get_table_info(&name)?.column_count();
            let schema = match name.parent() {
                Some(parent) => Field::from(parent.to_string()),
                None => Field::Null,
            };
            rows.push(Row::new(vec![
                schema,
                Field::from(name.name()),
                Field::from(tables.get_table_type(&name)?),
                Field::Integer(column_count as i64),
            ]));
        }
        Ok(rows)
    }
}

impl TableContainer for SystemTableContainer {
    fn table_names(&self, _tables: &TableManager) -> Vec<ObjectName> {
        vec![tables_name()]
    }

    fn contains_table(&self, _tables: &TableManager, name: &ObjectName) -> bool {
        *name == tables_name()
    }

    fn table_type(&self, _name: &ObjectName) -> &'static str {
        "SYSTEM TABLE"
    }

    fn table_info(
        &self,
        _tables: &TableManager,
        name: &ObjectName,
    ) -> Result<Option<TableInfo>, Error> {
        if *name != tables_name() {
            return Ok(None);
        }
        Ok(Some(Self::tables_info()?))
    }

    fn get_table(
        &self,
        tables: &TableManager,
        name: &ObjectName,
    ) -> Result<Option<GeneratedTable>, Error> {
        if *name != tables_name() {
            return Ok(None);
        }
        Ok(Some(GeneratedTable::new(
            Self::tables_info()?,
            Self::tables_rows(tables)?,
        )))
    }
}
