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

//! The two system tables backing sequences, read and written through a transaction's
//! `TableManager` like any other table.

use crate::sequences::{SequenceInfo, SequenceType};
use crate::table::{MutableTable, Table};
use crate::tx_management::{Error, RowNumber, TableManager};
use std::sync::Arc;
use tablebox_common::{ColumnInfo, Field, FieldType, ObjectName, Row, SYSTEM_SCHEMA, TableInfo};

const INFO_ID: usize = 0;
const INFO_SCHEMA: usize = 1;
const INFO_NAME: usize = 2;
const INFO_TYPE: usize = 3;

const SEQ_ID: usize = 0;
const SEQ_LAST: usize = 1;
const SEQ_INCREMENT: usize = 2;
const SEQ_MIN: usize = 3;
const SEQ_MAX: usize = 4;
const SEQ_START: usize = 5;
const SEQ_CACHE: usize = 6;
const SEQ_CYCLE: usize = 7;

pub fn sequence_info_name() -> ObjectName {
    ObjectName::qualified(SYSTEM_SCHEMA, "SEQUENCE_INFO")
}

pub fn sequence_name() -> ObjectName {
    ObjectName::qualified(SYSTEM_SCHEMA, "SEQUENCE")
}

/// One row per sequence, native or custom.
pub(crate) fn sequence_info_table() -> Result<TableInfo, Error> {
    Ok(TableInfo::builder(sequence_info_name())
        .column(ColumnInfo::new("id", FieldType::Integer))
        .column(ColumnInfo::new("schema", FieldType::String).not_null())
        .column(ColumnInfo::new("name", FieldType::String).not_null())
        .column(ColumnInfo::new("type", FieldType::Integer).not_null())
        .primary_key("SEQUENCE_INFO_PK", &["id"])
        .unique("SEQUENCE_INFO_NAME", &["name", "schema"])
        .build()?)
}

/// Parameters and high-water mark of each custom sequence.
pub(crate) fn sequence_table() -> Result<TableInfo, Error> {
    Ok(TableInfo::builder(sequence_name())
        .column(ColumnInfo::new("seq_id", FieldType::Integer))
        .column(ColumnInfo::new("last_value", FieldType::Integer).not_null())
        .column(ColumnInfo::new("increment", FieldType::Integer).not_null())
        .column(ColumnInfo::new("min_value", FieldType::Integer).not_null())
        .column(ColumnInfo::new("max_value", FieldType::Integer).not_null())
        .column(ColumnInfo::new("start", FieldType::Integer).not_null())
        .column(ColumnInfo::new("cache", FieldType::Integer).not_null())
        .column(ColumnInfo::new("cycle", FieldType::Boolean).not_null())
        .primary_key("SEQUENCE_PK", &["seq_id"])
        .build()?)
}

/// A sequence's definition row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CatalogEntry {
    pub id: i64,
    pub seq_type: SequenceType,
    row: RowNumber,
}

/// A custom sequence's parameters and persisted high-water mark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SequenceRecord {
    pub info: SequenceInfo,
    pub last_value: i64,
}

fn split(name: &ObjectName) -> (String, String) {
    let schema = name.parent().map(|p| p.to_string()).unwrap_or_default();
    (schema, name.name().to_string())
}

fn integer(row: &Row, column: usize) -> Result<i64, Error> {
    row.get(column)
        .and_then(Field::as_integer)
        .ok_or_else(|| Error::Invariant(format!("sequence catalog column {column} is not an integer")))
}

/// The definition row for `name`, if it exists in this transaction's view of the catalog.
pub(crate) fn find(tables: &TableManager, name: &ObjectName) -> Result<Option<CatalogEntry>, Error> {
    let Some(view) = tables.view(&sequence_info_name()) else {
        return Ok(None);
    };
    let (schema, short) = split(name);
    let candidates = match view.get_index(INFO_NAME) {
        Some(index) => index.lookup(&Field::from(short.as_str())),
        None => view.row_numbers(),
    };
    let mut found = None;
    for rn in candidates {
        let Some(row) = view.get_row(rn) else {
            continue;
        };
        if row.get(INFO_SCHEMA).and_then(Field::as_str) != Some(schema.as_str())
            || row.get(INFO_NAME).and_then(Field::as_str) != Some(short.as_str())
        {
            continue;
        }
        if found.is_some() {
            return Err(Error::Invariant(format!(
                "more than one catalog row for sequence {name}"
            )));
        }
        let seq_type = SequenceType::from_code(integer(&row, INFO_TYPE)?).ok_or_else(|| {
            Error::Invariant(format!("sequence {name} has an unknown type"))
        })?;
        found = Some(CatalogEntry {
            id: integer(&row, INFO_ID)?,
            seq_type,
            row: rn,
        });
    }
    Ok(found)
}

/// Every sequence name in the catalog, with its type.
pub(crate) fn list(tables: &TableManager) -> Vec<(ObjectName, SequenceType)> {
    let Some(view) = tables.view(&sequence_info_name()) else {
        return vec![];
    };
    view.rows()
        .into_iter()
        .filter_map(|(_, row)| {
            let schema = row.get(INFO_SCHEMA)?.as_str()?;
            let short = row.get(INFO_NAME)?.as_str()?;
            let seq_type = SequenceType::from_code(row.get(INFO_TYPE)?.as_integer()?)?;
            let name = if schema.is_empty() {
                ObjectName::new(short)
            } else {
                ObjectName::parse(schema).ok()?.child(short)
            };
            Some((name, seq_type))
        })
        .collect()
}

fn insert_definition(
    tables: &mut TableManager,
    name: &ObjectName,
    seq_type: SequenceType,
) -> Result<i64, Error> {
    let catalog = sequence_info_name();
    let id = tables.next_unique_id(&catalog)?;
    let (schema, short) = split(name);
    tables.get_mutable_table(&catalog)?.add_row(Row::new(vec![
        Field::Integer(id),
        Field::from(schema),
        Field::from(short),
        Field::Integer(seq_type.code()),
    ]))?;
    Ok(id)
}

/// Register the native sequence of a newly created table. A no-op before the catalog exists.
pub(crate) fn create_native(tables: &mut TableManager, name: &ObjectName) -> Result<(), Error> {
    if !tables.real_table_exists(&sequence_info_name()) {
        return Ok(());
    }
    if find(tables, name)?.is_some() {
        return Err(Error::SequenceAlreadyExists(name.clone()));
    }
    insert_definition(tables, name, SequenceType::Native)?;
    Ok(())
}

pub(crate) fn remove_native(tables: &mut TableManager, name: &ObjectName) -> Result<(), Error> {
    if let Some(entry) = find(tables, name)?
        && entry.seq_type == SequenceType::Native
    {
        tables
            .get_mutable_table(&sequence_info_name())?
            .remove_row(entry.row)?;
    }
    Ok(())
}

/// Add the definition and counter rows of a custom sequence. Returns its id.
pub(crate) fn insert_custom(tables: &mut TableManager, info: &SequenceInfo) -> Result<i64, Error> {
    if !tables.real_table_exists(&sequence_name()) {
        return Err(Error::TableNotFound(sequence_name()));
    }
    if find(tables, &info.name)?.is_some() {
        return Err(Error::SequenceAlreadyExists(info.name.clone()));
    }
    let id = insert_definition(tables, &info.name, SequenceType::Custom)?;
    tables.get_mutable_table(&sequence_name())?.add_row(Row::new(vec![
        Field::Integer(id),
        Field::Integer(info.start),
        Field::Integer(info.increment),
        Field::Integer(info.min_value),
        Field::Integer(info.max_value),
        Field::Integer(info.start),
        Field::Integer(info.cache_size()),
        Field::Boolean(info.cycle),
    ]))?;
    Ok(id)
}

/// Remove a custom sequence's rows.
pub(crate) fn remove_custom(tables: &mut TableManager, entry: &CatalogEntry) -> Result<(), Error> {
    let counter_row = find_counter_row(tables, entry.id)?.map(|(rn, _)| rn);
    tables
        .get_mutable_table(&sequence_info_name())?
        .remove_row(entry.row)?;
    if let Some(rn) = counter_row {
        tables.get_mutable_table(&sequence_name())?.remove_row(rn)?;
    }
    Ok(())
}

fn find_counter_row(
    tables: &TableManager,
    id: i64,
) -> Result<Option<(RowNumber, Arc<Row>)>, Error> {
    let Some(view) = tables.view(&sequence_name()) else {
        return Ok(None);
    };
    let candidates = match view.get_index(SEQ_ID) {
        Some(index) => index.lookup(&Field::Integer(id)),
        None => view.row_numbers(),
    };
    let mut found = None;
    for rn in candidates {
        let Some(row) = view.get_row(rn) else {
            continue;
        };
        if integer(&row, SEQ_ID)? != id {
            continue;
        }
        if found.is_some() {
            return Err(Error::Invariant(format!(
                "more than one counter row for sequence {id}"
            )));
        }
        found = Some((rn, row));
    }
    Ok(found)
}

/// The parameters and persisted high-water mark of custom sequence `id`, named `name`.
pub(crate) fn load(
    tables: &TableManager,
    name: &ObjectName,
    id: i64,
) -> Result<Option<SequenceRecord>, Error> {
    let Some((_, row)) = find_counter_row(tables, id)? else {
        return Ok(None);
    };
    let info = SequenceInfo {
        name: name.clone(),
        seq_type: SequenceType::Custom,
        start: integer(&row, SEQ_START)?,
        increment: integer(&row, SEQ_INCREMENT)?,
        min_value: integer(&row, SEQ_MIN)?,
        max_value: integer(&row, SEQ_MAX)?,
        cache: Some(integer(&row, SEQ_CACHE)?),
        cycle: row
            .get(SEQ_CYCLE)
            .and_then(Field::as_bool)
            .ok_or_else(|| Error::Invariant(format!("sequence {name} has no cycle flag")))?,
    };
    Ok(Some(SequenceRecord {
        info,
        last_value: integer(&row, SEQ_LAST)?,
    }))
}

/// Overwrite the persisted high-water mark of custom sequence `id`.
pub(crate) fn update_last_value(
    tables: &mut TableManager,
    id: i64,
    name: &ObjectName,
    last_value: i64,
) -> Result<(), Error> {
    let (rn, row) = find_counter_row(tables, id)?
        .ok_or_else(|| Error::SequenceNotFound(name.clone()))?;
    let mut row = row.as_ref().clone();
    row.set(SEQ_LAST, Field::Integer(last_value))?;
    tables.get_mutable_table(&sequence_name())?.update_row(rn, row)?;
    Ok(())
}
