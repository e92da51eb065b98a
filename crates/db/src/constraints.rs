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

//! Row validation against a table's schema and constraints.

use crate::tx_management::{Error, IndexSet, RowNumber};
use std::sync::Arc;
use tablebox_common::{Field, Row, TableInfo};

/// Coerce each value to its column's type and enforce NOT NULL. Returns the coerced row.
pub fn check_row(info: &TableInfo, row: Row) -> Result<Row, Error> {
    if row.len() != info.column_count() {
        return Err(Error::ConstraintViolation {
            table: info.name().clone(),
            constraint: "column count".to_string(),
            detail: format!("expected {} values, got {}", info.column_count(), row.len()),
        });
    }
    let mut values = row.into_values();
    for (i, value) in values.iter_mut().enumerate() {
        let Some(column) = info.column(i) else {
            continue;
        };
        if value.is_null() {
            if info.is_not_null(i) {
                return Err(Error::ConstraintViolation {
                    table: info.name().clone(),
                    constraint: format!("{} NOT NULL", column.name),
                    detail: "null value".to_string(),
                });
            }
            continue;
        }
        if value.field_type() != Some(column.field_type) {
            *value = value.cast_to(column.field_type)?;
        }
    }
    Ok(Row::new(values))
}

/// The first unique or primary key collision involving any of `rows`, as
/// `(constraint name, detail)`. Keys containing a null never collide.
pub fn find_unique_violation<F>(
    info: &TableInfo,
    index: &IndexSet,
    rows: &[RowNumber],
    fetch: F,
) -> Option<(String, String)>
where
    F: Fn(RowNumber) -> Option<Arc<Row>>,
{
    for (constraint, columns) in info.constraint_columns() {
        let Some(&lead) = columns.first() else {
            continue;
        };
        for &rn in rows {
            let Some(row) = fetch(rn) else {
                continue;
            };
            let Some(key) = key_of(&row, &columns) else {
                continue;
            };
            let candidates = match index.column_index(lead) {
                Some(column_index) => column_index.lookup(&key[0]),
                None => index.rows().collect(),
            };
            for other in candidates {
                if other == rn {
                    continue;
                }
                let Some(other_row) = fetch(other) else {
                    continue;
                };
                if key_of(&other_row, &columns).as_deref() == Some(key.as_slice()) {
                    return Some((
                        constraint.name().to_string(),
                        format!("duplicate key {}", display_key(&key)),
                    ));
                }
            }
        }
    }
    None
}

fn key_of(row: &Row, columns: &[usize]) -> Option<Vec<Field>> {
    let mut key = Vec::with_capacity(columns.len());
    for &c in columns {
        let value = row.get(c)?;
        if value.is_null() {
            return None;
        }
        key.push(value.clone());
    }
    Some(key)
}

fn display_key(key: &[Field]) -> String {
    key.iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
