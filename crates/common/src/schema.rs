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

use crate::{Field, FieldType, ObjectName};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use unicase::UniCase;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("Table {0} has no columns")]
    NoColumns(ObjectName),
    #[error("Duplicate column {column} in {table}")]
    DuplicateColumn { table: ObjectName, column: String },
    #[error("Constraint {constraint} on {table} names unknown column {column}")]
    UnknownColumn {
        table: ObjectName,
        constraint: String,
        column: String,
    },
    #[error("Default for column {column} is not a {field_type}")]
    BadDefault {
        column: String,
        field_type: FieldType,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub field_type: FieldType,
    pub not_null: bool,
    pub default: Option<Field>,
    /// Maintain a secondary index over this column.
    pub indexed: bool,
}

impl ColumnInfo {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            not_null: false,
            default: None,
            indexed: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn with_default(mut self, default: Field) -> Self {
        self.default = Some(default);
        self
    }

    /// The value a fresh row starts with in this column.
    pub fn default_value(&self) -> Field {
        self.default.clone().unwrap_or(Field::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Constraint {
    PrimaryKey { name: String, columns: Vec<String> },
    Unique { name: String, columns: Vec<String> },
}

impl Constraint {
    pub fn name(&self) -> &str {
        match self {
            Constraint::PrimaryKey { name, .. } | Constraint::Unique { name, .. } => name,
        }
    }

    pub fn columns(&self) -> &[String] {
        match self {
            Constraint::PrimaryKey { columns, .. } | Constraint::Unique { columns, .. } => columns,
        }
    }
}

/// The immutable description of a table. Alteration builds a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    name: ObjectName,
    columns: Arc<[ColumnInfo]>,
    constraints: Arc<[Constraint]>,
}

impl TableInfo {
    pub fn builder(name: ObjectName) -> TableInfoBuilder {
        TableInfoBuilder {
            name,
            columns: vec![],
            constraints: vec![],
        }
    }

    pub fn name(&self) -> &ObjectName {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&ColumnInfo> {
        self.columns.get(index)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn index_of_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn index_of_column_ignore_case(&self, name: &str) -> Option<usize> {
        let name = UniCase::new(name);
        self.columns
            .iter()
            .position(|c| UniCase::new(c.name.as_str()) == name)
    }

    /// Same columns and constraints under another name.
    pub fn renamed(&self, name: ObjectName) -> TableInfo {
        TableInfo {
            name,
            columns: self.columns.clone(),
            constraints: self.constraints.clone(),
        }
    }

    /// Column positions for each constraint, in constraint order.
    pub fn constraint_columns(&self) -> Vec<(&Constraint, Vec<usize>)> {
        self.constraints
            .iter()
            .map(|c| {
                let positions = c
                    .columns()
                    .iter()
                    .filter_map(|name| self.index_of_column(name))
                    .collect();
                (c, positions)
            })
            .collect()
    }

    /// Primary key columns are implicitly not null.
    pub fn is_not_null(&self, column: usize) -> bool {
        let Some(info) = self.columns.get(column) else {
            return false;
        };
        info.not_null
            || self.constraints.iter().any(|c| {
                matches!(c, Constraint::PrimaryKey { .. })
                    && c.columns().iter().any(|n| *n == info.name)
            })
    }

    /// Whether the column carries a secondary index: explicitly, or as the leading column of a
    /// unique or primary key constraint.
    pub fn is_indexed(&self, column: usize) -> bool {
        let Some(info) = self.columns.get(column) else {
            return false;
        };
        info.indexed
            || self
                .constraints
                .iter()
                .any(|c| c.columns().first() == Some(&info.name))
    }
}

pub struct TableInfoBuilder {
    name: ObjectName,
    columns: Vec<ColumnInfo>,
    constraints: Vec<Constraint>,
}

impl TableInfoBuilder {
    pub fn column(mut self, column: ColumnInfo) -> Self {
        self.columns.push(column);
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn primary_key(self, name: &str, columns: &[&str]) -> Self {
        self.constraint(Constraint::PrimaryKey {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        })
    }

    pub fn unique(self, name: &str, columns: &[&str]) -> Self {
        self.constraint(Constraint::Unique {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        })
    }

    pub fn build(self) -> Result<TableInfo, SchemaError> {
        if self.columns.is_empty() {
            return Err(SchemaError::NoColumns(self.name));
        }
        for (i, column) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(SchemaError::DuplicateColumn {
                    table: self.name,
                    column: column.name.clone(),
                });
            }
            if let Some(default) = &column.default
                && !default.is_null()
                && default.field_type() != Some(column.field_type)
            {
                return Err(SchemaError::BadDefault {
                    column: column.name.clone(),
                    field_type: column.field_type,
                });
            }
        }
        for constraint in &self.constraints {
            for column in constraint.columns() {
                if !self.columns.iter().any(|c| c.name == *column) {
                    return Err(SchemaError::UnknownColumn {
                        table: self.name,
                        constraint: constraint.name().to_string(),
                        column: column.clone(),
                    });
                }
            }
        }
        Ok(TableInfo {
            name: self.name,
            columns: Arc::from(self.columns),
            constraints: Arc::from(self.constraints),
        })
    }
}
