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

mod field;
mod name;
mod row;
mod schema;
pub mod tracing;

pub use field::{Field, FieldError, FieldType};
pub use name::{NameError, ObjectName};
pub use row::{RecordState, Row, RowId, TableId};
pub use schema::{ColumnInfo, Constraint, SchemaError, TableInfo, TableInfoBuilder};

/// Schema holding the catalog tables.
pub const SYSTEM_SCHEMA: &str = "SYSTEM";

/// Schema user tables land in when none is given.
pub const DEFAULT_SCHEMA: &str = "APP";
