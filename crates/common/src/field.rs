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

//! Typed cell values.
//!
//! `Field` carries two orderings. [`Field::compare`] is the value comparison used by callers and
//! fails for type pairs that have no meaningful order (a string against an integer). The `Ord`
//! impl is a total order across all variants (type rank first, then value) and exists so fields
//! can key secondary indexes.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use strum::{Display as StrumDisplay, EnumString};

const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum FieldType {
    Boolean,
    Integer,
    Numeric,
    String,
    Date,
    Binary,
    Array,
    LargeObject,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("Cannot compare {0} with {1}")]
    Incomparable(String, String),
    #[error("Cannot cast {from} to {to}")]
    InvalidCast { from: String, to: FieldType },
    #[error("Column index {0} out of range")]
    ColumnOutOfRange(usize),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Field {
    Null,
    Boolean(bool),
    Integer(i64),
    Numeric(f64),
    String(Arc<str>),
    Date(NaiveDateTime),
    Binary(Arc<[u8]>),
    Array(Arc<[Field]>),
    /// Reference to an out-of-row large object.
    LargeObject(u64),
}

impl Field {
    pub fn string(s: &str) -> Self {
        Field::String(Arc::from(s))
    }

    pub fn binary(bytes: &[u8]) -> Self {
        Field::Binary(Arc::from(bytes))
    }

    pub fn array(items: Vec<Field>) -> Self {
        Field::Array(Arc::from(items))
    }

    /// `None` for `Null`, which is a member of every type.
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            Field::Null => None,
            Field::Boolean(_) => Some(FieldType::Boolean),
            Field::Integer(_) => Some(FieldType::Integer),
            Field::Numeric(_) => Some(FieldType::Numeric),
            Field::String(_) => Some(FieldType::String),
            Field::Date(_) => Some(FieldType::Date),
            Field::Binary(_) => Some(FieldType::Binary),
            Field::Array(_) => Some(FieldType::Array),
            Field::LargeObject(_) => Some(FieldType::LargeObject),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Field::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Field::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Field::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::String(s) => Some(s),
            _ => None,
        }
    }

    fn type_name(&self) -> String {
        self.field_type()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "NULL".to_string())
    }

    /// Null sorts before every value.
    pub fn compare(&self, other: &Field) -> Result<Ordering, FieldError> {
        match (self, other) {
            (Field::Null, Field::Null) => Ok(Ordering::Equal),
            (Field::Null, _) => Ok(Ordering::Less),
            (_, Field::Null) => Ok(Ordering::Greater),
            (Field::Boolean(a), Field::Boolean(b)) => Ok(a.cmp(b)),
            (Field::Integer(a), Field::Integer(b)) => Ok(a.cmp(b)),
            (Field::Numeric(a), Field::Numeric(b)) => Ok(a.total_cmp(b)),
            (Field::Integer(a), Field::Numeric(b)) => Ok((*a as f64).total_cmp(b)),
            (Field::Numeric(a), Field::Integer(b)) => Ok(a.total_cmp(&(*b as f64))),
            (Field::String(a), Field::String(b)) => Ok(a.cmp(b)),
            (Field::Date(a), Field::Date(b)) => Ok(a.cmp(b)),
            (Field::Binary(a), Field::Binary(b)) => Ok(a.cmp(b)),
            (Field::LargeObject(a), Field::LargeObject(b)) => Ok(a.cmp(b)),
            (Field::Array(a), Field::Array(b)) => {
                for (l, r) in a.iter().zip(b.iter()) {
                    let ord = l.compare(r)?;
                    if ord != Ordering::Equal {
                        return Ok(ord);
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            _ => Err(FieldError::Incomparable(self.type_name(), other.type_name())),
        }
    }

    pub fn cast_to(&self, to: FieldType) -> Result<Field, FieldError> {
        if self.field_type() == Some(to) {
            return Ok(self.clone());
        }
        let invalid = || FieldError::InvalidCast {
            from: self.type_name(),
            to,
        };
        let cast = match (self, to) {
            (Field::Null, _) => Field::Null,
            (Field::Integer(i), FieldType::Numeric) => Field::Numeric(*i as f64),
            (Field::Numeric(n), FieldType::Integer) => {
                if !n.is_finite() || n.fract() != 0.0 {
                    return Err(invalid());
                }
                Field::Integer(*n as i64)
            }
            (Field::Boolean(b), FieldType::Integer) => Field::Integer(i64::from(*b)),
            (Field::Integer(i), FieldType::Boolean) => match i {
                0 => Field::Boolean(false),
                1 => Field::Boolean(true),
                _ => return Err(invalid()),
            },
            (Field::String(s), FieldType::Integer) => {
                Field::Integer(s.trim().parse().map_err(|_| invalid())?)
            }
            (Field::String(s), FieldType::Numeric) => {
                Field::Numeric(s.trim().parse().map_err(|_| invalid())?)
            }
            (Field::String(s), FieldType::Boolean) => match s.trim().to_ascii_lowercase().as_str()
            {
                "true" => Field::Boolean(true),
                "false" => Field::Boolean(false),
                _ => return Err(invalid()),
            },
            (Field::String(s), FieldType::Date) => Field::Date(parse_date(s).ok_or_else(invalid)?),
            (Field::String(s), FieldType::Binary) => Field::binary(s.as_bytes()),
            (Field::Binary(b), FieldType::String) => {
                Field::string(std::str::from_utf8(b).map_err(|_| invalid())?)
            }
            (
                Field::Boolean(_) | Field::Integer(_) | Field::Numeric(_) | Field::Date(_),
                FieldType::String,
            ) => Field::string(&self.to_string()),
            _ => return Err(invalid()),
        };
        Ok(cast)
    }

    fn rank(&self) -> u8 {
        match self {
            Field::Null => 0,
            Field::Boolean(_) => 1,
            Field::Integer(_) => 2,
            Field::Numeric(_) => 3,
            Field::String(_) => 4,
            Field::Date(_) => 5,
            Field::Binary(_) => 6,
            Field::Array(_) => 7,
            Field::LargeObject(_) => 8,
        }
    }
}

fn parse_date(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, DATE_TIME_FORMAT)
        .ok()
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(s, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl Ord for Field {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Field::Numeric(a), Field::Numeric(b)) => a.total_cmp(b),
            (Field::Array(a), Field::Array(b)) => a.iter().cmp(b.iter()),
            // Every other same-rank pair is comparable.
            _ if self.rank() == other.rank() => {
                self.compare(other).unwrap_or(Ordering::Equal)
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Field {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Field {}

impl Hash for Field {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Field::Null => {}
            Field::Boolean(b) => b.hash(state),
            Field::Integer(i) => i.hash(state),
            Field::Numeric(n) => n.to_bits().hash(state),
            Field::String(s) => s.hash(state),
            Field::Date(d) => d.hash(state),
            Field::Binary(b) => b.hash(state),
            Field::Array(a) => a.hash(state),
            Field::LargeObject(l) => l.hash(state),
        }
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Null => f.write_str("NULL"),
            Field::Boolean(b) => write!(f, "{b}"),
            Field::Integer(i) => write!(f, "{i}"),
            Field::Numeric(n) => write!(f, "{n}"),
            Field::String(s) => f.write_str(s),
            Field::Date(d) => write!(f, "{}", d.format(DATE_TIME_FORMAT)),
            Field::Binary(b) => write!(f, "<{} bytes>", b.len()),
            Field::Array(a) => {
                f.write_str("[")?;
                for (i, item) in a.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Field::LargeObject(id) => write!(f, "<lob {id}>"),
        }
    }
}

impl From<i64> for Field {
    fn from(i: i64) -> Self {
        Field::Integer(i)
    }
}

impl From<f64> for Field {
    fn from(n: f64) -> Self {
        Field::Numeric(n)
    }
}

impl From<bool> for Field {
    fn from(b: bool) -> Self {
        Field::Boolean(b)
    }
}

impl From<&str> for Field {
    fn from(s: &str) -> Self {
        Field::string(s)
    }
}

impl From<String> for Field {
    fn from(s: String) -> Self {
        Field::String(Arc::from(s))
    }
}

impl From<NaiveDateTime> for Field {
    fn from(d: NaiveDateTime) -> Self {
        Field::Date(d)
    }
}

impl<T: Into<Field>> From<Option<T>> for Field {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Field::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(f: &Field) -> u64 {
        let mut h = DefaultHasher::new();
        f.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_compare_numeric_mix() {
        assert_eq!(
            Field::Integer(2).compare(&Field::Numeric(2.5)),
            Ok(Ordering::Less)
        );
        assert_eq!(
            Field::Numeric(3.0).compare(&Field::Integer(3)),
            Ok(Ordering::Equal)
        );
        assert_eq!(Field::Null.compare(&Field::from("a")), Ok(Ordering::Less));
    }

    #[test]
    fn test_compare_incomparable_fails() {
        let err = Field::from("a").compare(&Field::Integer(1)).unwrap_err();
        assert_eq!(
            err,
            FieldError::Incomparable("STRING".to_string(), "INTEGER".to_string())
        );
    }

    #[test]
    fn test_total_order_separates_types() {
        // The index order never equates values of different types.
        assert_ne!(Field::Integer(1), Field::Numeric(1.0));
        assert!(Field::Null < Field::Boolean(false));
        assert!(Field::Integer(i64::MAX) < Field::Numeric(f64::MIN));
        assert_eq!(
            hash_of(&Field::from("x")),
            hash_of(&Field::String(Arc::from("x")))
        );
    }

    #[test]
    fn test_casts() {
        assert_eq!(
            Field::from("42").cast_to(FieldType::Integer),
            Ok(Field::Integer(42))
        );
        assert_eq!(
            Field::Integer(1).cast_to(FieldType::Boolean),
            Ok(Field::Boolean(true))
        );
        assert_eq!(
            Field::Numeric(2.0).cast_to(FieldType::Integer),
            Ok(Field::Integer(2))
        );
        assert!(Field::Numeric(2.5).cast_to(FieldType::Integer).is_err());
        assert_eq!(Field::Null.cast_to(FieldType::Date), Ok(Field::Null));
        assert!(matches!(
            Field::Boolean(true).cast_to(FieldType::Binary),
            Err(FieldError::InvalidCast {
                to: FieldType::Binary,
                ..
            })
        ));
    }

    #[test]
    fn test_date_round_trip_through_string() {
        let date = Field::from("2024-02-29 12:30:00")
            .cast_to(FieldType::Date)
            .unwrap();
        assert_eq!(
            date.cast_to(FieldType::String),
            Ok(Field::from("2024-02-29 12:30:00"))
        );
        let day = Field::from("2024-03-01").cast_to(FieldType::Date).unwrap();
        assert_eq!(day.compare(&date), Ok(Ordering::Greater));
    }
}
