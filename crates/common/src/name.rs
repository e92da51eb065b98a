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

//! Dotted, hierarchical identifiers for schemas, tables and columns.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use unicase::UniCase;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("Empty object name")]
    Empty,
    #[error("Empty component in object name: {0:?}")]
    EmptyComponent(String),
}

/// An immutable dotted name, e.g. `APP.customers.id`.
///
/// Equality, hashing and ordering are ordinal and case-sensitive. The case-insensitive mode is
/// explicit, through [`ObjectName::eq_ignore_case`] and [`ObjectName::cmp_ignore_case`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ObjectName {
    parts: Arc<[Arc<str>]>,
}

impl ObjectName {
    /// A single-component name. The argument is taken verbatim, dots included.
    pub fn new(name: &str) -> Self {
        Self {
            parts: Arc::from(vec![Arc::<str>::from(name)]),
        }
    }

    pub fn qualified(schema: &str, name: &str) -> Self {
        Self::new(schema).child(name)
    }

    /// Split `s` on `.` into components.
    pub fn parse(s: &str) -> Result<Self, NameError> {
        if s.is_empty() {
            return Err(NameError::Empty);
        }
        let mut parts = Vec::new();
        for part in s.split('.') {
            if part.is_empty() {
                return Err(NameError::EmptyComponent(s.to_string()));
            }
            parts.push(Arc::<str>::from(part));
        }
        Ok(Self {
            parts: Arc::from(parts),
        })
    }

    pub fn child(&self, name: &str) -> Self {
        let mut parts = self.parts.to_vec();
        parts.push(Arc::from(name));
        Self {
            parts: Arc::from(parts),
        }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.parts.len() < 2 {
            return None;
        }
        Some(Self {
            parts: Arc::from(&self.parts[..self.parts.len() - 1]),
        })
    }

    /// The last component.
    pub fn name(&self) -> &str {
        // Never empty; every constructor pushes at least one component.
        self.parts.last().map(|p| p.as_ref()).unwrap_or_default()
    }

    pub fn parts(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|p| p.as_ref())
    }

    pub fn depth(&self) -> usize {
        self.parts.len()
    }

    pub fn eq_ignore_case(&self, other: &ObjectName) -> bool {
        self.parts.len() == other.parts.len()
            && self
                .parts
                .iter()
                .zip(other.parts.iter())
                .all(|(a, b)| UniCase::new(a.as_ref()) == UniCase::new(b.as_ref()))
    }

    pub fn cmp_ignore_case(&self, other: &ObjectName) -> Ordering {
        let lhs = self.parts.iter().map(|p| UniCase::new(p.as_ref()));
        let rhs = other.parts.iter().map(|p| UniCase::new(p.as_ref()));
        lhs.cmp(rhs)
    }
}

impl Display for ObjectName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(part)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ObjectName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectName({self})")
    }
}

impl FromStr for ObjectName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<ObjectName> for String {
    fn from(name: ObjectName) -> Self {
        name.to_string()
    }
}

impl TryFrom<String> for ObjectName {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}
