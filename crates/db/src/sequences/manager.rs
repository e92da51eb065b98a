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

use crate::sequences::catalog::{self, CatalogEntry};
use crate::sequences::{SequenceInfo, SequenceState, SequenceType};
use crate::tx_management::{Error, TableManager};
use ahash::AHasher;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use tablebox_common::ObjectName;
use tracing::debug;

type AHashMap<K, V> = HashMap<K, V, BuildHasherDefault<AHasher>>;

/// A custom sequence this transaction created. Nobody else can see it yet, so its state lives
/// here and its reservations are written through the transaction itself.
struct LocalSequence {
    id: i64,
    info: SequenceInfo,
    state: SequenceState,
}

/// Per-transaction access to sequences. Committed custom sequences go through the database-wide
/// `SequenceRegistry`; native ones through their table's unique-id counter.
#[derive(Default)]
pub struct SequenceManager {
    created: AHashMap<ObjectName, LocalSequence>,
    /// Ids of committed custom sequences this transaction dropped.
    dropped: Vec<i64>,
    definitions: AHashMap<ObjectName, SequenceInfo>,
}

impl SequenceManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(tables: &TableManager, name: &ObjectName) -> Result<CatalogEntry, Error> {
        catalog::find(tables, name)?.ok_or_else(|| Error::SequenceNotFound(name.clone()))
    }

    pub fn sequence_exists(&self, tables: &TableManager, name: &ObjectName) -> Result<bool, Error> {
        Ok(catalog::find(tables, name)?.is_some())
    }

    /// The definition of a native or custom sequence.
    pub fn sequence_info(
        &mut self,
        tables: &TableManager,
        name: &ObjectName,
    ) -> Result<SequenceInfo, Error> {
        if let Some(local) = self.created.get(name) {
            return Ok(local.info.clone());
        }
        let entry = Self::entry(tables, name)?;
        self.definition(tables, name, &entry)
    }

    fn definition(
        &mut self,
        tables: &TableManager,
        name: &ObjectName,
        entry: &CatalogEntry,
    ) -> Result<SequenceInfo, Error> {
        if entry.seq_type == SequenceType::Native {
            return Ok(SequenceInfo::native(name.clone()));
        }
        if let Some(info) = self.definitions.get(name) {
            return Ok(info.clone());
        }
        let record = catalog::load(tables, name, entry.id)?.ok_or_else(|| {
            Error::Invariant(format!("sequence {name} has a definition but no counter row"))
        })?;
        self.definitions.insert(name.clone(), record.info.clone());
        Ok(record.info)
    }

    pub fn create_sequence(
        &mut self,
        tables: &mut TableManager,
        mut info: SequenceInfo,
    ) -> Result<(), Error> {
        if info.cache.is_none() {
            info.cache = Some(tables.composite().config().default_sequence_cache);
        }
        info.validate()?;
        if info.seq_type != SequenceType::Custom {
            return Err(Error::InvalidSequence {
                name: info.name,
                reason: "native sequences are created with their table".to_string(),
            });
        }
        let id = catalog::insert_custom(tables, &info)?;
        debug!(tx = %tables.context().id, sequence = %info.name, id, "create_sequence");
        self.created.insert(
            info.name.clone(),
            LocalSequence {
                id,
                state: SequenceState::new(info.start),
                info,
            },
        );
        Ok(())
    }

    /// Returns false when no such sequence exists.
    pub fn drop_sequence(
        &mut self,
        tables: &mut TableManager,
        name: &ObjectName,
    ) -> Result<bool, Error> {
        let Some(entry) = catalog::find(tables, name)? else {
            return Ok(false);
        };
        if entry.seq_type == SequenceType::Native {
            return Err(Error::InvalidSequence {
                name: name.clone(),
                reason: "native sequences are dropped with their table".to_string(),
            });
        }
        catalog::remove_custom(tables, &entry)?;
        if self.created.remove(name).is_none() {
            self.dropped.push(entry.id);
        }
        self.definitions.remove(name);
        debug!(tx = %tables.context().id, sequence = %name, "drop_sequence");
        Ok(true)
    }

    pub fn next_value(&mut self, tables: &mut TableManager, name: &ObjectName) -> Result<i64, Error> {
        if tables.is_read_only() {
            return Err(Error::ReadOnly);
        }
        if let Some(local) = self.created.get_mut(name) {
            let mut state = local.state;
            let (value, reserved) = state.next(&local.info)?;
            if let Some(last_value) = reserved {
                catalog::update_last_value(tables, local.id, name, last_value)?;
            }
            local.state = state;
            return Ok(value);
        }
        let entry = Self::entry(tables, name)?;
        match entry.seq_type {
            SequenceType::Native => tables.next_unique_id(name),
            SequenceType::Custom => {
                let info = self.definition(tables, name, &entry)?;
                let composite = tables.composite();
                composite.sequences().next_value(composite, entry.id, &info)
            }
        }
    }

    pub fn current_value(&mut self, tables: &TableManager, name: &ObjectName) -> Result<i64, Error> {
        if let Some(local) = self.created.get(name) {
            return Ok(local.state.current_value);
        }
        let entry = Self::entry(tables, name)?;
        match entry.seq_type {
            SequenceType::Native => tables.current_unique_id(name),
            SequenceType::Custom => {
                let composite = tables.composite();
                composite.sequences().current_value(composite, entry.id, name)
            }
        }
    }

    /// Set both the current value and the persisted high-water mark. The next value handed out
    /// follows `value`.
    pub fn set_value(
        &mut self,
        tables: &mut TableManager,
        name: &ObjectName,
        value: i64,
    ) -> Result<(), Error> {
        if tables.is_read_only() {
            return Err(Error::ReadOnly);
        }
        if let Some(local) = self.created.get_mut(name) {
            if !local.info.in_bounds(value) {
                return Err(Error::SequenceOutOfBounds(name.clone()));
            }
            catalog::update_last_value(tables, local.id, name, value)?;
            local.state.set(value);
            return Ok(());
        }
        let entry = Self::entry(tables, name)?;
        let info = self.definition(tables, name, &entry)?;
        if !info.in_bounds(value) {
            return Err(Error::SequenceOutOfBounds(name.clone()));
        }
        match entry.seq_type {
            SequenceType::Native => tables.set_unique_id(name, value),
            SequenceType::Custom => {
                let composite = tables.composite();
                composite.sequences().set_value(composite, entry.id, name, value)
            }
        }
    }

    pub(crate) fn dropped_ids(&self) -> &[i64] {
        &self.dropped
    }
}
