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

use crate::composite::Composite;
use crate::sequences::catalog;
use crate::sequences::{SequenceInfo, SequenceState};
use crate::tx_management::{CommitResult, Error, IsolationLevel, TableManager};
use ahash::AHasher;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::Arc;
use tablebox_common::ObjectName;
use tracing::debug;

/// Runtime state of every committed custom sequence, shared by all transactions.
///
/// Every read-modify-write of a sequence's state happens under the one mutex. A reservation is
/// persisted in its own short transaction before any value from it is handed out, so a value is
/// never reissued, whatever happens to the transaction that asked for it.
#[derive(Default)]
pub struct SequenceRegistry {
    states: Mutex<HashMap<i64, SequenceState, BuildHasherDefault<AHasher>>>,
}

impl SequenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_value(
        &self,
        composite: &Arc<Composite>,
        id: i64,
        info: &SequenceInfo,
    ) -> Result<i64, Error> {
        let mut states = self.states.lock();
        let mut state = match states.get(&id) {
            Some(state) => *state,
            None => SequenceState::new(Self::load_last_value(composite, id, &info.name)?),
        };
        let (value, reserved) = state.next(info)?;
        if let Some(last_value) = reserved {
            Self::persist(composite, id, &info.name, last_value)?;
        }
        states.insert(id, state);
        Ok(value)
    }

    pub(crate) fn current_value(
        &self,
        composite: &Arc<Composite>,
        id: i64,
        name: &ObjectName,
    ) -> Result<i64, Error> {
        let mut states = self.states.lock();
        if let Some(state) = states.get(&id) {
            return Ok(state.current_value);
        }
        let state = SequenceState::new(Self::load_last_value(composite, id, name)?);
        states.insert(id, state);
        Ok(state.current_value)
    }

    pub(crate) fn set_value(
        &self,
        composite: &Arc<Composite>,
        id: i64,
        name: &ObjectName,
        value: i64,
    ) -> Result<(), Error> {
        let mut states = self.states.lock();
        Self::persist(composite, id, name, value)?;
        states.insert(id, SequenceState::new(value));
        Ok(())
    }

    /// Drop cached state for sequences that no longer exist.
    pub(crate) fn forget(&self, ids: impl IntoIterator<Item = i64>) {
        let mut states = self.states.lock();
        for id in ids {
            states.remove(&id);
        }
    }

    /// Cached state of sequence `id`, without loading it.
    pub(crate) fn peek(&self, id: i64) -> Option<SequenceState> {
        self.states.lock().get(&id).copied()
    }

    pub fn cached_count(&self) -> usize {
        self.states.lock().len()
    }

    /// The committed high-water mark. A sequence dropped by a transaction that committed after
    /// the caller's began is no longer found.
    fn load_last_value(composite: &Arc<Composite>, id: i64, name: &ObjectName) -> Result<i64, Error> {
        let tables = TableManager::begin(composite.clone(), IsolationLevel::Snapshot, true)?;
        let record = catalog::load(&tables, &catalog::sequence_name(), id)?
            .ok_or_else(|| Error::SequenceNotFound(name.clone()))?;
        Ok(record.last_value)
    }

    /// Write a new high-water mark in an autonomous transaction, retrying on conflict.
    fn persist(
        composite: &Arc<Composite>,
        id: i64,
        name: &ObjectName,
        last_value: i64,
    ) -> Result<(), Error> {
        let retries = composite.config().sequence_persist_retries;
        let mut attempt = 0;
        loop {
            let mut tables = TableManager::begin(composite.clone(), IsolationLevel::Snapshot, false)?;
            catalog::update_last_value(&mut tables, id, name, last_value)?;
            match tables.commit()? {
                CommitResult::Success { .. } => return Ok(()),
                CommitResult::ConflictRetry { conflict_info } => {
                    attempt += 1;
                    if attempt > retries {
                        return Err(Error::Conflict(conflict_info));
                    }
                    debug!(
                        "Retrying sequence {id} reservation ({attempt}/{retries}): {conflict_info}"
                    );
                }
            }
        }
    }
}
