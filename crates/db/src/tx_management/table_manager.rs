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

//! Transaction-scoped coordination of table visibility and lifecycle.
//!
//! A `TableManager` is created per transaction. It holds the names visible to the transaction,
//! one `IndexSet` per visible name (the two maps always change together), the row journals of
//! the tables it touched, and what it created, dropped and selected. At commit all of that is
//! handed to the `Composite` as a `CommitSet`.

use crate::composite::Composite;
use crate::constraints::{check_row, find_unique_violation};
use crate::sequences::catalog;
use crate::table::{GeneratedTable, MutableTableView, TableContainer, TableRef, TableView};
use crate::tx_management::{
    CommitResult, Error, IndexSet, IsolationLevel, RowNumber, TableSource, TransactionJournal,
    TxContext,
};
use ahash::AHasher;
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap};
use std::hash::BuildHasherDefault;
use std::sync::Arc;
use tablebox_common::{Field, ObjectName, RecordState, Row, SYSTEM_SCHEMA, TableInfo};
use tracing::{debug, error};

type AHashMap<K, V> = HashMap<K, V, BuildHasherDefault<AHasher>>;

/// The rows one transaction added to and removed from one table.
#[derive(Debug, Clone, Default)]
pub(crate) struct TableJournal {
    added: BTreeSet<RowNumber>,
    removed: BTreeSet<RowNumber>,
    /// Rows added and then removed again by the same transaction. Never seen by anyone else.
    discarded: Vec<RowNumber>,
}

impl TableJournal {
    pub fn record_add(&mut self, row: RowNumber) {
        self.added.insert(row);
    }

    /// Returns true when the row was one this transaction added itself.
    pub fn record_remove(&mut self, row: RowNumber) -> bool {
        if self.added.remove(&row) {
            self.discarded.push(row);
            true
        } else {
            self.removed.insert(row);
            false
        }
    }

    pub fn undo_remove(&mut self, row: RowNumber, was_local: bool) {
        if was_local {
            self.discarded.retain(|r| *r != row);
            self.added.insert(row);
        } else {
            self.removed.remove(&row);
        }
    }

    pub fn added(&self) -> impl Iterator<Item = RowNumber> + '_ {
        self.added.iter().copied()
    }

    pub fn removed(&self) -> impl Iterator<Item = RowNumber> + '_ {
        self.removed.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Rows that are garbage if the transaction does not commit them.
    fn uncommitted(&self) -> impl Iterator<Item = RowNumber> + '_ {
        self.added.iter().chain(self.discarded.iter()).copied()
    }
}

/// Everything the composite needs to check and merge one transaction.
pub(crate) struct CommitSet {
    pub tx: TxContext,
    pub created: Vec<Arc<TableSource>>,
    pub dropped: Vec<Arc<TableSource>>,
    pub selected: Vec<Arc<TableSource>>,
    /// Row journals for every visible, non-temporary table the transaction touched, plus one
    /// (possibly empty) entry per created table.
    pub written: Vec<(Arc<TableSource>, TableJournal)>,
}

impl CommitSet {
    pub fn has_writes(&self) -> bool {
        !self.created.is_empty()
            || !self.dropped.is_empty()
            || self.written.iter().any(|(_, j)| !j.is_empty())
    }
}

struct AccessedTable {
    source: Arc<TableSource>,
    journal: TableJournal,
}

pub struct TableManager {
    tx: TxContext,
    composite: Arc<Composite>,
    visible_tables: IndexMap<ObjectName, Arc<TableSource>>,
    table_indices: AHashMap<ObjectName, IndexSet>,
    accessed_tables: Vec<AccessedTable>,
    /// Name to position in `accessed_tables`, flushed when the name changes meaning.
    table_cache: AHashMap<ObjectName, usize>,
    selected_tables: Vec<Arc<TableSource>>,
    created_tables: Vec<Arc<TableSource>>,
    dropped_tables: Vec<Arc<TableSource>>,
    cleanup_queue: Vec<(Arc<TableSource>, IndexSet)>,
    /// Committed sources whose unique-id counter this transaction moved.
    moved_counters: Vec<Arc<TableSource>>,
    internal_tables: Vec<Arc<dyn TableContainer>>,
    journal: TransactionJournal,
    disposed: bool,
}

impl TableManager {
    pub fn begin(
        composite: Arc<Composite>,
        isolation: IsolationLevel,
        read_only: bool,
    ) -> Result<Self, Error> {
        let (tx, tables) = composite.begin_transaction(isolation, read_only)?;
        let mut visible_tables = IndexMap::with_capacity(tables.len());
        let mut table_indices = AHashMap::default();
        for (source, index) in tables {
            let name = source.name().clone();
            table_indices.insert(name.clone(), index);
            visible_tables.insert(name, source);
        }
        Ok(Self {
            tx,
            composite,
            visible_tables,
            table_indices,
            accessed_tables: vec![],
            table_cache: AHashMap::default(),
            selected_tables: vec![],
            created_tables: vec![],
            dropped_tables: vec![],
            cleanup_queue: vec![],
            moved_counters: vec![],
            internal_tables: vec![],
            journal: TransactionJournal::new(tx.id),
            disposed: false,
        })
    }

    pub fn context(&self) -> TxContext {
        self.tx
    }

    pub fn composite(&self) -> &Arc<Composite> {
        &self.composite
    }

    pub fn journal(&self) -> &TransactionJournal {
        &self.journal
    }

    pub fn is_read_only(&self) -> bool {
        self.tx.read_only
    }

    fn check_open(&self) -> Result<(), Error> {
        if self.disposed {
            return Err(Error::TransactionClosed);
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), Error> {
        self.check_open()?;
        if self.tx.read_only {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    pub fn add_internal_tables(&mut self, container: Arc<dyn TableContainer>) {
        self.internal_tables.push(container);
    }

    fn find_container(&self, name: &ObjectName) -> Option<&Arc<dyn TableContainer>> {
        self.internal_tables
            .iter()
            .find(|c| c.contains_table(self, name))
    }

    pub fn create_table(&mut self, info: TableInfo) -> Result<(), Error> {
        self.create_table_source(info, false).map(|_| ())
    }

    /// Temporary tables live and die with this transaction; they are never merged at commit.
    pub fn create_temporary_table(&mut self, info: TableInfo) -> Result<(), Error> {
        self.create_table_source(info, true).map(|_| ())
    }

    fn create_table_source(
        &mut self,
        info: TableInfo,
        temporary: bool,
    ) -> Result<Arc<TableSource>, Error> {
        self.check_writable()?;
        let name = info.name().clone();
        if self.visible_tables.contains_key(&name) {
            return Err(Error::TableAlreadyExists(name));
        }
        let source = self.composite.create_table_source(info, temporary);
        self.register(source.clone());
        if !temporary && let Err(e) = catalog::create_native(self, &name) {
            self.unregister(&name);
            return Err(e);
        }
        debug!(tx = %self.tx.id, table = %name, id = %source.table_id(), temporary, "create_table");
        Ok(source)
    }

    fn register(&mut self, source: Arc<TableSource>) {
        let name = source.name().clone();
        self.table_cache.remove(&name);
        self.table_indices
            .insert(name.clone(), source.create_index_set());
        self.visible_tables.insert(name.clone(), source.clone());
        self.journal.on_table_created(source.table_id(), &name);
        if !source.is_temporary() {
            self.created_tables.push(source);
        }
    }

    /// Take a name out of the visible map, queueing its index set for release. Returns the
    /// source that was visible under it.
    fn unregister(&mut self, name: &ObjectName) -> Option<Arc<TableSource>> {
        let source = self.visible_tables.shift_remove(name)?;
        self.table_cache.remove(name);
        if let Some(index) = self.table_indices.remove(name) {
            self.cleanup_queue.push((source.clone(), index));
        }
        if let Some(pos) = self
            .created_tables
            .iter()
            .position(|s| Arc::ptr_eq(s, &source))
        {
            self.created_tables.remove(pos);
        } else if !source.is_temporary() {
            self.dropped_tables.push(source.clone());
        }
        self.journal.on_table_dropped(source.table_id(), name);
        Some(source)
    }

    /// Returns false when no such table is visible.
    pub fn drop_table(&mut self, name: &ObjectName) -> Result<bool, Error> {
        self.check_writable()?;
        let Some(source) = self.unregister(name) else {
            return Ok(false);
        };
        if !source.is_temporary() {
            catalog::remove_native(self, name)?;
        }
        debug!(tx = %self.tx.id, table = %name, "drop_table");
        Ok(true)
    }

    /// Replace a table's schema. The replacement is built in full (rows copied by column name,
    /// indexes rebuilt, unique-id counter shared) before the old table leaves the visible map; on
    /// failure the old table is untouched.
    pub fn alter_table(&mut self, info: TableInfo) -> Result<(), Error> {
        self.check_writable()?;
        let name = info.name().clone();
        let old = self
            .visible_tables
            .get(&name)
            .cloned()
            .ok_or_else(|| Error::TableNotFound(name.clone()))?;
        let old_index = self
            .table_indices
            .get(&name)
            .ok_or_else(|| Error::Invariant(format!("no index set for visible table {name}")))?;

        let staged = self.composite.create_successor_source(&old, info.clone());
        let column_map: Vec<Option<usize>> = info
            .columns()
            .iter()
            .map(|c| old.table_info().index_of_column(&c.name))
            .collect();
        for rn in old_index.rows() {
            let Some(row) = old.get_row(rn) else {
                return Err(Error::Invariant(format!("{name} row {rn} indexed but missing")));
            };
            let values = column_map
                .iter()
                .zip(info.columns())
                .map(|(from, column)| match from {
                    Some(i) => row.get(*i).cloned().unwrap_or(Field::Null),
                    None => column.default_value(),
                })
                .collect();
            let row = check_row(&info, Row::new(values))?;
            let new_rn = staged.add_row(row);
            staged.write_record_state(new_rn, RecordState::CommittedAdded)?;
        }
        staged.build_indexes();
        let staged_index = staged.create_index_set();
        let rows: Vec<RowNumber> = staged_index.rows().collect();
        if let Some((constraint, detail)) =
            find_unique_violation(&info, &staged_index, &rows, |rn| staged.get_row(rn))
        {
            return Err(Error::ConstraintViolation {
                table: name,
                constraint,
                detail,
            });
        }

        self.unregister(&name);
        self.register(staged);
        debug!(tx = %self.tx.id, table = %name, rows = rows.len(), "alter_table");
        Ok(())
    }

    /// Copy the table to a fresh source holding only the rows this transaction sees, when its
    /// source has accumulated enough dead slots. Returns whether it did so.
    pub fn compact_table(&mut self, name: &ObjectName) -> Result<bool, Error> {
        self.check_writable()?;
        let source = self
            .visible_tables
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TableNotFound(name.clone()))?;
        if !source.can_compact(&self.composite.config().compaction) {
            return Ok(false);
        }
        let index = self
            .table_indices
            .get(name)
            .ok_or_else(|| Error::Invariant(format!("no index set for visible table {name}")))?;
        let copy = self.composite.copy_source_table(&source, index)?;
        debug!(
            tx = %self.tx.id, table = %name, from = %source.table_id(), to = %copy.table_id(),
            "compact_table"
        );
        self.unregister(name);
        self.register(copy);
        Ok(true)
    }

    /// Position of the table's accessed entry, creating it (and raising the access callback) on
    /// first use.
    fn access(&mut self, name: &ObjectName) -> Result<usize, Error> {
        if let Some(&idx) = self.table_cache.get(name) {
            return Ok(idx);
        }
        let source = self
            .visible_tables
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TableNotFound(name.clone()))?;
        self.journal.on_table_accessed(source.table_id(), name);
        let idx = match self
            .accessed_tables
            .iter()
            .position(|t| Arc::ptr_eq(&t.source, &source))
        {
            Some(idx) => idx,
            None => {
                self.accessed_tables.push(AccessedTable {
                    source,
                    journal: TableJournal::default(),
                });
                self.accessed_tables.len() - 1
            }
        };
        self.table_cache.insert(name.clone(), idx);
        Ok(idx)
    }

    /// Resolve a name to a table: this transaction's cache, then a real visible table, then the
    /// first dynamic provider claiming it.
    pub fn get_table(&mut self, name: &ObjectName) -> Result<TableRef<'_>, Error> {
        self.check_open()?;
        if self.table_cache.contains_key(name) || self.visible_tables.contains_key(name) {
            let idx = self.access(name)?;
            let indexes = self
                .table_indices
                .get(name)
                .ok_or_else(|| Error::Invariant(format!("no index set for visible table {name}")))?;
            let source = &self.accessed_tables[idx].source;
            return Ok(TableRef::Real(TableView::new(source, indexes)));
        }
        if let Some(container) = self.find_container(name)
            && let Some(table) = container.get_table(self, name)?
        {
            return Ok(TableRef::Dynamic(table));
        }
        Err(Error::TableNotFound(name.clone()))
    }

    /// As `get_table`, refusing dynamic tables.
    pub fn get_mutable_table(&mut self, name: &ObjectName) -> Result<MutableTableView<'_>, Error> {
        self.check_open()?;
        if !self.visible_tables.contains_key(name) {
            if self.find_container(name).is_some() {
                return Err(Error::NotMutable(name.clone()));
            }
            return Err(Error::TableNotFound(name.clone()));
        }
        let idx = self.access(name)?;
        let ctx = self.tx;
        let indexes = self
            .table_indices
            .get_mut(name)
            .ok_or_else(|| Error::Invariant(format!("no index set for visible table {name}")))?;
        let entry = &mut self.accessed_tables[idx];
        Ok(entry
            .source
            .mutable_view(ctx, indexes, &mut entry.journal))
    }

    /// A read view of a real table that leaves no trace in the transaction's bookkeeping.
    pub fn view(&self, name: &ObjectName) -> Option<TableView<'_>> {
        let source = self.visible_tables.get(name)?;
        let indexes = self.table_indices.get(name)?;
        Some(TableView::new(source, indexes))
    }

    /// Record a read of the table for commit-time conflict checks. A no-op for dynamic tables.
    pub fn select_table(&mut self, name: &ObjectName) -> Result<(), Error> {
        self.check_open()?;
        if let Some(source) = self.visible_tables.get(name) {
            if !self
                .selected_tables
                .iter()
                .any(|s| Arc::ptr_eq(s, source))
            {
                self.selected_tables.push(source.clone());
            }
            return Ok(());
        }
        if self.find_container(name).is_some() {
            return Ok(());
        }
        Err(Error::TableNotFound(name.clone()))
    }

    /// Re-validate every visible row of the table against its column and unique constraints.
    pub fn assert_constraints(&mut self, name: &ObjectName) -> Result<(), Error> {
        self.check_open()?;
        let source = self
            .visible_tables
            .get(name)
            .ok_or_else(|| Error::TableNotFound(name.clone()))?;
        let index = self
            .table_indices
            .get(name)
            .ok_or_else(|| Error::Invariant(format!("no index set for visible table {name}")))?;
        let info = source.table_info();
        let rows: Vec<RowNumber> = index.rows().collect();
        for &rn in &rows {
            let row = source
                .get_row(rn)
                .ok_or_else(|| Error::Invariant(format!("{name} row {rn} indexed but missing")))?;
            check_row(info, row.as_ref().clone())?;
        }
        if let Some((constraint, detail)) =
            find_unique_violation(info, index, &rows, |rn| source.get_row(rn))
        {
            return Err(Error::ConstraintViolation {
                table: name.clone(),
                constraint,
                detail,
            });
        }
        let table_id = source.table_id();
        self.journal.on_table_constraint_altered(table_id, name);
        Ok(())
    }

    pub fn real_table_exists(&self, name: &ObjectName) -> bool {
        self.visible_tables.contains_key(name)
    }

    pub fn table_exists(&self, name: &ObjectName) -> bool {
        self.real_table_exists(name) || self.find_container(name).is_some()
    }

    /// Every real and dynamic table name visible to this transaction, sorted.
    pub fn get_table_names(&self) -> Vec<ObjectName> {
        let mut names: Vec<ObjectName> = self.visible_tables.keys().cloned().collect();
        for container in &self.internal_tables {
            names.extend(container.table_names(self));
        }
        names.sort();
        names.dedup();
        names
    }

    /// The visible table `name` refers to. Case-insensitive resolution prefers an exact match and
    /// fails when more than one name matches.
    pub fn resolve_name(
        &self,
        name: &ObjectName,
        ignore_case: bool,
    ) -> Result<Option<ObjectName>, Error> {
        if self.table_exists(name) {
            return Ok(Some(name.clone()));
        }
        if !ignore_case {
            return Ok(None);
        }
        let mut found = None;
        for candidate in self.get_table_names() {
            if candidate.eq_ignore_case(name) {
                if found.is_some() {
                    return Err(Error::AmbiguousName(name.clone()));
                }
                found = Some(candidate);
            }
        }
        Ok(found)
    }

    pub fn get_table_info(&self, name: &ObjectName) -> Result<TableInfo, Error> {
        if let Some(source) = self.visible_tables.get(name) {
            return Ok(source.table_info().clone());
        }
        if let Some(container) = self.find_container(name)
            && let Some(info) = container.table_info(self, name)?
        {
            return Ok(info);
        }
        Err(Error::TableNotFound(name.clone()))
    }

    pub fn get_table_type(&self, name: &ObjectName) -> Result<&'static str, Error> {
        if let Some(source) = self.visible_tables.get(name) {
            if source.is_temporary() {
                return Ok("TEMPORARY");
            }
            if name.depth() > 1 && name.parts().next() == Some(SYSTEM_SCHEMA) {
                return Ok("SYSTEM TABLE");
            }
            return Ok("TABLE");
        }
        if let Some(container) = self.find_container(name) {
            return Ok(container.table_type(name));
        }
        Err(Error::TableNotFound(name.clone()))
    }

    fn source(&self, name: &ObjectName) -> Result<&Arc<TableSource>, Error> {
        self.visible_tables
            .get(name)
            .ok_or_else(|| Error::TableNotFound(name.clone()))
    }

    /// Next value of the table's native identity counter. Never reissued, even on rollback.
    pub fn next_unique_id(&mut self, name: &ObjectName) -> Result<i64, Error> {
        self.check_writable()?;
        let source = self.source(name)?.clone();
        self.note_counter_moved(&source);
        Ok(source.next_unique_id())
    }

    pub fn current_unique_id(&self, name: &ObjectName) -> Result<i64, Error> {
        self.check_open()?;
        Ok(self.source(name)?.current_unique_id())
    }

    pub fn set_unique_id(&mut self, name: &ObjectName, value: i64) -> Result<(), Error> {
        self.check_writable()?;
        let source = self.source(name)?.clone();
        self.note_counter_moved(&source);
        source.set_unique_id(value);
        Ok(())
    }

    fn note_counter_moved(&mut self, source: &Arc<TableSource>) {
        if source.is_temporary() || self.moved_counters.iter().any(|s| Arc::ptr_eq(s, source)) {
            return;
        }
        self.moved_counters.push(source.clone());
    }

    /// Write the counters this transaction moved when no writing commit carried them, so the ids
    /// it handed out are not reissued after a restart.
    fn persist_moved_counters(&mut self) {
        let moved = std::mem::take(&mut self.moved_counters);
        if moved.is_empty() {
            return;
        }
        if let Err(e) = self.composite.persist_counters(&moved) {
            error!(tx = %self.tx.id, "Failed to persist unique-id counters: {e}");
        }
    }

    fn commit_set(&self) -> CommitSet {
        let mut written: Vec<(Arc<TableSource>, TableJournal)> = self
            .accessed_tables
            .iter()
            .filter(|t| {
                !t.source.is_temporary()
                    && self
                        .visible_tables
                        .get(t.source.name())
                        .is_some_and(|v| Arc::ptr_eq(v, &t.source))
            })
            .map(|t| (t.source.clone(), t.journal.clone()))
            .collect();
        for created in &self.created_tables {
            if !written.iter().any(|(s, _)| Arc::ptr_eq(s, created)) {
                written.push((created.clone(), TableJournal::default()));
            }
        }
        CommitSet {
            tx: self.tx,
            created: self.created_tables.clone(),
            dropped: self.dropped_tables.clone(),
            selected: self.selected_tables.clone(),
            written,
        }
    }

    /// Hand everything to the composite for checking and merging, then release the transaction.
    pub fn commit(&mut self) -> Result<CommitResult, Error> {
        self.check_open()?;
        let result = self.composite.commit(self.commit_set());
        if !matches!(
            result,
            Ok(CommitResult::Success {
                mutations_made: true,
                ..
            })
        ) {
            self.persist_moved_counters();
        }
        self.dispose();
        result
    }

    pub fn rollback(&mut self) {
        if self.disposed {
            return;
        }
        debug!(tx = %self.tx.id, "rollback");
        self.persist_moved_counters();
        self.dispose();
    }

    /// Release every index set, reclaim rows that did not commit and deregister the
    /// transaction. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        for table in self.accessed_tables.drain(..) {
            table.source.reclaim_uncommitted(table.journal.uncommitted());
        }
        self.table_cache.clear();
        for (_, index) in self.table_indices.drain() {
            index.dispose();
        }
        self.visible_tables.clear();
        for (source, index) in self.cleanup_queue.drain(..) {
            index.dispose();
            drop(source);
        }
        self.selected_tables.clear();
        self.created_tables.clear();
        self.dropped_tables.clear();
        self.composite.end_transaction(self.tx.id);
    }
}

impl Drop for TableManager {
    fn drop(&mut self) {
        self.dispose();
    }
}
