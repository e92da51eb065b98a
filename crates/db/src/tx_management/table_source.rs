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

//! The canonical, shared state of one table.
//!
//! Rows live in an append-mostly heap addressed by row number. A row's values never change once
//! written; an update is a removal plus an addition. What changes is the row's `RecordState` and
//! which index sets contain it. The committed `IndexSet` is swapped wholesale at commit and never
//! mutated in place, so any snapshot taken from it stays valid for as long as it is held.

use crate::config::CompactionConfig;
use crate::constraints::find_unique_violation;
use crate::provider::{CommitBatch, CounterKey, StoreOp, StoredTable};
use crate::table::MutableTableView;
use crate::tx_management::table_manager::TableJournal;
use crate::tx_management::{
    ConflictInfo, ConflictType, Error, IndexSet, RowNumber, Timestamp, TxContext,
};
use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tablebox_common::{ObjectName, RecordState, Row, RowId, TableId, TableInfo};
use tracing::debug;

struct RowSlot {
    state: RecordState,
    row: Arc<Row>,
}

#[derive(Default)]
struct RowHeap {
    slots: Vec<Option<RowSlot>>,
    /// Reclaimed slots, reused before the heap grows.
    free: Vec<RowNumber>,
}

impl RowHeap {
    fn slot(&self, rn: RowNumber) -> Option<&RowSlot> {
        self.slots.get(rn as usize).and_then(|s| s.as_ref())
    }

    fn slot_mut(&mut self, rn: RowNumber) -> Option<&mut RowSlot> {
        self.slots.get_mut(rn as usize).and_then(|s| s.as_mut())
    }

    fn allocate(&mut self, slot: RowSlot) -> RowNumber {
        match self.free.pop() {
            Some(rn) => {
                self.slots[rn as usize] = Some(slot);
                rn
            }
            None => {
                self.slots.push(Some(slot));
                (self.slots.len() - 1) as RowNumber
            }
        }
    }

    fn reclaim(&mut self, rn: RowNumber) {
        if let Some(slot) = self.slots.get_mut(rn as usize)
            && slot.take().is_some()
        {
            self.free.push(rn);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceStats {
    /// Allocated slots, including holes left by reclaimed rows.
    pub slots: usize,
    pub uncommitted: usize,
    pub committed: usize,
    /// Removed rows still retained for older snapshots.
    pub removed: usize,
}

impl SourceStats {
    pub fn dead(&self) -> usize {
        self.slots - self.uncommitted - self.committed
    }
}

pub struct TableSource {
    table_id: TableId,
    info: TableInfo,
    temporary: bool,
    heap: RwLock<RowHeap>,
    committed: ArcSwap<IndexSet>,
    /// Last native unique id handed out. Shared with every source that replaces this one.
    unique_id: Arc<AtomicI64>,
    persisted_unique_id: AtomicI64,
    /// Commit timestamp of the last commit that changed this table's rows or dropped it.
    last_modified: AtomicU64,
    /// Rows removed by a commit, waiting for every older snapshot to end.
    pending_reclaim: Mutex<Vec<(Timestamp, RowNumber)>>,
}

impl TableSource {
    pub(crate) fn new(table_id: TableId, info: TableInfo, temporary: bool) -> Self {
        let committed = IndexSet::new(table_id, &info);
        Self {
            table_id,
            info,
            temporary,
            heap: RwLock::new(RowHeap::default()),
            committed: ArcSwap::from_pointee(committed),
            unique_id: Arc::new(AtomicI64::new(0)),
            persisted_unique_id: AtomicI64::new(0),
            last_modified: AtomicU64::new(0),
            pending_reclaim: Mutex::new(vec![]),
        }
    }

    /// An empty source to replace this one (alter, compaction), drawing its unique ids from the
    /// same counter so ids handed out through either are never reissued through the other.
    pub(crate) fn successor(&self, table_id: TableId, info: TableInfo) -> Self {
        let mut source = Self::new(table_id, info, self.temporary);
        source.unique_id = self.unique_id.clone();
        source
    }

    pub(crate) fn shares_unique_id(&self, other: &TableSource) -> bool {
        Arc::ptr_eq(&self.unique_id, &other.unique_id)
    }

    /// Rebuild a committed source from its stored rows.
    pub(crate) fn restore(
        table_id: TableId,
        info: TableInfo,
        rows: Vec<(RowNumber, Row)>,
        unique_id: i64,
    ) -> Self {
        let source = Self::new(table_id, info, false);
        {
            let mut heap = source.heap.write();
            for (rn, row) in rows {
                let idx = rn as usize;
                if heap.slots.len() <= idx {
                    heap.slots.resize_with(idx + 1, || None);
                }
                heap.slots[idx] = Some(RowSlot {
                    state: RecordState::CommittedAdded,
                    row: Arc::new(row),
                });
            }
            heap.free = heap
                .slots
                .iter()
                .enumerate()
                .filter(|(_, s)| s.is_none())
                .map(|(i, _)| i as RowNumber)
                .rev()
                .collect();
        }
        source.build_indexes();
        source.unique_id.store(unique_id, Ordering::SeqCst);
        source.persisted_unique_id.store(unique_id, Ordering::SeqCst);
        source
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn table_info(&self) -> &TableInfo {
        &self.info
    }

    pub fn name(&self) -> &ObjectName {
        self.info.name()
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    pub fn last_modified(&self) -> Timestamp {
        Timestamp(self.last_modified.load(Ordering::Acquire))
    }

    /// A snapshot of the committed indexes. Constant time; shares structure with the original.
    pub fn create_index_set(&self) -> IndexSet {
        self.committed.load().as_ref().clone()
    }

    /// Append a row in the `Uncommitted` state. No index is touched.
    pub fn add_row(&self, row: Row) -> RowNumber {
        self.heap.write().allocate(RowSlot {
            state: RecordState::Uncommitted,
            row: Arc::new(row),
        })
    }

    pub fn write_record_state(&self, row_number: RowNumber, state: RecordState) -> Result<(), Error> {
        let mut heap = self.heap.write();
        let slot = heap
            .slot_mut(row_number)
            .ok_or(Error::RowNotFound(RowId::new(self.table_id, row_number)))?;
        slot.state = state;
        Ok(())
    }

    pub fn record_state(&self, row_number: RowNumber) -> Option<RecordState> {
        self.heap.read().slot(row_number).map(|s| s.state)
    }

    pub fn get_row(&self, row_number: RowNumber) -> Option<Arc<Row>> {
        self.heap.read().slot(row_number).map(|s| s.row.clone())
    }

    /// Replace the committed indexes with ones built from every `CommittedAdded` row.
    pub fn build_indexes(&self) {
        let mut index = IndexSet::new(self.table_id, &self.info);
        {
            let heap = self.heap.read();
            for (rn, slot) in heap.slots.iter().enumerate() {
                if let Some(slot) = slot
                    && slot.state == RecordState::CommittedAdded
                {
                    index.insert_row(rn as RowNumber, &slot.row);
                }
            }
        }
        self.committed.store(Arc::new(index));
    }

    pub fn next_unique_id(&self) -> i64 {
        self.unique_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_unique_id(&self) -> i64 {
        self.unique_id.load(Ordering::SeqCst)
    }

    /// The next call to `next_unique_id` returns `value + 1`.
    pub fn set_unique_id(&self, value: i64) {
        self.unique_id.store(value, Ordering::SeqCst);
    }

    pub fn stats(&self) -> SourceStats {
        let heap = self.heap.read();
        let mut stats = SourceStats {
            slots: heap.slots.len(),
            ..Default::default()
        };
        for slot in heap.slots.iter().flatten() {
            match slot.state {
                RecordState::Uncommitted => stats.uncommitted += 1,
                RecordState::CommittedAdded => stats.committed += 1,
                RecordState::CommittedRemoved => stats.removed += 1,
            }
        }
        stats
    }

    /// Whether enough of the heap is dead (removed, or reclaimed holes) to be worth copying
    /// into a fresh source.
    pub fn can_compact(&self, config: &CompactionConfig) -> bool {
        let stats = self.stats();
        if stats.slots == 0 || stats.slots < config.min_slots {
            return false;
        }
        (stats.dead() as f64 / stats.slots as f64) >= config.dead_ratio
    }

    /// Reclaim rows that never committed. Rows in any other state are left alone.
    pub(crate) fn reclaim_uncommitted(&self, rows: impl IntoIterator<Item = RowNumber>) {
        let mut heap = self.heap.write();
        for rn in rows {
            if heap.slot(rn).map(|s| s.state) == Some(RecordState::Uncommitted) {
                heap.reclaim(rn);
            }
        }
    }

    /// Reclaim removed rows no open snapshot can see: those removed at or before `horizon`.
    pub(crate) fn reclaim_removed(&self, horizon: Timestamp) -> usize {
        let ready: Vec<RowNumber> = {
            let mut pending = self.pending_reclaim.lock();
            if pending.is_empty() {
                return 0;
            }
            let (ready, waiting): (Vec<_>, Vec<_>) =
                pending.drain(..).partition(|(ts, _)| *ts <= horizon);
            *pending = waiting;
            ready.into_iter().map(|(_, rn)| rn).collect()
        };
        if ready.is_empty() {
            return 0;
        }
        let mut heap = self.heap.write();
        for rn in &ready {
            heap.reclaim(*rn);
        }
        debug!(
            "Reclaimed {} removed rows from {} at horizon {}",
            ready.len(),
            self.name(),
            horizon.0
        );
        ready.len()
    }

    pub(crate) fn mark_dropped(&self, ts: Timestamp) {
        self.last_modified.store(ts.0, Ordering::Release);
    }

    /// The counter value, when it moved since it was last written to the store.
    pub(crate) fn unique_id_to_persist(&self) -> Option<i64> {
        let current = self.current_unique_id();
        (current != self.persisted_unique_id.load(Ordering::SeqCst)).then_some(current)
    }

    pub(crate) fn mark_unique_id_persisted(&self, value: i64) {
        self.persisted_unique_id.store(value, Ordering::SeqCst);
    }

    /// A live mutable view of this table bound to a transaction's index set and row journal.
    pub(crate) fn mutable_view<'a>(
        self: &'a Arc<Self>,
        ctx: TxContext,
        indexes: &'a mut IndexSet,
        journal: &'a mut TableJournal,
    ) -> MutableTableView<'a> {
        MutableTableView::new(ctx, self, indexes, journal)
    }

    /// Fork the committed indexes for the commit-time check of a transaction's changes.
    pub(crate) fn begin_check(self: &Arc<Self>, created: bool) -> CheckTable {
        CheckTable {
            source: self.clone(),
            index: self.create_index_set(),
            created,
            added: vec![],
            removed: vec![],
        }
    }
}

pub(crate) enum CheckFailure {
    Conflict(ConflictInfo),
    Failed(Error),
}

/// A transaction's changes to one table, merged against the latest committed indexes. Produced
/// and consumed under the composite's commit lock.
pub(crate) struct CheckTable {
    source: Arc<TableSource>,
    index: IndexSet,
    created: bool,
    added: Vec<RowNumber>,
    removed: Vec<RowNumber>,
}

impl CheckTable {
    pub fn source(&self) -> &Arc<TableSource> {
        &self.source
    }

    /// First commit phase. Merges the journal into the forked indexes and looks for collisions
    /// with whatever committed since the transaction began. Mutates nothing shared.
    pub fn check(&mut self, journal: &TableJournal) -> Result<(), CheckFailure> {
        let name = self.source.name().clone();
        {
            let heap = self.source.heap.read();
            for rn in journal.removed() {
                let slot = heap.slot(rn).filter(|s| s.state == RecordState::CommittedAdded);
                let Some(slot) = slot else {
                    return Err(CheckFailure::Conflict(
                        ConflictInfo::new(&name, ConflictType::RowRemoved)
                            .with_detail(format!("row {rn}")),
                    ));
                };
                self.index.remove_row(rn, &slot.row);
            }
            for rn in journal.added() {
                let slot = heap
                    .slot(rn)
                    .filter(|s| s.state == RecordState::Uncommitted)
                    .ok_or_else(|| {
                        CheckFailure::Failed(Error::Invariant(format!(
                            "row {rn} added to {name} is missing or already committed"
                        )))
                    })?;
                self.index.insert_row(rn, &slot.row);
            }
        }
        self.added = journal.added().collect();
        self.removed = journal.removed().collect();

        if !self.added.is_empty() {
            let source = &self.source;
            if let Some((constraint, detail)) = find_unique_violation(
                source.table_info(),
                &self.index,
                &self.added,
                |rn| source.get_row(rn),
            ) {
                return Err(CheckFailure::Conflict(
                    ConflictInfo::new(&name, ConflictType::UniqueViolation)
                        .with_detail(format!("{constraint}: {detail}")),
                ));
            }
        }
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.created || !self.added.is_empty() || !self.removed.is_empty()
    }

    /// Second commit phase: the store writes for this table.
    pub fn stage(&self, batch: &mut CommitBatch) {
        let table_id = self.source.table_id;
        if self.created {
            batch.push(StoreOp::PutTable(StoredTable {
                table_id,
                info: self.source.info.clone(),
            }));
            batch.push(StoreOp::PutCounter(
                CounterKey::UniqueId(table_id),
                self.source.current_unique_id(),
            ));
            for rn in self.index.rows() {
                if let Some(row) = self.source.get_row(rn) {
                    batch.push(StoreOp::PutRow(table_id, rn, row));
                }
            }
            return;
        }
        for &rn in &self.added {
            if let Some(row) = self.source.get_row(rn) {
                batch.push(StoreOp::PutRow(table_id, rn, row));
            }
        }
        for &rn in &self.removed {
            batch.push(StoreOp::DeleteRow(table_id, rn));
        }
    }

    /// Final phase: flip record states and publish the merged indexes.
    pub fn publish(self, ts: Timestamp) {
        let dirty = self.is_dirty();
        {
            let mut heap = self.source.heap.write();
            for &rn in &self.added {
                if let Some(slot) = heap.slot_mut(rn) {
                    slot.state = RecordState::CommittedAdded;
                }
            }
            for &rn in &self.removed {
                if let Some(slot) = heap.slot_mut(rn) {
                    slot.state = RecordState::CommittedRemoved;
                }
            }
        }
        if !self.removed.is_empty() {
            self.source
                .pending_reclaim
                .lock()
                .extend(self.removed.iter().map(|rn| (ts, *rn)));
        }
        if self.created {
            self.source
                .mark_unique_id_persisted(self.source.current_unique_id());
        }
        self.source.committed.store(Arc::new(self.index));
        if dirty {
            self.source.last_modified.store(ts.0, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablebox_common::{ColumnInfo, Field, FieldType};

    fn source() -> TableSource {
        let info = TableInfo::builder(ObjectName::qualified("APP", "items"))
            .column(ColumnInfo::new("id", FieldType::Integer).indexed())
            .build()
            .unwrap();
        TableSource::new(TableId(7), info, false)
    }

    fn row(i: i64) -> Row {
        Row::new(vec![Field::Integer(i)])
    }

    #[test]
    fn test_add_row_is_invisible_until_indexed() {
        let source = source();
        let rn = source.add_row(row(1));
        assert_eq!(source.record_state(rn), Some(RecordState::Uncommitted));
        assert!(source.create_index_set().is_empty());

        source
            .write_record_state(rn, RecordState::CommittedAdded)
            .unwrap();
        // Still nothing until the indexes are rebuilt.
        assert!(source.create_index_set().is_empty());
        source.build_indexes();
        let index = source.create_index_set();
        assert!(index.contains(rn));
        assert_eq!(index.column_index(0).unwrap().lookup(&Field::Integer(1)), vec![rn]);
    }

    #[test]
    fn test_write_record_state_missing_row() {
        let source = source();
        assert_eq!(
            source.write_record_state(3, RecordState::CommittedAdded),
            Err(Error::RowNotFound(RowId::new(TableId(7), 3)))
        );
    }

    #[test]
    fn test_unique_ids() {
        let source = source();
        assert_eq!(source.current_unique_id(), 0);
        assert_eq!(source.next_unique_id(), 1);
        assert_eq!(source.next_unique_id(), 2);
        assert_eq!(source.current_unique_id(), 2);
        source.set_unique_id(100);
        assert_eq!(source.next_unique_id(), 101);
        assert_eq!(source.unique_id_to_persist(), Some(101));
        source.mark_unique_id_persisted(101);
        assert_eq!(source.unique_id_to_persist(), None);
    }

    #[test]
    fn test_successor_shares_unique_ids() {
        let source = source();
        assert_eq!(source.next_unique_id(), 1);
        let successor = source.successor(TableId(8), source.table_info().clone());
        assert!(successor.shares_unique_id(&source));
        assert_eq!(successor.current_unique_id(), 1);
        assert_eq!(source.next_unique_id(), 2);
        assert_eq!(successor.next_unique_id(), 3);
        assert_eq!(source.current_unique_id(), 3);
        // Not yet written under the successor's own table id.
        assert_eq!(successor.unique_id_to_persist(), Some(3));
    }

    #[test]
    fn test_slots_reused_only_after_reclaim() {
        let source = source();
        let a = source.add_row(row(1));
        let b = source.add_row(row(2));
        assert_ne!(a, b);
        source.reclaim_uncommitted([a]);
        assert_eq!(source.get_row(a), None);
        let c = source.add_row(row(3));
        assert_eq!(c, a);
        // Committed rows are not reclaimed as uncommitted garbage.
        source
            .write_record_state(b, RecordState::CommittedAdded)
            .unwrap();
        source.reclaim_uncommitted([b]);
        assert!(source.get_row(b).is_some());
    }

    #[test]
    fn test_can_compact_threshold() {
        let source = source();
        let config = CompactionConfig {
            dead_ratio: 0.5,
            min_slots: 4,
        };
        let rows: Vec<_> = (0..4).map(|i| source.add_row(row(i))).collect();
        for rn in &rows {
            source
                .write_record_state(*rn, RecordState::CommittedAdded)
                .unwrap();
        }
        assert!(!source.can_compact(&config));
        source
            .write_record_state(rows[0], RecordState::CommittedRemoved)
            .unwrap();
        assert!(!source.can_compact(&config));
        source
            .write_record_state(rows[1], RecordState::CommittedRemoved)
            .unwrap();
        assert!(source.can_compact(&config));
        assert_eq!(source.stats().dead(), 2);
    }

    #[test]
    fn test_restore_rebuilds_heap_and_free_list() {
        let info = source().table_info().clone();
        let restored =
            TableSource::restore(TableId(7), info, vec![(0, row(10)), (3, row(13))], 55);
        let index = restored.create_index_set();
        assert_eq!(index.rows().collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(restored.current_unique_id(), 55);
        assert_eq!(restored.unique_id_to_persist(), None);
        // Holes are reused lowest first.
        assert_eq!(restored.add_row(row(1)), 1);
        assert_eq!(restored.add_row(row(2)), 2);
        assert_eq!(restored.add_row(row(4)), 4);
    }
}
