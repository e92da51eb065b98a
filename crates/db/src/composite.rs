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

//! The database-wide registry of table sources, and the arbiter of commits.
//!
//! The committed catalog is an immutable `CatalogSnapshot` behind an `ArcSwap`, replaced whole on
//! every commit that changes anything. Commits are serialized by `commit_lock`; the final publish
//! step (index swaps plus the new snapshot) additionally takes `publish_lock` for write, which
//! `begin_transaction` holds for read, so a beginning transaction sees either all of a commit or
//! none of it.

use crate::config::DatabaseConfig;
use crate::provider::{CommitBatch, CounterKey, RowStore, StoreOp};
use crate::sequences::SequenceRegistry;
use crate::sequences::catalog;
use crate::tx_management::{
    CheckFailure, CommitResult, CommitSet, ConflictInfo, ConflictType, Error, IndexSet, IsolationLevel,
    TableManager, TableSource, Timestamp, TxContext, TxId,
};
use arc_swap::ArcSwap;
use minstant::Instant;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tablebox_common::{ObjectName, RecordState, TableId, TableInfo};
use tracing::{debug, error, info, warn};

/// The committed set of tables as of one commit.
#[derive(Clone)]
struct CatalogSnapshot {
    version: Timestamp,
    tables: imbl::OrdMap<ObjectName, Arc<TableSource>>,
}

pub struct Composite {
    config: DatabaseConfig,
    store: Arc<dyn RowStore>,
    next_tx_id: AtomicU64,
    next_table_id: AtomicU32,
    /// Serializes commit processing.
    commit_lock: Mutex<()>,
    publish_lock: RwLock<()>,
    root: ArcSwap<CatalogSnapshot>,
    /// Start timestamps of every open transaction, for garbage collection.
    open_transactions: Mutex<BTreeMap<TxId, Timestamp>>,
    sequences: SequenceRegistry,
    closed: AtomicBool,
}

impl Composite {
    fn new(
        store: Arc<dyn RowStore>,
        config: DatabaseConfig,
        tables: imbl::OrdMap<ObjectName, Arc<TableSource>>,
        next_table_id: u32,
    ) -> Self {
        Self {
            config,
            store,
            next_tx_id: AtomicU64::new(1),
            next_table_id: AtomicU32::new(next_table_id),
            commit_lock: Mutex::new(()),
            publish_lock: RwLock::new(()),
            root: ArcSwap::from_pointee(CatalogSnapshot {
                version: Timestamp(0),
                tables,
            }),
            open_transactions: Mutex::new(BTreeMap::new()),
            sequences: SequenceRegistry::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn exists(store: &dyn RowStore) -> Result<bool, Error> {
        store.is_initialized()
    }

    /// Initialize an empty database in `store`, including the sequence catalog tables.
    pub fn create(store: Arc<dyn RowStore>, config: DatabaseConfig) -> Result<Arc<Self>, Error> {
        if store.is_initialized()? {
            return Err(Error::DatabaseExists);
        }
        if config.read_only {
            return Err(Error::ReadOnly);
        }
        store.initialize()?;
        let composite = Arc::new(Self::new(store, config, imbl::OrdMap::new(), 1));
        composite.bootstrap()?;
        info!("Created new database");
        Ok(composite)
    }

    fn bootstrap(self: &Arc<Self>) -> Result<(), Error> {
        let mut tables = TableManager::begin(self.clone(), IsolationLevel::Serializable, false)?;
        tables.create_table(catalog::sequence_info_table()?)?;
        tables.create_table(catalog::sequence_table()?)?;
        match tables.commit()? {
            CommitResult::Success { .. } => Ok(()),
            CommitResult::ConflictRetry { conflict_info } => Err(Error::Conflict(conflict_info)),
        }
    }

    /// Restore every committed table from `store`.
    pub fn open(store: Arc<dyn RowStore>, config: DatabaseConfig) -> Result<Arc<Self>, Error> {
        if !store.is_initialized()? {
            return Err(Error::DatabaseNotFound);
        }
        let mut tables = imbl::OrdMap::new();
        let mut max_table_id = 0;
        let mut row_count = 0;
        for stored in store.load_tables()? {
            let rows = store.load_rows(stored.table_id)?;
            row_count += rows.len();
            let unique_id = store
                .load_counter(CounterKey::UniqueId(stored.table_id))?
                .unwrap_or(0);
            max_table_id = max_table_id.max(stored.table_id.0);
            let source = TableSource::restore(stored.table_id, stored.info, rows, unique_id);
            tables.insert(source.name().clone(), Arc::new(source));
        }
        let stored_next = store.load_counter(CounterKey::NextTableId)?.unwrap_or(0);
        let next_table_id = u32::try_from(stored_next)
            .map_err(|_| Error::EncodingFailure(format!("next table id {stored_next}")))?
            .max(max_table_id + 1);
        info!(
            "Opened database with {} tables ({row_count} rows), next table id {next_table_id}",
            tables.len()
        );
        Ok(Arc::new(Self::new(store, config, tables, next_table_id)))
    }

    /// Returns the composite and whether it was freshly created.
    pub fn open_or_create(
        store: Arc<dyn RowStore>,
        config: DatabaseConfig,
    ) -> Result<(Arc<Self>, bool), Error> {
        if Self::exists(store.as_ref())? {
            Ok((Self::open(store, config)?, false))
        } else {
            Ok((Self::create(store, config)?, true))
        }
    }

    /// Persist the table counters and flush the store. Further transactions are refused.
    pub fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let open = self.open_transactions.lock().len();
        if open > 0 {
            warn!("Closing database with {open} transactions still open");
        }
        let _commit_guard = self.commit_lock.lock();
        let root = self.root.load_full();
        if !self.config.read_only {
            let mut batch = CommitBatch::new(root.version);
            let counters = Self::stage_counters(&root, &[], &mut batch);
            batch.push(StoreOp::PutCounter(
                CounterKey::NextTableId,
                i64::from(self.next_table_id.load(Ordering::SeqCst)),
            ));
            self.store.write_batch(batch)?;
            for (source, value) in counters {
                source.mark_unique_id_persisted(value);
            }
        }
        self.store.flush()?;
        info!("Closed database at version {}", root.version.0);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RowStore> {
        &self.store
    }

    pub fn sequences(&self) -> &SequenceRegistry {
        &self.sequences
    }

    /// Timestamp of the latest commit.
    pub fn version(&self) -> Timestamp {
        self.root.load().version
    }

    pub fn table_names(&self) -> Vec<ObjectName> {
        self.root.load().tables.keys().cloned().collect()
    }

    /// The committed source currently registered under `name`.
    pub fn table_source(&self, name: &ObjectName) -> Option<Arc<TableSource>> {
        self.root.load().tables.get(name).cloned()
    }

    pub fn open_transaction_count(&self) -> usize {
        self.open_transactions.lock().len()
    }

    /// Register a transaction and snapshot every committed table's indexes for it.
    pub(crate) fn begin_transaction(
        &self,
        isolation: IsolationLevel,
        read_only: bool,
    ) -> Result<(TxContext, Vec<(Arc<TableSource>, IndexSet)>), Error> {
        if self.is_closed() {
            return Err(Error::DatabaseClosed);
        }
        let _publish = self.publish_lock.read();
        let root = self.root.load();
        let ctx = TxContext {
            id: TxId(self.next_tx_id.fetch_add(1, Ordering::SeqCst)),
            start: root.version,
            isolation,
            read_only: read_only || self.config.read_only,
        };
        let tables = root
            .tables
            .values()
            .map(|source| (source.clone(), source.create_index_set()))
            .collect();
        self.open_transactions.lock().insert(ctx.id, ctx.start);
        Ok((ctx, tables))
    }

    pub(crate) fn end_transaction(&self, id: TxId) {
        self.open_transactions.lock().remove(&id);
        self.collect_garbage();
    }

    /// Reclaim committed-removed rows that no open transaction can still see. Returns how many.
    pub fn collect_garbage(&self) -> usize {
        // Root first: a transaction missing from the open set cannot have started before it.
        let root = self.root.load_full();
        let oldest = self.open_transactions.lock().values().min().copied();
        let horizon = oldest.unwrap_or(root.version);
        root.tables
            .values()
            .map(|source| source.reclaim_removed(horizon))
            .sum()
    }

    pub(crate) fn create_table_source(&self, info: TableInfo, temporary: bool) -> Arc<TableSource> {
        let table_id = TableId(self.next_table_id.fetch_add(1, Ordering::SeqCst));
        Arc::new(TableSource::new(table_id, info, temporary))
    }

    /// An empty source that replaces `source` under a new table id and `info`, sharing its
    /// unique-id counter.
    pub(crate) fn create_successor_source(
        &self,
        source: &TableSource,
        info: TableInfo,
    ) -> Arc<TableSource> {
        let table_id = TableId(self.next_table_id.fetch_add(1, Ordering::SeqCst));
        Arc::new(source.successor(table_id, info))
    }

    /// A fresh source holding copies of exactly the rows `index` sees, with the same schema and
    /// unique-id counter.
    pub(crate) fn copy_source_table(
        &self,
        source: &Arc<TableSource>,
        index: &IndexSet,
    ) -> Result<Arc<TableSource>, Error> {
        let copy = self.create_successor_source(source, source.table_info().clone());
        for rn in index.rows() {
            let row = source.get_row(rn).ok_or_else(|| {
                Error::Invariant(format!("{} row {rn} indexed but missing", source.name()))
            })?;
            let new_rn = copy.add_row(row.as_ref().clone());
            copy.write_record_state(new_rn, RecordState::CommittedAdded)?;
        }
        copy.build_indexes();
        Ok(copy)
    }

    /// Table-level checks against everything committed since the transaction began.
    fn check_tables(root: &CatalogSnapshot, set: &CommitSet) -> Result<(), ConflictInfo> {
        let start = set.tx.start;
        let is_current = |source: &Arc<TableSource>| {
            root.tables
                .get(source.name())
                .is_some_and(|current| Arc::ptr_eq(current, source))
        };
        let created_here = |source: &Arc<TableSource>| set.created.iter().any(|c| Arc::ptr_eq(c, source));
        let dropped_here = |source: &Arc<TableSource>| set.dropped.iter().any(|d| Arc::ptr_eq(d, source));

        for source in &set.dropped {
            if !is_current(source) {
                return Err(ConflictInfo::new(source.name(), ConflictType::TableDropped));
            }
            if source.last_modified() > start {
                return Err(ConflictInfo::new(source.name(), ConflictType::TableModified));
            }
        }
        for source in &set.created {
            if let Some(current) = root.tables.get(source.name())
                && !dropped_here(current)
            {
                return Err(ConflictInfo::new(source.name(), ConflictType::TableCreated));
            }
        }
        for (source, _) in &set.written {
            if !created_here(source) && !is_current(source) {
                return Err(ConflictInfo::new(source.name(), ConflictType::TableDropped));
            }
        }
        if set.tx.isolation == IsolationLevel::Serializable {
            for source in &set.selected {
                if created_here(source) || dropped_here(source) {
                    continue;
                }
                if !is_current(source) {
                    return Err(ConflictInfo::new(source.name(), ConflictType::TableDropped));
                }
                if source.last_modified() > start {
                    return Err(ConflictInfo::new(source.name(), ConflictType::TableModified)
                        .with_detail(format!(
                            "read at {}, changed at {}",
                            start.0,
                            source.last_modified().0
                        )));
                }
            }
        }
        Ok(())
    }

    /// Counter writes for every surviving committed table whose unique id moved.
    fn stage_counters(
        root: &CatalogSnapshot,
        dropped: &[Arc<TableSource>],
        batch: &mut CommitBatch,
    ) -> Vec<(Arc<TableSource>, i64)> {
        let mut staged = vec![];
        for source in root.tables.values() {
            if dropped.iter().any(|d| Arc::ptr_eq(d, source)) {
                continue;
            }
            if let Some(value) = source.unique_id_to_persist() {
                batch.push(StoreOp::PutCounter(
                    CounterKey::UniqueId(source.table_id()),
                    value,
                ));
                staged.push((source.clone(), value));
            }
        }
        staged
    }

    /// Write the unique-id counters of `sources` outside a commit. A source since replaced by a
    /// successor sharing its counter is written under the successor's id; a dropped one is
    /// skipped.
    pub(crate) fn persist_counters(&self, sources: &[Arc<TableSource>]) -> Result<(), Error> {
        if self.is_closed() || self.config.read_only {
            return Ok(());
        }
        let _commit_guard = self.commit_lock.lock();
        let root = self.root.load_full();
        let mut batch = CommitBatch::new(root.version);
        let mut staged: Vec<(Arc<TableSource>, i64)> = vec![];
        for source in sources {
            let Some(current) = root.tables.get(source.name()) else {
                continue;
            };
            if !current.shares_unique_id(source) || staged.iter().any(|(s, _)| Arc::ptr_eq(s, current))
            {
                continue;
            }
            if let Some(value) = current.unique_id_to_persist() {
                batch.push(StoreOp::PutCounter(
                    CounterKey::UniqueId(current.table_id()),
                    value,
                ));
                staged.push((current.clone(), value));
            }
        }
        if batch.is_empty() {
            return Ok(());
        }
        self.store.write_batch(batch)?;
        for (source, value) in staged {
            source.mark_unique_id_persisted(value);
        }
        Ok(())
    }

    /// Check a transaction's changes against the latest committed state and, if nothing
    /// conflicts, write them to the store and publish them.
    pub(crate) fn commit(&self, set: CommitSet) -> Result<CommitResult, Error> {
        if self.is_closed() {
            return Err(Error::DatabaseClosed);
        }
        let tx = set.tx;
        if !set.has_writes() {
            return Ok(CommitResult::Success {
                mutations_made: false,
                timestamp: tx.start.0,
            });
        }
        if tx.read_only {
            return Err(Error::ReadOnly);
        }

        let start_time = Instant::now();
        let _commit_guard = self.commit_lock.lock();
        let root = self.root.load_full();

        // Nothing committed since this transaction began: its snapshot is still current.
        let skip_conflict_check = root.version == tx.start;
        if !skip_conflict_check && let Err(conflict_info) = Self::check_tables(&root, &set) {
            warn!("Transaction conflict during commit of {}: {}", tx.id, conflict_info);
            return Ok(CommitResult::ConflictRetry { conflict_info });
        }

        let mut checks = Vec::with_capacity(set.written.len());
        for (source, journal) in &set.written {
            let created = set.created.iter().any(|c| Arc::ptr_eq(c, source));
            if journal.is_empty() && !created {
                continue;
            }
            let mut check = source.begin_check(created);
            match check.check(journal) {
                Ok(()) => checks.push(check),
                Err(CheckFailure::Conflict(conflict_info)) => {
                    warn!("Transaction conflict during commit of {}: {}", tx.id, conflict_info);
                    return Ok(CommitResult::ConflictRetry { conflict_info });
                }
                Err(CheckFailure::Failed(e)) => return Err(e),
            }
        }

        let ts = Timestamp(root.version.0 + 1);
        let mut batch = CommitBatch::new(ts);
        for source in &set.dropped {
            batch.push(StoreOp::RemoveTable(source.table_id()));
        }
        for check in &checks {
            check.stage(&mut batch);
        }
        let counters = Self::stage_counters(&root, &set.dropped, &mut batch);
        if !set.created.is_empty() {
            batch.push(StoreOp::PutCounter(
                CounterKey::NextTableId,
                i64::from(self.next_table_id.load(Ordering::SeqCst)),
            ));
        }
        let op_count = batch.len();
        let write_start = Instant::now();
        if let Err(e) = self.store.write_batch(batch) {
            error!("Failed to write commit batch for {} (ts {}): {e}", tx.id, ts.0);
            return Err(e);
        }
        let write_elapsed = write_start.elapsed();

        {
            let _publish = self.publish_lock.write();
            for check in checks {
                check.publish(ts);
            }
            for (source, value) in counters {
                source.mark_unique_id_persisted(value);
            }
            let mut tables = root.tables.clone();
            for source in &set.dropped {
                source.mark_dropped(ts);
                if tables
                    .get(source.name())
                    .is_some_and(|current| Arc::ptr_eq(current, source))
                {
                    tables.remove(source.name());
                }
            }
            for source in &set.created {
                tables.insert(source.name().clone(), source.clone());
            }
            self.root.store(Arc::new(CatalogSnapshot {
                version: ts,
                tables,
            }));
        }

        let elapsed = start_time.elapsed();
        if elapsed > self.config.slow_commit_threshold() {
            warn!(
                "Slow commit: {} took {:.2}s ({op_count} ops, store write {:.2}s, ts {})",
                tx.id,
                elapsed.as_secs_f32(),
                write_elapsed.as_secs_f32(),
                ts.0
            );
        }
        debug!(
            "Committed {} at ts {} ({} created, {} dropped, {op_count} ops)",
            tx.id,
            ts.0,
            set.created.len(),
            set.dropped.len()
        );
        Ok(CommitResult::Success {
            mutations_made: true,
            timestamp: ts.0,
        })
    }
}

impl Drop for Composite {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Failed to close database cleanly: {e}");
        }
    }
}
