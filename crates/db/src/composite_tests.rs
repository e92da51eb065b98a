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

#[cfg(test)]
mod tests {
    use crate::{
        CommitResult, Composite, ConflictType, Database, DatabaseConfig, Error, IsolationLevel,
        MemoryStore, MutableTable, RowStore, SequenceInfo, Table,
    };
    use std::sync::Arc;
    use tablebox_common::{
        ColumnInfo, DEFAULT_SCHEMA, Field, FieldType, ObjectName, Row, TableInfo,
    };
    use tracing_test::traced_test;

    fn test_db() -> Database {
        Database::open(None, DatabaseConfig::default()).unwrap().0
    }

    fn accounts_name() -> ObjectName {
        ObjectName::qualified(DEFAULT_SCHEMA, "accounts")
    }

    fn accounts() -> TableInfo {
        TableInfo::builder(accounts_name())
            .column(ColumnInfo::new("id", FieldType::Integer))
            .column(ColumnInfo::new("balance", FieldType::Integer).not_null())
            .primary_key("ACCOUNTS_PK", &["id"])
            .build()
            .unwrap()
    }

    fn account(id: i64, balance: i64) -> Row {
        Row::new(vec![Field::Integer(id), Field::Integer(balance)])
    }

    fn populate(db: &Database, count: i64) {
        let mut tx = db.begin().unwrap();
        tx.tables().create_table(accounts()).unwrap();
        {
            let mut table = tx.tables().get_mutable_table(&accounts_name()).unwrap();
            for id in 0..count {
                table.add_row(account(id, 100)).unwrap();
            }
        }
        assert!(tx.commit().unwrap().is_success());
    }

    fn row_count(db: &Database) -> usize {
        let mut tx = db.begin().unwrap();
        tx.tables().get_table(&accounts_name()).unwrap().row_count()
    }

    fn conflict_type(result: CommitResult) -> ConflictType {
        match result {
            CommitResult::ConflictRetry { conflict_info } => conflict_info.conflict_type,
            CommitResult::Success { .. } => panic!("expected a conflict"),
        }
    }

    #[test]
    fn test_snapshot_isolation() {
        let db = test_db();
        populate(&db, 3);

        let mut reader = db.begin_with(IsolationLevel::Snapshot, true).unwrap();
        let mut writer = db.begin().unwrap();
        writer
            .tables()
            .get_mutable_table(&accounts_name())
            .unwrap()
            .add_row(account(10, 5))
            .unwrap();
        assert!(writer.commit().unwrap().is_success());

        assert_eq!(
            reader.tables().get_table(&accounts_name()).unwrap().row_count(),
            3
        );
        assert_eq!(row_count(&db), 4);
    }

    #[test]
    fn test_uncommitted_rows_are_private() {
        let db = test_db();
        populate(&db, 1);
        let mut a = db.begin().unwrap();
        a.tables()
            .get_mutable_table(&accounts_name())
            .unwrap()
            .add_row(account(5, 1))
            .unwrap();
        assert_eq!(row_count(&db), 1);
        assert_eq!(a.tables().get_table(&accounts_name()).unwrap().row_count(), 2);
    }

    #[test]
    fn test_select_and_mutate_conflict() {
        let db = test_db();
        populate(&db, 2);

        let mut a = db.begin().unwrap();
        let mut b = db.begin().unwrap();
        for (tx, id) in [(&mut a, 20), (&mut b, 21)] {
            tx.tables().select_table(&accounts_name()).unwrap();
            tx.tables()
                .get_mutable_table(&accounts_name())
                .unwrap()
                .add_row(account(id, 0))
                .unwrap();
        }
        assert!(a.commit().unwrap().is_success());
        assert_eq!(conflict_type(b.commit().unwrap()), ConflictType::TableModified);
        assert_eq!(row_count(&db), 3);
    }

    #[test]
    fn test_snapshot_isolation_ignores_selects() {
        let db = test_db();
        populate(&db, 2);

        let mut a = db.begin_with(IsolationLevel::Snapshot, false).unwrap();
        let mut b = db.begin_with(IsolationLevel::Snapshot, false).unwrap();
        for (tx, id) in [(&mut a, 20), (&mut b, 21)] {
            tx.tables().select_table(&accounts_name()).unwrap();
            tx.tables()
                .get_mutable_table(&accounts_name())
                .unwrap()
                .add_row(account(id, 0))
                .unwrap();
        }
        assert!(a.commit().unwrap().is_success());
        assert!(b.commit().unwrap().is_success());
        assert_eq!(row_count(&db), 4);
    }

    #[test]
    fn test_disjoint_inserts_both_commit() {
        let db = test_db();
        populate(&db, 0);

        let mut a = db.begin().unwrap();
        let mut b = db.begin().unwrap();
        a.tables()
            .get_mutable_table(&accounts_name())
            .unwrap()
            .add_row(account(1, 0))
            .unwrap();
        b.tables()
            .get_mutable_table(&accounts_name())
            .unwrap()
            .add_row(account(2, 0))
            .unwrap();
        assert!(a.commit().unwrap().is_success());
        assert!(b.commit().unwrap().is_success());
        assert_eq!(row_count(&db), 2);
    }

    #[test]
    fn test_remove_remove_conflict() {
        let db = test_db();
        populate(&db, 2);

        let mut a = db.begin_with(IsolationLevel::Snapshot, false).unwrap();
        let mut b = db.begin_with(IsolationLevel::Snapshot, false).unwrap();
        for tx in [&mut a, &mut b] {
            let mut table = tx.tables().get_mutable_table(&accounts_name()).unwrap();
            let first = table.row_numbers()[0];
            table.remove_row(first).unwrap();
        }
        assert!(a.commit().unwrap().is_success());
        assert_eq!(conflict_type(b.commit().unwrap()), ConflictType::RowRemoved);
        assert_eq!(row_count(&db), 1);
    }

    #[test]
    fn test_update_update_conflict() {
        let db = test_db();
        populate(&db, 1);

        let mut a = db.begin_with(IsolationLevel::Snapshot, false).unwrap();
        let mut b = db.begin_with(IsolationLevel::Snapshot, false).unwrap();
        for (tx, balance) in [(&mut a, 50), (&mut b, 150)] {
            let mut table = tx.tables().get_mutable_table(&accounts_name()).unwrap();
            let rn = table.row_numbers()[0];
            table.update_row(rn, account(0, balance)).unwrap();
        }
        assert!(a.commit().unwrap().is_success());
        assert_eq!(conflict_type(b.commit().unwrap()), ConflictType::RowRemoved);

        let mut tx = db.begin().unwrap();
        let table = tx.tables().get_table(&accounts_name()).unwrap();
        let rn = table.row_numbers()[0];
        assert_eq!(table.get_value(rn, 1), Ok(Field::Integer(50)));
    }

    #[test]
    fn test_unique_conflict_at_commit() {
        let db = test_db();
        populate(&db, 0);

        let mut a = db.begin().unwrap();
        let mut b = db.begin().unwrap();
        for tx in [&mut a, &mut b] {
            tx.tables()
                .get_mutable_table(&accounts_name())
                .unwrap()
                .add_row(account(7, 0))
                .unwrap();
        }
        assert!(a.commit().unwrap().is_success());
        assert_eq!(
            conflict_type(b.commit().unwrap()),
            ConflictType::UniqueViolation
        );
        assert_eq!(row_count(&db), 1);
    }

    #[test]
    fn test_drop_conflicts_with_writer() {
        let db = test_db();
        populate(&db, 1);

        let mut dropper = db.begin().unwrap();
        let mut writer = db.begin().unwrap();
        assert_eq!(dropper.tables().drop_table(&accounts_name()), Ok(true));
        writer
            .tables()
            .get_mutable_table(&accounts_name())
            .unwrap()
            .add_row(account(3, 0))
            .unwrap();
        assert!(dropper.commit().unwrap().is_success());
        assert_eq!(
            conflict_type(writer.commit().unwrap()),
            ConflictType::TableDropped
        );
        let tx = db.begin().unwrap();
        assert!(!tx.tables_ref().table_exists(&accounts_name()));
    }

    #[test]
    fn test_concurrent_create_conflicts() {
        let db = test_db();
        let mut a = db.begin().unwrap();
        let mut b = db.begin().unwrap();
        a.tables().create_table(accounts()).unwrap();
        b.tables().create_table(accounts()).unwrap();
        assert!(a.commit().unwrap().is_success());
        assert!(!b.commit().unwrap().is_success());
    }

    #[test]
    fn test_read_only_commit_is_trivial() {
        let db = test_db();
        populate(&db, 1);
        let before = db.composite().version();
        let mut tx = db.begin().unwrap();
        tx.tables().get_table(&accounts_name()).unwrap();
        assert_eq!(
            tx.commit(),
            Ok(CommitResult::Success {
                mutations_made: false,
                timestamp: before.0,
            })
        );
        assert_eq!(db.composite().version(), before);
    }

    #[test]
    fn test_rollback_discards_rows() {
        let db = test_db();
        populate(&db, 2);
        let mut tx = db.begin().unwrap();
        {
            let mut table = tx.tables().get_mutable_table(&accounts_name()).unwrap();
            table.add_row(account(50, 0)).unwrap();
            let first = table.row_numbers()[0];
            table.remove_row(first).unwrap();
        }
        tx.rollback();

        assert_eq!(row_count(&db), 2);
        let stats = db.composite().table_source(&accounts_name()).unwrap().stats();
        assert_eq!(stats.uncommitted, 0);
        assert_eq!(stats.committed, 2);
    }

    #[test]
    fn test_dropped_transaction_rolls_back() {
        let db = test_db();
        populate(&db, 0);
        {
            let mut tx = db.begin().unwrap();
            tx.tables()
                .get_mutable_table(&accounts_name())
                .unwrap()
                .add_row(account(1, 1))
                .unwrap();
        }
        assert_eq!(row_count(&db), 0);
        assert_eq!(db.composite().open_transaction_count(), 0);
    }

    #[test]
    fn test_gc_waits_for_open_snapshots() {
        let db = test_db();
        populate(&db, 5);

        let mut reader = db.begin_with(IsolationLevel::Snapshot, true).unwrap();
        let mut writer = db.begin().unwrap();
        {
            let mut table = writer.tables().get_mutable_table(&accounts_name()).unwrap();
            for rn in table.row_numbers() {
                table.remove_row(rn).unwrap();
            }
        }
        assert!(writer.commit().unwrap().is_success());

        let source = db.composite().table_source(&accounts_name()).unwrap();
        assert_eq!(source.stats().removed, 5);
        let table = reader.tables().get_table(&accounts_name()).unwrap();
        assert_eq!(table.row_count(), 5);
        for rn in table.row_numbers() {
            assert_eq!(table.get_value(rn, 1), Ok(Field::Integer(100)));
        }
        drop(reader);

        assert_eq!(source.stats().removed, 0);
        assert_eq!(source.stats().dead(), 5);
        assert_eq!(db.composite().collect_garbage(), 0);
    }

    #[test]
    fn test_reopen_memory_store() {
        let store = Arc::new(MemoryStore::new());
        let (db, fresh) =
            Database::open_with_store(store.clone(), DatabaseConfig::default()).unwrap();
        assert!(fresh);
        populate(&db, 4);
        let mut tx = db.begin().unwrap();
        for _ in 0..3 {
            tx.tables().next_unique_id(&accounts_name()).unwrap();
        }
        tx.rollback();
        let table_id = db.composite().table_source(&accounts_name()).unwrap().table_id();
        db.close().unwrap();
        assert!(matches!(db.begin(), Err(Error::DatabaseClosed)));
        drop(db);

        let (db, fresh) =
            Database::open_with_store(store.clone(), DatabaseConfig::default()).unwrap();
        assert!(!fresh);
        assert_eq!(store.row_count(table_id), 4);
        assert_eq!(row_count(&db), 4);

        let mut tx = db.begin().unwrap();
        assert_eq!(tx.tables_ref().current_unique_id(&accounts_name()), Ok(3));
        let other = accounts().renamed(ObjectName::qualified(DEFAULT_SCHEMA, "other"));
        tx.tables().create_table(other).unwrap();
        assert!(tx.commit().unwrap().is_success());
        let other_id = db
            .composite()
            .table_source(&ObjectName::qualified(DEFAULT_SCHEMA, "other"))
            .unwrap()
            .table_id();
        assert!(other_id > table_id);
    }

    #[test]
    fn test_reopen_fjall_store() {
        let dir = tempfile::tempdir().unwrap();
        let seq = ObjectName::qualified(DEFAULT_SCHEMA, "invoice_numbers");
        {
            let (db, fresh) = Database::open(Some(dir.path()), DatabaseConfig::default()).unwrap();
            assert!(fresh);
            populate(&db, 10);
            let mut tx = db.begin().unwrap();
            tx.create_sequence(SequenceInfo::custom(seq.clone()).with_cache(5))
                .unwrap();
            assert!(tx.commit().unwrap().is_success());

            let mut tx = db.begin().unwrap();
            for expected in 1..=3 {
                assert_eq!(tx.next_sequence_value(&seq), Ok(expected));
            }
            db.close().unwrap();
        }

        let (db, fresh) = Database::open(Some(dir.path()), DatabaseConfig::default()).unwrap();
        assert!(!fresh);
        assert_eq!(row_count(&db), 10);
        let mut tx = db.begin().unwrap();
        // The whole reservation is skipped, never reissued.
        assert_eq!(tx.next_sequence_value(&seq), Ok(6));
    }

    #[test]
    fn test_create_and_open_preconditions() {
        let store: Arc<dyn RowStore> = Arc::new(MemoryStore::new());
        assert!(matches!(
            Composite::open(store.clone(), DatabaseConfig::default()),
            Err(Error::DatabaseNotFound)
        ));
        let read_only = DatabaseConfig {
            read_only: true,
            ..Default::default()
        };
        assert!(matches!(
            Composite::create(store.clone(), read_only.clone()),
            Err(Error::ReadOnly)
        ));
        let composite = Composite::create(store.clone(), DatabaseConfig::default()).unwrap();
        composite.close().unwrap();
        drop(composite);
        assert!(matches!(
            Composite::create(store.clone(), DatabaseConfig::default()),
            Err(Error::DatabaseExists)
        ));

        let (db, _) = Database::open_with_store(store, read_only).unwrap();
        let mut tx = db.begin().unwrap();
        assert!(tx.context().read_only);
        assert_eq!(tx.tables().create_table(accounts()), Err(Error::ReadOnly));
    }

    #[test]
    #[traced_test]
    fn test_conflicts_are_logged() {
        let db = test_db();
        populate(&db, 0);
        let renamed = accounts().renamed(ObjectName::qualified(DEFAULT_SCHEMA, "x"));
        let mut a = db.begin().unwrap();
        let mut b = db.begin().unwrap();
        a.tables().create_table(renamed.clone()).unwrap();
        b.tables().create_table(renamed).unwrap();
        assert!(a.commit().unwrap().is_success());
        assert!(!b.commit().unwrap().is_success());
        assert!(logs_contain("Transaction conflict during commit"));
    }
}
