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
    use crate::system_tables::tables_name;
    use crate::{
        Database, DatabaseConfig, Error, IsolationLevel, JournalEntry, MutableTable, Table,
    };
    use pretty_assertions::assert_eq;
    use tablebox_common::{
        ColumnInfo, DEFAULT_SCHEMA, Field, FieldType, ObjectName, Row, TableInfo,
    };
    use test_case::test_case;

    fn test_db() -> Database {
        Database::open(None, DatabaseConfig::default()).unwrap().0
    }

    fn people_name() -> ObjectName {
        ObjectName::qualified(DEFAULT_SCHEMA, "people")
    }

    fn people() -> TableInfo {
        TableInfo::builder(people_name())
            .column(ColumnInfo::new("id", FieldType::Integer))
            .column(ColumnInfo::new("name", FieldType::String).not_null())
            .column(ColumnInfo::new("age", FieldType::Integer))
            .primary_key("PEOPLE_PK", &["id"])
            .build()
            .unwrap()
    }

    fn person(id: i64, name: &str, age: Option<i64>) -> Row {
        Row::new(vec![Field::Integer(id), Field::from(name), Field::from(age)])
    }

    /// Create `people` holding `count` rows and commit it.
    fn populate(db: &Database, count: i64) {
        let mut tx = db.begin().unwrap();
        tx.tables().create_table(people()).unwrap();
        {
            let mut table = tx.tables().get_mutable_table(&people_name()).unwrap();
            for id in 0..count {
                table
                    .add_row(person(id, &format!("person {id}"), Some(20 + id)))
                    .unwrap();
            }
        }
        assert!(tx.commit().unwrap().is_success());
    }

    fn sorted_values(rows: Vec<(u64, std::sync::Arc<Row>)>) -> Vec<Vec<Field>> {
        let mut values: Vec<Vec<Field>> = rows.into_iter().map(|(_, r)| r.values().to_vec()).collect();
        values.sort();
        values
    }

    #[test]
    fn test_create_and_drop_table() {
        let db = test_db();
        let mut tx = db.begin().unwrap();
        tx.tables().create_table(people()).unwrap();
        assert!(tx.tables_ref().table_exists(&people_name()));
        assert!(tx.commit().unwrap().is_success());

        let mut tx = db.begin().unwrap();
        assert!(tx.tables_ref().get_table_names().contains(&people_name()));
        assert_eq!(tx.tables().drop_table(&people_name()), Ok(true));
        assert_eq!(tx.tables().drop_table(&people_name()), Ok(false));
        assert!(!tx.tables_ref().get_table_names().contains(&people_name()));
        assert!(tx.commit().unwrap().is_success());

        let mut tx = db.begin().unwrap();
        assert!(!tx.tables_ref().table_exists(&people_name()));
        assert!(matches!(
            tx.tables().get_table(&people_name()),
            Err(Error::TableNotFound(_))
        ));
    }

    #[test]
    fn test_create_existing_table() {
        let db = test_db();
        populate(&db, 0);
        let mut tx = db.begin().unwrap();
        assert_eq!(
            tx.tables().create_table(people()),
            Err(Error::TableAlreadyExists(people_name()))
        );
    }

    #[test]
    fn test_journal_records_table_events() {
        let db = test_db();
        let mut tx = db.begin().unwrap();
        tx.tables().create_table(people()).unwrap();
        tx.tables().get_table(&people_name()).unwrap();
        tx.tables().drop_table(&people_name()).unwrap();
        let kinds: Vec<&str> = tx
            .tables_ref()
            .journal()
            .entries()
            .iter()
            .filter(|e| match e {
                JournalEntry::TableCreated { name, .. }
                | JournalEntry::TableDropped { name, .. }
                | JournalEntry::TableAccessed { name, .. }
                | JournalEntry::ConstraintAltered { name, .. } => *name == people_name(),
            })
            .map(|e| match e {
                JournalEntry::TableCreated { .. } => "created",
                JournalEntry::TableDropped { .. } => "dropped",
                JournalEntry::TableAccessed { .. } => "accessed",
                JournalEntry::ConstraintAltered { .. } => "altered",
            })
            .collect();
        assert_eq!(kinds, vec!["created", "accessed", "dropped"]);
    }

    #[test]
    fn test_dynamic_tables_resolve_after_real_ones() {
        let db = test_db();
        let mut tx = db.begin().unwrap();
        let table = tx.tables().get_table(&tables_name()).unwrap();
        assert!(table.is_dynamic());
        assert!(table.row_count() >= 2);

        assert_eq!(
            tx.tables().get_mutable_table(&tables_name()).err(),
            Some(Error::NotMutable(tables_name()))
        );
        let missing = ObjectName::qualified(DEFAULT_SCHEMA, "missing");
        assert_eq!(
            tx.tables().get_table(&missing).err(),
            Some(Error::TableNotFound(missing.clone()))
        );
        assert_eq!(
            tx.tables().get_mutable_table(&missing).err(),
            Some(Error::TableNotFound(missing))
        );
        // Selecting a dynamic table is harmless.
        tx.tables().select_table(&tables_name()).unwrap();
    }

    #[test]
    fn test_table_types() {
        let db = test_db();
        let mut tx = db.begin().unwrap();
        tx.tables().create_table(people()).unwrap();
        let scratch = people().renamed(ObjectName::qualified(DEFAULT_SCHEMA, "scratch"));
        tx.tables().create_temporary_table(scratch).unwrap();
        let tables = tx.tables_ref();
        assert_eq!(tables.get_table_type(&people_name()), Ok("TABLE"));
        assert_eq!(
            tables.get_table_type(&ObjectName::qualified(DEFAULT_SCHEMA, "scratch")),
            Ok("TEMPORARY")
        );
        assert_eq!(
            tables.get_table_type(&ObjectName::qualified("SYSTEM", "SEQUENCE")),
            Ok("SYSTEM TABLE")
        );
        assert_eq!(tables.get_table_type(&tables_name()), Ok("SYSTEM TABLE"));
    }

    #[test]
    fn test_system_tables_lists_visible_tables() {
        let db = test_db();
        let mut tx = db.begin().unwrap();
        tx.tables().create_table(people()).unwrap();
        let table = tx.tables().get_table(&tables_name()).unwrap();
        let listed: Vec<(Field, Field, Field)> = table
            .rows()
            .into_iter()
            .map(|(_, r)| (r[1].clone(), r[2].clone(), r[3].clone()))
            .collect();
        assert!(listed.contains(&(
            Field::from("people"),
            Field::from("TABLE"),
            Field::Integer(3)
        )));
        assert!(listed.contains(&(
            Field::from("TABLES"),
            Field::from("SYSTEM TABLE"),
            Field::Integer(4)
        )));
    }

    #[test]
    fn test_temporary_tables_never_commit() {
        let db = test_db();
        let name = ObjectName::qualified(DEFAULT_SCHEMA, "scratch");
        let mut tx = db.begin().unwrap();
        tx.tables()
            .create_temporary_table(people().renamed(name.clone()))
            .unwrap();
        tx.tables()
            .get_mutable_table(&name)
            .unwrap()
            .add_row(person(1, "a", None))
            .unwrap();
        assert_eq!(tx.tables().get_table(&name).unwrap().row_count(), 1);
        assert!(tx.commit().unwrap().is_success());

        let tx = db.begin().unwrap();
        assert!(!tx.tables_ref().table_exists(&name));
    }

    #[test_case(0 ; "empty table")]
    #[test_case(1 ; "single row")]
    #[test_case(25 ; "many rows")]
    fn test_alter_round_trip(count: i64) {
        let db = test_db();
        populate(&db, count);

        let mut tx = db.begin().unwrap();
        let before = sorted_values(tx.tables().get_table(&people_name()).unwrap().rows());

        let widened = TableInfo::builder(people_name())
            .column(ColumnInfo::new("id", FieldType::Integer))
            .column(ColumnInfo::new("name", FieldType::String).not_null())
            .column(ColumnInfo::new("age", FieldType::Integer))
            .column(ColumnInfo::new("email", FieldType::String).with_default(Field::from("none")))
            .primary_key("PEOPLE_PK", &["id"])
            .build()
            .unwrap();
        tx.tables().alter_table(widened).unwrap();
        {
            let table = tx.tables().get_table(&people_name()).unwrap();
            assert_eq!(table.row_count(), count as usize);
            let email = table.find_column("email").unwrap();
            for rn in table.row_numbers() {
                assert_eq!(table.get_value(rn, email).unwrap(), Field::from("none"));
            }
        }
        assert!(tx.commit().unwrap().is_success());

        let mut tx = db.begin().unwrap();
        tx.tables().alter_table(people()).unwrap();
        assert!(tx.commit().unwrap().is_success());

        let mut tx = db.begin().unwrap();
        let after = sorted_values(tx.tables().get_table(&people_name()).unwrap().rows());
        assert_eq!(after, before);
        assert_eq!(tx.tables_ref().get_table_info(&people_name()), Ok(people()));
    }

    #[test]
    fn test_failed_alter_leaves_table_untouched() {
        let db = test_db();
        let mut tx = db.begin().unwrap();
        tx.tables().create_table(people()).unwrap();
        {
            let mut table = tx.tables().get_mutable_table(&people_name()).unwrap();
            table.add_row(person(1, "ann", Some(30))).unwrap();
            table.add_row(person(2, "ann", None)).unwrap();
        }

        let unique_names = TableInfo::builder(people_name())
            .column(ColumnInfo::new("id", FieldType::Integer))
            .column(ColumnInfo::new("name", FieldType::String).not_null())
            .column(ColumnInfo::new("age", FieldType::Integer))
            .primary_key("PEOPLE_PK", &["id"])
            .unique("PEOPLE_NAME", &["name"])
            .build()
            .unwrap();
        assert!(matches!(
            tx.tables().alter_table(unique_names),
            Err(Error::ConstraintViolation { constraint, .. }) if constraint == "PEOPLE_NAME"
        ));

        let required_age = TableInfo::builder(people_name())
            .column(ColumnInfo::new("id", FieldType::Integer))
            .column(ColumnInfo::new("name", FieldType::String).not_null())
            .column(ColumnInfo::new("age", FieldType::Integer).not_null())
            .primary_key("PEOPLE_PK", &["id"])
            .build()
            .unwrap();
        assert!(matches!(
            tx.tables().alter_table(required_age),
            Err(Error::ConstraintViolation { .. })
        ));

        assert_eq!(tx.tables_ref().get_table_info(&people_name()), Ok(people()));
        assert_eq!(tx.tables().get_table(&people_name()).unwrap().row_count(), 2);
        assert!(tx.commit().unwrap().is_success());
    }

    #[test]
    fn test_compaction_preserves_live_rows() {
        let db = test_db();
        populate(&db, 40);

        let mut tx = db.begin().unwrap();
        {
            let mut table = tx.tables().get_mutable_table(&people_name()).unwrap();
            for rn in table.row_numbers().into_iter().skip(10) {
                table.remove_row(rn).unwrap();
            }
        }
        let before = sorted_values(tx.tables().get_table(&people_name()).unwrap().rows());
        assert_eq!(before.len(), 10);
        assert!(tx.commit().unwrap().is_success());

        let old = db.composite().table_source(&people_name()).unwrap();
        assert_eq!(old.stats().slots, 40);
        assert_eq!(old.stats().committed, 10);

        let mut tx = db.begin().unwrap();
        assert_eq!(tx.tables().compact_table(&people_name()), Ok(true));
        assert!(tx.commit().unwrap().is_success());

        let compacted = db.composite().table_source(&people_name()).unwrap();
        assert_ne!(compacted.table_id(), old.table_id());
        assert_eq!(compacted.stats().slots, 10);

        let mut tx = db.begin().unwrap();
        let after = sorted_values(tx.tables().get_table(&people_name()).unwrap().rows());
        assert_eq!(after, before);
        // Nothing left to reclaim.
        assert_eq!(tx.tables().compact_table(&people_name()), Ok(false));
    }

    #[test]
    fn test_unique_violation_within_transaction() {
        let db = test_db();
        populate(&db, 3);
        let mut tx = db.begin().unwrap();
        let mut table = tx.tables().get_mutable_table(&people_name()).unwrap();
        assert!(matches!(
            table.add_row(person(1, "dup", None)),
            Err(Error::ConstraintViolation { .. })
        ));
        let first = table.row_numbers()[0];
        let collides = person(2, "renamed", None);
        assert!(table.update_row(first, collides).is_err());
        assert_eq!(table.row_count(), 3);
        assert!(table.get_row(first).is_some());

        assert!(matches!(
            table.add_row(Row::new(vec![Field::Integer(9), Field::Null, Field::Null])),
            Err(Error::ConstraintViolation { .. })
        ));
        table.add_row(person(9, "new", None)).unwrap();
        assert_eq!(table.row_count(), 4);
    }

    #[test]
    fn test_assert_constraints() {
        let db = test_db();
        populate(&db, 5);
        let mut tx = db.begin().unwrap();
        tx.tables().assert_constraints(&people_name()).unwrap();
        assert!(tx.tables_ref().journal().entries().iter().any(|e| matches!(
            e,
            JournalEntry::ConstraintAltered { name, .. } if *name == people_name()
        )));
    }

    #[test]
    fn test_read_only_transaction() {
        let db = test_db();
        populate(&db, 2);
        let mut tx = db.begin_with(IsolationLevel::Serializable, true).unwrap();
        assert_eq!(tx.tables().create_table(people()), Err(Error::ReadOnly));
        assert_eq!(tx.tables().drop_table(&people_name()), Err(Error::ReadOnly));
        assert_eq!(tx.tables().get_table(&people_name()).unwrap().row_count(), 2);
        let mut table = tx.tables().get_mutable_table(&people_name()).unwrap();
        assert_eq!(
            table.add_row(person(7, "x", None)).err(),
            Some(Error::ReadOnly)
        );
    }

    #[test]
    fn test_resolve_name_ignoring_case() {
        let db = test_db();
        let mut tx = db.begin().unwrap();
        let upper = ObjectName::qualified(DEFAULT_SCHEMA, "PEOPLE");
        let mixed = ObjectName::qualified(DEFAULT_SCHEMA, "People");
        tx.tables().create_table(people().renamed(upper.clone())).unwrap();

        let query = ObjectName::qualified("app", "people");
        let tables = tx.tables_ref();
        assert_eq!(tables.resolve_name(&query, false), Ok(None));
        assert_eq!(tables.resolve_name(&query, true), Ok(Some(upper.clone())));
        assert_eq!(tables.resolve_name(&upper, false), Ok(Some(upper.clone())));

        tx.tables().create_table(people().renamed(mixed)).unwrap();
        let tables = tx.tables_ref();
        assert_eq!(
            tables.resolve_name(&query, true),
            Err(Error::AmbiguousName(query.clone()))
        );
        // An exact match wins over case-insensitive ones.
        assert_eq!(tables.resolve_name(&upper, true), Ok(Some(upper)));
    }

    #[test]
    fn test_native_unique_ids_survive_rollback() {
        let db = test_db();
        populate(&db, 0);
        let mut tx = db.begin().unwrap();
        let ids: Vec<i64> = (0..3)
            .map(|_| tx.tables().next_unique_id(&people_name()).unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        tx.rollback();

        let mut tx = db.begin().unwrap();
        assert_eq!(tx.tables_ref().current_unique_id(&people_name()), Ok(3));
        assert_eq!(tx.tables().next_unique_id(&people_name()), Ok(4));
        tx.tables().set_unique_id(&people_name(), 100).unwrap();
        assert_eq!(tx.tables().next_unique_id(&people_name()), Ok(101));
    }

    enum Replacement {
        Alter,
        Compact,
    }

    #[test_case(Replacement::Alter ; "alter")]
    #[test_case(Replacement::Compact ; "compact")]
    fn test_replaced_table_keeps_unique_ids(replacement: Replacement) {
        let db = test_db();
        populate(&db, 40);
        let mut tx = db.begin().unwrap();
        {
            let mut table = tx.tables().get_mutable_table(&people_name()).unwrap();
            for rn in table.row_numbers().into_iter().skip(10) {
                table.remove_row(rn).unwrap();
            }
        }
        assert!(tx.commit().unwrap().is_success());

        let mut replacer = db.begin().unwrap();
        match replacement {
            Replacement::Alter => {
                let widened = TableInfo::builder(people_name())
                    .column(ColumnInfo::new("id", FieldType::Integer))
                    .column(ColumnInfo::new("name", FieldType::String).not_null())
                    .column(ColumnInfo::new("age", FieldType::Integer))
                    .column(ColumnInfo::new("nickname", FieldType::String))
                    .primary_key("PEOPLE_PK", &["id"])
                    .build()
                    .unwrap();
                replacer.tables().alter_table(widened).unwrap();
            }
            Replacement::Compact => {
                assert_eq!(replacer.tables().compact_table(&people_name()), Ok(true));
            }
        }

        // Ids drawn from the old source while the replacement is pending.
        let mut drawer = db.begin().unwrap();
        assert_eq!(drawer.tables().next_unique_id(&people_name()), Ok(1));
        assert!(drawer.commit().unwrap().is_success());
        assert_eq!(replacer.tables().next_unique_id(&people_name()), Ok(2));
        assert!(replacer.commit().unwrap().is_success());

        let mut tx = db.begin().unwrap();
        assert_eq!(tx.tables_ref().current_unique_id(&people_name()), Ok(2));
        assert_eq!(tx.tables().next_unique_id(&people_name()), Ok(3));
    }

    #[test]
    fn test_closed_transaction_refuses_work() {
        let db = test_db();
        let mut tx = db.begin().unwrap();
        tx.tables().rollback();
        assert_eq!(
            tx.tables().create_table(people()),
            Err(Error::TransactionClosed)
        );
        assert!(matches!(
            tx.tables().get_table(&tables_name()),
            Err(Error::TransactionClosed)
        ));
    }
}
