use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sqlbridge::merge::{InsertOrIgnoreCopier, MergeTableMapping, TableCopier, MERGE_ALIAS};
use sqlbridge::{Connection, Error, MergeOptions, Merger};

use crate::common::{column_strings, count, create_database_file, maybe_setup_tracing, TempDatabase};

const NOTES: &str = "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)";

fn attached(conn: &Connection) -> Vec<String> {
    conn.attached_databases()
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect()
}

fn recording_merger() -> (Merger, Arc<Mutex<Vec<String>>>) {
    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = failures.clone();
    let merger = Merger::default().on_failure(move |e: &Error| sink.lock().push(e.to_string()));
    (merger, failures)
}

#[test]
fn test_merge_is_idempotent() {
    maybe_setup_tracing();
    let tmp = TempDatabase::new_with_schema(NOTES);
    let conn = tmp.connection();
    conn.exec_sql("INSERT INTO notes (id, body) VALUES (1, 'target')", ())
        .unwrap();
    let source = create_database_file(
        tmp.dir(),
        "source.db",
        "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);
         INSERT INTO notes VALUES (1, 'source'), (2, 'two'), (3, 'three');",
    );

    let merger: Merger = Merger::default();
    assert!(merger.merge(conn, &source, &MergeOptions::new()));
    let once = column_strings(conn, "SELECT id || ':' || body FROM notes ORDER BY id");
    assert_eq!(once, vec!["1:target", "2:two", "3:three"]);

    assert!(merger.merge(conn, &source, &MergeOptions::new()));
    let twice = column_strings(conn, "SELECT id || ':' || body FROM notes ORDER BY id");
    assert_eq!(once, twice);
    assert_eq!(attached(conn), vec!["main"]);
}

#[test]
fn test_include_and_rename_select_tables() {
    let tmp = TempDatabase::new_with_schema(
        "CREATE TABLE a (id INTEGER PRIMARY KEY);
         CREATE TABLE b (id INTEGER PRIMARY KEY);
         CREATE TABLE c (id INTEGER PRIMARY KEY);",
    );
    let conn = tmp.connection();
    let source = create_database_file(
        tmp.dir(),
        "source.db",
        "CREATE TABLE a (id INTEGER PRIMARY KEY);
         CREATE TABLE b (id INTEGER PRIMARY KEY);
         CREATE TABLE x (id INTEGER PRIMARY KEY);
         INSERT INTO a VALUES (1);
         INSERT INTO b VALUES (1), (2);
         INSERT INTO x VALUES (1), (2), (3);",
    );
    let options = MergeOptions::new().include(["a", "x"]).rename("x", "c");
    assert!(Merger::new(InsertOrIgnoreCopier).merge(conn, &source, &options));
    assert_eq!(count(conn, "a"), 1);
    assert_eq!(count(conn, "b"), 0);
    assert_eq!(count(conn, "c"), 3);
}

#[test]
fn test_missing_target_table_fails_without_changes() {
    let tmp = TempDatabase::new_with_schema(NOTES);
    let conn = tmp.connection();
    let source = create_database_file(
        tmp.dir(),
        "source.db",
        "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);
         CREATE TABLE extra (id INTEGER PRIMARY KEY);
         INSERT INTO notes VALUES (1, 'x');",
    );
    let (merger, failures) = recording_merger();
    assert!(!merger.merge(conn, &source, &MergeOptions::new()));
    assert_eq!(count(conn, "notes"), 0);
    assert_eq!(attached(conn), vec!["main"]);
    let failures = failures.lock();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("extra"), "{}", failures[0]);
}

#[test]
fn test_missing_source_file_is_not_created() {
    let tmp = TempDatabase::new_with_schema(NOTES);
    let source = tmp.dir().join("absent.db");
    let (merger, failures) = recording_merger();
    assert!(!merger.merge(tmp.connection(), &source, &MergeOptions::new()));
    assert!(!source.exists());
    assert_eq!(failures.lock().len(), 1);
}

#[test]
fn test_copy_failure_rolls_back_every_table() {
    struct FailOn {
        table: &'static str,
        calls: AtomicUsize,
    }

    impl TableCopier for FailOn {
        fn copy_table(&self, conn: &Connection, mapping: &MergeTableMapping) -> sqlbridge::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if mapping.source == self.table {
                return Err(Error::Merge(format!("refusing {}", mapping.source)));
            }
            InsertOrIgnoreCopier.copy_table(conn, mapping)
        }
    }

    let tmp = TempDatabase::new_with_schema(
        "CREATE TABLE first (id INTEGER PRIMARY KEY);
         CREATE TABLE second (id INTEGER PRIMARY KEY);",
    );
    let conn = tmp.connection();
    let source = create_database_file(
        tmp.dir(),
        "source.db",
        "CREATE TABLE first (id INTEGER PRIMARY KEY);
         CREATE TABLE second (id INTEGER PRIMARY KEY);
         INSERT INTO first VALUES (1), (2);
         INSERT INTO second VALUES (1);",
    );
    let failures = Arc::new(AtomicUsize::new(0));
    let seen = failures.clone();
    let merger = Merger::new(FailOn {
        table: "second",
        calls: AtomicUsize::new(0),
    })
    .on_failure(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    assert!(!merger.merge(conn, &source, &MergeOptions::new()));
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(count(conn, "first"), 0);
    assert!(!conn.in_transaction());
    assert!(conn.is_auto_commit().unwrap());
    assert_eq!(attached(conn), vec!["main"]);
}

#[test]
fn test_shared_columns_and_system_tables() {
    let tmp = TempDatabase::new_with_schema(
        "CREATE TABLE people (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, nickname TEXT)",
    );
    let conn = tmp.connection();
    let source = create_database_file(
        tmp.dir(),
        "source.db",
        "CREATE TABLE people (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, age INTEGER);
         CREATE TABLE android_metadata (locale TEXT);
         INSERT INTO android_metadata VALUES ('en_US');
         INSERT INTO people (name, age) VALUES ('ann', 30), ('bob', 40);",
    );
    // android_metadata and sqlite_sequence are never merged
    assert!(Merger::new(InsertOrIgnoreCopier).merge(conn, &source, &MergeOptions::new()));
    assert_eq!(
        column_strings(conn, "SELECT name FROM people ORDER BY id"),
        vec!["ann", "bob"]
    );
    let mut rows = conn.query("SELECT nickname FROM people", ()).unwrap();
    while rows.move_to_next() {
        assert!(rows.is_null(0).unwrap());
    }
    assert!(!conn.table_exists("android_metadata").unwrap());
}

#[test]
fn test_merge_inside_transaction_fails() {
    let tmp = TempDatabase::new_with_schema(NOTES);
    let conn = tmp.connection();
    let source = create_database_file(tmp.dir(), "source.db", NOTES);
    conn.begin_transaction().unwrap();
    let (merger, failures) = recording_merger();
    assert!(!merger.merge(conn, &source, &MergeOptions::new()));
    assert_eq!(failures.lock().len(), 1);
    conn.end_transaction().unwrap();
    assert_eq!(attached(conn), vec!["main"]);
    assert!(!attached(conn).iter().any(|name| name == MERGE_ALIAS));
}

#[test]
fn test_copier_transactions_roll_back_with_the_merge() {
    struct PerTable;

    impl TableCopier for PerTable {
        fn copy_table(&self, conn: &Connection, mapping: &MergeTableMapping) -> sqlbridge::Result<()> {
            conn.run_in_transaction(|conn| {
                if mapping.source == "second" {
                    return Err(Error::Merge("refusing second".to_string()));
                }
                InsertOrIgnoreCopier.copy_table(conn, mapping)
            })
        }
    }

    let tmp = TempDatabase::new_with_schema(
        "CREATE TABLE first (id INTEGER PRIMARY KEY);
         CREATE TABLE second (id INTEGER PRIMARY KEY);",
    );
    let conn = tmp.connection();
    let source = create_database_file(
        tmp.dir(),
        "source.db",
        "CREATE TABLE first (id INTEGER PRIMARY KEY);
         CREATE TABLE second (id INTEGER PRIMARY KEY);
         INSERT INTO first VALUES (1), (2);
         INSERT INTO second VALUES (1);",
    );
    assert!(!Merger::new(PerTable).merge(conn, &source, &MergeOptions::new()));
    assert_eq!(count(conn, "first"), 0);
    assert_eq!(count(conn, "second"), 0);
    assert!(conn.is_auto_commit().unwrap());
}

#[test]
fn test_source_table_dropped_during_merge_is_skipped() {
    struct DropsLater;

    impl TableCopier for DropsLater {
        fn copy_table(&self, conn: &Connection, mapping: &MergeTableMapping) -> sqlbridge::Result<()> {
            if mapping.source == "a" {
                conn.exec_sql(&format!("DROP TABLE {MERGE_ALIAS}.b"), ())?;
            }
            InsertOrIgnoreCopier.copy_table(conn, mapping)
        }
    }

    let tmp = TempDatabase::new_with_schema(
        "CREATE TABLE a (id INTEGER PRIMARY KEY);
         CREATE TABLE b (id INTEGER PRIMARY KEY);",
    );
    let conn = tmp.connection();
    let source = create_database_file(
        tmp.dir(),
        "source.db",
        "CREATE TABLE a (id INTEGER PRIMARY KEY);
         CREATE TABLE b (id INTEGER PRIMARY KEY);
         INSERT INTO a VALUES (1), (2);
         INSERT INTO b VALUES (1);",
    );
    let failures = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = failures.clone();
    let merger = Merger::new(DropsLater).on_failure(move |e: &Error| sink.lock().push(e.to_string()));
    assert!(merger.merge(conn, &source, &MergeOptions::new()));
    assert!(failures.lock().is_empty());
    assert_eq!(count(conn, "a"), 2);
    assert_eq!(count(conn, "b"), 0);
    assert_eq!(attached(conn), vec!["main"]);
}

#[test]
fn test_detach_failure_is_reported_but_merge_succeeds() {
    // leaves a transaction open, so the engine refuses to detach
    struct LeavesTransactionOpen;

    impl TableCopier for LeavesTransactionOpen {
        fn copy_table(&self, conn: &Connection, mapping: &MergeTableMapping) -> sqlbridge::Result<()> {
            conn.begin_transaction()?;
            InsertOrIgnoreCopier.copy_table(conn, mapping)
        }
    }

    let tmp = TempDatabase::new_with_schema(NOTES);
    let conn = tmp.connection();
    let source = create_database_file(
        tmp.dir(),
        "source.db",
        "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);
         INSERT INTO notes VALUES (1, 'one');",
    );
    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = failures.clone();
    let merger = Merger::new(LeavesTransactionOpen)
        .on_failure(move |e: &Error| sink.lock().push(e.to_string()));
    assert!(merger.merge(conn, &source, &MergeOptions::new()));
    assert_eq!(failures.lock().len(), 1);
    assert!(attached(conn).iter().any(|name| name == MERGE_ALIAS));

    assert_eq!(conn.transaction_depth(), 1);
    conn.set_transaction_successful();
    conn.end_transaction().unwrap();
    conn.exec_sql(&format!("DETACH DATABASE {MERGE_ALIAS}"), ()).unwrap();
    assert_eq!(count(conn, "notes"), 1);
    assert_eq!(attached(conn), vec!["main"]);
}
