use std::sync::Arc;

use parking_lot::Mutex;
use sqlbridge::{Builder, ConflictAlgorithm, ContentValues, Error, TransactionListener};

use crate::common::{count, maybe_setup_tracing, TempDatabase};

const SCHEMA: &str = "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT UNIQUE)";

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<&'static str>>,
}

impl EventLog {
    fn take(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl TransactionListener for EventLog {
    fn on_begin(&self) {
        self.events.lock().push("begin");
    }

    fn on_commit(&self) {
        self.events.lock().push("commit");
    }

    fn on_rollback(&self) {
        self.events.lock().push("rollback");
    }
}

#[test]
fn test_nested_transaction_commits_inner_success() {
    maybe_setup_tracing();
    let tmp = TempDatabase::new_with_schema(SCHEMA);
    let conn = tmp.connection();

    conn.begin_transaction().unwrap();
    conn.exec_sql("INSERT INTO items (name) VALUES (?)", ["a"])
        .unwrap();
    conn.begin_transaction().unwrap();
    conn.set_transaction_successful();
    conn.end_transaction().unwrap();
    conn.end_transaction().unwrap();

    assert_eq!(count(conn, "items"), 1);

    // durable: a fresh database instance sees the row
    tmp.db.close().unwrap();
    let reopened = Builder::new_local(&tmp.path).build().unwrap();
    assert_eq!(count(reopened.connection(), "items"), 1);
}

#[test]
fn test_nested_transaction_without_success_rolls_back() {
    maybe_setup_tracing();
    let tmp = TempDatabase::new_with_schema(SCHEMA);
    let conn = tmp.connection();

    conn.begin_transaction().unwrap();
    conn.exec_sql("INSERT INTO items (name) VALUES (?)", ["a"])
        .unwrap();
    conn.begin_transaction().unwrap();
    conn.end_transaction().unwrap();
    conn.end_transaction().unwrap();

    assert_eq!(count(conn, "items"), 0);
    assert!(conn.is_auto_commit().unwrap());
}

#[test]
fn test_nested_ends_do_not_touch_the_engine() {
    let tmp = TempDatabase::new_with_schema(SCHEMA);
    let conn = tmp.connection();
    let other = Builder::new_local(&tmp.path).build().unwrap();

    conn.begin_transaction_non_exclusive().unwrap();
    for depth in 2..=5 {
        conn.begin_transaction().unwrap();
        assert_eq!(conn.transaction_depth(), depth);
    }
    conn.insert("items", ConflictAlgorithm::None, &ContentValues::new().with("name", "deep"))
        .unwrap();
    conn.set_transaction_successful();
    for _ in 0..4 {
        conn.end_transaction().unwrap();
        assert!(!conn.is_auto_commit().unwrap());
    }
    // still uncommitted: another connection does not see the row
    assert_eq!(count(other.connection(), "items"), 0);
    conn.end_transaction().unwrap();
    assert_eq!(count(other.connection(), "items"), 1);
}

#[test]
fn test_listener_events() {
    let tmp = TempDatabase::new_with_schema(SCHEMA);
    let conn = tmp.connection();
    let log = Arc::new(EventLog::default());

    conn.begin_transaction_with_listener(log.clone()).unwrap();
    conn.begin_transaction().unwrap();
    conn.end_transaction().unwrap();
    assert_eq!(log.take(), vec!["begin"]);
    conn.set_transaction_successful();
    conn.end_transaction().unwrap();
    assert_eq!(log.take(), vec!["commit"]);

    conn.begin_transaction_with_listener_non_exclusive(log.clone())
        .unwrap();
    conn.end_transaction().unwrap();
    assert_eq!(log.take(), vec!["begin", "rollback"]);

    // a later transaction without a listener reports nothing
    conn.begin_transaction().unwrap();
    conn.end_transaction().unwrap();
    assert!(log.take().is_empty());
}

#[test]
fn test_listener_may_use_the_connection() {
    struct Auditing {
        conn: Arc<sqlbridge::Database>,
    }

    impl TransactionListener for Auditing {
        fn on_begin(&self) {
            let conn = self.conn.connection();
            assert_eq!(conn.transaction_depth(), 1);
            conn.exec_sql("INSERT INTO items (name) VALUES ('audit')", ())
                .unwrap();
        }

        fn on_commit(&self) {}
    }

    let tmp = TempDatabase::new_empty();
    let db = Arc::new(Builder::new_local(tmp.dir().join("shared.db")).build().unwrap());
    db.connection().execute_batch(SCHEMA).unwrap();
    let conn = db.connection();
    conn.begin_transaction_with_listener(Arc::new(Auditing { conn: db.clone() }))
        .unwrap();
    conn.set_transaction_successful();
    conn.end_transaction().unwrap();
    assert_eq!(count(conn, "items"), 1);
}

#[test]
fn test_engine_rollback_inside_transaction() {
    let tmp = TempDatabase::new_with_schema(SCHEMA);
    let conn = tmp.connection();
    let values = ContentValues::new().with("name", "dup");

    conn.insert("items", ConflictAlgorithm::None, &values).unwrap();
    conn.begin_transaction().unwrap();
    conn.insert("items", ConflictAlgorithm::None, &ContentValues::new().with("name", "new"))
        .unwrap();
    let err = conn
        .insert("items", ConflictAlgorithm::Rollback, &values)
        .unwrap_err();
    assert!(matches!(err, Error::Statement(_)), "{err}");
    conn.set_transaction_successful();
    // the engine already aborted the transaction, ending it still succeeds
    conn.end_transaction().unwrap();
    assert!(conn.is_auto_commit().unwrap());
    assert_eq!(count(conn, "items"), 1);
}

#[test]
fn test_guard_and_closure_helpers() {
    let tmp = TempDatabase::new_with_schema(SCHEMA);
    let conn = tmp.connection();

    let result: sqlbridge::Result<()> = conn.run_in_transaction(|conn| {
        conn.exec_sql("INSERT INTO items (name) VALUES ('x')", ())?;
        conn.exec_sql("INSERT INTO items (name) VALUES ('x')", ())
    });
    assert!(result.is_err());
    assert_eq!(count(conn, "items"), 0);

    let outer = conn.transaction().unwrap();
    {
        let inner = outer.transaction().unwrap();
        inner
            .exec_sql("INSERT INTO items (name) VALUES ('nested')", ())
            .unwrap();
        inner.commit().unwrap();
    }
    assert_eq!(conn.transaction_depth(), 1);
    // dropping the outer guard discards what the inner one committed
    drop(outer);
    assert_eq!(count(conn, "items"), 0);

    let outer = conn.transaction().unwrap();
    outer
        .run_in_transaction(|conn| conn.exec_sql("INSERT INTO items (name) VALUES ('kept')", ()))
        .unwrap();
    outer.commit().unwrap();
    assert_eq!(count(conn, "items"), 1);
}

#[test]
fn test_operations_after_close_fail() {
    let tmp = TempDatabase::new_with_schema(SCHEMA);
    let conn = tmp.connection();
    tmp.db.close().unwrap();
    assert!(matches!(conn.begin_transaction(), Err(Error::Closed)));
    assert!(!conn.in_transaction());
    assert!(matches!(conn.version(), Err(Error::Closed)));
}
