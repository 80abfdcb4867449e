use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{instrument, Level};

use crate::driver::Session;
use crate::statement::{self, quote_identifier, Arity, CompiledStatement};
use crate::transaction::{Transaction, TransactionState};
use crate::{
    ConflictAlgorithm, ContentValues, Error, IntoParams, Result, Rows, TransactionBehavior,
    TransactionListener, Value,
};

/// A database connection.
///
/// Owns one driver session and the nesting state of its transactions. The
/// connection is `Send + Sync`, but transaction boundaries are not
/// serialized across threads: callers that share a connection must not
/// interleave `begin_transaction`/`end_transaction` from several threads.
pub struct Connection {
    session: Mutex<Option<Session>>,
    /// Always locked before `session` when both are needed.
    transaction: Mutex<TransactionState>,
    path: Option<PathBuf>,
}

crate::assert::assert_send_sync!(Connection);

impl Connection {
    pub(crate) fn new(session: Session, path: Option<PathBuf>) -> Self {
        Self {
            session: Mutex::new(Some(session)),
            transaction: Mutex::new(TransactionState::default()),
            path,
        }
    }

    /// Runs `f` against the live session.
    pub(crate) fn with_session<T>(&self, f: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
        let mut session = self.session.lock();
        let session = session.as_mut().ok_or(Error::Closed)?;
        f(session)
    }

    /// Backing file, `None` for in-memory connections.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Whether the driver session is in auto-commit mode.
    pub fn is_auto_commit(&self) -> Result<bool> {
        self.with_session(|s| Ok(s.is_auto_commit()))
    }

    // Transactions

    /// Begins an exclusive transaction.
    pub fn begin_transaction(&self) -> Result<()> {
        self.begin_transaction_with(None, TransactionBehavior::Exclusive)
    }

    /// Begins an immediate transaction.
    pub fn begin_transaction_non_exclusive(&self) -> Result<()> {
        self.begin_transaction_with(None, TransactionBehavior::Immediate)
    }

    pub fn begin_transaction_with_listener(
        &self,
        listener: Arc<dyn TransactionListener>,
    ) -> Result<()> {
        self.begin_transaction_with(Some(listener), TransactionBehavior::Exclusive)
    }

    pub fn begin_transaction_with_listener_non_exclusive(
        &self,
        listener: Arc<dyn TransactionListener>,
    ) -> Result<()> {
        self.begin_transaction_with(Some(listener), TransactionBehavior::Immediate)
    }

    /// Begins a transaction, nested inside the current one if any.
    ///
    /// Only the outermost begin switches the session out of auto-commit
    /// mode (using `behavior`) and keeps `listener`; nested begins only
    /// increase the depth and ignore both arguments.
    #[instrument(skip_all, level = Level::DEBUG)]
    pub fn begin_transaction_with(
        &self,
        listener: Option<Arc<dyn TransactionListener>>,
        behavior: TransactionBehavior,
    ) -> Result<()> {
        self.begin_level(listener, behavior).map(drop)
    }

    /// Returns `true` when this opened the outermost transaction.
    fn begin_level(
        &self,
        listener: Option<Arc<dyn TransactionListener>>,
        behavior: TransactionBehavior,
    ) -> Result<bool> {
        let mut state = self.transaction.lock();
        if state.depth() == 0 {
            self.with_session(|s| s.set_auto_commit(false, behavior))?;
        }
        let outermost = state.begin(listener);
        let notify = if outermost { state.listener() } else { None };
        let depth = state.depth();
        drop(state);
        tracing::debug!(depth, ?behavior, "begin transaction");
        if let Some(listener) = notify {
            listener.on_begin();
        }
        Ok(outermost)
    }

    /// Marks the current transaction successful.
    ///
    /// # Panics
    ///
    /// Panics when no transaction is active.
    pub fn set_transaction_successful(&self) {
        self.transaction.lock().mark_successful();
    }

    pub(crate) fn force_rollback(&self) {
        self.transaction.lock().force_rollback();
    }

    /// Ends the current transaction level.
    ///
    /// Nested ends only decrease the depth. The outermost end commits if
    /// any level was marked successful and rolls back otherwise; either way
    /// the session is back in auto-commit mode afterwards, even when the
    /// commit fails.
    ///
    /// # Panics
    ///
    /// Panics when no transaction is active.
    #[instrument(skip_all, level = Level::DEBUG)]
    pub fn end_transaction(&self) -> Result<()> {
        let mut state = self.transaction.lock();
        let Some(completion) = state.end() else {
            tracing::trace!(depth = state.depth(), "end nested transaction");
            return Ok(());
        };
        let outcome = self.with_session(|s| finish_outermost(s, completion.commit));
        drop(state);
        let committed = completion.commit && outcome.is_ok();
        tracing::debug!(
            commit_requested = completion.commit,
            committed,
            "end transaction"
        );
        if let Some(listener) = completion.listener {
            if committed {
                listener.on_commit();
            } else {
                listener.on_rollback();
            }
        }
        outcome
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.lock().depth() > 0
    }

    pub fn transaction_depth(&self) -> usize {
        self.transaction.lock().depth()
    }

    /// Begins an exclusive transaction that ends when the returned guard drops.
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        let outermost = self.begin_level(None, TransactionBehavior::Exclusive)?;
        Ok(Transaction::new(self, outermost))
    }

    /// Runs `f` in a transaction that commits iff `f` returns `Ok`. When this
    /// is the outermost transaction, an `Err` also discards work that nested
    /// transactions committed.
    pub fn run_in_transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let tx = self.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // Statements

    /// Runs a query and buffers all of its rows.
    #[instrument(skip_all, level = Level::DEBUG)]
    pub fn query(&self, sql: &str, params: impl IntoParams) -> Result<Rows> {
        let args = params.into_params()?.into_values();
        tracing::debug!("query: {}", sql);
        self.with_session(|s| statement::query(s, sql, &args, Arity::Exact))
    }

    /// Values of the first row returned by `sql`.
    pub fn query_row(&self, sql: &str, params: impl IntoParams) -> Result<Vec<Value>> {
        self.query(sql, params)?
            .into_rows()
            .into_iter()
            .next()
            .ok_or(Error::QueryReturnedNoRows)
    }

    /// Inserts one row and returns its row id, or `-1` when nothing was
    /// inserted (for example a conflict ignored by `OR IGNORE`).
    #[instrument(skip_all, level = Level::DEBUG)]
    pub fn insert(
        &self,
        table: &str,
        conflict: ConflictAlgorithm,
        values: &ContentValues,
    ) -> Result<i64> {
        let (sql, args) = statement::build_insert(table, conflict, values);
        tracing::debug!("insert: {}", sql);
        self.with_session(|s| statement::execute_insert(s, &sql, &args, Arity::Exact))
    }

    /// Updates matching rows and returns how many changed.
    #[instrument(skip_all, level = Level::DEBUG)]
    pub fn update(
        &self,
        table: &str,
        conflict: ConflictAlgorithm,
        values: &ContentValues,
        where_clause: Option<&str>,
        where_args: impl IntoParams,
    ) -> Result<usize> {
        let where_args = where_args.into_params()?.into_values();
        let (sql, args) =
            statement::build_update(table, conflict, values, where_clause, &where_args)?;
        tracing::debug!("update: {}", sql);
        self.with_session(|s| statement::execute_update(s, &sql, &args, Arity::Exact))
    }

    /// Deletes matching rows and returns how many were removed.
    #[instrument(skip_all, level = Level::DEBUG)]
    pub fn delete(
        &self,
        table: &str,
        where_clause: Option<&str>,
        where_args: impl IntoParams,
    ) -> Result<usize> {
        let args = where_args.into_params()?.into_values();
        let sql = statement::build_delete(table, where_clause);
        tracing::debug!("delete: {}", sql);
        self.with_session(|s| statement::execute_update(s, &sql, &args, Arity::Exact))
    }

    /// Executes a single statement, discarding any rows it returns.
    #[instrument(skip_all, level = Level::DEBUG)]
    pub fn exec_sql(&self, sql: &str, params: impl IntoParams) -> Result<()> {
        let args = params.into_params()?.into_values();
        tracing::debug!("exec: {}", sql);
        self.with_session(|s| statement::execute_drain(s, sql, &args, Arity::Exact))
    }

    /// Executes a batch of `;`-separated statements without arguments.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        tracing::debug!("batch: {}", sql);
        self.with_session(|s| Ok(s.raw().execute_batch(sql)?))
    }

    /// Compiles `sql` for repeated execution. Invalid SQL fails here.
    pub fn compile_statement(&self, sql: &str) -> Result<CompiledStatement<'_>> {
        self.with_session(|s| s.prepare(sql).map(drop))?;
        Ok(CompiledStatement::new(self, sql))
    }

    // Pragmas

    fn query_column(&self, sql: &str, params: impl IntoParams, column: usize) -> Result<Vec<Value>> {
        let rows = self.query(sql, params)?;
        rows.into_rows()
            .into_iter()
            .map(|mut row| {
                let count = row.len();
                if column < count {
                    Ok(row.swap_remove(column))
                } else {
                    Err(Error::ColumnIndexOutOfBounds {
                        index: column,
                        count,
                    })
                }
            })
            .collect()
    }

    fn query_strings(&self, sql: &str, params: impl IntoParams, column: usize) -> Result<Vec<String>> {
        self.query_column(sql, params, column)?
            .iter()
            .map(|value| Ok(value.as_string()?.unwrap_or_default()))
            .collect()
    }

    /// The schema version stored in `PRAGMA user_version`.
    pub fn version(&self) -> Result<i64> {
        self.query_row("PRAGMA user_version", ())?
            .first()
            .ok_or(Error::QueryReturnedNoRows)?
            .as_long()
    }

    pub fn set_version(&self, version: i64) -> Result<()> {
        self.exec_sql(&format!("PRAGMA user_version = {version}"), ())
    }

    /// All lines reported by `PRAGMA integrity_check`; `["ok"]` when sound.
    pub fn integrity_check(&self) -> Result<Vec<String>> {
        self.query_strings("PRAGMA integrity_check", (), 0)
    }

    pub fn quick_check(&self) -> Result<Vec<String>> {
        self.query_strings("PRAGMA quick_check", (), 0)
    }

    pub fn is_integrity_ok(&self) -> Result<bool> {
        let lines = self.integrity_check()?;
        let ok = lines.len() == 1 && lines[0] == "ok";
        if !ok {
            tracing::warn!("integrity check failed: {}", lines.join("; "));
        }
        Ok(ok)
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let rows = self.query(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
            [table],
        )?;
        Ok(rows.count() > 0)
    }

    /// Whether `table` has a column named `column` (ignoring ASCII case).
    pub fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        Ok(self
            .table_columns("main", table)?
            .iter()
            .any(|name| name.eq_ignore_ascii_case(column)))
    }

    /// Column names of `schema.table` in declaration order.
    pub fn table_columns(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let sql = format!(
            "PRAGMA {}.table_info({})",
            quote_identifier(schema),
            quote_identifier(table)
        );
        self.query_strings(&sql, (), 1)
    }

    /// Names of the tables in `schema` (`"main"` or an attached alias), in
    /// creation order.
    pub fn table_names(&self, schema: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT name FROM {}.sqlite_master WHERE type = 'table' ORDER BY rowid",
            quote_identifier(schema)
        );
        self.query_strings(&sql, (), 0)
    }

    /// `(name, file)` for every database attached to this connection,
    /// `main` first. In-memory databases report an empty file.
    pub fn attached_databases(&self) -> Result<Vec<(String, String)>> {
        let rows = self.query("SELECT name, file FROM pragma_database_list", ())?;
        rows.into_rows()
            .into_iter()
            .map(|row| match row.as_slice() {
                [name, file] => Ok((
                    name.as_string()?.unwrap_or_default(),
                    file.as_string()?.unwrap_or_default(),
                )),
                other => Err(Error::ColumnIndexOutOfBounds {
                    index: 1,
                    count: other.len(),
                }),
            })
            .collect()
    }

    // Lifecycle

    /// Closes the session. Closing twice is a no-op; every other operation
    /// fails with [`Error::Closed`] afterwards.
    ///
    /// An open transaction is rolled back by the engine. Its levels stay on
    /// the books, so the outermost `end_transaction` reports `Closed`.
    #[instrument(skip_all, level = Level::DEBUG)]
    pub fn close(&self) -> Result<()> {
        let state = self.transaction.lock();
        let Some(session) = self.session.lock().take() else {
            return Ok(());
        };
        if state.depth() > 0 {
            tracing::warn!(
                depth = state.depth(),
                "closing connection with an open transaction, pending work is rolled back"
            );
        }
        drop(state);
        tracing::debug!(path = ?self.path, "closing connection");
        session.close()
    }
}

/// Ends the engine transaction of the outermost level and puts the session
/// back into auto-commit mode on every path.
fn finish_outermost(session: &mut Session, commit: bool) -> Result<()> {
    let finished = if commit {
        session.commit()
    } else {
        session.rollback()
    };
    if let Err(e) = &finished {
        tracing::warn!("transaction end failed: {e}");
        if let Err(e) = session.restore_auto_commit() {
            tracing::error!("failed to restore auto-commit mode: {e}");
        }
    }
    finished
}

impl Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .field("depth", &self.transaction_depth())
            .finish()
    }
}
