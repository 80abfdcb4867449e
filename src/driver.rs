//! The narrow blocking driver contract the adapter is built on.
//!
//! SQLite itself has no "auto-commit off" switch: a session is in auto-commit
//! mode whenever no `BEGIN` is pending. [`Session`] layers the classic
//! driver model on top of that:
//!
//! - `set_auto_commit(false)` opens an engine transaction,
//! - `commit()`/`rollback()` end it and put the session back in auto-commit
//!   mode without opening another engine transaction,
//! - `set_auto_commit(true)` commits whatever is still pending.

use std::path::Path;

use rusqlite::OpenFlags;

use crate::transaction::TransactionBehavior;
use crate::{Error, Result};

pub(crate) struct Session {
    conn: rusqlite::Connection,
    auto_commit: bool,
}

impl Session {
    pub(crate) fn open(path: &Path, flags: OpenFlags) -> Result<Self> {
        let conn = rusqlite::Connection::open_with_flags(path, flags).map_err(|source| {
            Error::Open {
                path: path.display().to_string(),
                source,
            }
        })?;
        Ok(Self::new(conn))
    }

    pub(crate) fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(|source| Error::Open {
            path: ":memory:".to_string(),
            source,
        })?;
        Ok(Self::new(conn))
    }

    fn new(conn: rusqlite::Connection) -> Self {
        Self {
            conn,
            auto_commit: true,
        }
    }

    pub(crate) fn raw(&self) -> &rusqlite::Connection {
        &self.conn
    }

    pub(crate) fn prepare(&self, sql: &str) -> Result<rusqlite::Statement<'_>> {
        tracing::trace!("Preparing: {}", sql);
        Ok(self.conn.prepare(sql)?)
    }

    pub(crate) fn is_auto_commit(&self) -> bool {
        self.auto_commit
    }

    pub(crate) fn set_auto_commit(&mut self, on: bool, behavior: TransactionBehavior) -> Result<()> {
        if on == self.auto_commit {
            return Ok(());
        }
        if on {
            if !self.conn.is_autocommit() {
                self.conn.execute_batch("COMMIT")?;
            }
        } else {
            self.conn.execute_batch(behavior.begin_sql())?;
        }
        self.auto_commit = on;
        Ok(())
    }

    pub(crate) fn commit(&mut self) -> Result<()> {
        self.end("COMMIT")
    }

    pub(crate) fn rollback(&mut self) -> Result<()> {
        self.end("ROLLBACK")
    }

    /// On failure the session stays in manual mode; see [`Session::restore_auto_commit`].
    fn end(&mut self, sql: &str) -> Result<()> {
        if self.auto_commit {
            return Err(Error::Misuse(format!(
                "{sql} requested while the session is in auto-commit mode"
            )));
        }
        // The engine may already have aborted the transaction on its own
        // (e.g. an `OR ROLLBACK` conflict); ending it again would fail.
        if !self.conn.is_autocommit() {
            self.conn.execute_batch(sql)?;
        }
        self.auto_commit = true;
        Ok(())
    }

    /// Forces the session back into auto-commit mode, discarding any engine
    /// transaction still pending. Used on the failure path of a commit.
    pub(crate) fn restore_auto_commit(&mut self) -> Result<()> {
        self.auto_commit = true;
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    pub(crate) fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| Error::Statement(e))
    }
}
