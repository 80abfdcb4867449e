//! # sqlbridge
//!
//! A database access layer with nested transactions, random-access cursors,
//! a cross-database merge engine and a keyed database registry, built on a
//! blocking SQLite driver.
//!
//! ## Getting Started
//!
//! Open a [`Database`] with a [`Builder`] and talk to it through its [`Connection`]:
//!
//! ```rust,no_run
//! # fn run() -> sqlbridge::Result<()> {
//! use sqlbridge::{Builder, ConflictAlgorithm, ContentValues};
//!
//! let db = Builder::new_local("app.db").build()?;
//! let conn = db.connection();
//! conn.exec_sql("CREATE TABLE IF NOT EXISTS users (id INTEGER PRIMARY KEY, email TEXT)", ())?;
//! let id = conn.insert(
//!     "users",
//!     ConflictAlgorithm::None,
//!     &ContentValues::new().with("email", "alice@example.org"),
//! )?;
//! let mut rows = conn.query("SELECT email FROM users WHERE id = ?", [id])?;
//! while rows.move_to_next() {
//!     println!("{:?}", rows.get_string(0)?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Transactions nest. Only the outermost [`Connection::end_transaction`]
//! touches the engine, and it commits when any level was marked successful:
//!
//! ```rust,no_run
//! # fn run(conn: &sqlbridge::Connection) -> sqlbridge::Result<()> {
//! conn.begin_transaction()?;
//! conn.exec_sql("INSERT INTO users (email) VALUES (?)", ["bob@example.org"])?;
//! conn.set_transaction_successful();
//! conn.end_transaction()?;
//! # Ok(())
//! # }
//! ```

mod assert;
pub mod connection;
mod driver;
pub mod files;
pub mod merge;
pub mod params;
pub mod registry;
mod rows;
pub mod statement;
pub mod transaction;
pub mod value;

pub use connection::Connection;
pub use merge::{compute_merge_tables, MergeOptions, MergeTableMapping, Merger};
pub use params::{params_from_iter, IntoParams, Params};
pub use registry::{Closeable, DatabaseFactory, DatabaseProvider, DatabaseRegistry};
pub use rows::{Column, Rows};
pub use statement::{CompiledStatement, ConflictAlgorithm, ContentValues};
pub use transaction::{Transaction, TransactionBehavior, TransactionListener};
pub use value::{ColumnType, Value};

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::OpenFlags;

use crate::driver::Session;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to open database `{path}`: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("{0}")]
    Statement(#[from] rusqlite::Error),
    #[error("statement expects {expected} arguments, got {actual}")]
    InvalidParameterCount { expected: usize, actual: usize },
    #[error("Conversion failure: `{0}`")]
    ConversionFailure(String),
    #[error("Query returned no rows")]
    QueryReturnedNoRows,
    #[error("column index {index} out of range, row has {count} columns")]
    ColumnIndexOutOfBounds { index: usize, count: usize },
    #[error("no such column `{name}`, available columns: [{available}]")]
    NoSuchColumn { name: String, available: String },
    #[error("cursor position {position} does not address a row (count {count})")]
    CursorOutOfBounds { position: isize, count: usize },
    #[error("{0}")]
    Misuse(String),
    #[error("connection is closed")]
    Closed,
    #[error("merge failed: {0}")]
    Merge(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Journal modes accepted by `PRAGMA journal_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Memory,
    Wal,
    Off,
}

impl JournalMode {
    pub fn as_str(self) -> &'static str {
        match self {
            JournalMode::Delete => "delete",
            JournalMode::Truncate => "truncate",
            JournalMode::Persist => "persist",
            JournalMode::Memory => "memory",
            JournalMode::Wal => "wal",
            JournalMode::Off => "off",
        }
    }
}

/// A builder for `Database`.
#[derive(Debug, Clone)]
pub struct Builder {
    path: Option<PathBuf>,
    read_only: bool,
    create: bool,
    journal_mode: Option<JournalMode>,
    busy_timeout: Option<Duration>,
    foreign_keys: bool,
}

impl Builder {
    /// Create a new local database. `":memory:"` selects an in-memory database.
    pub fn new_local(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if path == Path::new(":memory:") {
            return Self::new_in_memory();
        }
        Self::with_path(Some(path.to_path_buf()))
    }

    pub fn new_in_memory() -> Self {
        Self::with_path(None)
    }

    fn with_path(path: Option<PathBuf>) -> Self {
        Self {
            path,
            read_only: false,
            create: true,
            journal_mode: None,
            busy_timeout: None,
            foreign_keys: false,
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Whether a missing database file is created. Defaults to `true`.
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = Some(mode);
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    fn open_flags(&self) -> OpenFlags {
        let mut flags = OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI;
        if self.read_only {
            flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
        } else {
            flags |= OpenFlags::SQLITE_OPEN_READ_WRITE;
            if self.create {
                flags |= OpenFlags::SQLITE_OPEN_CREATE;
            }
        }
        flags
    }

    /// Build the database.
    pub fn build(self) -> Result<Database> {
        let session = match &self.path {
            Some(path) => Session::open(path, self.open_flags())?,
            None => Session::open_in_memory()?,
        };
        let raw = session.raw();
        if let Some(timeout) = self.busy_timeout {
            raw.busy_timeout(timeout)?;
        }
        if self.foreign_keys {
            raw.pragma_update(None, "foreign_keys", true)?;
        }
        if let Some(mode) = self.journal_mode {
            let actual: String =
                raw.pragma_update_and_check(None, "journal_mode", mode.as_str(), |row| row.get(0))?;
            if !actual.eq_ignore_ascii_case(mode.as_str()) {
                tracing::warn!(
                    "journal_mode {} requested, engine kept {}",
                    mode.as_str(),
                    actual
                );
            }
        }
        tracing::debug!(path = ?self.path, read_only = self.read_only, "opened database");
        Ok(Database {
            conn: Connection::new(session, self.path),
        })
    }
}

/// A database.
///
/// The `Database` owns exactly one [`Connection`]; closing the database closes it.
pub struct Database {
    conn: Connection,
}

assert::assert_send_sync!(Database);

impl Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.conn.path())
            .field("open", &self.conn.is_open())
            .finish()
    }
}

impl Database {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Backing file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.conn.path()
    }

    pub fn close(&self) -> Result<()> {
        self.conn.close()
    }
}
