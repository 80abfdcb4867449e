//! Copying tables from another database file into a connection's database.
//!
//! A merge attaches the source file as [`MERGE_ALIAS`], works out which
//! tables to copy with [`compute_merge_tables`], copies them inside one
//! transaction and detaches the source again, whatever happened in between.
//! Failures never escape [`Merger::merge`]: they are logged, handed to the
//! optional failure callback and reported as `false`.

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::Path;

use tracing::{instrument, Level};

use crate::statement::quote_identifier;
use crate::{Connection, Error, Result};

/// Bookkeeping tables that are never merged, matched against target names.
pub const SYSTEM_TABLES: [&str; 3] = ["android_metadata", "room_master_table", "sqlite_sequence"];

/// Schema name the source database is attached under.
pub const MERGE_ALIAS: &str = "merge_source";

/// Which source tables to merge and where they go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOptions {
    include: Vec<String>,
    exclude: Vec<String>,
    rename: HashMap<String, String>,
}

impl MergeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the merge to these source tables.
    pub fn include<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include.extend(tables.into_iter().map(Into::into));
        self
    }

    /// Skips these source tables.
    pub fn exclude<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(tables.into_iter().map(Into::into));
        self
    }

    /// Copies source table `from` into target table `to`.
    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.rename.insert(from.into(), to.into());
        self
    }
}

/// One table to copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeTableMapping {
    pub source: String,
    pub target: String,
}

/// Computes the tables to copy, in source order.
///
/// Starts from `source_tables`, keeps only included tables when an include
/// list is set, renames, drops excluded source names and finally drops
/// targets in [`SYSTEM_TABLES`]. Colliding target names are kept as they are.
pub fn compute_merge_tables(
    source_tables: &[String],
    options: &MergeOptions,
) -> Vec<MergeTableMapping> {
    let selected: Vec<&String> = if options.include.is_empty() {
        source_tables.iter().collect()
    } else {
        source_tables
            .iter()
            .filter(|table| options.include.contains(table))
            .collect()
    };
    if !options.include.is_empty() && selected.len() < options.include.len() {
        let missing: Vec<&str> = options
            .include
            .iter()
            .filter(|table| !source_tables.contains(table))
            .map(String::as_str)
            .collect();
        tracing::warn!(
            "source database lacks included tables: {}",
            missing.join(", ")
        );
    }
    selected
        .into_iter()
        .map(|source| MergeTableMapping {
            source: source.clone(),
            target: options
                .rename
                .get(source)
                .unwrap_or(source)
                .clone(),
        })
        .filter(|mapping| !options.exclude.contains(&mapping.source))
        .filter(|mapping| !SYSTEM_TABLES.contains(&mapping.target.as_str()))
        .collect()
}

/// Copies one attached source table into its target table.
pub trait TableCopier: Send + Sync {
    fn copy_table(&self, conn: &Connection, mapping: &MergeTableMapping) -> Result<()>;
}

/// Copies the columns both tables share with `INSERT OR IGNORE`, so rows
/// whose keys already exist in the target are left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsertOrIgnoreCopier;

impl TableCopier for InsertOrIgnoreCopier {
    fn copy_table(&self, conn: &Connection, mapping: &MergeTableMapping) -> Result<()> {
        let source_columns = conn.table_columns(MERGE_ALIAS, &mapping.source)?;
        let columns: Vec<String> = conn
            .table_columns("main", &mapping.target)?
            .into_iter()
            .filter(|column| source_columns.iter().any(|s| s.eq_ignore_ascii_case(column)))
            .map(|column| quote_identifier(&column))
            .collect();
        if columns.is_empty() {
            return Err(Error::Merge(format!(
                "tables {} and {} have no column in common",
                mapping.source, mapping.target
            )));
        }
        let columns = columns.join(", ");
        let sql = format!(
            "INSERT OR IGNORE INTO main.{} ({columns}) SELECT {columns} FROM {}.{}",
            quote_identifier(&mapping.target),
            MERGE_ALIAS,
            quote_identifier(&mapping.source)
        );
        conn.exec_sql(&sql, ())
    }
}

type FailureCallback = Box<dyn Fn(&Error) + Send + Sync>;

/// Runs merges with a table copy strategy and an optional failure callback.
pub struct Merger<C: TableCopier = InsertOrIgnoreCopier> {
    copier: C,
    on_failure: Option<FailureCallback>,
}

impl Default for Merger<InsertOrIgnoreCopier> {
    fn default() -> Self {
        Self::new(InsertOrIgnoreCopier)
    }
}

impl<C: TableCopier> Merger<C> {
    pub fn new(copier: C) -> Self {
        Self {
            copier,
            on_failure: None,
        }
    }

    /// Called with every error a merge swallows, detach failures included.
    pub fn on_failure(mut self, callback: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Box::new(callback));
        self
    }

    fn report(&self, error: &Error) {
        tracing::error!("merge failed: {error}");
        if let Some(callback) = &self.on_failure {
            callback(error);
        }
    }

    /// Merges the tables of the database at `source` into `conn`.
    ///
    /// Returns `true` when every selected table was copied. The copy runs in
    /// one transaction, so a failure leaves the target unchanged. The
    /// connection must not be inside a transaction, since the engine refuses
    /// to attach in one.
    #[instrument(skip_all, level = Level::DEBUG)]
    pub fn merge(&self, conn: &Connection, source: &Path, options: &MergeOptions) -> bool {
        // ATTACH would create a missing file
        if !source.is_file() {
            self.report(&Error::Merge(format!(
                "source database {} does not exist",
                source.display()
            )));
            return false;
        }
        let attach = format!("ATTACH DATABASE ? AS {MERGE_ALIAS}");
        if let Err(e) = conn.exec_sql(&attach, [source.to_string_lossy().into_owned()]) {
            self.report(&e);
            return false;
        }
        tracing::debug!(source = %source.display(), "attached merge source");

        let merged = match self.merge_attached(conn, options) {
            Ok(copied) => {
                tracing::debug!(copied, "merge complete");
                true
            }
            Err(e) => {
                self.report(&e);
                false
            }
        };

        if let Err(e) = conn.exec_sql(&format!("DETACH DATABASE {MERGE_ALIAS}"), ()) {
            self.report(&e);
        }
        merged
    }

    /// Returns the number of tables copied.
    fn merge_attached(&self, conn: &Connection, options: &MergeOptions) -> Result<usize> {
        let source_tables = conn.table_names(MERGE_ALIAS)?;
        let target_tables = conn.table_names("main")?;
        let mappings = compute_merge_tables(&source_tables, options);
        if let Some(missing) = mappings
            .iter()
            .find(|mapping| !target_tables.contains(&mapping.target))
        {
            return Err(Error::Merge(format!(
                "target table {} does not exist",
                missing.target
            )));
        }
        conn.run_in_transaction(|conn| {
            let mut copied = 0;
            for mapping in &mappings {
                if !source_table_exists(conn, &mapping.source)? {
                    tracing::warn!(
                        "source table {} disappeared, skipping it",
                        mapping.source
                    );
                    continue;
                }
                tracing::trace!("copying {} into {}", mapping.source, mapping.target);
                self.copier.copy_table(conn, mapping)?;
                copied += 1;
            }
            Ok(copied)
        })
    }
}

/// Checked right before each copy, since an earlier copy may drop tables.
fn source_table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let sql = format!(
        "SELECT 1 FROM {MERGE_ALIAS}.sqlite_master WHERE type = 'table' AND name = ?"
    );
    Ok(conn.query(&sql, [table])?.count() > 0)
}

impl<C: TableCopier + Debug> Debug for Merger<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Merger")
            .field("copier", &self.copier)
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}
