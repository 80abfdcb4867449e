//! Statement binding and SQL generation for structured writes.

use std::fmt::Debug;

use crate::driver::Session;
use crate::rows::Rows;
use crate::{Connection, Error, Result, Value};

/// Conflict resolution applied to an INSERT or UPDATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictAlgorithm {
    #[default]
    None,
    Rollback,
    Abort,
    Fail,
    Ignore,
    Replace,
}

impl ConflictAlgorithm {
    pub fn as_sql(self) -> &'static str {
        match self {
            ConflictAlgorithm::None => "",
            ConflictAlgorithm::Rollback => "OR ROLLBACK",
            ConflictAlgorithm::Abort => "OR ABORT",
            ConflictAlgorithm::Fail => "OR FAIL",
            ConflictAlgorithm::Ignore => "OR IGNORE",
            ConflictAlgorithm::Replace => "OR REPLACE",
        }
    }
}

/// Column values for an INSERT or UPDATE, kept in insertion order.
///
/// The iteration order is the order in which columns appear in the generated
/// SQL and in which their values are bound.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentValues {
    entries: Vec<(String, Value)>,
}

impl ContentValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `column`, replacing an earlier value in place.
    pub fn put(&mut self, column: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let column = column.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(name, _)| *name == column) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((column, value)),
        }
        self
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.put(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(name, _)| name == column)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains_key(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ContentValues {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut values = ContentValues::new();
        for (column, value) in iter {
            values.put(column, value);
        }
        values
    }
}

/// Quotes an identifier for use in generated SQL.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn push_verb(sql: &mut String, verb: &str, conflict: ConflictAlgorithm) {
    sql.push_str(verb);
    sql.push(' ');
    let clause = conflict.as_sql();
    if !clause.is_empty() {
        sql.push_str(clause);
        sql.push(' ');
    }
}

fn push_where(sql: &mut String, where_clause: Option<&str>) {
    if let Some(clause) = where_clause.filter(|c| !c.trim().is_empty()) {
        sql.push_str(" WHERE ");
        sql.push_str(clause);
    }
}

/// Builds `INSERT [OR ...] INTO table (cols) VALUES (?, ...)` and its arguments.
pub fn build_insert(
    table: &str,
    conflict: ConflictAlgorithm,
    values: &ContentValues,
) -> (String, Vec<Value>) {
    let mut sql = String::with_capacity(32 + table.len() + values.len() * 16);
    push_verb(&mut sql, "INSERT", conflict);
    sql.push_str("INTO ");
    sql.push_str(table);
    if values.is_empty() {
        sql.push_str(" DEFAULT VALUES");
        return (sql, Vec::new());
    }
    let columns: Vec<&str> = values.iter().map(|(name, _)| name).collect();
    sql.push_str(" (");
    sql.push_str(&columns.join(","));
    sql.push_str(") VALUES (");
    sql.push_str(&vec!["?"; columns.len()].join(","));
    sql.push(')');
    let args = values.iter().map(|(_, value)| value.clone()).collect();
    (sql, args)
}

/// Builds `UPDATE [OR ...] table SET a=?,... [WHERE ...]`. Set values bind
/// before the where arguments.
pub fn build_update(
    table: &str,
    conflict: ConflictAlgorithm,
    values: &ContentValues,
    where_clause: Option<&str>,
    where_args: &[Value],
) -> Result<(String, Vec<Value>)> {
    if values.is_empty() {
        return Err(Error::Misuse(format!(
            "UPDATE of {table} needs at least one column value"
        )));
    }
    let mut sql = String::with_capacity(32 + table.len() + values.len() * 16);
    push_verb(&mut sql, "UPDATE", conflict);
    sql.push_str(table);
    sql.push_str(" SET ");
    let assignments: Vec<String> = values.iter().map(|(name, _)| format!("{name}=?")).collect();
    sql.push_str(&assignments.join(","));
    push_where(&mut sql, where_clause);
    let mut args: Vec<Value> = values.iter().map(|(_, value)| value.clone()).collect();
    args.extend_from_slice(where_args);
    Ok((sql, args))
}

/// Builds `DELETE FROM table [WHERE ...]`.
pub fn build_delete(table: &str, where_clause: Option<&str>) -> String {
    let mut sql = format!("DELETE FROM {table}");
    push_where(&mut sql, where_clause);
    sql
}

/// How strictly argument count must match the statement's parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Arity {
    /// Every parameter must be supplied.
    Exact,
    /// Trailing parameters may stay unbound (they read as NULL).
    AtMost,
}

pub(crate) fn bind_values(
    stmt: &mut rusqlite::Statement<'_>,
    values: &[Value],
    arity: Arity,
) -> Result<()> {
    let expected = stmt.parameter_count();
    let mismatch = match arity {
        Arity::Exact => values.len() != expected,
        Arity::AtMost => values.len() > expected,
    };
    if mismatch {
        return Err(Error::InvalidParameterCount {
            expected,
            actual: values.len(),
        });
    }
    for (i, value) in values.iter().enumerate() {
        stmt.raw_bind_parameter(i + 1, value)?;
    }
    Ok(())
}

/// Runs a statement that does not produce rows and returns the number of changed rows.
pub(crate) fn execute_update(
    session: &Session,
    sql: &str,
    args: &[Value],
    arity: Arity,
) -> Result<usize> {
    let mut stmt = session.prepare(sql)?;
    bind_values(&mut stmt, args, arity)?;
    Ok(stmt.raw_execute()?)
}

/// Steps a statement to completion, discarding any rows it yields.
pub(crate) fn execute_drain(
    session: &Session,
    sql: &str,
    args: &[Value],
    arity: Arity,
) -> Result<()> {
    let mut stmt = session.prepare(sql)?;
    bind_values(&mut stmt, args, arity)?;
    let mut rows = stmt.raw_query();
    while rows.next()?.is_some() {}
    Ok(())
}

pub(crate) fn query(session: &Session, sql: &str, args: &[Value], arity: Arity) -> Result<Rows> {
    let mut stmt = session.prepare(sql)?;
    bind_values(&mut stmt, args, arity)?;
    Rows::materialize(&mut stmt)
}

/// Runs an INSERT and reports the new row id, or `-1` when no row was inserted.
///
/// The id is read with a separate `last_insert_rowid()` query on the same
/// session rather than through the driver's generated-keys support.
pub(crate) fn execute_insert(
    session: &Session,
    sql: &str,
    args: &[Value],
    arity: Arity,
) -> Result<i64> {
    let changed = execute_update(session, sql, args, arity)?;
    if changed == 0 {
        return Ok(-1);
    }
    let mut rows = query(session, "SELECT last_insert_rowid()", &[], Arity::Exact)?;
    if !rows.move_to_first() {
        return Err(Error::QueryReturnedNoRows);
    }
    rows.get_long(0)
}

/// A statement compiled from SQL text with 1-based bindings that can be run
/// repeatedly. Every run prepares the SQL afresh on the owning connection.
pub struct CompiledStatement<'conn> {
    conn: &'conn Connection,
    sql: String,
    bindings: Vec<Value>,
}

impl<'conn> CompiledStatement<'conn> {
    pub(crate) fn new(conn: &'conn Connection, sql: &str) -> Self {
        Self {
            conn,
            sql: sql.to_string(),
            bindings: Vec::new(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Binds `value` at the 1-based `index`. Index 0 is reserved.
    pub fn bind_value(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        if index == 0 {
            return Err(Error::Misuse(
                "bind index 0 is reserved, parameter indexes start at 1".to_string(),
            ));
        }
        if self.bindings.len() < index {
            self.bindings.resize(index, Value::Null);
        }
        self.bindings[index - 1] = value.into();
        Ok(())
    }

    pub fn bind_null(&mut self, index: usize) -> Result<()> {
        self.bind_value(index, Value::Null)
    }

    pub fn bind_long(&mut self, index: usize, value: i64) -> Result<()> {
        self.bind_value(index, value)
    }

    pub fn bind_double(&mut self, index: usize, value: f64) -> Result<()> {
        self.bind_value(index, value)
    }

    pub fn bind_string(&mut self, index: usize, value: &str) -> Result<()> {
        self.bind_value(index, value)
    }

    pub fn bind_blob(&mut self, index: usize, value: &[u8]) -> Result<()> {
        self.bind_value(index, value)
    }

    pub fn clear_bindings(&mut self) {
        self.bindings.clear();
    }

    pub fn execute(&self) -> Result<()> {
        self.conn
            .with_session(|s| execute_drain(s, &self.sql, &self.bindings, Arity::AtMost))
    }

    pub fn execute_insert(&self) -> Result<i64> {
        self.conn
            .with_session(|s| execute_insert(s, &self.sql, &self.bindings, Arity::AtMost))
    }

    pub fn execute_update_delete(&self) -> Result<usize> {
        self.conn
            .with_session(|s| execute_update(s, &self.sql, &self.bindings, Arity::AtMost))
    }

    fn first_value(&self) -> Result<Value> {
        let mut rows = self
            .conn
            .with_session(|s| query(s, &self.sql, &self.bindings, Arity::AtMost))?;
        if !rows.move_to_first() {
            return Err(Error::QueryReturnedNoRows);
        }
        Ok(rows.get_value(0)?.clone())
    }

    /// Value of the first column of the first row, as an integer.
    pub fn simple_query_for_long(&self) -> Result<i64> {
        self.first_value()?.as_long()
    }

    /// Value of the first column of the first row, as text.
    pub fn simple_query_for_string(&self) -> Result<Option<String>> {
        self.first_value()?.as_string()
    }
}

impl Debug for CompiledStatement<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledStatement")
            .field("sql", &self.sql)
            .field("bindings", &self.bindings)
            .finish()
    }
}
