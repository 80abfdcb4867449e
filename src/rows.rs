use std::fmt::Debug;

use crate::{ColumnType, Error, Result, Value};

/// Column information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    decl_type: Option<String>,
}

impl Column {
    pub(crate) fn new(name: impl Into<String>, decl_type: Option<String>) -> Self {
        Self {
            name: name.into(),
            decl_type,
        }
    }

    /// Return the name of the column.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared type of the column, if the result column maps to a table column.
    pub fn decl_type(&self) -> Option<&str> {
        self.decl_type.as_deref()
    }
}

/// Materialized results of a query with a bidirectional cursor.
///
/// The whole result set is read when the query runs, so the cursor can move
/// anywhere: before the first row (position `-1`), onto any row
/// (`0..count`), or after the last row (position `count`). Positions outside
/// that range are clamped. Column names are matched ASCII case-insensitively.
///
/// A `Rows` is a snapshot: writes made after it was produced are not visible
/// through it.
pub struct Rows {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
    position: isize,
    closed: bool,
}

crate::assert::assert_send_sync!(Rows);

impl Rows {
    pub(crate) fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Self {
        debug_assert!(rows.iter().all(|row| row.len() == columns.len()));
        Self {
            columns,
            rows,
            position: -1,
            closed: false,
        }
    }

    /// Drains a bound statement into memory.
    pub(crate) fn materialize(stmt: &mut rusqlite::Statement<'_>) -> Result<Self> {
        let columns: Vec<Column> = stmt
            .columns()
            .iter()
            .map(|c| Column::new(c.name(), c.decl_type().map(str::to_string)))
            .collect();
        let width = columns.len();
        let mut data = Vec::new();
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(row.get::<_, Value>(i)?);
            }
            data.push(values);
        }
        tracing::trace!("materialized {} rows x {} columns", data.len(), width);
        Ok(Self::new(columns, data))
    }

    pub fn count(&self) -> usize {
        self.rows.len()
    }

    pub fn position(&self) -> isize {
        self.position
    }

    /// Moves to `position`, clamped to `-1..=count`. Returns whether the
    /// cursor now addresses a row.
    pub fn move_to_position(&mut self, position: isize) -> bool {
        let count = self.rows.len() as isize;
        self.position = position.clamp(-1, count);
        self.position >= 0 && self.position < count
    }

    /// Moves relative to the current position.
    pub fn move_by(&mut self, offset: isize) -> bool {
        self.move_to_position(self.position.saturating_add(offset))
    }

    pub fn move_to_first(&mut self) -> bool {
        self.move_to_position(0)
    }

    pub fn move_to_last(&mut self) -> bool {
        self.move_to_position(self.rows.len() as isize - 1)
    }

    pub fn move_to_next(&mut self) -> bool {
        self.move_by(1)
    }

    pub fn move_to_previous(&mut self) -> bool {
        self.move_by(-1)
    }

    pub fn is_first(&self) -> bool {
        !self.rows.is_empty() && self.position == 0
    }

    pub fn is_last(&self) -> bool {
        !self.rows.is_empty() && self.position == self.rows.len() as isize - 1
    }

    pub fn is_before_first(&self) -> bool {
        self.rows.is_empty() || self.position == -1
    }

    pub fn is_after_last(&self) -> bool {
        self.rows.is_empty() || self.position == self.rows.len() as isize
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(Column::name).collect()
    }

    pub fn column_name(&self, index: usize) -> Result<&str> {
        self.columns
            .get(index)
            .map(Column::name)
            .ok_or(Error::ColumnIndexOutOfBounds {
                index,
                count: self.columns.len(),
            })
    }

    /// Index of the first column whose name matches `name` ignoring ASCII case.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_index_or_err(&self, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| Error::NoSuchColumn {
            name: name.to_string(),
            available: self.column_names().join(", "),
        })
    }

    fn current_row(&self) -> Result<&[Value]> {
        if self.position < 0 || self.position >= self.rows.len() as isize {
            return Err(Error::CursorOutOfBounds {
                position: self.position,
                count: self.rows.len(),
            });
        }
        Ok(&self.rows[self.position as usize])
    }

    /// The raw value at `index` in the current row.
    pub fn get_value(&self, index: usize) -> Result<&Value> {
        let row = self.current_row()?;
        row.get(index).ok_or(Error::ColumnIndexOutOfBounds {
            index,
            count: row.len(),
        })
    }

    pub fn get_type(&self, index: usize) -> Result<ColumnType> {
        Ok(self.get_value(index)?.column_type())
    }

    pub fn is_null(&self, index: usize) -> Result<bool> {
        Ok(self.get_value(index)?.is_null())
    }

    pub fn get_string(&self, index: usize) -> Result<Option<String>> {
        self.get_value(index)?.as_string()
    }

    pub fn get_short(&self, index: usize) -> Result<i16> {
        self.get_value(index)?.as_short()
    }

    pub fn get_int(&self, index: usize) -> Result<i32> {
        self.get_value(index)?.as_int()
    }

    pub fn get_long(&self, index: usize) -> Result<i64> {
        self.get_value(index)?.as_long()
    }

    pub fn get_float(&self, index: usize) -> Result<f32> {
        self.get_value(index)?.as_float()
    }

    pub fn get_double(&self, index: usize) -> Result<f64> {
        self.get_value(index)?.as_double()
    }

    pub fn get_blob(&self, index: usize) -> Result<Option<Vec<u8>>> {
        self.get_value(index)?.as_blob()
    }

    /// Consumes the cursor, returning the buffered rows.
    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    /// Marks the cursor closed. Buffered rows stay readable; callers that
    /// care check [`Rows::is_closed`].
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Debug for Rows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rows")
            .field("columns", &self.column_names())
            .field("count", &self.rows.len())
            .field("position", &self.position)
            .field("closed", &self.closed)
            .finish()
    }
}
