//! Positional argument lists for statements.
//!
//! Anything implementing [`IntoParams`] can be passed where a statement takes
//! arguments:
//!
//! ```rust,no_run
//! # fn run(conn: &sqlbridge::Connection) -> sqlbridge::Result<()> {
//! use sqlbridge::{params_from_iter, Value};
//!
//! conn.exec_sql("DELETE FROM users", ())?;
//! conn.exec_sql("INSERT INTO users (name, age) VALUES (?, ?)", vec![Value::from("ann"), Value::from(31)])?;
//! conn.exec_sql("INSERT INTO users (name) VALUES (?)", ["bob"])?;
//! conn.exec_sql("DELETE FROM users WHERE age IN (?, ?)", params_from_iter([30, 31]))?;
//! # Ok(())
//! # }
//! ```

use crate::{Result, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    None,
    Positional(Vec<Value>),
}

impl Params {
    pub fn len(&self) -> usize {
        match self {
            Params::None => 0,
            Params::Positional(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn into_values(self) -> Vec<Value> {
        match self {
            Params::None => Vec::new(),
            Params::Positional(values) => values,
        }
    }
}

/// Converts a value into statement arguments.
pub trait IntoParams {
    fn into_params(self) -> Result<Params>;
}

impl IntoParams for Params {
    fn into_params(self) -> Result<Params> {
        Ok(self)
    }
}

impl IntoParams for () {
    fn into_params(self) -> Result<Params> {
        Ok(Params::None)
    }
}

impl<T: Into<Value>> IntoParams for Vec<T> {
    fn into_params(self) -> Result<Params> {
        Ok(Params::Positional(self.into_iter().map(Into::into).collect()))
    }
}

impl<T: Into<Value>, const N: usize> IntoParams for [T; N] {
    fn into_params(self) -> Result<Params> {
        Ok(Params::Positional(self.into_iter().map(Into::into).collect()))
    }
}

impl IntoParams for &[Value] {
    fn into_params(self) -> Result<Params> {
        Ok(Params::Positional(self.to_vec()))
    }
}

/// Builds positional arguments from an iterator.
pub fn params_from_iter<I>(iter: I) -> Params
where
    I: IntoIterator,
    I::Item: Into<Value>,
{
    Params::Positional(iter.into_iter().map(Into::into).collect())
}
