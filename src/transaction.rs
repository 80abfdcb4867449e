//! Nested transaction bookkeeping.
//!
//! The engine only knows a flat "inside a transaction or not" state. Nesting
//! is tracked here with a depth counter owned by one [`crate::Connection`]:
//!
//! 1. The outermost begin switches the session out of auto-commit mode and
//!    fires [`TransactionListener::on_begin`]. Inner begins only bump the depth.
//! 2. Marking a transaction successful is sticky for the whole nest: inner
//!    ends never clear it and never touch the engine.
//! 3. The outermost end commits when any level was marked successful and
//!    rolls back otherwise, then restores auto-commit.
//! 4. A [`Transaction`] guard that opened the outermost level and ends
//!    without being marked successful rolls the whole nest back, whatever
//!    inner levels marked.

use std::fmt::Debug;
use std::ops::Deref;
use std::sync::Arc;

use crate::{Connection, Result};

/// Locking mode used when the outermost transaction opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionBehavior {
    Deferred,
    Immediate,
    #[default]
    Exclusive,
}

impl TransactionBehavior {
    pub(crate) fn begin_sql(self) -> &'static str {
        match self {
            TransactionBehavior::Deferred => "BEGIN DEFERRED",
            TransactionBehavior::Immediate => "BEGIN IMMEDIATE",
            TransactionBehavior::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

/// Callbacks fired around the outermost transaction of a connection.
pub trait TransactionListener: Send + Sync {
    fn on_begin(&self);

    fn on_commit(&self);

    fn on_rollback(&self) {}
}

/// What the outermost `end_transaction` has to do.
pub(crate) struct Completion {
    pub(crate) commit: bool,
    pub(crate) listener: Option<Arc<dyn TransactionListener>>,
}

#[derive(Default)]
pub(crate) struct TransactionState {
    depth: usize,
    /// Set by `set_transaction_successful` on the outermost level.
    commit_requested: bool,
    /// Set by `set_transaction_successful` on any inner level.
    nested_commit: bool,
    /// Overrides both commit flags.
    rollback_only: bool,
    listener: Option<Arc<dyn TransactionListener>>,
}

impl TransactionState {
    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    /// Pushes one level. Returns `true` when this opened the outermost transaction.
    pub(crate) fn begin(&mut self, listener: Option<Arc<dyn TransactionListener>>) -> bool {
        let outermost = self.depth == 0;
        if outermost {
            self.commit_requested = false;
            self.nested_commit = false;
            self.rollback_only = false;
            self.listener = listener;
        }
        self.depth += 1;
        outermost
    }

    pub(crate) fn listener(&self) -> Option<Arc<dyn TransactionListener>> {
        self.listener.clone()
    }

    pub(crate) fn mark_successful(&mut self) {
        crate::sqlbridge_assert!(
            self.depth > 0,
            "set_transaction_successful() called without an active transaction"
        );
        if self.depth == 1 {
            self.commit_requested = true;
        } else {
            self.nested_commit = true;
        }
    }

    /// Makes the outermost end roll back unless the outermost level itself
    /// was marked successful, whatever inner levels marked.
    pub(crate) fn force_rollback(&mut self) {
        if self.depth > 0 && !self.commit_requested {
            self.rollback_only = true;
        }
    }

    /// Pops one level. Returns the pending completion once the outermost level ends.
    pub(crate) fn end(&mut self) -> Option<Completion> {
        crate::sqlbridge_assert!(
            self.depth > 0,
            "end_transaction() called without an active transaction"
        );
        self.depth -= 1;
        if self.depth > 0 {
            return None;
        }
        let commit = !self.rollback_only && (self.commit_requested || self.nested_commit);
        self.commit_requested = false;
        self.nested_commit = false;
        self.rollback_only = false;
        Some(Completion {
            commit,
            listener: self.listener.take(),
        })
    }
}

/// A scoped transaction on a [`Connection`].
///
/// The transaction ends when the guard is dropped. A guard that opened the
/// outermost transaction commits only if it was marked successful (through
/// [`Transaction::set_successful`] or [`Transaction::commit`]); otherwise the
/// whole nest is discarded.
pub struct Transaction<'conn> {
    conn: &'conn Connection,
    outermost: bool,
    finished: bool,
}

impl<'conn> Transaction<'conn> {
    pub(crate) fn new(conn: &'conn Connection, outermost: bool) -> Self {
        Self {
            conn,
            outermost,
            finished: false,
        }
    }

    pub fn set_successful(&self) {
        self.conn.set_transaction_successful();
    }

    /// Marks the transaction successful and ends it.
    pub fn commit(mut self) -> Result<()> {
        self.conn.set_transaction_successful();
        self.finish_inner(true)
    }

    /// Ends the transaction without marking it successful. On the outermost
    /// level this rolls back work that nested levels marked successful.
    pub fn rollback(mut self) -> Result<()> {
        self.finish_inner(false)
    }

    fn finish_inner(&mut self, success: bool) -> Result<()> {
        self.finished = true;
        if !success && self.outermost {
            self.conn.force_rollback();
        }
        self.conn.end_transaction()
    }
}

impl Deref for Transaction<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.finish_inner(false) {
                tracing::error!("failed to end dropped transaction: {e}");
            }
        }
    }
}

impl Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("outermost", &self.outermost)
            .field("finished", &self.finished)
            .finish()
    }
}
