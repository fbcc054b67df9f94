//! Transactions
//!
//! A transaction buffers ops against the driver and reads its own writes:
//! `get` scans the buffer latest-first before falling through to the
//! cache, and the folded views (`keys`/`values`/`contexts`) apply the
//! buffer over a copy of the relevant cache subtree through the same
//! routine that applies committed ops.
//!
//! Lifecycle: *active* → *committed* (terminal) or *rolled back*
//! (terminal). Dropping an active transaction rolls it back; nothing was
//! written, so there is nothing to undo on disk.

use crate::driver::WalDriver;
use hearth_core::context::{validate_key, ContextPath};
use hearth_core::error::{Error, Result};
use hearth_core::store::{
    apply_op, child_contexts, context_keys, context_values, ContextEntries, Op, StoreData,
};
use hearth_core::value::Value;
use hearth_durability::CommitId;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed,
    RolledBack,
}

/// A scoped, ordered buffer of ops with read-your-writes semantics.
///
/// Created with [`WalDriver::begin`]; never nested.
pub struct Transaction<'d> {
    driver: &'d WalDriver,
    buffered: Vec<Op>,
    state: TxnState,
}

impl<'d> Transaction<'d> {
    pub(crate) fn new(driver: &'d WalDriver) -> Self {
        Transaction {
            driver,
            buffered: Vec::new(),
            state: TxnState::Active,
        }
    }

    /// Whether the transaction can still buffer ops.
    pub fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }

    fn check_active(&self) -> Result<()> {
        match self.state {
            TxnState::Active => Ok(()),
            TxnState::Committed => Err(Error::TransactionClosed { state: "committed" }),
            TxnState::RolledBack => Err(Error::TransactionClosed {
                state: "rolled back",
            }),
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Look up a value, seeing this transaction's own buffered ops first.
    pub fn get(&self, context: &ContextPath, key: &str) -> Option<Value> {
        for op in self.buffered.iter().rev() {
            match op {
                Op::Set {
                    context: target,
                    values,
                } if target == context => {
                    if let Some(value) = values.get(key) {
                        return Some(value.clone());
                    }
                }
                Op::Delete {
                    context: target,
                    keys: Some(keys),
                } if target == context && keys.iter().any(|k| k == key) => {
                    return None;
                }
                Op::Delete {
                    context: target,
                    keys: None,
                } if context.starts_with(target) => {
                    return None;
                }
                _ => {}
            }
        }
        self.driver.get(context, key)
    }

    /// Keys of a context with buffered ops folded in.
    pub fn keys(&self, context: &ContextPath) -> Vec<String> {
        context_keys(&self.folded_subtree(context), context)
    }

    /// Entries of a context with buffered ops folded in.
    pub fn values(&self, context: &ContextPath) -> ContextEntries {
        context_values(&self.folded_subtree(context), context)
    }

    /// Immediate child contexts with buffered ops folded in.
    pub fn contexts(&self, context: &ContextPath) -> Vec<String> {
        child_contexts(&self.folded_subtree(context), context)
    }

    /// The driver's view of the subtree with every buffered op applied,
    /// restricted back to the subtree afterwards (ops may touch other
    /// contexts).
    fn folded_subtree(&self, context: &ContextPath) -> StoreData {
        let mut view = self.driver.subtree(context);
        for op in &self.buffered {
            apply_op(&mut view, op);
        }
        if context.is_root() {
            return view;
        }
        let key = context.storage_key();
        let prefix = format!("{}.", key);
        view.retain(|ctx, _| ctx == &key || ctx.starts_with(&prefix));
        view
    }

    // ------------------------------------------------------------------
    // Mutations (buffered until commit)
    // ------------------------------------------------------------------

    /// Buffer a single-value set.
    pub fn set(&mut self, context: &ContextPath, key: &str, value: Value) -> Result<()> {
        self.check_active()?;
        validate_key(key)?;
        self.buffered.push(Op::Set {
            context: context.clone(),
            values: BTreeMap::from([(key.to_string(), value)]),
        });
        Ok(())
    }

    /// Buffer a multi-value merge into one context.
    pub fn set_values(&mut self, context: &ContextPath, values: ContextEntries) -> Result<()> {
        self.check_active()?;
        for key in values.keys() {
            validate_key(key)?;
        }
        self.buffered.push(Op::Set {
            context: context.clone(),
            values,
        });
        Ok(())
    }

    /// Buffer a single-key delete.
    pub fn delete(&mut self, context: &ContextPath, key: &str) -> Result<()> {
        self.check_active()?;
        validate_key(key)?;
        self.buffered.push(Op::Delete {
            context: context.clone(),
            keys: Some(vec![key.to_string()]),
        });
        Ok(())
    }

    /// Buffer a subtree clear: the context's own entries and every
    /// descendant context.
    pub fn clear_all(&mut self, context: &ContextPath) -> Result<()> {
        self.check_active()?;
        self.buffered.push(Op::Delete {
            context: context.clone(),
            keys: None,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Blob passthrough (not transactional)
    // ------------------------------------------------------------------

    /// Write a blob straight through to the driver.
    pub fn write_blob(&self, context: &ContextPath, key: &str, data: &[u8]) -> Result<()> {
        self.driver.write_blob(context, key, data)
    }

    /// Read a blob straight through from the driver.
    pub fn read_blob(&self, context: &ContextPath, key: &str) -> Result<Option<Vec<u8>>> {
        self.driver.read_blob(context, key)
    }

    /// Delete a blob straight through on the driver.
    pub fn delete_blob(&self, context: &ContextPath, key: &str) -> Result<bool> {
        self.driver.delete_blob(context, key)
    }

    // ------------------------------------------------------------------
    // Outcome
    // ------------------------------------------------------------------

    /// Commit the buffered ops as one durable commit.
    ///
    /// An empty transaction commits trivially with `None`. On a write
    /// failure the transaction is rolled back and its ops are lost; the
    /// cache was never touched. A second commit fails with
    /// [`Error::TransactionClosed`].
    pub fn commit(&mut self) -> Result<Option<CommitId>> {
        self.check_active()?;
        if self.buffered.is_empty() {
            self.state = TxnState::Committed;
            return Ok(None);
        }

        let ops = std::mem::take(&mut self.buffered);
        match self.driver.commit_ops(&ops) {
            Ok(id) => {
                self.state = TxnState::Committed;
                Ok(Some(id))
            }
            Err(e) => {
                self.state = TxnState::RolledBack;
                Err(e)
            }
        }
    }

    /// Discard the buffered ops. No on-disk work.
    pub fn rollback(&mut self) {
        if self.state == TxnState::Active {
            self.buffered.clear();
            self.state = TxnState::RolledBack;
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        // Implicit rollback when the scope exits without a commit
        self.rollback();
    }
}
