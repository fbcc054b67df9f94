//! Store model and commit application
//!
//! The materialized store is a flat mapping from dot-encoded context keys to
//! per-context entry maps. Every consumer of commits (the driver's cache,
//! the compactor's head-snapshot staging, and transactional read-through)
//! applies them through the single routine in this module so their semantics
//! cannot drift.

use crate::context::ContextPath;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entries of a single context: key → value.
pub type ContextEntries = BTreeMap<String, Value>;

/// The materialized store: dot-encoded context key → entries.
///
/// The root context's key is the empty string.
pub type StoreData = BTreeMap<String, ContextEntries>;

/// A single mutation inside a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Merge the given entries into the context (later wins per key).
    Set {
        /// Target context
        context: ContextPath,
        /// Entries to merge
        values: ContextEntries,
    },
    /// Delete keys from a context, or the context subtree itself.
    Delete {
        /// Target context
        context: ContextPath,
        /// With `Some`: delete just these keys. With `None`: delete the
        /// context and every descendant context; the root context clears
        /// the entire store.
        keys: Option<Vec<String>>,
    },
}

impl Op {
    /// The context this op targets.
    pub fn context(&self) -> &ContextPath {
        match self {
            Op::Set { context, .. } => context,
            Op::Delete { context, .. } => context,
        }
    }
}

/// A durable, atomic bundle of ops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Wall-clock milliseconds when the commit was appended.
    pub ts: u64,
    /// Ops in application order.
    pub ops: Vec<Op>,
}

/// Apply one op to a store.
pub fn apply_op(store: &mut StoreData, op: &Op) {
    match op {
        Op::Set { context, values } => {
            let entries = store.entry(context.storage_key()).or_default();
            for (k, v) in values {
                entries.insert(k.clone(), v.clone());
            }
        }
        Op::Delete {
            context,
            keys: Some(keys),
        } => {
            if let Some(entries) = store.get_mut(&context.storage_key()) {
                for k in keys {
                    entries.remove(k);
                }
            }
        }
        Op::Delete {
            context,
            keys: None,
        } => {
            let key = context.storage_key();
            if key.is_empty() {
                store.clear();
                return;
            }
            store.remove(&key);
            let prefix = format!("{}.", key);
            store.retain(|ctx, _| !ctx.starts_with(&prefix));
        }
    }
}

/// Apply a whole commit, op by op in order.
pub fn apply_commit(store: &mut StoreData, commit: &Commit) {
    for op in &commit.ops {
        apply_op(store, op);
    }
}

/// Look up one value.
pub fn get_value<'a>(store: &'a StoreData, context: &ContextPath, key: &str) -> Option<&'a Value> {
    store.get(&context.storage_key())?.get(key)
}

/// Keys present in a context, in sorted order.
pub fn context_keys(store: &StoreData, context: &ContextPath) -> Vec<String> {
    store
        .get(&context.storage_key())
        .map(|entries| entries.keys().cloned().collect())
        .unwrap_or_default()
}

/// A copy of a context's entries.
pub fn context_values(store: &StoreData, context: &ContextPath) -> ContextEntries {
    store
        .get(&context.storage_key())
        .cloned()
        .unwrap_or_default()
}

/// Names of the immediate child contexts, derived by scanning storage keys
/// under the context's prefix.
pub fn child_contexts(store: &StoreData, context: &ContextPath) -> Vec<String> {
    let key = context.storage_key();
    let prefix = if key.is_empty() {
        String::new()
    } else {
        format!("{}.", key)
    };

    let mut children = std::collections::BTreeSet::new();
    for ctx in store.keys() {
        if ctx == &key || !ctx.starts_with(&prefix) {
            continue;
        }
        let rest = &ctx[prefix.len()..];
        if let Some(first) = rest.split('.').next() {
            if !first.is_empty() {
                children.insert(first.to_string());
            }
        }
    }
    children.into_iter().collect()
}
