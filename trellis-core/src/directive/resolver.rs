//! Payload Resolution
//!
//! The engine never computes payloads itself. It asks a [`PayloadResolver`]
//! for the raw value of a directive under a given instance id.

use std::collections::HashMap;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;

use super::{Directive, Uid};

/// Produces a directive's raw value for one instance.
pub trait PayloadResolver {
    /// Resolve the current value of `directive` for `uid`.
    ///
    /// Unknown values resolve to [`Value::Null`].
    fn resolve(&self, directive: &Directive, uid: &Uid) -> Value;
}

impl<F> PayloadResolver for F
where
    F: Fn(&Directive, &Uid) -> Value,
{
    fn resolve(&self, directive: &Directive, uid: &Uid) -> Value {
        self(directive, uid)
    }
}

/// An in-memory table of payload values per instance and key.
///
/// Directives are resolved through their payload key. The table can be
/// written through a shared reference while instances hold on to it.
#[derive(Debug, Default)]
pub struct PayloadTable {
    values: RwLock<HashMap<Uid, IndexMap<String, Value>>>,
}

impl PayloadTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value of `key` for `uid`, returning the previous value.
    pub fn set(&self, uid: &Uid, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values
            .write()
            .entry(uid.clone())
            .or_default()
            .insert(key.into(), value)
    }

    /// Get the value of `key` for `uid`.
    pub fn get(&self, uid: &Uid, key: &str) -> Option<Value> {
        self.values
            .read()
            .get(uid)
            .and_then(|values| values.get(key))
            .cloned()
    }

    /// Forget every value stored for `uid`.
    pub fn remove_instance(&self, uid: &Uid) -> bool {
        self.values.write().remove(uid).is_some()
    }
}

impl PayloadResolver for PayloadTable {
    fn resolve(&self, directive: &Directive, uid: &Uid) -> Value {
        directive
            .key()
            .and_then(|key| self.get(uid, key))
            .unwrap_or(Value::Null)
    }
}
