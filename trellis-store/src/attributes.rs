//! Attribute cache: remote attributes per resource plus uncommitted edits.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use trellis_core::Attributes;
use trellis_identity::ResourceKey;

#[derive(Debug, Default, Clone)]
struct AttributeState {
    remote: Attributes,
    /// Only attributes whose local value differs from remote.
    local: Attributes,
}

/// One uncommitted attribute edit.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeChange {
    pub remote: Option<Value>,
    pub local: Value,
}

#[derive(Debug, Default)]
pub(crate) struct AttributeCache {
    states: HashMap<ResourceKey, AttributeState>,
}

impl AttributeCache {
    /// Patch remote attributes. Attributes absent from `incoming` keep their
    /// previous value; a local edit that now matches remote is dropped.
    pub fn merge_remote(&mut self, key: &ResourceKey, incoming: &Attributes) -> bool {
        let state = self.states.entry(key.clone()).or_default();
        let mut changed = false;
        for (name, value) in incoming {
            if state.remote.get(name) != Some(value) {
                state.remote.insert(name.clone(), value.clone());
                changed = true;
            }
            if state.local.get(name) == Some(value) {
                state.local.remove(name);
            }
        }
        changed
    }

    pub fn ensure(&mut self, key: &ResourceKey) {
        self.states.entry(key.clone()).or_default();
    }

    pub fn get(&self, key: &ResourceKey, name: &str) -> Option<Value> {
        let state = self.states.get(key)?;
        state
            .local
            .get(name)
            .or_else(|| state.remote.get(name))
            .cloned()
    }

    /// Remote attributes overlaid with local edits.
    pub fn all(&self, key: &ResourceKey) -> Attributes {
        let Some(state) = self.states.get(key) else {
            return Attributes::new();
        };
        let mut merged = state.remote.clone();
        for (name, value) in &state.local {
            merged.insert(name.clone(), value.clone());
        }
        merged
    }

    pub fn remote(&self, key: &ResourceKey) -> Attributes {
        self.states
            .get(key)
            .map(|state| state.remote.clone())
            .unwrap_or_default()
    }

    /// Returns whether the visible value changed.
    pub fn set(&mut self, key: &ResourceKey, name: &str, value: Value) -> bool {
        let state = self.states.entry(key.clone()).or_default();
        let current = state.local.get(name).or_else(|| state.remote.get(name));
        if current == Some(&value) {
            return false;
        }
        if state.remote.get(name) == Some(&value) {
            state.local.remove(name);
        } else {
            state.local.insert(name.to_string(), value);
        }
        true
    }

    pub fn changed(&self, key: &ResourceKey) -> BTreeMap<String, AttributeChange> {
        let Some(state) = self.states.get(key) else {
            return BTreeMap::new();
        };
        state
            .local
            .iter()
            .map(|(name, local)| {
                (
                    name.clone(),
                    AttributeChange {
                        remote: state.remote.get(name).cloned(),
                        local: local.clone(),
                    },
                )
            })
            .collect()
    }

    pub fn has_dirty(&self, key: &ResourceKey) -> bool {
        self.states
            .get(key)
            .is_some_and(|state| !state.local.is_empty())
    }

    /// Discard local edits, returning the names that reverted.
    pub fn rollback(&mut self, key: &ResourceKey) -> Vec<String> {
        self.states
            .get_mut(key)
            .map(|state| std::mem::take(&mut state.local).into_iter().map(|(name, _)| name).collect())
            .unwrap_or_default()
    }

    /// Promote local edits to remote.
    pub fn commit(&mut self, key: &ResourceKey) {
        if let Some(state) = self.states.get_mut(key) {
            for (name, value) in std::mem::take(&mut state.local) {
                state.remote.insert(name, value);
            }
        }
    }

    pub fn remove(&mut self, key: &ResourceKey) {
        self.states.remove(key);
    }

    /// Fold the loser's attributes into the winner; the winner's values win.
    pub fn merge_keys(&mut self, loser: &ResourceKey, winner: &ResourceKey) {
        let Some(lost) = self.states.remove(loser) else {
            return;
        };
        let state = self.states.entry(winner.clone()).or_default();
        for (name, value) in lost.remote {
            state.remote.entry(name).or_insert(value);
        }
        for (name, value) in lost.local {
            state.local.entry(name).or_insert(value);
        }
    }
}
