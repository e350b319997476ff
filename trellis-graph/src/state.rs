//! Relationship state held per (resource, field).
//!
//! # State Transition Diagram
//!
//! ```text
//! Clean ─── mutate ──→ LocallyMutated ─── rollback / commit ──→ Clean
//!                           ↺ mutate
//! ```

use serde_json::Value;
use std::collections::HashSet;
use trellis_core::{RelationshipDefinition, RelationshipKind};
use trellis_identity::ResourceKey;

/// Value of one side (remote or local) of a relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipValue {
    ToOne(Option<ResourceKey>),
    /// Ordered and duplicate-free.
    ToMany(Vec<ResourceKey>),
}

impl RelationshipValue {
    pub fn empty(kind: RelationshipKind) -> Self {
        match kind {
            RelationshipKind::ToOne => RelationshipValue::ToOne(None),
            RelationshipKind::ToMany => RelationshipValue::ToMany(Vec::new()),
        }
    }

    pub fn kind(&self) -> RelationshipKind {
        match self {
            RelationshipValue::ToOne(_) => RelationshipKind::ToOne,
            RelationshipValue::ToMany(_) => RelationshipKind::ToMany,
        }
    }

    pub fn as_one(&self) -> Option<&ResourceKey> {
        match self {
            RelationshipValue::ToOne(value) => value.as_ref(),
            RelationshipValue::ToMany(_) => None,
        }
    }

    /// Members of a to-many value; empty for to-one.
    pub fn as_many(&self) -> &[ResourceKey] {
        match self {
            RelationshipValue::ToMany(members) => members,
            RelationshipValue::ToOne(_) => &[],
        }
    }

    /// Every member regardless of kind.
    pub fn members(&self) -> Vec<ResourceKey> {
        match self {
            RelationshipValue::ToOne(value) => value.iter().cloned().collect(),
            RelationshipValue::ToMany(members) => members.clone(),
        }
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        match self {
            RelationshipValue::ToOne(value) => value.as_ref() == Some(key),
            RelationshipValue::ToMany(members) => members.contains(key),
        }
    }

    /// Add a member. For to-one values, returns the member it displaced.
    pub(crate) fn insert(&mut self, key: &ResourceKey) -> Option<ResourceKey> {
        match self {
            RelationshipValue::ToOne(value) => {
                if value.as_ref() == Some(key) {
                    None
                } else {
                    value.replace(key.clone())
                }
            }
            RelationshipValue::ToMany(members) => {
                if !members.contains(key) {
                    members.push(key.clone());
                }
                None
            }
        }
    }

    pub(crate) fn remove(&mut self, key: &ResourceKey) -> bool {
        match self {
            RelationshipValue::ToOne(value) => {
                if value.as_ref() == Some(key) {
                    *value = None;
                    true
                } else {
                    false
                }
            }
            RelationshipValue::ToMany(members) => {
                let before = members.len();
                members.retain(|k| k != key);
                members.len() != before
            }
        }
    }

    /// Swap every occurrence of `from` for `to`, keeping members unique.
    pub(crate) fn replace_key(&mut self, from: &ResourceKey, to: &ResourceKey) -> bool {
        match self {
            RelationshipValue::ToOne(value) => {
                if value.as_ref() == Some(from) {
                    *value = Some(to.clone());
                    true
                } else {
                    false
                }
            }
            RelationshipValue::ToMany(members) => {
                let Some(pos) = members.iter().position(|k| k == from) else {
                    return false;
                };
                if members.contains(to) {
                    members.remove(pos);
                } else {
                    members[pos] = to.clone();
                }
                true
            }
        }
    }

    /// Same members, ignoring order.
    pub fn same_members(&self, other: &RelationshipValue) -> bool {
        match (self, other) {
            (RelationshipValue::ToOne(a), RelationshipValue::ToOne(b)) => a == b,
            (RelationshipValue::ToMany(a), RelationshipValue::ToMany(b)) => {
                let left: HashSet<&ResourceKey> = a.iter().collect();
                let right: HashSet<&ResourceKey> = b.iter().collect();
                a.len() == b.len() && left == right
            }
            _ => false,
        }
    }
}

/// Whether the local value carries uncommitted edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationStatus {
    #[default]
    Clean,
    LocallyMutated,
}

/// State of one relationship field on one resource.
#[derive(Debug, Clone)]
pub struct RelationshipState {
    definition: RelationshipDefinition,
    pub(crate) remote: RelationshipValue,
    pub(crate) local: RelationshipValue,
    pub(crate) status: MutationStatus,
    pub(crate) has_received_data: bool,
    pub(crate) links: Option<Value>,
    pub(crate) meta: Option<Value>,
}

impl RelationshipState {
    pub(crate) fn empty(definition: RelationshipDefinition) -> Self {
        let value = RelationshipValue::empty(definition.kind);
        Self {
            definition,
            remote: value.clone(),
            local: value,
            status: MutationStatus::Clean,
            has_received_data: false,
            links: None,
            meta: None,
        }
    }

    pub fn definition(&self) -> &RelationshipDefinition {
        &self.definition
    }

    pub fn kind(&self) -> RelationshipKind {
        self.definition.kind
    }

    pub fn inverse_field(&self) -> Option<&str> {
        self.definition.inverse.as_deref()
    }

    /// Last value confirmed by the server.
    pub fn remote_state(&self) -> &RelationshipValue {
        &self.remote
    }

    /// Working value including uncommitted edits.
    pub fn local_state(&self) -> &RelationshipValue {
        &self.local
    }

    pub fn status(&self) -> MutationStatus {
        self.status
    }

    pub fn is_locally_mutated(&self) -> bool {
        self.status == MutationStatus::LocallyMutated
    }

    /// False until a payload or commit has supplied a value; a to-one
    /// relationship without data is "unknown" rather than null.
    pub fn has_received_data(&self) -> bool {
        self.has_received_data
    }

    pub fn links(&self) -> Option<&Value> {
        self.links.as_ref()
    }

    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }

    pub(crate) fn value_mut(&mut self, side: Side) -> &mut RelationshipValue {
        match side {
            Side::Remote => &mut self.remote,
            Side::Local => &mut self.local,
        }
    }

    /// Reconcile the status of a relationship edited only as an inverse.
    pub(crate) fn settle(&mut self) {
        if self.local.same_members(&self.remote) {
            self.local = self.remote.clone();
            self.status = MutationStatus::Clean;
        } else {
            self.status = MutationStatus::LocallyMutated;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Remote,
    Local,
}
