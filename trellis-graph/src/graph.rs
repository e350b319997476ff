//! Relationship graph: per-key relationship state with inverse maintenance.
//!
//! Every edit to a forward relationship `A.field` that declares an inverse is
//! mirrored onto `B.inverse` for each added or removed member `B`, on the same
//! side (remote or local) that the forward edit touched. Mirroring is a single
//! hop: an inverse edit never propagates back into the forward relationship.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use trellis_core::{
    DuplicatePolicy, RelationshipDefinition, RelationshipError, RelationshipKind, Schema,
};
use trellis_identity::ResourceKey;

use crate::operation::{dedupe, ToManyOperation};
use crate::state::{MutationStatus, RelationshipState, RelationshipValue, Side};

/// A tolerated duplicate reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deprecation {
    pub lid: String,
    pub field: String,
    /// Lids of the members that appeared more than once.
    pub duplicates: Vec<String>,
}

/// Result of a successful relationship mutation.
#[derive(Debug, Clone, Default)]
pub struct MutationOutcome {
    pub added: Vec<ResourceKey>,
    pub removed: Vec<ResourceKey>,
    pub deprecation: Option<Deprecation>,
}

/// Relationship data arriving from the server.
#[derive(Debug, Clone, Default)]
pub struct RemoteUpdate {
    /// `None` when the payload carried links or meta but no linkage.
    pub value: Option<RelationshipValue>,
    pub links: Option<Value>,
    pub meta: Option<Value>,
}

impl RemoteUpdate {
    pub fn to_one(value: Option<ResourceKey>) -> Self {
        Self {
            value: Some(RelationshipValue::ToOne(value)),
            ..Self::default()
        }
    }

    pub fn to_many(members: Vec<ResourceKey>) -> Self {
        Self {
            value: Some(RelationshipValue::ToMany(members)),
            ..Self::default()
        }
    }

    pub fn with_links(mut self, links: Value) -> Self {
        self.links = Some(links);
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Relationship state for every loaded resource.
pub struct RelationshipGraph {
    schema: Arc<dyn Schema>,
    states: HashMap<ResourceKey, BTreeMap<String, RelationshipState>>,
    duplicates: DuplicatePolicy,
    report_deprecations: bool,
    changes: Vec<(ResourceKey, String)>,
}

impl std::fmt::Debug for RelationshipGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationshipGraph")
            .field("resources", &self.states.len())
            .field("duplicates", &self.duplicates)
            .finish()
    }
}

impl RelationshipGraph {
    pub fn new(schema: Arc<dyn Schema>) -> Self {
        Self {
            schema,
            states: HashMap::new(),
            duplicates: DuplicatePolicy::default(),
            report_deprecations: true,
            changes: Vec::new(),
        }
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicates = policy;
        self
    }

    pub fn with_report_deprecations(mut self, enabled: bool) -> Self {
        self.report_deprecations = enabled;
        self
    }

    pub fn schema(&self) -> &Arc<dyn Schema> {
        &self.schema
    }

    /// State for `(key, field)`, created empty from the schema on first access.
    pub fn get_state(
        &mut self,
        key: &ResourceKey,
        field: &str,
    ) -> Result<&RelationshipState, RelationshipError> {
        let key = key.canonical();
        self.state_mut(&key, field).map(|state| &*state)
    }

    /// State for `(key, field)` if it has been created.
    pub fn peek_state(&self, key: &ResourceKey, field: &str) -> Option<&RelationshipState> {
        self.states.get(&key.canonical())?.get(field)
    }

    /// Fields with state on `key`.
    pub fn fields(&self, key: &ResourceKey) -> Vec<String> {
        self.states
            .get(&key.canonical())
            .map(|fields| fields.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Fields on `key` carrying uncommitted edits.
    pub fn dirty_fields(&self, key: &ResourceKey) -> Vec<String> {
        self.states
            .get(&key.canonical())
            .map(|fields| {
                fields
                    .iter()
                    .filter(|(_, state)| state.is_locally_mutated())
                    .map(|(field, _)| field.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether any relationship, on either side, still points at `key`.
    pub fn is_referenced(&self, key: &ResourceKey) -> bool {
        let key = key.canonical();
        self.states.iter().any(|(owner, fields)| {
            *owner != key
                && fields
                    .values()
                    .any(|state| state.remote.contains(&key) || state.local.contains(&key))
        })
    }

    /// Relationships touched since the last call, in first-touched order.
    pub fn take_changes(&mut self) -> Vec<(ResourceKey, String)> {
        std::mem::take(&mut self.changes)
    }

    /// Apply server data to `(key, field)`.
    ///
    /// A clean relationship takes the new value on both sides. A locally
    /// mutated one keeps its local edits rebased onto the new remote value:
    /// members the server dropped are dropped locally, members the server
    /// added are appended unless already present. For to-one, local wins.
    pub fn merge_remote(
        &mut self,
        key: &ResourceKey,
        field: &str,
        update: RemoteUpdate,
    ) -> Result<(), RelationshipError> {
        let owner = key.canonical();
        let definition = self.definition(&owner, field)?;
        let inverse = self.inverse_definition(&definition)?;

        let Some(value) = update.value else {
            let state = self.state_mut(&owner, field)?;
            if update.links.is_some() {
                state.links = update.links;
            }
            if update.meta.is_some() {
                state.meta = update.meta;
            }
            self.record(&owner, field);
            return Ok(());
        };

        if value.kind() != definition.kind {
            return Err(RelationshipError::KindMismatch {
                resource_type: definition.resource_type.clone(),
                field: field.to_string(),
                expected: definition.kind,
            });
        }
        let new_remote = canonical_value(value, &owner, &definition);
        check_members(&definition, &new_remote.members())?;

        let state = self.state_mut(&owner, field)?;
        let old_remote = state.remote.clone();
        let old_local = state.local.clone();
        let dirty = state.is_locally_mutated();

        let new_local = if dirty {
            rebase(&old_remote, &old_local, &new_remote)
        } else {
            new_remote.clone()
        };
        state.status = if dirty && new_local != new_remote {
            MutationStatus::LocallyMutated
        } else {
            MutationStatus::Clean
        };
        state.remote = new_remote.clone();
        state.local = new_local.clone();
        state.has_received_data = true;
        if update.links.is_some() {
            state.links = update.links;
        }
        if update.meta.is_some() {
            state.meta = update.meta;
        }
        self.record(&owner, field);

        if let Some(inverse) = inverse {
            let (added, removed) = diff(&old_remote, &new_remote);
            self.propagate(Side::Remote, &owner, &definition, &inverse, &added, &removed);
            let (added, removed) = diff(&old_local, &new_local);
            self.propagate(Side::Local, &owner, &definition, &inverse, &added, &removed);
        }
        Ok(())
    }

    /// Edit the local value of a to-many relationship.
    ///
    /// Fails without touching any state if the result would contain a
    /// duplicate the configured [`DuplicatePolicy`] does not tolerate.
    pub fn mutate_to_many(
        &mut self,
        key: &ResourceKey,
        field: &str,
        operation: ToManyOperation,
    ) -> Result<MutationOutcome, RelationshipError> {
        let owner = key.canonical();
        let definition = self.definition(&owner, field)?;
        if definition.kind != RelationshipKind::ToMany {
            return Err(RelationshipError::KindMismatch {
                resource_type: definition.resource_type.clone(),
                field: field.to_string(),
                expected: RelationshipKind::ToMany,
            });
        }
        let inverse = self.inverse_definition(&definition)?;

        let previous = self.state_mut(&owner, field)?.local.as_many().to_vec();
        let mut slots = operation.apply(&previous, field)?;
        for slot in &mut slots {
            slot.key = slot.key.canonical();
        }
        let incoming: Vec<ResourceKey> = slots
            .iter()
            .filter(|slot| !slot.retained)
            .map(|slot| slot.key.clone())
            .collect();
        check_members(&definition, &incoming)?;

        let deduped = dedupe(slots, &previous, self.duplicates, owner.lid(), field)?;
        let deprecation = if deduped.dropped.is_empty() {
            None
        } else {
            let duplicates: Vec<String> =
                deduped.dropped.iter().map(|k| k.lid().to_string()).collect();
            match self.duplicates {
                DuplicatePolicy::TolerateExisting => {
                    tracing::warn!(
                        lid = %owner,
                        field,
                        ?duplicates,
                        "Dropped members already present in relationship; duplicate insertion is deprecated"
                    );
                    self.report_deprecations.then(|| Deprecation {
                        lid: owner.lid().to_string(),
                        field: field.to_string(),
                        duplicates,
                    })
                }
                _ => {
                    tracing::debug!(lid = %owner, field, ?duplicates, "Deduplicated relationship members");
                    None
                }
            }
        };

        let result = RelationshipValue::ToMany(deduped.members);
        let before = RelationshipValue::ToMany(previous);
        let (added, removed) = diff(&before, &result);

        let state = self.state_mut(&owner, field)?;
        state.status = if result == state.remote {
            MutationStatus::Clean
        } else {
            MutationStatus::LocallyMutated
        };
        state.local = result;
        self.record(&owner, field);

        if let Some(inverse) = inverse {
            self.propagate(Side::Local, &owner, &definition, &inverse, &added, &removed);
        }

        tracing::debug!(
            lid = %owner,
            field,
            added = added.len(),
            removed = removed.len(),
            "Mutated to-many relationship"
        );
        Ok(MutationOutcome {
            added,
            removed,
            deprecation,
        })
    }

    /// Set the local value of a to-one relationship. Returns the previous value.
    ///
    /// If the inverse is itself to-one, the new member's previous owner loses
    /// its edge to that member.
    pub fn set_to_one(
        &mut self,
        key: &ResourceKey,
        field: &str,
        value: Option<ResourceKey>,
    ) -> Result<Option<ResourceKey>, RelationshipError> {
        let owner = key.canonical();
        let definition = self.definition(&owner, field)?;
        if definition.kind != RelationshipKind::ToOne {
            return Err(RelationshipError::KindMismatch {
                resource_type: definition.resource_type.clone(),
                field: field.to_string(),
                expected: RelationshipKind::ToOne,
            });
        }
        let inverse = self.inverse_definition(&definition)?;
        let value = value.map(|k| k.canonical());
        check_members(&definition, value.as_slice())?;

        let state = self.state_mut(&owner, field)?;
        let previous = state.local.as_one().cloned();
        if previous == value {
            return Ok(previous);
        }
        let result = RelationshipValue::ToOne(value.clone());
        state.status = if result == state.remote {
            MutationStatus::Clean
        } else {
            MutationStatus::LocallyMutated
        };
        state.local = result;
        self.record(&owner, field);

        if let Some(inverse) = inverse {
            let removed: Vec<ResourceKey> = previous.iter().cloned().collect();
            let added: Vec<ResourceKey> = value.into_iter().collect();
            self.propagate(Side::Local, &owner, &definition, &inverse, &added, &removed);
        }
        Ok(previous)
    }

    /// Discard local edits on `(key, field)` and undo their inverse effects.
    pub fn rollback(&mut self, key: &ResourceKey, field: &str) -> Result<(), RelationshipError> {
        let owner = key.canonical();
        let definition = self.definition(&owner, field)?;
        let inverse = self.inverse_definition(&definition)?;

        let state = self.state_mut(&owner, field)?;
        if !state.is_locally_mutated() {
            return Ok(());
        }
        let local = state.local.clone();
        state.local = state.remote.clone();
        state.status = MutationStatus::Clean;
        let remote = state.remote.clone();
        self.record(&owner, field);

        let Some(inverse) = inverse else {
            return Ok(());
        };
        let (added_locally, removed_locally) = diff(&remote, &local);
        for member in &added_locally {
            self.restore_inverse(&owner, &definition, &inverse, member);
        }
        for member in &removed_locally {
            self.link_inverse(Side::Local, &owner, &definition, &inverse, member);
        }
        Ok(())
    }

    /// Roll back every locally mutated relationship on `key`.
    pub fn rollback_all(&mut self, key: &ResourceKey) -> Result<(), RelationshipError> {
        for field in self.dirty_fields(key) {
            self.rollback(key, &field)?;
        }
        Ok(())
    }

    /// Promote the local value of `(key, field)` to the remote baseline.
    pub fn commit(&mut self, key: &ResourceKey, field: &str) -> Result<(), RelationshipError> {
        let owner = key.canonical();
        let definition = self.definition(&owner, field)?;
        let inverse = self.inverse_definition(&definition)?;

        let state = self.state_mut(&owner, field)?;
        let old_remote = state.remote.clone();
        state.remote = state.local.clone();
        state.status = MutationStatus::Clean;
        state.has_received_data = true;
        let new_remote = state.remote.clone();
        self.record(&owner, field);

        if let Some(inverse) = inverse {
            let (added, removed) = diff(&old_remote, &new_remote);
            self.propagate(Side::Remote, &owner, &definition, &inverse, &added, &removed);
        }
        Ok(())
    }

    /// Commit every relationship with state on `key`.
    pub fn commit_all(&mut self, key: &ResourceKey) -> Result<(), RelationshipError> {
        for field in self.dirty_fields(key) {
            self.commit(key, &field)?;
        }
        Ok(())
    }

    /// Drop all state owned by `key` and remove it from every inverse.
    ///
    /// Relationships without a declared inverse that point at `key` are left
    /// alone; [`is_referenced`](Self::is_referenced) reports them.
    pub fn unload(&mut self, key: &ResourceKey) {
        let owner = key.canonical();
        let Some(fields) = self.states.remove(&owner) else {
            return;
        };
        for state in fields.into_values() {
            let Some(inverse) = state.inverse_field() else {
                continue;
            };
            let mut members = state.remote.members();
            for member in state.local.members() {
                if !members.contains(&member) {
                    members.push(member);
                }
            }
            for member in members {
                if member == owner {
                    continue;
                }
                if let Some(target) = self
                    .states
                    .get_mut(&member)
                    .and_then(|fields| fields.get_mut(inverse))
                {
                    let in_remote = target.remote.remove(&owner);
                    let in_local = target.local.remove(&owner);
                    if in_remote || in_local {
                        target.settle();
                        self.record(&member, inverse);
                    }
                }
            }
        }
    }

    /// Redirect every edge from `loser` to `winner` after an identity merge.
    ///
    /// Where both keys hold state for the same field, the winner's state is
    /// kept unless it has never received data and carries no edits.
    pub fn merge_keys(&mut self, loser: &ResourceKey, winner: &ResourceKey) {
        if loser == winner {
            return;
        }
        if let Some(loser_fields) = self.states.remove(loser) {
            let winner_fields = self.states.entry(winner.clone()).or_default();
            for (field, state) in loser_fields {
                let replace = winner_fields
                    .get(&field)
                    .map_or(true, |existing| {
                        !existing.has_received_data() && !existing.is_locally_mutated()
                    });
                if replace {
                    winner_fields.insert(field, state);
                }
            }
        }

        let mut touched = Vec::new();
        for (owner, fields) in self.states.iter_mut() {
            for (field, state) in fields.iter_mut() {
                let remote = state.remote.replace_key(loser, winner);
                let local = state.local.replace_key(loser, winner);
                if remote || local {
                    touched.push((owner.clone(), field.clone()));
                }
            }
        }
        for (changed, _) in self.changes.iter_mut() {
            if changed == loser {
                *changed = winner.clone();
            }
        }
        for (owner, field) in touched {
            self.record(&owner, &field);
        }
        if let Some(fields) = self.states.get(winner) {
            for field in fields.keys().cloned().collect::<Vec<_>>() {
                self.record(winner, &field);
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn definition(
        &self,
        key: &ResourceKey,
        field: &str,
    ) -> Result<RelationshipDefinition, RelationshipError> {
        if let Some(state) = self.states.get(key).and_then(|fields| fields.get(field)) {
            return Ok(state.definition().clone());
        }
        self.schema
            .relationship(key.resource_type(), field)
            .cloned()
            .ok_or_else(|| RelationshipError::UnknownRelationship {
                resource_type: key.resource_type().to_string(),
                field: field.to_string(),
            })
    }

    fn inverse_definition(
        &self,
        definition: &RelationshipDefinition,
    ) -> Result<Option<RelationshipDefinition>, RelationshipError> {
        let Some(inverse) = definition.inverse.as_deref() else {
            return Ok(None);
        };
        self.schema
            .relationship(&definition.related_type, inverse)
            .cloned()
            .map(Some)
            .ok_or_else(|| RelationshipError::MissingInverse {
                resource_type: definition.resource_type.clone(),
                field: definition.field.clone(),
                related_type: definition.related_type.clone(),
                inverse: inverse.to_string(),
            })
    }

    fn state_mut(
        &mut self,
        key: &ResourceKey,
        field: &str,
    ) -> Result<&mut RelationshipState, RelationshipError> {
        let exists = self
            .states
            .get(key)
            .is_some_and(|fields| fields.contains_key(field));
        if !exists {
            let definition = self.definition(key, field)?;
            self.states
                .entry(key.clone())
                .or_default()
                .insert(field.to_string(), RelationshipState::empty(definition));
        }
        self.states
            .get_mut(key)
            .and_then(|fields| fields.get_mut(field))
            .ok_or_else(|| RelationshipError::UnknownRelationship {
                resource_type: key.resource_type().to_string(),
                field: field.to_string(),
            })
    }

    fn record(&mut self, key: &ResourceKey, field: &str) {
        let seen = self
            .changes
            .iter()
            .any(|(changed, changed_field)| changed == key && changed_field == field);
        if !seen {
            self.changes.push((key.clone(), field.to_string()));
        }
    }

    /// Mirror removals then additions of the forward relationship onto inverses.
    fn propagate(
        &mut self,
        side: Side,
        owner: &ResourceKey,
        forward: &RelationshipDefinition,
        inverse: &RelationshipDefinition,
        added: &[ResourceKey],
        removed: &[ResourceKey],
    ) {
        for member in removed {
            self.unlink_inverse(side, owner, forward, inverse, member);
        }
        for member in added {
            self.link_inverse(side, owner, forward, inverse, member);
        }
    }

    fn is_forward(
        owner: &ResourceKey,
        forward: &RelationshipDefinition,
        member: &ResourceKey,
        inverse: &RelationshipDefinition,
    ) -> bool {
        member == owner && inverse.field == forward.field
    }

    fn link_inverse(
        &mut self,
        side: Side,
        owner: &ResourceKey,
        forward: &RelationshipDefinition,
        inverse: &RelationshipDefinition,
        member: &ResourceKey,
    ) {
        if Self::is_forward(owner, forward, member, inverse) {
            return;
        }
        let Ok(target) = self.state_mut(member, &inverse.field) else {
            return;
        };
        let displaced = target.value_mut(side).insert(owner);
        target.settle();
        self.record(member, &inverse.field);

        // A to-one inverse can only point at one owner; the old one loses the member.
        if let Some(previous) = displaced {
            if let Some(state) = self
                .states
                .get_mut(&previous)
                .and_then(|fields| fields.get_mut(&forward.field))
            {
                if state.value_mut(side).remove(member) {
                    state.settle();
                    self.record(&previous, &forward.field);
                }
            }
        }
    }

    fn unlink_inverse(
        &mut self,
        side: Side,
        owner: &ResourceKey,
        forward: &RelationshipDefinition,
        inverse: &RelationshipDefinition,
        member: &ResourceKey,
    ) {
        if Self::is_forward(owner, forward, member, inverse) {
            return;
        }
        let Some(target) = self
            .states
            .get_mut(member)
            .and_then(|fields| fields.get_mut(&inverse.field))
        else {
            return;
        };
        if target.value_mut(side).remove(owner) {
            target.settle();
            self.record(member, &inverse.field);
        }
    }

    /// Undo a local inverse edit made for a member that is being rolled back.
    ///
    /// A to-one inverse returns to its remote value, and that remote owner
    /// regains the member locally.
    fn restore_inverse(
        &mut self,
        owner: &ResourceKey,
        forward: &RelationshipDefinition,
        inverse: &RelationshipDefinition,
        member: &ResourceKey,
    ) {
        if Self::is_forward(owner, forward, member, inverse) {
            return;
        }
        let Some(target) = self
            .states
            .get_mut(member)
            .and_then(|fields| fields.get_mut(&inverse.field))
        else {
            return;
        };
        let restored = match &mut target.local {
            RelationshipValue::ToOne(value) if value.as_ref() == Some(owner) => {
                *value = target.remote.as_one().cloned();
                value.clone().filter(|previous| previous != owner)
            }
            other => {
                other.remove(owner);
                None
            }
        };
        target.settle();
        self.record(member, &inverse.field);

        if let Some(previous) = restored {
            if let Some(state) = self
                .states
                .get_mut(&previous)
                .and_then(|fields| fields.get_mut(&forward.field))
            {
                state.local.insert(member);
                state.settle();
                self.record(&previous, &forward.field);
            }
        }
    }
}

/// Canonicalize members and drop duplicates from a server value.
fn canonical_value(
    value: RelationshipValue,
    owner: &ResourceKey,
    definition: &RelationshipDefinition,
) -> RelationshipValue {
    match value {
        RelationshipValue::ToOne(member) => RelationshipValue::ToOne(member.map(|k| k.canonical())),
        RelationshipValue::ToMany(members) => {
            let total = members.len();
            let mut seen = HashSet::new();
            let unique: Vec<ResourceKey> = members
                .into_iter()
                .map(|k| k.canonical())
                .filter(|k| seen.insert(k.clone()))
                .collect();
            if unique.len() != total {
                tracing::warn!(
                    lid = %owner,
                    field = %definition.field,
                    dropped = total - unique.len(),
                    "Server sent duplicate relationship members"
                );
            }
            RelationshipValue::ToMany(unique)
        }
    }
}

fn check_members(
    definition: &RelationshipDefinition,
    members: &[ResourceKey],
) -> Result<(), RelationshipError> {
    match members
        .iter()
        .find(|member| member.resource_type() != definition.related_type)
    {
        Some(member) => Err(RelationshipError::UnexpectedType {
            field: definition.field.clone(),
            expected: definition.related_type.clone(),
            found: member.resource_type().to_string(),
        }),
        None => Ok(()),
    }
}

/// Members of `after` not in `before`, and members of `before` not in `after`.
fn diff(
    before: &RelationshipValue,
    after: &RelationshipValue,
) -> (Vec<ResourceKey>, Vec<ResourceKey>) {
    let before = before.members();
    let after = after.members();
    let added = after.iter().filter(|k| !before.contains(k)).cloned().collect();
    let removed = before.iter().filter(|k| !after.contains(k)).cloned().collect();
    (added, removed)
}

fn rebase(
    old_remote: &RelationshipValue,
    local: &RelationshipValue,
    new_remote: &RelationshipValue,
) -> RelationshipValue {
    match (local, new_remote) {
        (RelationshipValue::ToMany(local), RelationshipValue::ToMany(remote)) => {
            let old_remote = old_remote.as_many();
            let mut rebased: Vec<ResourceKey> = local
                .iter()
                .filter(|k| !old_remote.contains(k) || remote.contains(k))
                .cloned()
                .collect();
            for member in remote {
                if !old_remote.contains(member) && !rebased.contains(member) {
                    rebased.push(member.clone());
                }
            }
            RelationshipValue::ToMany(rebased)
        }
        _ => local.clone(),
    }
}

// =============================================================================
// TESTS
// =============================================================================
