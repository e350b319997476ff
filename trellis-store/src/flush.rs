//! The store's join section.
//!
//! A [`Flush`] borrows every sub-store under the store lock. Operations that
//! span identity, attributes, relationships and documents run through it so
//! a merge is applied to all of them before anyone else observes the store.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use trellis_cache::{
    CachedDocument, DocumentCache, DocumentData, DocumentResources, Operation, PersistedData,
    PersistedDocument, RequestInput, RequestKey, RequestTarget,
};
use trellis_core::{
    Attributes, Linkage, NormalizedPayload, PrimaryData, RelationshipData, RelationshipError,
    RelationshipKind, RequestError, ResourceRecord, ResourceReference, Schema, StoreConfig,
    StoreResult,
};
use trellis_graph::{
    MutationOutcome, RelationshipGraph, RelationshipState, RelationshipValue, RemoteUpdate,
    ToManyOperation,
};
use trellis_identity::{IdAssignment, IdentityRegistry, ResourceKey};

use crate::attributes::{AttributeCache, AttributeChange};
use crate::fetch::FetchTable;
use crate::notify::{DocumentChange, Notification, ResourceChange};

/// Everything guarded by the store lock.
#[derive(Debug)]
pub(crate) struct StoreState {
    pub identity: IdentityRegistry,
    pub graph: RelationshipGraph,
    pub documents: DocumentCache,
    pub attributes: AttributeCache,
    pub fetches: FetchTable,
    pending: Vec<Notification>,
}

impl StoreState {
    pub fn new(schema: Arc<dyn Schema>, config: &StoreConfig) -> Self {
        Self {
            identity: IdentityRegistry::new(),
            graph: RelationshipGraph::new(schema)
                .with_duplicate_policy(config.duplicates)
                .with_report_deprecations(config.report_deprecations),
            documents: DocumentCache::new(),
            attributes: AttributeCache::default(),
            fetches: FetchTable::default(),
            pending: Vec::new(),
        }
    }
}

/// Snapshot of a successful document destined for the persisted cache.
#[derive(Debug)]
pub(crate) struct PersistJob {
    pub key: RequestKey,
    pub document: PersistedDocument,
    pub resources: Vec<ResourceRecord>,
}

/// Exclusive access to the store for the duration of one
/// [`Store::transact`](crate::Store::transact) call.
///
/// Notifications raised here are delivered after the flush ends.
pub struct Flush<'a> {
    pub(crate) state: &'a mut StoreState,
    config: &'a StoreConfig,
}

impl<'a> Flush<'a> {
    pub(crate) fn new(state: &'a mut StoreState, config: &'a StoreConfig) -> Self {
        Self { state, config }
    }

    /// Drain buffered notifications, relationship changes included.
    pub(crate) fn finish(self) -> Vec<Notification> {
        let mut notifications = std::mem::take(&mut self.state.pending);
        notifications.extend(
            self.state
                .graph
                .take_changes()
                .into_iter()
                .map(|(key, field)| Notification::Relationship { key, field }),
        );
        notifications
    }

    pub fn config(&self) -> &StoreConfig {
        self.config
    }

    fn notify(&mut self, notification: Notification) {
        self.state.pending.push(notification);
    }

    fn notify_resource(&mut self, key: &ResourceKey, change: ResourceChange) {
        self.notify(Notification::Resource {
            key: key.clone(),
            change,
        });
    }

    fn notify_document(&mut self, request_key: &RequestKey, change: DocumentChange) {
        self.notify(Notification::Document {
            request_key: request_key.clone(),
            change,
        });
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// Canonical key for `reference`, creating one if needed.
    pub fn resolve(&mut self, reference: &ResourceReference) -> StoreResult<ResourceKey> {
        let resolution = self.state.identity.resolve_detailed(reference)?;
        if let Some(loser) = &resolution.merged {
            self.mirror_merge(loser, &resolution.key);
        }
        if resolution.created {
            self.state.attributes.ensure(&resolution.key);
            self.notify_resource(&resolution.key, ResourceChange::Added);
        }
        Ok(resolution.key)
    }

    /// Look up without creating.
    pub fn peek_resource(&self, reference: &ResourceReference) -> Option<ResourceKey> {
        self.state.identity.peek(reference)
    }

    pub fn keys_for_type(&self, resource_type: &str) -> Vec<ResourceKey> {
        self.state.identity.keys_for_type(resource_type)
    }

    /// Give a local key its server id, merging if another key owns it.
    ///
    /// Returns the key to use from now on.
    pub fn assign_id(&mut self, key: &ResourceKey, id: &str) -> StoreResult<ResourceKey> {
        match self.state.identity.assign_id(key, id)? {
            IdAssignment::Unchanged(key) => Ok(key),
            IdAssignment::Assigned(key) => {
                self.notify_resource(&key, ResourceChange::Identity);
                Ok(key)
            }
            IdAssignment::Merged { winner, loser } => {
                self.mirror_merge(&loser, &winner);
                Ok(winner)
            }
        }
    }

    /// A new resource that has not been saved yet.
    pub fn create_resource(&mut self, resource_type: &str, attributes: Attributes) -> ResourceKey {
        let key = self.state.identity.create_local(resource_type);
        self.state.attributes.ensure(&key);
        for (name, value) in attributes {
            self.state.attributes.set(&key, &name, value);
        }
        self.notify_resource(&key, ResourceChange::Added);
        key
    }

    fn mirror_merge(&mut self, loser: &ResourceKey, winner: &ResourceKey) {
        info!(loser = %loser.lid(), winner = %winner.lid(), "Merging resource keys");
        self.state.graph.merge_keys(loser, winner);
        self.state.attributes.merge_keys(loser, winner);
        for request_key in self.state.documents.merge_keys(loser, winner) {
            self.notify_document(&request_key, DocumentChange::Updated);
        }
        self.notify_resource(loser, ResourceChange::Identity);
        self.notify_resource(winner, ResourceChange::Identity);
    }

    // ------------------------------------------------------------------
    // Payloads
    // ------------------------------------------------------------------

    /// Merge a normalized payload, returning its primary keys in order.
    pub fn push(&mut self, payload: &NormalizedPayload) -> StoreResult<Vec<ResourceKey>> {
        self.push_payload(payload).map(|primary| primary.keys())
    }

    /// All-or-nothing: nothing is merged if any reference would fail to
    /// resolve or any relationship disagrees with the schema.
    fn push_payload(&mut self, payload: &NormalizedPayload) -> StoreResult<DocumentResources> {
        self.validate_payload(payload)?;

        let mut merged = Vec::new();
        for record in payload.records() {
            let key = self.resolve(&record.reference())?;
            if self.state.attributes.merge_remote(&key, &record.attributes) {
                self.notify_resource(&key, ResourceChange::Updated);
            }
            merged.push((key, record));
        }

        for (key, record) in merged {
            for (field, data) in &record.relationships {
                let update = self.remote_update(data)?;
                self.state.graph.merge_remote(&key, field, update)?;
            }
        }

        let primary = match &payload.data {
            Some(PrimaryData::Single(record)) => {
                DocumentResources::Single(Some(self.resolve(&record.reference())?))
            }
            Some(PrimaryData::Collection(records)) => {
                let mut keys = Vec::with_capacity(records.len());
                for record in records {
                    keys.push(self.resolve(&record.reference())?);
                }
                DocumentResources::Collection(keys)
            }
            Some(PrimaryData::Null) | None => DocumentResources::Single(None),
        };
        Ok(primary)
    }

    /// Everything merging `payload` could fail on, checked against the
    /// schema and a dry run of identity resolution in merge order.
    fn validate_payload(&self, payload: &NormalizedPayload) -> StoreResult<()> {
        let schema = self.state.graph.schema();
        let mut identity = self.state.identity.preflight();
        for record in payload.records() {
            identity.check(&record.reference())?;
        }

        for record in payload.records() {
            for (field, data) in &record.relationships {
                let definition = schema
                    .relationship(&record.resource_type, field)
                    .ok_or_else(|| RelationshipError::UnknownRelationship {
                        resource_type: record.resource_type.clone(),
                        field: field.clone(),
                    })?;
                if let Some(inverse) = definition.inverse.as_deref() {
                    if schema.relationship(&definition.related_type, inverse).is_none() {
                        return Err(RelationshipError::MissingInverse {
                            resource_type: definition.resource_type.clone(),
                            field: definition.field.clone(),
                            related_type: definition.related_type.clone(),
                            inverse: inverse.to_string(),
                        }
                        .into());
                    }
                }

                let (kind, members) = match &data.data {
                    None => continue,
                    Some(Linkage::ToOne(member)) => {
                        (RelationshipKind::ToOne, member.iter().collect::<Vec<_>>())
                    }
                    Some(Linkage::ToMany(members)) => {
                        (RelationshipKind::ToMany, members.iter().collect())
                    }
                };
                if kind != definition.kind {
                    return Err(RelationshipError::KindMismatch {
                        resource_type: definition.resource_type.clone(),
                        field: field.clone(),
                        expected: definition.kind,
                    }
                    .into());
                }
                for member in members {
                    identity.check(member)?;
                    if member.resource_type != definition.related_type {
                        return Err(RelationshipError::UnexpectedType {
                            field: field.clone(),
                            expected: definition.related_type.clone(),
                            found: member.resource_type.clone(),
                        }
                        .into());
                    }
                }
            }
        }
        Ok(())
    }

    fn remote_update(&mut self, data: &RelationshipData) -> StoreResult<RemoteUpdate> {
        let value = match &data.data {
            None => None,
            Some(Linkage::ToOne(reference)) => Some(RelationshipValue::ToOne(
                reference.as_ref().map(|r| self.resolve(r)).transpose()?,
            )),
            Some(Linkage::ToMany(references)) => {
                let mut members = Vec::with_capacity(references.len());
                for reference in references {
                    members.push(self.resolve(reference)?);
                }
                Some(RelationshipValue::ToMany(members))
            }
        };
        Ok(RemoteUpdate {
            value,
            links: data.links.clone(),
            meta: data.meta.clone(),
        })
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    pub fn attribute(&self, key: &ResourceKey, name: &str) -> Option<Value> {
        self.state.attributes.get(&key.canonical(), name)
    }

    pub fn attributes(&self, key: &ResourceKey) -> Attributes {
        self.state.attributes.all(&key.canonical())
    }

    pub fn set_attribute(&mut self, key: &ResourceKey, name: &str, value: Value) {
        let key = key.canonical();
        if self.state.attributes.set(&key, name, value) {
            self.notify_resource(&key, ResourceChange::Updated);
        }
    }

    pub fn changed_attributes(
        &self,
        key: &ResourceKey,
    ) -> std::collections::BTreeMap<String, AttributeChange> {
        self.state.attributes.changed(&key.canonical())
    }

    pub fn has_dirty_attributes(&self, key: &ResourceKey) -> bool {
        self.state.attributes.has_dirty(&key.canonical())
    }

    /// Discard attribute edits, returning the names that reverted.
    pub fn rollback_attributes(&mut self, key: &ResourceKey) -> Vec<String> {
        let key = key.canonical();
        let reverted = self.state.attributes.rollback(&key);
        if !reverted.is_empty() {
            self.notify_resource(&key, ResourceChange::Updated);
        }
        reverted
    }

    /// Uncommitted attribute or relationship edits.
    pub fn is_dirty(&self, key: &ResourceKey) -> bool {
        let key = key.canonical();
        self.state.attributes.has_dirty(&key) || !self.state.graph.dirty_fields(&key).is_empty()
    }

    // ------------------------------------------------------------------
    // Relationships
    // ------------------------------------------------------------------

    pub fn relationship(&mut self, key: &ResourceKey, field: &str) -> StoreResult<RelationshipState> {
        Ok(self.state.graph.get_state(key, field)?.clone())
    }

    /// Current local members of `(key, field)`.
    pub fn related(&mut self, key: &ResourceKey, field: &str) -> StoreResult<Vec<ResourceKey>> {
        Ok(self.state.graph.get_state(key, field)?.local_state().members())
    }

    pub fn mutate_to_many(
        &mut self,
        key: &ResourceKey,
        field: &str,
        operation: ToManyOperation,
    ) -> StoreResult<MutationOutcome> {
        Ok(self.state.graph.mutate_to_many(key, field, operation)?)
    }

    pub fn set_to_one(
        &mut self,
        key: &ResourceKey,
        field: &str,
        value: Option<ResourceKey>,
    ) -> StoreResult<Option<ResourceKey>> {
        Ok(self.state.graph.set_to_one(key, field, value)?)
    }

    pub fn rollback_relationship(&mut self, key: &ResourceKey, field: &str) -> StoreResult<()> {
        Ok(self.state.graph.rollback(key, field)?)
    }

    /// Discard every uncommitted edit on `key`.
    pub fn rollback(&mut self, key: &ResourceKey) -> StoreResult<()> {
        let key = key.canonical();
        self.rollback_attributes(&key);
        self.state.graph.rollback_all(&key)?;
        Ok(())
    }

    /// Promote every uncommitted edit on `key` to remote state.
    pub fn commit(&mut self, key: &ResourceKey) -> StoreResult<()> {
        let key = key.canonical();
        self.state.attributes.commit(&key);
        self.state.graph.commit_all(&key)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------

    /// Cached document for `key`; never fetches.
    pub fn peek_request(&self, key: &RequestKey) -> Option<CachedDocument> {
        self.state.documents.peek(key).cloned()
    }

    /// Drop one document so the next request for it fetches.
    pub fn invalidate(&mut self, key: &RequestKey) -> bool {
        let removed = self.state.documents.invalidate(key).is_some();
        if removed {
            self.notify_document(key, DocumentChange::Removed);
        }
        removed
    }

    /// Mark every document involving `resource_type` hard expired.
    pub fn invalidate_type(&mut self, resource_type: &str) -> Vec<RequestKey> {
        let keys = self.state.documents.invalidate_type(resource_type);
        for key in &keys {
            self.notify_document(key, DocumentChange::Invalidated);
        }
        keys
    }

    // ------------------------------------------------------------------
    // Unloading
    // ------------------------------------------------------------------

    /// Drop a resource's attributes and relationships.
    ///
    /// The identity is forgotten only once no relationship or document still
    /// refers to it; otherwise the key stays resolvable.
    pub fn unload_resource(&mut self, key: &ResourceKey) {
        let key = key.canonical();
        self.state.graph.unload(&key);
        self.state.attributes.remove(&key);
        if !self.state.graph.is_referenced(&key) && !self.state.documents.is_referenced(&key) {
            self.state.identity.forget(&key);
        }
        self.notify_resource(&key, ResourceChange::Removed);
    }

    // ------------------------------------------------------------------
    // Request completion
    // ------------------------------------------------------------------

    /// Merge a successful response and store its document.
    pub(crate) fn apply_response(
        &mut self,
        key: &RequestKey,
        input: &RequestInput,
        payload: NormalizedPayload,
    ) -> StoreResult<CachedDocument> {
        if input.op.is_mutation() {
            return self.apply_save(key, input, payload);
        }
        let data = self.push_payload(&payload)?;
        let document = CachedDocument::success(
            key.clone(),
            &input.resource_type,
            DocumentData {
                data,
                meta: payload.meta,
                links: payload.links,
            },
        );
        self.put_document(document.clone());
        Ok(document)
    }

    fn apply_save(
        &mut self,
        key: &RequestKey,
        input: &RequestInput,
        payload: NormalizedPayload,
    ) -> StoreResult<CachedDocument> {
        let mut target = match &input.target {
            Some(RequestTarget::Key(target)) => Some(target.canonical()),
            Some(RequestTarget::Reference(reference)) => self.state.identity.peek(reference),
            None => None,
        }
        .ok_or_else(|| RequestError::UnknownResource {
            request_key: key.to_string(),
        })?;

        if let Some(PrimaryData::Single(record)) = &payload.data {
            if let Some(id) = record.id.as_deref() {
                if target.id() != Some(id) {
                    target = self.assign_id(&target, id)?;
                }
            }
        }

        self.push_payload(&payload)?;
        let target = target.canonical();
        self.commit(&target)?;

        let deleted = input.op == Operation::DeleteRecord;
        if deleted {
            for request_key in self.state.documents.remove_resource(&target) {
                self.notify_document(&request_key, DocumentChange::Updated);
            }
            self.unload_resource(&target);
        }
        if self.config.cache.invalidate_type_on_mutation
            && matches!(input.op, Operation::CreateRecord | Operation::DeleteRecord)
        {
            self.invalidate_type(target.resource_type());
        }

        debug!(request_key = %key, lid = %target.lid(), op = %input.op, "Save completed");
        Ok(CachedDocument::success(
            key.clone(),
            &input.resource_type,
            DocumentData {
                data: DocumentResources::Single((!deleted).then_some(target)),
                meta: payload.meta,
                links: payload.links,
            },
        ))
    }

    /// Record a failed fetch.
    ///
    /// A failed background refresh keeps the previous success document.
    /// Otherwise reads store an error document so repeated peeks see the
    /// failure instead of refetching.
    pub(crate) fn apply_failure(
        &mut self,
        key: &RequestKey,
        input: &RequestInput,
        background: bool,
        error: RequestError,
    ) -> StoreResult<CachedDocument> {
        self.state.documents.stats_mut().errors += 1;
        if input.op.is_mutation() {
            return Err(error.into());
        }
        let has_success = self
            .state
            .documents
            .peek(key)
            .is_some_and(|document| !document.is_error());
        if background && has_success {
            warn!(request_key = %key, error = %error, "Background refresh failed; keeping cached document");
            self.notify_document(key, DocumentChange::RefreshFailed);
            return Err(error.into());
        }
        self.put_document(CachedDocument::error(
            key.clone(),
            &input.resource_type,
            error.clone(),
        ));
        Err(error.into())
    }

    fn put_document(&mut self, document: CachedDocument) {
        let key = document.request_key.clone();
        let change = match self.state.documents.put(document) {
            Some(_) => DocumentChange::Updated,
            None => DocumentChange::Added,
        };
        self.notify_document(&key, change);
    }

    // ------------------------------------------------------------------
    // Persisted cache
    // ------------------------------------------------------------------

    /// Snapshot `document` and the remote state of its resources.
    pub(crate) fn persist_job(&self, document: &CachedDocument) -> Option<PersistJob> {
        let data = document.data()?;
        let persisted = match &data.data {
            DocumentResources::Single(key) => {
                PersistedData::Single(key.as_ref().map(|k| k.lid().to_string()))
            }
            DocumentResources::Collection(keys) => {
                PersistedData::Collection(keys.iter().map(|k| k.lid().to_string()).collect())
            }
        };
        let resources = data
            .data
            .keys()
            .iter()
            .map(|key| self.snapshot(key))
            .collect();
        Some(PersistJob {
            key: document.request_key.clone(),
            document: PersistedDocument {
                request_key: document.request_key.to_string(),
                resource_type: document.resource_type.clone(),
                last_request_time: document.last_request_time,
                data: persisted,
                meta: data.meta.clone(),
                links: data.links.clone(),
            },
            resources,
        })
    }

    /// Remote (server-confirmed) state of one resource as a record.
    fn snapshot(&self, key: &ResourceKey) -> ResourceRecord {
        let key = key.canonical();
        let mut record = ResourceRecord {
            resource_type: key.resource_type().to_string(),
            id: key.id().map(str::to_string),
            lid: Some(key.lid().to_string()),
            attributes: self.state.attributes.remote(&key),
            relationships: Default::default(),
        };
        for field in self.state.graph.fields(&key) {
            let Some(state) = self.state.graph.peek_state(&key, &field) else {
                continue;
            };
            if !state.has_received_data() {
                continue;
            }
            let linkage = match state.remote_state() {
                RelationshipValue::ToOne(member) => {
                    Linkage::ToOne(member.as_ref().map(ResourceKey::reference))
                }
                RelationshipValue::ToMany(members) => {
                    Linkage::ToMany(members.iter().map(ResourceKey::reference).collect())
                }
            };
            record.relationships.insert(
                field,
                RelationshipData {
                    data: Some(linkage),
                    links: state.links().cloned(),
                    meta: state.meta().cloned(),
                },
            );
        }
        record
    }

    /// Seed memory from a persisted document.
    ///
    /// Resources already known in memory are not overwritten by the
    /// persisted snapshot.
    pub(crate) fn restore_document(
        &mut self,
        key: &RequestKey,
        document: PersistedDocument,
        records: Vec<ResourceRecord>,
    ) -> StoreResult<bool> {
        if self.state.documents.peek(key).is_some() {
            return Ok(false);
        }
        let unknown: Vec<ResourceRecord> = records
            .into_iter()
            .filter(|record| self.state.identity.peek(&record.reference()).is_none())
            .collect();
        self.push_payload(&NormalizedPayload::empty().with_included(unknown))?;

        let lookup = |lid: &String| self.state.identity.peek_lid(lid);
        let data = match &document.data {
            PersistedData::Single(lid) => DocumentResources::Single(lid.as_ref().and_then(lookup)),
            PersistedData::Collection(lids) => {
                let mut seen = HashSet::new();
                DocumentResources::Collection(
                    lids.iter()
                        .filter_map(lookup)
                        .filter(|key| seen.insert(key.clone()))
                        .collect(),
                )
            }
        };
        self.put_document(
            CachedDocument::success(
                key.clone(),
                document.resource_type,
                DocumentData {
                    data,
                    meta: document.meta,
                    links: document.links,
                },
            )
            .with_request_time(document.last_request_time),
        );
        Ok(true)
    }
}

impl std::fmt::Debug for Flush<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flush")
            .field("pending", &self.state.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::StoreError;
    use trellis_test_utils::{reference, social_schema, user, user_with_friends};

    fn state() -> (StoreState, StoreConfig) {
        let config = StoreConfig::new();
        (StoreState::new(social_schema(), &config), config)
    }

    #[test]
    fn test_finish_reports_both_sides_of_an_edge() {
        let (mut state, config) = state();
        let mut flush = Flush::new(&mut state, &config);
        flush
            .push(&NormalizedPayload::single(user_with_friends("1", "Ada", &["2"])))
            .unwrap();
        let u1 = flush.peek_resource(&reference("user", "1")).unwrap();
        let u2 = flush.peek_resource(&reference("user", "2")).unwrap();

        let notifications = flush.finish();
        for key in [&u1, &u2] {
            assert!(notifications.contains(&Notification::Relationship {
                key: key.clone(),
                field: "friends".to_string(),
            }));
        }
        assert!(notifications.contains(&Notification::Resource {
            key: u1,
            change: ResourceChange::Added,
        }));
    }

    #[test]
    fn test_save_for_unknown_reference_fails() {
        let (mut state, config) = state();
        let mut flush = Flush::new(&mut state, &config);
        let input = RequestInput {
            op: Operation::UpdateRecord,
            resource_type: "user".to_string(),
            target: Some(RequestTarget::Reference(reference("user", "5"))),
            params: Value::Null,
            options: Default::default(),
        };
        let key = input.fingerprint();

        let err = flush
            .apply_response(&key, &input, NormalizedPayload::single(user("5", "Ada")))
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::from(RequestError::UnknownResource {
                request_key: key.to_string(),
            })
        );
        assert!(flush.peek_resource(&reference("user", "5")).is_none());
    }

    #[test]
    fn test_snapshot_keeps_only_received_relationships() {
        let (mut state, config) = state();
        let mut flush = Flush::new(&mut state, &config);
        let u1 = flush
            .push(&NormalizedPayload::single(user_with_friends("1", "Ada", &["2"])))
            .unwrap()
            .remove(0);
        flush.relationship(&u1, "posts").unwrap();
        flush.set_attribute(&u1, "name", serde_json::json!("Unsaved"));

        let document = CachedDocument::success(
            RequestKey::new("findRecord:user:1"),
            "user",
            DocumentData {
                data: DocumentResources::Single(Some(u1.clone())),
                meta: None,
                links: None,
            },
        );
        let job = flush.persist_job(&document).unwrap();

        let record = &job.resources[0];
        assert_eq!(record.lid.as_deref(), Some(u1.lid()));
        assert!(record.relationships.contains_key("friends"));
        assert!(!record.relationships.contains_key("posts"));
        assert_eq!(record.attributes.get("name"), Some(&serde_json::json!("Ada")));
        assert_eq!(job.document.data, PersistedData::Single(Some(u1.lid().to_string())));
    }
}
