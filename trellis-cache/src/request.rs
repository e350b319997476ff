//! Request inputs and their fingerprints.
//!
//! A [`RequestKey`] is derived from the normalized shape of a request: the
//! operation, the resource type, the target resource and the query
//! parameters with object keys sorted. Two logically identical requests
//! always produce the same key.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use trellis_core::ResourceReference;
use trellis_identity::ResourceKey;

/// Kind of request issued to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    FindRecord,
    FindAll,
    Query,
    QueryRecord,
    CreateRecord,
    UpdateRecord,
    DeleteRecord,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::FindRecord => "findRecord",
            Operation::FindAll => "findAll",
            Operation::Query => "query",
            Operation::QueryRecord => "queryRecord",
            Operation::CreateRecord => "createRecord",
            Operation::UpdateRecord => "updateRecord",
            Operation::DeleteRecord => "deleteRecord",
        }
    }

    /// Mutations are never served from cache.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Operation::CreateRecord | Operation::UpdateRecord | Operation::DeleteRecord
        )
    }

    /// Whether the response primary data is a collection.
    pub fn returns_collection(&self) -> bool {
        matches!(self, Operation::FindAll | Operation::Query)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-controlled request behavior.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Block on a fresh fetch even if a usable cached value exists.
    pub reload: bool,
    /// Return the cached value and refresh it in the background.
    pub background_reload: bool,
    /// Coalesce identical in-flight mutations. Ignored for reads, which
    /// always coalesce.
    pub dedupe: bool,
    /// Aborts this caller's wait when cancelled.
    pub cancel: Option<CancellationToken>,
}

/// The resource a request is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
    Reference(ResourceReference),
    Key(ResourceKey),
}

impl RequestTarget {
    /// Id if known, otherwise lid.
    fn identity(&self) -> String {
        match self {
            RequestTarget::Reference(reference) => reference
                .id()
                .or_else(|| reference.lid())
                .unwrap_or_default()
                .to_string(),
            RequestTarget::Key(key) => {
                let key = key.canonical();
                key.id().unwrap_or_else(|| key.lid()).to_string()
            }
        }
    }
}

/// A request as issued by a caller.
#[derive(Debug, Clone)]
pub struct RequestInput {
    pub op: Operation,
    pub resource_type: String,
    pub target: Option<RequestTarget>,
    /// Query parameters; `Value::Null` when there are none.
    pub params: Value,
    pub options: RequestOptions,
}

impl RequestInput {
    fn new(op: Operation, resource_type: impl Into<String>, target: Option<RequestTarget>) -> Self {
        Self {
            op,
            resource_type: resource_type.into(),
            target,
            params: Value::Null,
            options: RequestOptions::default(),
        }
    }

    pub fn find_record(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        let resource_type = resource_type.into();
        let reference = ResourceReference::new(resource_type.clone(), id);
        Self::new(
            Operation::FindRecord,
            resource_type,
            Some(RequestTarget::Reference(reference)),
        )
    }

    pub fn find_reference(reference: ResourceReference) -> Self {
        let resource_type = reference.resource_type.clone();
        Self::new(
            Operation::FindRecord,
            resource_type,
            Some(RequestTarget::Reference(reference)),
        )
    }

    pub fn find_all(resource_type: impl Into<String>) -> Self {
        Self::new(Operation::FindAll, resource_type, None)
    }

    pub fn query(resource_type: impl Into<String>, params: Value) -> Self {
        Self::new(Operation::Query, resource_type, None).with_params(params)
    }

    pub fn query_record(resource_type: impl Into<String>, params: Value) -> Self {
        Self::new(Operation::QueryRecord, resource_type, None).with_params(params)
    }

    pub fn create_record(key: &ResourceKey) -> Self {
        Self::mutation(Operation::CreateRecord, key)
    }

    pub fn update_record(key: &ResourceKey) -> Self {
        Self::mutation(Operation::UpdateRecord, key)
    }

    pub fn delete_record(key: &ResourceKey) -> Self {
        Self::mutation(Operation::DeleteRecord, key)
    }

    fn mutation(op: Operation, key: &ResourceKey) -> Self {
        let key = key.canonical();
        Self::new(
            op,
            key.resource_type().to_string(),
            Some(RequestTarget::Key(key)),
        )
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn reload(mut self) -> Self {
        self.options.reload = true;
        self
    }

    pub fn background_reload(mut self) -> Self {
        self.options.background_reload = true;
        self
    }

    pub fn dedupe(mut self) -> Self {
        self.options.dedupe = true;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.options.cancel = Some(token);
        self
    }

    pub fn fingerprint(&self) -> RequestKey {
        fingerprint(self)
    }
}

/// Canonical identity of a cacheable request.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(Arc<str>);

impl RequestKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex SHA-256 of the key, used as a storage key by persisted caches.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestKey({})", self.0)
    }
}

/// Derive the [`RequestKey`] for a request. Options do not participate.
pub fn fingerprint(input: &RequestInput) -> RequestKey {
    let mut key = format!("{}:{}", input.op, input.resource_type);
    if let Some(target) = &input.target {
        key.push(':');
        key.push_str(&target.identity());
    }
    let params = canonicalize(&input.params);
    let empty = match &params {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if !empty {
        key.push('?');
        key.push_str(&params.to_string());
    }
    RequestKey::new(key)
}

/// Sort object keys recursively. Array order is significant and kept.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use trellis_identity::IdentityRegistry;

    #[test]
    fn test_find_record_key() {
        let key = RequestInput::find_record("post", "1").fingerprint();
        assert_eq!(key.as_str(), "findRecord:post:1");
        assert_eq!(key.digest().len(), 64);
    }

    #[test]
    fn test_options_do_not_change_key() {
        let plain = RequestInput::find_record("post", "1").fingerprint();
        let reload = RequestInput::find_record("post", "1")
            .reload()
            .with_cancel(CancellationToken::new())
            .fingerprint();
        assert_eq!(plain, reload);
    }

    #[test]
    fn test_params_are_part_of_key() {
        let a = RequestInput::query("post", json!({"page": 1})).fingerprint();
        let b = RequestInput::query("post", json!({"page": 2})).fingerprint();
        let none = RequestInput::query("post", json!({})).fingerprint();
        assert_ne!(a, b);
        assert_eq!(none.as_str(), "query:post");
    }

    #[test]
    fn test_mutation_key_uses_lid_until_id_assigned() {
        let mut registry = IdentityRegistry::new();
        let key = registry.create_local("post");
        let input = RequestInput::create_record(&key);
        assert!(input.op.is_mutation());
        assert_eq!(input.fingerprint().as_str(), format!("createRecord:post:{}", key.lid()));

        registry.assign_id(&key, "9").unwrap();
        assert_eq!(
            RequestInput::update_record(&key).fingerprint().as_str(),
            "updateRecord:post:9"
        );
    }

    #[test]
    fn test_array_order_is_significant() {
        let a = RequestInput::query("post", json!({"ids": [1, 2]})).fingerprint();
        let b = RequestInput::query("post", json!({"ids": [2, 1]})).fingerprint();
        assert_ne!(a, b);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Parameter insertion order never affects the key.
        #[test]
        fn prop_fingerprint_order_independent(
            entries in prop::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..8)
        ) {
            let mut forward = serde_json::Map::new();
            for (k, v) in entries.iter() {
                forward.insert(k.clone(), json!({ "v": v, "k": k }));
            }
            let mut reverse = serde_json::Map::new();
            for (k, v) in entries.iter().rev() {
                reverse.insert(k.clone(), json!({ "k": k, "v": v }));
            }

            let a = RequestInput::query("post", Value::Object(forward)).fingerprint();
            let b = RequestInput::query("post", Value::Object(reverse)).fingerprint();
            prop_assert_eq!(a, b);
        }
    }
}
