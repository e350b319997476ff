//! In-memory document cache with a bidirectional dependency index.
//!
//! Besides `RequestKey -> CachedDocument`, the cache tracks which documents
//! reference which resources and types, so a type can be invalidated and an
//! unloaded resource's documents found without scanning every entry.

use std::collections::{BTreeSet, HashMap, HashSet};

use trellis_identity::ResourceKey;

use crate::{CachedDocument, RequestKey};

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests answered from cache without a blocking fetch.
    pub hits: u64,
    /// Requests that blocked on a fetch.
    pub misses: u64,
    /// Requests that attached to an in-flight fetch.
    pub coalesced: u64,
    pub background_refreshes: u64,
    /// Fetches that produced an error document.
    pub errors: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct DependencyIndex {
    by_type: HashMap<String, HashSet<RequestKey>>,
    by_resource: HashMap<ResourceKey, HashSet<RequestKey>>,
    entries: HashMap<RequestKey, (BTreeSet<String>, Vec<ResourceKey>)>,
}

impl DependencyIndex {
    fn register(&mut self, document: &CachedDocument) {
        self.unregister(&document.request_key);
        let key = &document.request_key;
        let types = document.resource_types();
        let resources = document.resources();
        for resource_type in &types {
            self.by_type
                .entry(resource_type.clone())
                .or_default()
                .insert(key.clone());
        }
        for resource in &resources {
            self.by_resource
                .entry(resource.clone())
                .or_default()
                .insert(key.clone());
        }
        self.entries.insert(key.clone(), (types, resources));
    }

    fn unregister(&mut self, key: &RequestKey) {
        let Some((types, resources)) = self.entries.remove(key) else {
            return;
        };
        for resource_type in types {
            if let Some(keys) = self.by_type.get_mut(&resource_type) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_type.remove(&resource_type);
                }
            }
        }
        for resource in resources {
            if let Some(keys) = self.by_resource.get_mut(&resource) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_resource.remove(&resource);
                }
            }
        }
    }

    fn keys_for_type(&self, resource_type: &str) -> Vec<RequestKey> {
        sorted(self.by_type.get(resource_type))
    }

    fn keys_for_resource(&self, resource: &ResourceKey) -> Vec<RequestKey> {
        sorted(self.by_resource.get(resource))
    }
}

fn sorted(keys: Option<&HashSet<RequestKey>>) -> Vec<RequestKey> {
    let mut keys: Vec<RequestKey> = keys.map(|k| k.iter().cloned().collect()).unwrap_or_default();
    keys.sort();
    keys
}

/// Documents keyed by [`RequestKey`].
#[derive(Debug, Default)]
pub struct DocumentCache {
    documents: HashMap<RequestKey, CachedDocument>,
    index: DependencyIndex,
    stats: CacheStats,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never triggers network activity.
    pub fn peek(&self, key: &RequestKey) -> Option<&CachedDocument> {
        self.documents.get(key)
    }

    /// Store a document, returning the one it replaced.
    pub fn put(&mut self, document: CachedDocument) -> Option<CachedDocument> {
        self.index.register(&document);
        self.documents.insert(document.request_key.clone(), document)
    }

    /// Remove a document so the next request for it fetches.
    pub fn invalidate(&mut self, key: &RequestKey) -> Option<CachedDocument> {
        self.index.unregister(key);
        self.documents.remove(key)
    }

    /// Mark every document that involves `resource_type` as invalidated.
    ///
    /// The documents stay peekable; policies treat them as hard expired.
    pub fn invalidate_type(&mut self, resource_type: &str) -> Vec<RequestKey> {
        let keys = self.index.keys_for_type(resource_type);
        for key in &keys {
            if let Some(document) = self.documents.get_mut(key) {
                document.invalidated = true;
            }
        }
        keys
    }

    /// Keys of documents whose primary data includes `resource`.
    pub fn documents_referencing(&self, resource: &ResourceKey) -> Vec<RequestKey> {
        self.index.keys_for_resource(&resource.canonical())
    }

    pub fn is_referenced(&self, resource: &ResourceKey) -> bool {
        self.index.by_resource.contains_key(&resource.canonical())
    }

    /// Drop `resource` from every document that lists it.
    pub fn remove_resource(&mut self, resource: &ResourceKey) -> Vec<RequestKey> {
        let resource = resource.canonical();
        let keys = self.index.keys_for_resource(&resource);
        for key in &keys {
            if let Some(document) = self.documents.get_mut(key) {
                if document.remove_key(&resource) {
                    self.index.register(document);
                }
            }
        }
        keys
    }

    /// Redirect references from `loser` to `winner` after an identity merge.
    pub fn merge_keys(&mut self, loser: &ResourceKey, winner: &ResourceKey) -> Vec<RequestKey> {
        let keys = self.index.keys_for_resource(loser);
        for key in &keys {
            if let Some(document) = self.documents.get_mut(key) {
                if document.replace_key(loser, winner) {
                    self.index.register(document);
                }
            }
        }
        keys
    }

    pub fn keys(&self) -> Vec<RequestKey> {
        let mut keys: Vec<RequestKey> = self.documents.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut CacheStats {
        &mut self.stats
    }
}
