//! Persisted-cache collaborator.
//!
//! An optional, slower-than-memory store used to seed the in-memory cache on
//! a miss and to flush successful documents to. Two logical tables:
//! `documents` (request key to document, resources stored as lids) and
//! `resources` (lid to the last known record), so a resource shared by many
//! documents is stored once.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use trellis_core::{RequestError, ResourceRecord};

use crate::RequestKey;

/// Primary data of a persisted document, by lid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistedData {
    Single(Option<String>),
    Collection(Vec<String>),
}

impl PersistedData {
    pub fn lids(&self) -> Vec<String> {
        match self {
            PersistedData::Single(lid) => lid.iter().cloned().collect(),
            PersistedData::Collection(lids) => lids.clone(),
        }
    }
}

/// A successful document as written to the persisted cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedDocument {
    pub request_key: String,
    pub resource_type: String,
    pub last_request_time: DateTime<Utc>,
    pub data: PersistedData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Value>,
}

/// Pluggable persisted storage. The store works without one.
#[async_trait]
pub trait PersistedCache: Send + Sync {
    async fn get_document(&self, key: &RequestKey)
        -> Result<Option<PersistedDocument>, RequestError>;

    /// Records for the given lids; unknown lids are skipped.
    async fn get_resources(&self, lids: &[String]) -> Result<Vec<ResourceRecord>, RequestError>;

    /// Write a document together with snapshots of the resources it lists.
    async fn put_document(
        &self,
        key: &RequestKey,
        document: PersistedDocument,
        resources: Vec<ResourceRecord>,
    ) -> Result<(), RequestError>;

    async fn remove_document(&self, key: &RequestKey) -> Result<(), RequestError>;
}

/// Reference [`PersistedCache`] held in memory.
#[derive(Debug, Default)]
pub struct InMemoryPersistedCache {
    /// Keyed by [`RequestKey::digest`].
    documents: RwLock<HashMap<String, PersistedDocument>>,
    resources: RwLock<HashMap<String, ResourceRecord>>,
}

impl InMemoryPersistedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn document_count(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn resource_count(&self) -> usize {
        self.resources.read().await.len()
    }
}

#[async_trait]
impl PersistedCache for InMemoryPersistedCache {
    async fn get_document(
        &self,
        key: &RequestKey,
    ) -> Result<Option<PersistedDocument>, RequestError> {
        let documents = self.documents.read().await;
        Ok(documents.get(&key.digest()).cloned())
    }

    async fn get_resources(&self, lids: &[String]) -> Result<Vec<ResourceRecord>, RequestError> {
        let resources = self.resources.read().await;
        Ok(lids
            .iter()
            .filter_map(|lid| resources.get(lid).cloned())
            .collect())
    }

    async fn put_document(
        &self,
        key: &RequestKey,
        document: PersistedDocument,
        resources: Vec<ResourceRecord>,
    ) -> Result<(), RequestError> {
        let mut stored = self.resources.write().await;
        for record in resources {
            let Some(lid) = record.lid.clone() else {
                return Err(RequestError::Persistence {
                    reason: format!("resource {} has no lid", record.resource_type),
                });
            };
            stored.insert(lid, record);
        }
        drop(stored);

        self.documents.write().await.insert(key.digest(), document);
        Ok(())
    }

    async fn remove_document(&self, key: &RequestKey) -> Result<(), RequestError> {
        self.documents.write().await.remove(&key.digest());
        Ok(())
    }
}
