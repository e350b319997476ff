//! Cached documents: the stored result of one request.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use trellis_core::RequestError;
use trellis_identity::ResourceKey;

use crate::RequestKey;

/// Primary data of a successful response, as canonical keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentResources {
    Single(Option<ResourceKey>),
    Collection(Vec<ResourceKey>),
}

impl DocumentResources {
    pub fn keys(&self) -> Vec<ResourceKey> {
        match self {
            DocumentResources::Single(key) => key.iter().cloned().collect(),
            DocumentResources::Collection(keys) => keys.clone(),
        }
    }

    pub fn as_single(&self) -> Option<&ResourceKey> {
        match self {
            DocumentResources::Single(key) => key.as_ref(),
            DocumentResources::Collection(_) => None,
        }
    }

    fn replace_key(&mut self, from: &ResourceKey, to: &ResourceKey) -> bool {
        match self {
            DocumentResources::Single(Some(key)) if *key == *from => {
                *key = to.clone();
                true
            }
            DocumentResources::Single(_) => false,
            DocumentResources::Collection(keys) => {
                let mut changed = false;
                for key in keys.iter_mut().filter(|key| **key == *from) {
                    *key = to.clone();
                    changed = true;
                }
                if changed {
                    let mut seen = std::collections::HashSet::new();
                    keys.retain(|key| seen.insert(key.clone()));
                }
                changed
            }
        }
    }

    fn remove_key(&mut self, target: &ResourceKey) -> bool {
        match self {
            DocumentResources::Single(key) if key.as_ref() == Some(target) => {
                *key = None;
                true
            }
            DocumentResources::Single(_) => false,
            DocumentResources::Collection(keys) => {
                let before = keys.len();
                keys.retain(|key| key != target);
                keys.len() != before
            }
        }
    }
}

/// Success content of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentData {
    pub data: DocumentResources,
    pub meta: Option<Value>,
    pub links: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentContent {
    Success(DocumentData),
    Error(RequestError),
}

/// The stored result for a [`RequestKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedDocument {
    pub request_key: RequestKey,
    /// Type the request was issued for.
    pub resource_type: String,
    pub last_request_time: DateTime<Utc>,
    pub content: DocumentContent,
    /// Set by type invalidation; policies treat it as hard expired.
    pub invalidated: bool,
}

impl CachedDocument {
    pub fn success(
        request_key: RequestKey,
        resource_type: impl Into<String>,
        data: DocumentData,
    ) -> Self {
        Self {
            request_key,
            resource_type: resource_type.into(),
            last_request_time: Utc::now(),
            content: DocumentContent::Success(data),
            invalidated: false,
        }
    }

    pub fn error(
        request_key: RequestKey,
        resource_type: impl Into<String>,
        error: RequestError,
    ) -> Self {
        Self {
            request_key,
            resource_type: resource_type.into(),
            last_request_time: Utc::now(),
            content: DocumentContent::Error(error),
            invalidated: false,
        }
    }

    pub fn with_request_time(mut self, at: DateTime<Utc>) -> Self {
        self.last_request_time = at;
        self
    }

    pub fn is_error(&self) -> bool {
        matches!(self.content, DocumentContent::Error(_))
    }

    pub fn data(&self) -> Option<&DocumentData> {
        match &self.content {
            DocumentContent::Success(data) => Some(data),
            DocumentContent::Error(_) => None,
        }
    }

    pub fn error_value(&self) -> Option<&RequestError> {
        match &self.content {
            DocumentContent::Error(error) => Some(error),
            DocumentContent::Success(_) => None,
        }
    }

    /// Every resource the document references.
    pub fn resources(&self) -> Vec<ResourceKey> {
        self.data().map(|data| data.data.keys()).unwrap_or_default()
    }

    /// The request type plus the type of every referenced resource.
    pub fn resource_types(&self) -> BTreeSet<String> {
        let mut types: BTreeSet<String> = self
            .resources()
            .iter()
            .map(|key| key.resource_type().to_string())
            .collect();
        types.insert(self.resource_type.clone());
        types
    }

    /// Time since the request that produced this document.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_request_time)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub(crate) fn replace_key(&mut self, from: &ResourceKey, to: &ResourceKey) -> bool {
        match &mut self.content {
            DocumentContent::Success(data) => data.data.replace_key(from, to),
            DocumentContent::Error(_) => false,
        }
    }

    pub(crate) fn remove_key(&mut self, key: &ResourceKey) -> bool {
        match &mut self.content {
            DocumentContent::Success(data) => data.data.remove_key(key),
            DocumentContent::Error(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::ResourceReference;
    use trellis_identity::IdentityRegistry;

    #[test]
    fn test_age_never_negative() {
        let key = RequestKey::new("findAll:post");
        let doc = CachedDocument::error(
            key.clone(),
            "post",
            RequestError::Fetch {
                request_key: key.to_string(),
                status: None,
                message: "down".to_string(),
            },
        )
        .with_request_time(Utc::now() + chrono::Duration::seconds(30));
        assert_eq!(doc.age(Utc::now()), Duration::ZERO);
        assert!(doc.is_error());
        assert!(doc.resources().is_empty());
    }

    #[test]
    fn test_resource_types_include_request_type() {
        let mut registry = IdentityRegistry::new();
        let user = registry.resolve(&ResourceReference::new("user", "1")).unwrap();
        let doc = CachedDocument::success(
            RequestKey::new("query:post"),
            "post",
            DocumentData {
                data: DocumentResources::Collection(vec![user]),
                meta: None,
                links: None,
            },
        );
        let types: Vec<_> = doc.resource_types().into_iter().collect();
        assert_eq!(types, vec!["post".to_string(), "user".to_string()]);
    }
}
