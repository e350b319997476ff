//! Normalized payload shape accepted by the store's merge entry point.
//!
//! Adapters translate a concrete wire format (JSON:API, REST, GraphQL) into
//! these flat records; the store never sees nested copies of a resource.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::ResourceReference;

/// Attribute bag of one resource.
pub type Attributes = serde_json::Map<String, Value>;

/// Relationship linkage: a single reference or an ordered list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Linkage {
    ToOne(Option<ResourceReference>),
    ToMany(Vec<ResourceReference>),
}

/// One relationship entry of a record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RelationshipData {
    /// Absent when the server only sent links/meta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Linkage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl RelationshipData {
    pub fn to_one(reference: Option<ResourceReference>) -> Self {
        Self {
            data: Some(Linkage::ToOne(reference)),
            ..Default::default()
        }
    }

    pub fn to_many(references: Vec<ResourceReference>) -> Self {
        Self {
            data: Some(Linkage::ToMany(references)),
            ..Default::default()
        }
    }
}

/// A flat resource record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipData>,
}

impl ResourceRecord {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: Some(id.into()),
            lid: None,
            attributes: Attributes::new(),
            relationships: BTreeMap::new(),
        }
    }

    pub fn with_lid(mut self, lid: impl Into<String>) -> Self {
        self.lid = Some(lid.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn with_relationship(mut self, field: impl Into<String>, data: RelationshipData) -> Self {
        self.relationships.insert(field.into(), data);
        self
    }

    /// The identity part of this record.
    pub fn reference(&self) -> ResourceReference {
        ResourceReference {
            resource_type: self.resource_type.clone(),
            id: self.id.clone(),
            lid: self.lid.clone(),
        }
    }
}

/// Primary data of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrimaryData {
    Single(ResourceRecord),
    Null,
    Collection(Vec<ResourceRecord>),
}

/// Everything one response contributes to the store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedPayload {
    /// `None` for responses without a body (e.g. a delete).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PrimaryData>,
    #[serde(default)]
    pub included: Vec<ResourceRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Value>,
}

impl NormalizedPayload {
    pub fn single(record: ResourceRecord) -> Self {
        Self {
            data: Some(PrimaryData::Single(record)),
            ..Default::default()
        }
    }

    pub fn collection(records: Vec<ResourceRecord>) -> Self {
        Self {
            data: Some(PrimaryData::Collection(records)),
            ..Default::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_included(mut self, records: Vec<ResourceRecord>) -> Self {
        self.included = records;
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Primary records followed by included records.
    pub fn records(&self) -> impl Iterator<Item = &ResourceRecord> {
        let primary: &[ResourceRecord] = match &self.data {
            Some(PrimaryData::Single(record)) => std::slice::from_ref(record),
            Some(PrimaryData::Collection(records)) => records,
            Some(PrimaryData::Null) | None => &[],
        };
        primary.iter().chain(self.included.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_records_chains_primary_and_included() {
        let payload = NormalizedPayload::single(ResourceRecord::new("user", "1"))
            .with_included(vec![ResourceRecord::new("user", "2")]);
        let ids: Vec<_> = payload.records().filter_map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_empty_payload_has_no_records() {
        assert_eq!(NormalizedPayload::empty().records().count(), 0);
    }

    #[test]
    fn test_record_deserializes_with_defaults() {
        let record: ResourceRecord = serde_json::from_value(json!({
            "type": "user",
            "id": "1",
            "relationships": {
                "friends": { "data": { "to-many": [{ "type": "user", "id": "2" }] } }
            }
        }))
        .unwrap();
        assert!(record.attributes.is_empty());
        assert_eq!(
            record.relationships["friends"].data,
            Some(Linkage::ToMany(vec![ResourceReference::new("user", "2")]))
        );
    }
}
