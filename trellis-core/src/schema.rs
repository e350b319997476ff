//! Schema collaborator: relationship kinds and inverses per resource type.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ConfigError;

/// Cardinality of a relationship field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipKind {
    ToOne,
    ToMany,
}

/// One declared relationship field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDefinition {
    pub resource_type: String,
    pub field: String,
    pub kind: RelationshipKind,
    pub related_type: String,
    /// Reciprocal field on `related_type`, if any.
    pub inverse: Option<String>,
}

impl RelationshipDefinition {
    pub fn is_to_many(&self) -> bool {
        self.kind == RelationshipKind::ToMany
    }
}

/// Reports relationship metadata for a (type, field) pair.
///
/// Consulted whenever the relationship graph creates new state or needs to
/// propagate an edit to an inverse.
pub trait Schema: Send + Sync {
    fn relationship(&self, resource_type: &str, field: &str) -> Option<&RelationshipDefinition>;

    /// All relationship fields declared on a type.
    fn relationships_of(&self, resource_type: &str) -> Vec<&RelationshipDefinition>;
}

/// Schema built up front from explicit declarations.
#[derive(Debug, Clone, Default)]
pub struct StaticSchema {
    types: HashMap<String, HashMap<String, RelationshipDefinition>>,
}

impl StaticSchema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }
}

impl Schema for StaticSchema {
    fn relationship(&self, resource_type: &str, field: &str) -> Option<&RelationshipDefinition> {
        self.types.get(resource_type)?.get(field)
    }

    fn relationships_of(&self, resource_type: &str) -> Vec<&RelationshipDefinition> {
        let mut defs: Vec<_> = self
            .types
            .get(resource_type)
            .map(|fields| fields.values().collect())
            .unwrap_or_default();
        defs.sort_by(|a, b| a.field.cmp(&b.field));
        defs
    }
}

/// Builder for [`StaticSchema`]; `build` checks that inverses pair up.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    defs: Vec<RelationshipDefinition>,
}

impl SchemaBuilder {
    pub fn to_one(
        self,
        resource_type: &str,
        field: &str,
        related_type: &str,
        inverse: Option<&str>,
    ) -> Self {
        self.declare(resource_type, field, RelationshipKind::ToOne, related_type, inverse)
    }

    pub fn to_many(
        self,
        resource_type: &str,
        field: &str,
        related_type: &str,
        inverse: Option<&str>,
    ) -> Self {
        self.declare(resource_type, field, RelationshipKind::ToMany, related_type, inverse)
    }

    fn declare(
        mut self,
        resource_type: &str,
        field: &str,
        kind: RelationshipKind,
        related_type: &str,
        inverse: Option<&str>,
    ) -> Self {
        self.defs.push(RelationshipDefinition {
            resource_type: resource_type.to_string(),
            field: field.to_string(),
            kind,
            related_type: related_type.to_string(),
            inverse: inverse.map(str::to_string),
        });
        self
    }

    pub fn build(self) -> Result<StaticSchema, ConfigError> {
        let mut types: HashMap<String, HashMap<String, RelationshipDefinition>> = HashMap::new();
        for def in self.defs {
            let fields = types.entry(def.resource_type.clone()).or_default();
            if fields.contains_key(&def.field) {
                return Err(ConfigError::InvalidSchema {
                    resource_type: def.resource_type,
                    field: def.field,
                    reason: "declared twice".to_string(),
                });
            }
            fields.insert(def.field.clone(), def);
        }

        for fields in types.values() {
            for def in fields.values() {
                let Some(inverse) = &def.inverse else {
                    continue;
                };
                let reciprocal = types
                    .get(&def.related_type)
                    .and_then(|related| related.get(inverse));
                match reciprocal {
                    None => {
                        return Err(ConfigError::InvalidSchema {
                            resource_type: def.resource_type.clone(),
                            field: def.field.clone(),
                            reason: format!(
                                "inverse {}.{} is not declared",
                                def.related_type, inverse
                            ),
                        })
                    }
                    Some(other)
                        if other.inverse.as_deref() != Some(def.field.as_str())
                            || other.related_type != def.resource_type =>
                    {
                        return Err(ConfigError::InvalidSchema {
                            resource_type: def.resource_type.clone(),
                            field: def.field.clone(),
                            reason: format!(
                                "inverse {}.{} does not point back",
                                def.related_type, inverse
                            ),
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(StaticSchema { types })
    }
}
