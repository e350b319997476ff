//! Raw resource references as they arrive from payloads and callers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::IdentityError;

/// Prefix shared by every lid the store mints.
pub const LID_PREFIX: &str = "@lid:";

/// A not-yet-resolved pointer to a resource.
///
/// At least one of `id` / `lid` must be a non-empty string. Resolution into a
/// canonical key is the identity registry's job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceReference {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
}

impl ResourceReference {
    /// Reference by server id.
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: Some(id.into()),
            lid: None,
        }
    }

    /// Reference by local identifier only.
    pub fn local(resource_type: impl Into<String>, lid: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: None,
            lid: Some(lid.into()),
        }
    }

    /// Attach a lid to an id-based reference.
    pub fn with_lid(mut self, lid: impl Into<String>) -> Self {
        self.lid = Some(lid.into());
        self
    }

    /// Non-empty id, if any.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Non-empty lid, if any.
    pub fn lid(&self) -> Option<&str> {
        self.lid.as_deref().filter(|lid| !lid.is_empty())
    }

    /// Check the reference is resolvable.
    pub fn validate(&self) -> Result<(), IdentityError> {
        if self.resource_type.trim().is_empty() {
            return Err(IdentityError::InvalidReference {
                resource_type: self.resource_type.clone(),
                reason: "type must not be empty".to_string(),
            });
        }
        if self.id().is_none() && self.lid().is_none() {
            return Err(IdentityError::InvalidReference {
                resource_type: self.resource_type.clone(),
                reason: "one of id or lid must be a non-empty string".to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ResourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.id(), self.lid()) {
            (Some(id), _) => write!(f, "{}:{}", self.resource_type, id),
            (None, Some(lid)) => write!(f, "{}:{}", self.resource_type, lid),
            (None, None) => write!(f, "{}:<unidentified>", self.resource_type),
        }
    }
}

/// Lid for a resource first seen with a server id.
pub fn lid_for_id(resource_type: &str, id: &str) -> String {
    format!("{LID_PREFIX}{resource_type}-{id}")
}
