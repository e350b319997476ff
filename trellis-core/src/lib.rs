//! Trellis Core - Data Types
//!
//! Pure data structures shared by every Trellis crate: raw resource
//! references, the normalized payload shape, the schema collaborator,
//! configuration, and the error taxonomy.
//!
//! Canonical identity (`ResourceKey`) lives in `trellis-identity`; this crate
//! only describes references before they are resolved.

pub mod config;
pub mod error;
pub mod payload;
pub mod reference;
pub mod schema;

pub use config::{CachePolicyConfig, DuplicatePolicy, StoreConfig};
pub use error::{
    ConfigError, IdentityError, RelationshipError, RequestError, StoreError, StoreResult,
};
pub use payload::{
    Attributes, Linkage, NormalizedPayload, PrimaryData, RelationshipData, ResourceRecord,
};
pub use reference::{lid_for_id, ResourceReference, LID_PREFIX};
pub use schema::{RelationshipDefinition, RelationshipKind, Schema, SchemaBuilder, StaticSchema};
