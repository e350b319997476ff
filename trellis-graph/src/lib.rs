//! Trellis Graph - Relationship State
//!
//! Keyed by [`ResourceKey`](trellis_identity::ResourceKey), holds the remote
//! and local value of every relationship field, applies to-many and to-one
//! mutations, and keeps declared inverses symmetric.

mod graph;
mod operation;
mod state;

pub use graph::{Deprecation, MutationOutcome, RelationshipGraph, RemoteUpdate};
pub use operation::ToManyOperation;
pub use state::{MutationStatus, RelationshipState, RelationshipValue};
