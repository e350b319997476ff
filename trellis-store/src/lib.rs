//! Trellis Store - Client-Side Resource Store
//!
//! Ties the identity registry, relationship graph and document cache into
//! one store:
//!
//! - [`Store::request`] coalesces identical reads, serves fresh documents
//!   from cache, refreshes soft-expired ones in the background, and merges
//!   every response before any caller sees it.
//! - [`Store::transact`] hands out a [`Flush`], the single join section in
//!   which identity merges are mirrored into every sub-store.
//! - Subscribers receive [`Notification`]s after each flush.
//!
//! ```ignore
//! let store = Store::builder(schema, handler).build()?;
//! let doc = store.request(RequestInput::find_record("user", "1")).await?;
//! let user = doc.data().and_then(|d| d.data.as_single().cloned());
//! ```

mod attributes;
mod fetch;
mod flush;
mod notify;
mod store;

pub use attributes::AttributeChange;
pub use flush::Flush;
pub use notify::{DocumentChange, Notification, ResourceChange, SubscriptionId};
pub use store::{Store, StoreBuilder};

pub use trellis_cache::{
    CacheStats, CachedDocument, DocumentContent, DocumentData, DocumentResources,
    InMemoryPersistedCache, Operation, PersistedCache, RequestHandler, RequestInput, RequestKey,
    RequestOptions,
};
pub use trellis_core::{StoreConfig, StoreError, StoreResult};
pub use trellis_graph::{MutationOutcome, RelationshipState, RelationshipValue, ToManyOperation};
pub use trellis_identity::ResourceKey;
