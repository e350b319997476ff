//! Trellis Cache - Request/Document Cache
//!
//! Data side of request handling: fingerprinting requests into
//! [`RequestKey`]s, cached documents and their dependency index, the
//! pluggable staleness policy, and the optional persisted-cache collaborator.
//! Coordination of in-flight fetches lives in `trellis-store`.

mod document;
mod documents;
mod handler;
mod persistence;
mod policy;
mod request;

pub use document::{CachedDocument, DocumentContent, DocumentData, DocumentResources};
pub use documents::{CacheStats, DocumentCache};
pub use handler::RequestHandler;
pub use persistence::{InMemoryPersistedCache, PersistedCache, PersistedData, PersistedDocument};
pub use policy::{
    decide, should_background_fetch, should_fetch, CacheDecision, CachePolicy, LifecycleHooks,
    RequestLifecycle, TtlCachePolicy,
};
pub use request::{
    fingerprint, Operation, RequestInput, RequestKey, RequestOptions, RequestTarget,
};
