//! Staleness policy and the fetch decision.
//!
//! The policy is a pluggable collaborator that only reports verdicts; the
//! store turns those verdicts into a [`CacheDecision`] with
//! [`should_fetch`] and [`should_background_fetch`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use trellis_core::{CachePolicyConfig, RequestError};

use crate::{CachedDocument, RequestInput, RequestKey, RequestOptions};

/// Reports whether a cached document is still usable.
pub trait CachePolicy: Send + Sync {
    /// The document must be refetched before it can be returned.
    fn is_hard_expired(&self, key: &RequestKey, document: &CachedDocument) -> bool;

    /// The document may be returned but should be refreshed in the background.
    fn is_soft_expired(&self, key: &RequestKey, document: &CachedDocument) -> bool;

    /// Optional request lifecycle capability.
    ///
    /// Queried once when the store is built; see [`LifecycleHooks`].
    fn lifecycle(&self) -> Option<Arc<dyn RequestLifecycle>> {
        None
    }
}

/// Observability hooks around each fetch.
pub trait RequestLifecycle: Send + Sync {
    fn will_request(&self, key: &RequestKey, input: &RequestInput);

    fn did_request(&self, key: &RequestKey, result: Result<(), &RequestError>);
}

/// Lifecycle capability resolved once at registration time.
#[derive(Clone, Default)]
pub enum LifecycleHooks {
    #[default]
    Disabled,
    Enabled(Arc<dyn RequestLifecycle>),
}

impl LifecycleHooks {
    pub fn resolve(policy: &dyn CachePolicy) -> Self {
        match policy.lifecycle() {
            Some(hooks) => LifecycleHooks::Enabled(hooks),
            None => LifecycleHooks::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, LifecycleHooks::Enabled(_))
    }

    pub fn will_request(&self, key: &RequestKey, input: &RequestInput) {
        if let LifecycleHooks::Enabled(hooks) = self {
            hooks.will_request(key, input);
        }
    }

    pub fn did_request(&self, key: &RequestKey, result: Result<(), &RequestError>) {
        if let LifecycleHooks::Enabled(hooks) = self {
            hooks.did_request(key, result);
        }
    }
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleHooks::Disabled => f.write_str("LifecycleHooks::Disabled"),
            LifecycleHooks::Enabled(_) => f.write_str("LifecycleHooks::Enabled"),
        }
    }
}

/// Age-based policy built from [`CachePolicyConfig`].
///
/// Documents marked invalidated are always hard expired.
#[derive(Debug, Clone)]
pub struct TtlCachePolicy {
    soft_expires: Duration,
    hard_expires: Duration,
}

impl TtlCachePolicy {
    pub fn new(soft_expires: Duration, hard_expires: Duration) -> Self {
        Self {
            soft_expires,
            hard_expires,
        }
    }

    pub fn from_config(config: &CachePolicyConfig) -> Self {
        Self::new(config.soft_expires(), config.hard_expires())
    }
}

impl Default for TtlCachePolicy {
    fn default() -> Self {
        Self::from_config(&CachePolicyConfig::default())
    }
}

impl CachePolicy for TtlCachePolicy {
    fn is_hard_expired(&self, _key: &RequestKey, document: &CachedDocument) -> bool {
        document.invalidated || document.age(Utc::now()) >= self.hard_expires
    }

    fn is_soft_expired(&self, _key: &RequestKey, document: &CachedDocument) -> bool {
        document.age(Utc::now()) >= self.soft_expires
    }
}

/// What to do with a request given the cache state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    /// Return the cached document as-is.
    Fresh,
    /// Return the cached document and refresh it in the background.
    Revalidate,
    /// Block on a fetch.
    Fetch,
}

/// True when the caller asked for a reload, nothing is cached, or the cached
/// document is hard expired.
pub fn should_fetch(
    policy: &dyn CachePolicy,
    key: &RequestKey,
    cached: Option<&CachedDocument>,
    options: &RequestOptions,
) -> bool {
    if options.reload {
        return true;
    }
    match cached {
        None => true,
        Some(document) => policy.is_hard_expired(key, document),
    }
}

/// True only when no blocking fetch will happen and either the caller asked
/// for a background reload or the document is soft expired.
pub fn should_background_fetch(
    policy: &dyn CachePolicy,
    key: &RequestKey,
    cached: Option<&CachedDocument>,
    will_fetch: bool,
    options: &RequestOptions,
) -> bool {
    if will_fetch {
        return false;
    }
    match cached {
        None => false,
        Some(document) => options.background_reload || policy.is_soft_expired(key, document),
    }
}

pub fn decide(
    policy: &dyn CachePolicy,
    key: &RequestKey,
    cached: Option<&CachedDocument>,
    options: &RequestOptions,
) -> CacheDecision {
    let fetch = should_fetch(policy, key, cached, options);
    if fetch {
        CacheDecision::Fetch
    } else if should_background_fetch(policy, key, cached, fetch, options) {
        CacheDecision::Revalidate
    } else {
        CacheDecision::Fresh
    }
}
