//! State-change notifications.
//!
//! Notifications raised during a flush are buffered and delivered once the
//! flush has completed and the store lock is released, so subscribers always
//! observe a consistent store and may call back into it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use trellis_cache::RequestKey;
use trellis_identity::ResourceKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceChange {
    Added,
    Updated,
    /// Id assigned, or the key was merged into another.
    Identity,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentChange {
    Added,
    Updated,
    Invalidated,
    Removed,
    /// A background refresh failed; the previous document was kept.
    RefreshFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Resource {
        key: ResourceKey,
        change: ResourceChange,
    },
    Relationship {
        key: ResourceKey,
        field: String,
    },
    Document {
        request_key: RequestKey,
        change: DocumentChange,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Subscribers {
    inner: Mutex<SubscriberList>,
}

#[derive(Default)]
struct SubscriberList {
    next: u64,
    callbacks: BTreeMap<u64, Callback>,
}

impl Subscribers {
    pub fn subscribe(&self, callback: Callback) -> SubscriptionId {
        let mut list = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        list.next += 1;
        let id = list.next;
        list.callbacks.insert(id, callback);
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut list = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        list.callbacks.remove(&id.0).is_some()
    }

    /// Deliver in subscription order. The list lock is not held while
    /// callbacks run.
    pub fn deliver(&self, notifications: &[Notification]) {
        if notifications.is_empty() {
            return;
        }
        let callbacks: Vec<Callback> = {
            let list = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            list.callbacks.values().cloned().collect()
        };
        for notification in notifications {
            for callback in &callbacks {
                callback(notification);
            }
        }
    }
}

impl std::fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let list = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Subscribers")
            .field("count", &list.callbacks.len())
            .finish()
    }
}
