//! Canonical, process-unique resource keys.
//!
//! Keys compare and hash by object identity: two `ResourceKey` values are equal
//! only when they are clones of the same allocation. Every map in the store is
//! keyed by this identity rather than by type/id strings.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use trellis_core::{IdentityError, ResourceReference};

/// Opaque handle for one resource.
///
/// `resource_type` and `lid` never change. `id` transitions from unset to a
/// value at most once. A key that lost an identity merge points at its winner.
#[derive(Clone)]
pub struct ResourceKey {
    inner: Arc<KeyInner>,
}

struct KeyInner {
    resource_type: String,
    lid: String,
    id: OnceLock<String>,
    merged_into: OnceLock<ResourceKey>,
    forgotten: AtomicBool,
}

impl ResourceKey {
    pub(crate) fn new(resource_type: &str, lid: String, id: Option<&str>) -> Self {
        let id_cell = OnceLock::new();
        if let Some(id) = id {
            let _ = id_cell.set(id.to_string());
        }
        Self {
            inner: Arc::new(KeyInner {
                resource_type: resource_type.to_string(),
                lid,
                id: id_cell,
                merged_into: OnceLock::new(),
                forgotten: AtomicBool::new(false),
            }),
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.inner.resource_type
    }

    pub fn lid(&self) -> &str {
        &self.inner.lid
    }

    /// Server id, once known.
    pub fn id(&self) -> Option<&str> {
        self.inner.id.get().map(String::as_str)
    }

    /// Set the id. Re-setting the same id is a no-op.
    pub(crate) fn promote(&self, id: &str) -> Result<(), IdentityError> {
        match self.inner.id.get() {
            Some(current) if current == id => Ok(()),
            Some(current) => Err(IdentityError::IdAlreadyAssigned {
                lid: self.lid().to_string(),
                current: current.clone(),
                attempted: id.to_string(),
            }),
            None => {
                let _ = self.inner.id.set(id.to_string());
                Ok(())
            }
        }
    }

    pub(crate) fn redirect_to(&self, winner: &ResourceKey) {
        let _ = self.inner.merged_into.set(winner.clone());
    }

    pub(crate) fn mark_forgotten(&self) {
        self.inner.forgotten.store(true, Ordering::Release);
    }

    /// The key every holder should use going forward.
    ///
    /// Follows the merge chain; returns a clone of `self` for unmerged keys.
    pub fn canonical(&self) -> ResourceKey {
        let mut current = self.clone();
        while let Some(next) = current.inner.merged_into.get() {
            current = next.clone();
        }
        current
    }

    /// True when this key lost an identity merge.
    pub fn is_merged(&self) -> bool {
        self.inner.merged_into.get().is_some()
    }

    /// True once the registry has dropped this key.
    pub fn is_forgotten(&self) -> bool {
        self.inner.forgotten.load(Ordering::Acquire)
    }

    /// Identity comparison that also sees through merges.
    pub fn same_resource(&self, other: &ResourceKey) -> bool {
        self.canonical() == other.canonical()
    }

    pub fn reference(&self) -> ResourceReference {
        ResourceReference {
            resource_type: self.resource_type().to_string(),
            id: self.id().map(str::to_string),
            lid: Some(self.lid().to_string()),
        }
    }
}

impl PartialEq for ResourceKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ResourceKey {}

impl Hash for ResourceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.inner), state);
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceKey")
            .field("type", &self.resource_type())
            .field("id", &self.id())
            .field("lid", &self.lid())
            .finish()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.lid())
    }
}
