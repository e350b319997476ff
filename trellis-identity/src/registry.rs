//! Identity registry: one canonical key per resource.
//!
//! Three maps point at the same key objects:
//! - `by_lid`: every lid (including aliases and merged-away lids) to its key
//! - `by_id`: (type, id) to key, populated once an id is known
//! - `by_type`: type to live keys, in creation order
//!
//! A merge redirects all three atomically with respect to the caller, which
//! holds `&mut self` for the duration.

use std::collections::HashMap;

use tracing::{debug, info};
use trellis_core::{lid_for_id, IdentityError, ResourceReference, LID_PREFIX};
use uuid::Uuid;

use crate::ResourceKey;

/// What `assign_id` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdAssignment {
    /// The key already had this id.
    Unchanged(ResourceKey),
    /// The key received the id.
    Assigned(ResourceKey),
    /// Another key already owned the id; `loser` now redirects to `winner`.
    Merged {
        winner: ResourceKey,
        loser: ResourceKey,
    },
}

impl IdAssignment {
    /// The key holders should use after the assignment.
    pub fn key(&self) -> &ResourceKey {
        match self {
            IdAssignment::Unchanged(key) | IdAssignment::Assigned(key) => key,
            IdAssignment::Merged { winner, .. } => winner,
        }
    }
}

/// Outcome of resolving a reference, exposing merges the caller must mirror.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub key: ResourceKey,
    pub created: bool,
    /// Set when resolution merged a lid-only key into an id owner.
    pub merged: Option<ResourceKey>,
}

#[derive(Debug, Default)]
pub struct IdentityRegistry {
    by_lid: HashMap<String, ResourceKey>,
    by_id: HashMap<String, HashMap<String, ResourceKey>>,
    by_type: HashMap<String, Vec<ResourceKey>>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a reference to its canonical key, creating one if needed.
    pub fn resolve(&mut self, reference: &ResourceReference) -> Result<ResourceKey, IdentityError> {
        self.resolve_detailed(reference).map(|r| r.key)
    }

    /// Like [`resolve`](Self::resolve) but reports creation and merges.
    pub fn resolve_detailed(
        &mut self,
        reference: &ResourceReference,
    ) -> Result<Resolution, IdentityError> {
        reference.validate()?;
        let resource_type = reference.resource_type.as_str();
        let by_lid = reference.lid().and_then(|lid| self.by_lid.get(lid)).cloned();
        let by_id = reference
            .id()
            .and_then(|id| self.lookup_id(resource_type, id))
            .cloned();

        if let Some(key) = &by_lid {
            check_type(key, resource_type)?;
        }

        match (by_lid, by_id) {
            (Some(lid_key), Some(id_key)) if lid_key == id_key => Ok(Resolution {
                key: lid_key,
                created: false,
                merged: None,
            }),
            (Some(lid_key), Some(id_key)) => {
                if let Some(current) = lid_key.id() {
                    return Err(IdentityError::IdentityConflict {
                        resource_type: resource_type.to_string(),
                        id: reference.id().unwrap_or(current).to_string(),
                        existing_lid: id_key.lid().to_string(),
                        incoming_lid: lid_key.lid().to_string(),
                    });
                }
                self.merge(&lid_key, &id_key);
                Ok(Resolution {
                    key: id_key,
                    created: false,
                    merged: Some(lid_key),
                })
            }
            (Some(lid_key), None) => {
                if let Some(id) = reference.id() {
                    lid_key.promote(id)?;
                    self.index_id(&lid_key, id);
                }
                Ok(Resolution {
                    key: lid_key,
                    created: false,
                    merged: None,
                })
            }
            (None, Some(id_key)) => {
                if let Some(lid) = reference.lid() {
                    self.by_lid.insert(lid.to_string(), id_key.clone());
                }
                Ok(Resolution {
                    key: id_key,
                    created: false,
                    merged: None,
                })
            }
            (None, None) => {
                let lid = match (reference.lid(), reference.id()) {
                    (Some(lid), _) => lid.to_string(),
                    (None, Some(id)) => {
                        let derived = lid_for_id(resource_type, id);
                        match self.by_lid.get(&derived).map(ResourceKey::canonical) {
                            None => derived,
                            // A lid-only key already claimed the derived lid.
                            Some(holder)
                                if holder.resource_type() == resource_type
                                    && holder.id().is_none() =>
                            {
                                holder.promote(id)?;
                                self.index_id(&holder, id);
                                debug!(lid = %holder.lid(), id, "Promoted key holding derived lid");
                                return Ok(Resolution {
                                    key: holder,
                                    created: false,
                                    merged: None,
                                });
                            }
                            Some(_) => mint_lid(),
                        }
                    }
                    (None, None) => {
                        return Err(IdentityError::InvalidReference {
                            resource_type: resource_type.to_string(),
                            reason: "one of id or lid must be a non-empty string".to_string(),
                        })
                    }
                };
                let key = self.insert(resource_type, lid, reference.id());
                Ok(Resolution {
                    key,
                    created: true,
                    merged: None,
                })
            }
        }
    }

    /// Start a dry run of a batch of resolutions.
    pub fn preflight(&self) -> Preflight<'_> {
        Preflight {
            registry: self,
            lids: HashMap::new(),
            ids: HashMap::new(),
        }
    }

    /// Look up without creating.
    pub fn peek(&self, reference: &ResourceReference) -> Option<ResourceKey> {
        reference
            .lid()
            .and_then(|lid| self.by_lid.get(lid))
            .or_else(|| {
                reference
                    .id()
                    .and_then(|id| self.lookup_id(&reference.resource_type, id))
            })
            .cloned()
    }

    pub fn peek_lid(&self, lid: &str) -> Option<ResourceKey> {
        self.by_lid.get(lid).cloned()
    }

    /// Mint a key for a resource that has no server id yet.
    pub fn create_local(&mut self, resource_type: &str) -> ResourceKey {
        self.insert(resource_type, mint_lid(), None)
    }

    /// Promote a lid-only key to carry a server id.
    ///
    /// When another key already owns `(type, id)`, the two are merged: the
    /// existing owner wins and `key` redirects to it.
    pub fn assign_id(&mut self, key: &ResourceKey, id: &str) -> Result<IdAssignment, IdentityError> {
        if id.is_empty() {
            return Err(IdentityError::InvalidReference {
                resource_type: key.resource_type().to_string(),
                reason: "id must be a non-empty string".to_string(),
            });
        }
        let key = key.canonical();
        if key.id() == Some(id) {
            return Ok(IdAssignment::Unchanged(key));
        }
        if let Some(current) = key.id() {
            return Err(IdentityError::IdAlreadyAssigned {
                lid: key.lid().to_string(),
                current: current.to_string(),
                attempted: id.to_string(),
            });
        }

        match self.lookup_id(key.resource_type(), id).cloned() {
            Some(owner) if owner != key => {
                self.merge(&key, &owner);
                Ok(IdAssignment::Merged {
                    winner: owner,
                    loser: key,
                })
            }
            _ => {
                key.promote(id)?;
                self.index_id(&key, id);
                debug!(lid = %key.lid(), id, "Assigned id to local key");
                Ok(IdAssignment::Assigned(key))
            }
        }
    }

    /// Drop the key from every map. Outstanding clones stay valid but stale;
    /// the next resolve of the same identity mints a fresh key.
    pub fn forget(&mut self, key: &ResourceKey) {
        let key = key.canonical();
        self.by_lid.retain(|_, k| *k != key);
        if let Some(id) = key.id() {
            if let Some(ids) = self.by_id.get_mut(key.resource_type()) {
                if ids.get(id) == Some(&key) {
                    ids.remove(id);
                }
            }
        }
        if let Some(keys) = self.by_type.get_mut(key.resource_type()) {
            keys.retain(|k| *k != key);
        }
        key.mark_forgotten();
        debug!(lid = %key.lid(), "Forgot resource key");
    }

    /// Current canonical key for any key ever handed out.
    pub fn canonical(&self, key: &ResourceKey) -> ResourceKey {
        key.canonical()
    }

    /// Live keys of a type, in creation order.
    pub fn keys_for_type(&self, resource_type: &str) -> Vec<ResourceKey> {
        self.by_type.get(resource_type).cloned().unwrap_or_default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.by_type.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup_id(&self, resource_type: &str, id: &str) -> Option<&ResourceKey> {
        self.by_id.get(resource_type)?.get(id)
    }

    fn index_id(&mut self, key: &ResourceKey, id: &str) {
        self.by_id
            .entry(key.resource_type().to_string())
            .or_default()
            .insert(id.to_string(), key.clone());
    }

    fn insert(&mut self, resource_type: &str, lid: String, id: Option<&str>) -> ResourceKey {
        let key = ResourceKey::new(resource_type, lid, id);
        self.by_lid.insert(key.lid().to_string(), key.clone());
        if let Some(id) = id {
            self.index_id(&key, id);
        }
        self.by_type
            .entry(resource_type.to_string())
            .or_default()
            .push(key.clone());
        key
    }

    fn merge(&mut self, loser: &ResourceKey, winner: &ResourceKey) {
        for entry in self.by_lid.values_mut() {
            if entry == loser {
                *entry = winner.clone();
            }
        }
        for ids in self.by_id.values_mut() {
            for entry in ids.values_mut() {
                if entry == loser {
                    *entry = winner.clone();
                }
            }
        }
        if let Some(keys) = self.by_type.get_mut(loser.resource_type()) {
            keys.retain(|k| k != loser);
        }
        loser.redirect_to(winner);
        info!(
            loser = %loser.lid(),
            winner = %winner.lid(),
            resource_type = %winner.resource_type(),
            "Merged resource identities"
        );
    }
}

/// What a key would look like once the references checked so far resolve.
#[derive(Debug, Clone)]
struct Planned {
    resource_type: String,
    lid: String,
    id: Option<String>,
}

impl Planned {
    fn of(key: &ResourceKey) -> Self {
        let key = key.canonical();
        Self {
            resource_type: key.resource_type().to_string(),
            lid: key.lid().to_string(),
            id: key.id().map(str::to_string),
        }
    }
}

/// Dry run of [`IdentityRegistry::resolve`] over a batch of references.
///
/// [`check`](Self::check) returns the error resolving the reference would
/// return, given every reference checked before it, and never touches a key.
#[derive(Debug)]
pub struct Preflight<'a> {
    registry: &'a IdentityRegistry,
    lids: HashMap<String, Planned>,
    ids: HashMap<(String, String), Planned>,
}

impl Preflight<'_> {
    pub fn check(&mut self, reference: &ResourceReference) -> Result<(), IdentityError> {
        reference.validate()?;
        let resource_type = reference.resource_type.as_str();
        let by_lid = reference.lid().and_then(|lid| self.lid(lid));
        let by_id = reference.id().and_then(|id| self.id(resource_type, id));

        if let Some(planned) = &by_lid {
            if planned.resource_type != resource_type {
                return Err(IdentityError::TypeMismatch {
                    lid: planned.lid.clone(),
                    expected: planned.resource_type.clone(),
                    found: resource_type.to_string(),
                });
            }
        }

        let planned = match (by_lid, by_id) {
            (Some(lid_key), Some(id_key)) if lid_key.lid == id_key.lid => lid_key,
            (Some(lid_key), Some(id_key)) => {
                if let Some(current) = &lid_key.id {
                    return Err(IdentityError::IdentityConflict {
                        resource_type: resource_type.to_string(),
                        id: reference.id().unwrap_or(current.as_str()).to_string(),
                        existing_lid: id_key.lid,
                        incoming_lid: lid_key.lid.clone(),
                    });
                }
                self.lids.insert(lid_key.lid, id_key.clone());
                id_key
            }
            (Some(mut lid_key), None) => {
                if let Some(id) = reference.id() {
                    if let Some(current) = lid_key.id.as_deref().filter(|current| *current != id) {
                        return Err(IdentityError::IdAlreadyAssigned {
                            lid: lid_key.lid.clone(),
                            current: current.to_string(),
                            attempted: id.to_string(),
                        });
                    }
                    lid_key.id = Some(id.to_string());
                }
                lid_key
            }
            (None, Some(id_key)) => id_key,
            (None, None) => match (reference.lid(), reference.id()) {
                (Some(lid), id) => Planned {
                    resource_type: resource_type.to_string(),
                    lid: lid.to_string(),
                    id: id.map(str::to_string),
                },
                (None, id) => {
                    let derived = id.map(|id| lid_for_id(resource_type, id)).unwrap_or_default();
                    match self.lid(&derived) {
                        Some(mut holder)
                            if holder.resource_type == resource_type && holder.id.is_none() =>
                        {
                            holder.id = id.map(str::to_string);
                            holder
                        }
                        Some(_) => Planned {
                            resource_type: resource_type.to_string(),
                            lid: mint_lid(),
                            id: id.map(str::to_string),
                        },
                        None => Planned {
                            resource_type: resource_type.to_string(),
                            lid: derived,
                            id: id.map(str::to_string),
                        },
                    }
                }
            },
        };

        if let Some(lid) = reference.lid() {
            self.lids.insert(lid.to_string(), planned.clone());
        }
        self.lids.insert(planned.lid.clone(), planned.clone());
        if let Some(id) = planned.id.clone() {
            self.ids.insert((planned.resource_type.clone(), id), planned);
        }
        Ok(())
    }

    fn lid(&self, lid: &str) -> Option<Planned> {
        self.lids
            .get(lid)
            .cloned()
            .or_else(|| self.registry.by_lid.get(lid).map(Planned::of))
    }

    fn id(&self, resource_type: &str, id: &str) -> Option<Planned> {
        self.ids
            .get(&(resource_type.to_string(), id.to_string()))
            .cloned()
            .or_else(|| self.registry.lookup_id(resource_type, id).map(Planned::of))
    }
}

fn mint_lid() -> String {
    format!("{LID_PREFIX}{}", Uuid::now_v7())
}

fn check_type(key: &ResourceKey, resource_type: &str) -> Result<(), IdentityError> {
    if key.resource_type() != resource_type {
        return Err(IdentityError::TypeMismatch {
            lid: key.lid().to_string(),
            expected: key.resource_type().to_string(),
            found: resource_type.to_string(),
        });
    }
    Ok(())
}
