//! To-many mutation operations and duplicate analysis.

use std::collections::{HashMap, HashSet};

use trellis_core::{DuplicatePolicy, RelationshipError};
use trellis_identity::ResourceKey;

/// An edit to the local value of a to-many relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToManyOperation {
    /// Replace every member.
    Replace(Vec<ResourceKey>),
    /// Insert at `index`, or append when `None`.
    Insert {
        index: Option<usize>,
        items: Vec<ResourceKey>,
    },
    /// Remove `count` members starting at `start`.
    Remove { start: usize, count: usize },
    /// Remove `delete_count` members at `start`, then insert `items` there.
    Splice {
        start: usize,
        delete_count: usize,
        items: Vec<ResourceKey>,
    },
    /// Remove the given members wherever they are.
    RemoveItems(Vec<ResourceKey>),
}

impl ToManyOperation {
    pub fn replace(items: Vec<ResourceKey>) -> Self {
        ToManyOperation::Replace(items)
    }

    pub fn push(items: Vec<ResourceKey>) -> Self {
        ToManyOperation::Insert { index: None, items }
    }

    pub fn insert_at(index: usize, items: Vec<ResourceKey>) -> Self {
        ToManyOperation::Insert {
            index: Some(index),
            items,
        }
    }

    pub fn remove_range(start: usize, count: usize) -> Self {
        ToManyOperation::Remove { start, count }
    }

    pub fn splice(start: usize, delete_count: usize, items: Vec<ResourceKey>) -> Self {
        ToManyOperation::Splice {
            start,
            delete_count,
            items,
        }
    }

    pub fn remove_items(items: Vec<ResourceKey>) -> Self {
        ToManyOperation::RemoveItems(items)
    }

    /// Candidate sequence after applying to `current`, duplicates included.
    pub(crate) fn apply(
        &self,
        current: &[ResourceKey],
        field: &str,
    ) -> Result<Vec<Slot>, RelationshipError> {
        let retained = |keys: &[ResourceKey]| {
            keys.iter()
                .map(|key| Slot {
                    key: key.clone(),
                    retained: true,
                })
                .collect::<Vec<_>>()
        };
        let incoming = |keys: &[ResourceKey]| {
            keys.iter()
                .map(|key| Slot {
                    key: key.clone(),
                    retained: false,
                })
                .collect::<Vec<_>>()
        };

        match self {
            ToManyOperation::Replace(items) => Ok(incoming(items)),
            ToManyOperation::Insert { index, items } => {
                let at = index.unwrap_or(current.len());
                check_index(field, at, current.len())?;
                let mut slots = retained(&current[..at]);
                slots.extend(incoming(items));
                slots.extend(retained(&current[at..]));
                Ok(slots)
            }
            ToManyOperation::Remove { start, count } => {
                splice_slots(current, field, *start, *count, &[], &retained, &incoming)
            }
            ToManyOperation::Splice {
                start,
                delete_count,
                items,
            } => splice_slots(current, field, *start, *delete_count, items, &retained, &incoming),
            ToManyOperation::RemoveItems(items) => {
                let removing: HashSet<&ResourceKey> = items.iter().collect();
                Ok(current
                    .iter()
                    .filter(|key| !removing.contains(key))
                    .map(|key| Slot {
                        key: key.clone(),
                        retained: true,
                    })
                    .collect())
            }
        }
    }
}

fn splice_slots(
    current: &[ResourceKey],
    field: &str,
    start: usize,
    delete_count: usize,
    items: &[ResourceKey],
    retained: &dyn Fn(&[ResourceKey]) -> Vec<Slot>,
    incoming: &dyn Fn(&[ResourceKey]) -> Vec<Slot>,
) -> Result<Vec<Slot>, RelationshipError> {
    check_index(field, start, current.len())?;
    let end = start.saturating_add(delete_count).min(current.len());
    let mut slots = retained(&current[..start]);
    slots.extend(incoming(items));
    slots.extend(retained(&current[end..]));
    Ok(slots)
}

fn check_index(field: &str, index: usize, len: usize) -> Result<(), RelationshipError> {
    if index > len {
        return Err(RelationshipError::IndexOutOfBounds {
            field: field.to_string(),
            index,
            len,
        });
    }
    Ok(())
}

/// One position of a candidate sequence.
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub key: ResourceKey,
    /// Came from the pre-mutation value rather than the operation's items.
    pub retained: bool,
}

/// Result of duplicate analysis on a candidate sequence.
#[derive(Debug)]
pub(crate) struct Deduped {
    pub members: Vec<ResourceKey>,
    /// Duplicates that were dropped under a tolerant policy.
    pub dropped: Vec<ResourceKey>,
}

/// Resolve duplicates in `slots` according to `policy`.
///
/// Under [`DuplicatePolicy::TolerateExisting`] a duplicate is tolerated only if
/// the key was already a member before the mutation; the member keeps its
/// existing position and the incoming copy is dropped. A duplicate the
/// mutation introduced fails the whole mutation.
pub(crate) fn dedupe(
    slots: Vec<Slot>,
    previous: &[ResourceKey],
    policy: DuplicatePolicy,
    lid: &str,
    field: &str,
) -> Result<Deduped, RelationshipError> {
    let mut counts: HashMap<&ResourceKey, usize> = HashMap::new();
    for slot in &slots {
        *counts.entry(&slot.key).or_default() += 1;
    }

    let mut duplicates: Vec<ResourceKey> = Vec::new();
    for slot in &slots {
        if counts[&slot.key] > 1 && !duplicates.contains(&slot.key) {
            duplicates.push(slot.key.clone());
        }
    }
    if duplicates.is_empty() {
        return Ok(Deduped {
            members: slots.into_iter().map(|slot| slot.key).collect(),
            dropped: Vec::new(),
        });
    }

    let rejected: Vec<&ResourceKey> = match policy {
        DuplicatePolicy::Reject => duplicates.iter().collect(),
        DuplicatePolicy::TolerateExisting => duplicates
            .iter()
            .filter(|key| !previous.contains(key))
            .collect(),
        DuplicatePolicy::DedupeAll => Vec::new(),
    };
    if !rejected.is_empty() {
        return Err(RelationshipError::DuplicateRelationshipMember {
            lid: lid.to_string(),
            field: field.to_string(),
            duplicates: rejected.iter().map(|key| key.lid().to_string()).collect(),
        });
    }

    // Winner per duplicated key: its retained slot if any, else the first one.
    let mut winners: HashMap<&ResourceKey, usize> = HashMap::new();
    for (index, slot) in slots.iter().enumerate() {
        if counts[&slot.key] < 2 {
            continue;
        }
        match winners.get(&slot.key) {
            Some(&current) if slots[current].retained || !slot.retained => {}
            _ => {
                winners.insert(&slot.key, index);
            }
        }
    }

    let members = slots
        .iter()
        .enumerate()
        .filter(|(index, slot)| {
            winners
                .get(&slot.key)
                .map_or(true, |winner| winner == index)
        })
        .map(|(_, slot)| slot.key.clone())
        .collect();

    Ok(Deduped {
        members,
        dropped: duplicates,
    })
}
