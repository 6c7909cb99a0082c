//! # Entity Mirror
//!
//! Read-only client copy of the entities one user can see.
//!
//! Transactions are applied strictly in operation order. Scalar operations
//! carry current values and converge when replayed. List edits are gated by
//! their version stamp:
//!
//! ```text
//! stamp <= known      -> Stale     (replay, ignored)
//! stamp == known + 1  -> Applied
//! stamp >  known + 1  -> Desynced  (an edit was lost, reload the entity)
//! ```
//!
//! A full list replacement carries no stamp; the next edit is taken as the
//! new baseline.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use umi3d_shared::PropertyKey;

use super::id::EntityId;
use crate::protocol::{EntityDescriptor, Operation, PropertyValue, Transaction};

/// Result of applying one operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// State changed (or was confirmed) by the operation.
    Applied,
    /// Replay of an already applied list edit.
    Stale,
    /// The target entity is not mirrored.
    Missing,
    /// The operation cannot be reconciled; the entity must be reloaded.
    Desynced,
}

/// Outcome counts of one transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransactionReport {
    /// Applied operations
    pub applied: usize,
    /// Ignored replays
    pub stale: usize,
    /// Operations on unknown entities
    pub missing: usize,
    /// Operations that desynchronized their entity
    pub desynced: usize,
}

impl TransactionReport {
    /// Adds the counts of another report.
    pub fn merge(&mut self, other: Self) {
        self.applied += other.applied;
        self.stale += other.stale;
        self.missing += other.missing;
        self.desynced += other.desynced;
    }

    fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied => self.applied += 1,
            ApplyOutcome::Stale => self.stale += 1,
            ApplyOutcome::Missing => self.missing += 1,
            ApplyOutcome::Desynced => self.desynced += 1,
        }
    }
}

/// A mirrored list and the last version stamp applied to it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MirroredList {
    /// Items
    pub items: Vec<PropertyValue>,
    /// `None` right after a full replacement
    pub version: Option<u32>,
}

/// Client copy of one entity.
#[derive(Clone, Debug, PartialEq)]
pub struct MirroredEntity {
    id: EntityId,
    parent: Option<EntityId>,
    children: Vec<EntityId>,
    properties: BTreeMap<PropertyKey, PropertyValue>,
    lists: BTreeMap<PropertyKey, MirroredList>,
}

impl MirroredEntity {
    /// Identifier.
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    /// Parent, `None` for scene roots.
    #[must_use]
    pub const fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    /// Mirrored children.
    #[must_use]
    pub fn children(&self) -> &[EntityId] {
        &self.children
    }

    /// Scalar property.
    #[must_use]
    pub fn property(&self, key: PropertyKey) -> Option<&PropertyValue> {
        self.properties.get(&key)
    }

    /// List property.
    #[must_use]
    pub fn list(&self, key: PropertyKey) -> Option<&MirroredList> {
        self.lists.get(&key)
    }

    fn list_edit(&mut self, key: PropertyKey, version: u32) -> Result<&mut MirroredList, ApplyOutcome> {
        // An unknown list is an empty list nobody edited yet.
        let list = self.lists.entry(key).or_insert_with(|| MirroredList {
            items: Vec::new(),
            version: Some(0),
        });
        match list.version {
            Some(known) if version <= known => Err(ApplyOutcome::Stale),
            Some(known) if version != known + 1 => Err(ApplyOutcome::Desynced),
            _ => Ok(list),
        }
    }
}

/// Client-side mirror of an environment.
#[derive(Clone, Debug, Default)]
pub struct EntityMirror {
    entities: HashMap<EntityId, MirroredEntity>,
    roots: Vec<EntityId>,
    dirty: BTreeSet<EntityId>,
    desynced: BTreeSet<EntityId>,
}

impl EntityMirror {
    /// Creates an empty mirror.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mirrored entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if nothing is mirrored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Looks up an entity.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&MirroredEntity> {
        self.entities.get(&id)
    }

    /// Mirrored scene roots.
    #[must_use]
    pub fn roots(&self) -> &[EntityId] {
        &self.roots
    }

    /// Inserts or replaces an entity from its full description.
    pub fn load(&mut self, descriptor: EntityDescriptor) {
        let id = descriptor.id;
        let children = match self.entities.remove(&id) {
            Some(previous) => {
                self.detach(id, previous.parent);
                previous.children
            }
            None => Vec::new(),
        };

        let entity = MirroredEntity {
            id,
            parent: descriptor.parent.filter(|parent| self.entities.contains_key(parent)),
            children,
            properties: descriptor.properties.into_iter().collect(),
            lists: descriptor
                .lists
                .into_iter()
                .map(|list| {
                    let mirrored = MirroredList {
                        items: list.items,
                        version: Some(list.version),
                    };
                    (list.key, mirrored)
                })
                .collect(),
        };
        let parent = entity.parent;
        self.entities.insert(id, entity);
        match parent.and_then(|parent| self.entities.get_mut(&parent)) {
            Some(parent) => parent.children.push(id),
            None => self.roots.push(id),
        }
        self.desynced.remove(&id);
        self.dirty.insert(id);
    }

    /// Applies one operation.
    pub fn apply(&mut self, operation: &Operation) -> ApplyOutcome {
        let outcome = self.apply_inner(operation);
        match outcome {
            ApplyOutcome::Applied => {
                self.dirty.insert(operation.entity());
            }
            ApplyOutcome::Desynced => {
                tracing::warn!(entity = %operation.entity(), kind = ?operation.kind(), "list edit out of sequence, entity needs reload");
                self.desynced.insert(operation.entity());
            }
            ApplyOutcome::Stale | ApplyOutcome::Missing => {}
        }
        outcome
    }

    /// Applies every operation of a transaction, in order.
    pub fn apply_transaction(&mut self, transaction: &Transaction) -> TransactionReport {
        let mut report = TransactionReport::default();
        for operation in &transaction.operations {
            report.record(self.apply(operation));
        }
        report
    }

    /// Entities changed since the last drain.
    pub fn drain_dirty(&mut self) -> Vec<EntityId> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    /// Entities that must be reloaded, cleared by this call.
    pub fn take_desynced(&mut self) -> Vec<EntityId> {
        std::mem::take(&mut self.desynced).into_iter().collect()
    }

    fn apply_inner(&mut self, operation: &Operation) -> ApplyOutcome {
        match operation {
            Operation::LoadEntity { descriptor: Some(descriptor), .. } => {
                self.load(descriptor.clone());
                ApplyOutcome::Applied
            }
            Operation::LoadEntity { entity, descriptor: None, .. } => {
                // Refresh without payload: nothing to do if we know it.
                if self.entities.contains_key(entity) {
                    ApplyOutcome::Stale
                } else {
                    ApplyOutcome::Missing
                }
            }
            Operation::DeleteEntity { entity, .. } => self.remove(*entity),
            Operation::SetEntityProperty { entity, key, value, .. } => {
                let Some(mirrored) = self.entities.get_mut(entity) else {
                    return ApplyOutcome::Missing;
                };
                match value {
                    PropertyValue::List(items) => {
                        mirrored.properties.remove(key);
                        mirrored.lists.insert(
                            *key,
                            MirroredList {
                                items: items.clone(),
                                version: None,
                            },
                        );
                    }
                    value => {
                        mirrored.properties.insert(*key, value.clone());
                    }
                }
                ApplyOutcome::Applied
            }
            Operation::SetEntityListItem { entity, key, index, value, version, .. } => {
                self.edit_list(*entity, *key, *version, |items| {
                    let slot = items.get_mut(*index as usize)?;
                    *slot = value.clone();
                    Some(())
                })
            }
            Operation::AddEntityListItem { entity, key, index, value, version, .. } => {
                self.edit_list(*entity, *key, *version, |items| {
                    let index = *index as usize;
                    (index <= items.len()).then(|| items.insert(index, value.clone()))
                })
            }
            Operation::RemoveEntityListItem { entity, key, index, version, .. } => {
                self.edit_list(*entity, *key, *version, |items| {
                    let index = *index as usize;
                    (index < items.len()).then(|| {
                        items.remove(index);
                    })
                })
            }
        }
    }

    fn edit_list(
        &mut self,
        entity: EntityId,
        key: PropertyKey,
        version: u32,
        edit: impl FnOnce(&mut Vec<PropertyValue>) -> Option<()>,
    ) -> ApplyOutcome {
        let Some(mirrored) = self.entities.get_mut(&entity) else {
            return ApplyOutcome::Missing;
        };
        let list = match mirrored.list_edit(key, version) {
            Ok(list) => list,
            Err(outcome) => return outcome,
        };
        match edit(&mut list.items) {
            Some(()) => {
                list.version = Some(version);
                ApplyOutcome::Applied
            }
            // Index outside the list: our copy is not the one the server edited.
            None => ApplyOutcome::Desynced,
        }
    }

    fn remove(&mut self, id: EntityId) -> ApplyOutcome {
        let Some(entity) = self.entities.remove(&id) else {
            return ApplyOutcome::Missing;
        };
        self.detach(id, entity.parent);
        let mut stack = entity.children;
        while let Some(child) = stack.pop() {
            if let Some(removed) = self.entities.remove(&child) {
                stack.extend(removed.children);
            }
            self.dirty.remove(&child);
            self.desynced.remove(&child);
        }
        self.dirty.remove(&id);
        self.desynced.remove(&id);
        ApplyOutcome::Applied
    }

    fn detach(&mut self, id: EntityId, parent: Option<EntityId>) {
        match parent.and_then(|parent| self.entities.get_mut(&parent)) {
            Some(parent) => parent.children.retain(|child| *child != id),
            None => self.roots.retain(|root| *root != id),
        }
    }
}
