//! # Entity Registry
//!
//! Authoritative id → entity map owned by the environment.
//!
//! The registry is the only writer of entity state. Every mutation records
//! the operation(s) it produced in an outbox; the server drains the outbox
//! once per tick into the transaction batcher.
//!
//! Lookups never fail loudly: a miss is `None`, a mutation of a missing
//! entity is [`MutationOutcome::Missing`]. A user disconnecting in the middle
//! of a tick must not be able to turn a stale id into an error.

use std::collections::{BTreeMap, HashMap};

use umi3d_shared::{keys, EntityCategory, PropertyKey, Transform};

use super::id::{EntityId, IdAllocator};
use super::list::AsyncListProperty;
use super::property::{approx_equal, AsyncProperty, Equality};
use crate::protocol::{EntityDescriptor, ListDescriptor, Operation, PropertyValue, UserSet};
use crate::server::UserId;

/// Result of a registry mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The entity does not exist.
    Missing,
    /// The entity exists but nothing observable changed.
    Unchanged,
    /// The change was applied and its operation recorded.
    Recorded,
}

impl MutationOutcome {
    /// Returns true if an operation was recorded.
    #[must_use]
    pub const fn is_recorded(self) -> bool {
        matches!(self, Self::Recorded)
    }
}

/// Initial state of an entity about to be registered.
#[derive(Clone, Debug)]
pub struct EntityDraft {
    category: EntityCategory,
    parent: Option<EntityId>,
    properties: Vec<(PropertyKey, PropertyValue, Option<Equality<PropertyValue>>)>,
    lists: Vec<(PropertyKey, Vec<PropertyValue>)>,
}

impl EntityDraft {
    /// An empty, active scene root.
    #[must_use]
    pub const fn new(category: EntityCategory) -> Self {
        Self {
            category,
            parent: None,
            properties: Vec::new(),
            lists: Vec::new(),
        }
    }

    /// Attaches the entity under `parent`.
    #[must_use]
    pub const fn with_parent(mut self, parent: EntityId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Adds a property. List values become list properties.
    #[must_use]
    pub fn with_property(mut self, key: PropertyKey, value: impl Into<PropertyValue>) -> Self {
        match value.into() {
            PropertyValue::List(items) => self.lists.push((key, items)),
            value => self.properties.push((key, value, None)),
        }
        self
    }

    /// Adds a property with a custom dirty check.
    #[must_use]
    pub fn with_property_eq(
        mut self,
        key: PropertyKey,
        value: impl Into<PropertyValue>,
        equality: Equality<PropertyValue>,
    ) -> Self {
        self.properties.push((key, value.into(), Some(equality)));
        self
    }

    /// Adds position, rotation and scale, compared approximately.
    #[must_use]
    pub fn with_transform(self, transform: Transform) -> Self {
        self.with_property_eq(keys::POSITION, transform.position, approx_equal)
            .with_property_eq(keys::ROTATION, transform.rotation, approx_equal)
            .with_property_eq(keys::SCALE, transform.scale, approx_equal)
    }

    /// Adds a display name.
    #[must_use]
    pub fn with_name(self, name: &str) -> Self {
        self.with_property(keys::NAME, name)
    }
}

/// A registered entity.
#[derive(Clone, Debug)]
pub struct Entity {
    id: EntityId,
    parent: Option<EntityId>,
    children: Vec<EntityId>,
    properties: BTreeMap<PropertyKey, AsyncProperty<PropertyValue>>,
    lists: BTreeMap<PropertyKey, AsyncListProperty<PropertyValue>>,
}

impl Entity {
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

    /// Children, in insertion order, regardless of visibility.
    #[must_use]
    pub fn children(&self) -> &[EntityId] {
        &self.children
    }

    /// Scalar property.
    #[must_use]
    pub fn property(&self, key: PropertyKey) -> Option<&AsyncProperty<PropertyValue>> {
        self.properties.get(&key)
    }

    /// List property.
    #[must_use]
    pub fn list(&self, key: PropertyKey) -> Option<&AsyncListProperty<PropertyValue>> {
        self.lists.get(&key)
    }

    /// Returns true unless the `ACTIVE` property is false for `user`.
    #[must_use]
    pub fn is_active_for(&self, user: UserId) -> bool {
        self.properties
            .get(&keys::ACTIVE)
            .and_then(|active| active.get_value_for(user).as_bool())
            .unwrap_or(true)
    }

    /// Full state as seen by `user`, or the default state.
    #[must_use]
    pub fn descriptor(&self, user: Option<UserId>) -> EntityDescriptor {
        let properties = self
            .properties
            .iter()
            .map(|(key, property)| {
                let value = match user {
                    Some(user) => property.get_value_for(user),
                    None => property.get_value(),
                };
                (*key, value.clone())
            })
            .collect();
        let lists = self
            .lists
            .iter()
            .map(|(key, list)| match user {
                Some(user) => ListDescriptor {
                    key: *key,
                    version: list.version_for(user),
                    items: list.get_value_for(user).to_vec(),
                },
                None => ListDescriptor {
                    key: *key,
                    version: list.version(),
                    items: list.get_value().to_vec(),
                },
            })
            .collect();
        EntityDescriptor {
            id: self.id,
            parent: self.parent,
            properties,
            lists,
        }
    }

    fn list_mut(&mut self, key: PropertyKey) -> &mut AsyncListProperty<PropertyValue> {
        let id = self.id;
        self.lists
            .entry(key)
            .or_insert_with(|| AsyncListProperty::new(id, key, Vec::new()))
    }
}

/// Authoritative store of every entity of an environment.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    ids: IdAllocator,
    entities: HashMap<EntityId, Entity>,
    roots: Vec<EntityId>,
    outbox: Vec<Operation>,
}

impl EntityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if no entity is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Registers an entity and records its `LoadEntity`.
    ///
    /// A draft whose parent is gone is registered as a scene root.
    pub fn register(&mut self, draft: EntityDraft) -> EntityId {
        let id = self.ids.allocate(draft.category);

        let parent = match draft.parent {
            Some(parent) if self.entities.contains_key(&parent) => Some(parent),
            Some(parent) => {
                tracing::warn!(%id, %parent, "parent vanished before registration, attaching to scene root");
                None
            }
            None => None,
        };

        let properties = draft
            .properties
            .into_iter()
            .map(|(key, value, equality)| {
                let property = AsyncProperty::new(id, key, value);
                let property = match equality {
                    Some(equality) => property.with_equality(equality),
                    None => property,
                };
                (key, property)
            })
            .collect();
        let lists = draft
            .lists
            .into_iter()
            .map(|(key, items)| (key, AsyncListProperty::new(id, key, items)))
            .collect();

        let entity = Entity {
            id,
            parent,
            children: Vec::new(),
            properties,
            lists,
        };
        let descriptor = entity.descriptor(None);
        self.entities.insert(id, entity);
        self.siblings_mut(parent).push(id);

        self.outbox.push(Operation::LoadEntity {
            entity: id,
            descriptor: Some(descriptor),
            users: UserSet::All,
        });
        tracing::debug!(%id, "entity registered");
        id
    }

    /// Looks up an entity.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Returns true if the entity is registered.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Removes an entity and its whole subtree, recording one `DeleteEntity`.
    ///
    /// Removing an absent entity is a no-op.
    pub fn remove(&mut self, id: EntityId) -> MutationOutcome {
        let Some(entity) = self.entities.remove(&id) else {
            return MutationOutcome::Missing;
        };
        self.siblings_mut(entity.parent).retain(|sibling| *sibling != id);

        let mut stack = entity.children;
        while let Some(child) = stack.pop() {
            if let Some(removed) = self.entities.remove(&child) {
                stack.extend(removed.children);
            }
        }

        self.outbox.push(Operation::DeleteEntity {
            entity: id,
            users: UserSet::All,
        });
        tracing::debug!(%id, "entity removed");
        MutationOutcome::Recorded
    }

    /// Children of `parent` (or the scene roots) active for `user`.
    #[must_use]
    pub fn children(&self, parent: Option<EntityId>, user: UserId) -> Vec<EntityId> {
        let candidates = match parent {
            None => self.roots.as_slice(),
            Some(parent) => match self.entities.get(&parent) {
                Some(entity) => entity.children.as_slice(),
                None => return Vec::new(),
            },
        };
        candidates
            .iter()
            .copied()
            .filter(|id| self.entities.get(id).is_some_and(|e| e.is_active_for(user)))
            .collect()
    }

    /// Full state of an entity as seen by `user`; `None` if missing or
    /// inactive for that user.
    #[must_use]
    pub fn descriptor(&self, id: EntityId, user: UserId) -> Option<EntityDescriptor> {
        self.entities
            .get(&id)
            .filter(|entity| entity.is_active_for(user))
            .map(|entity| entity.descriptor(Some(user)))
    }

    /// Sets a property default. List values replace the whole list.
    pub fn set_property(
        &mut self,
        id: EntityId,
        key: PropertyKey,
        value: impl Into<PropertyValue>,
    ) -> MutationOutcome {
        match value.into() {
            PropertyValue::List(items) => self.set_list(id, key, items),
            value => self.mutate(id, |entity| match entity.properties.get_mut(&key) {
                Some(property) => property.set_value(value),
                None => {
                    let property = AsyncProperty::new(entity.id, key, value);
                    let operation = property.snapshot_operation();
                    entity.properties.insert(key, property);
                    Some(operation)
                }
            }),
        }
    }

    /// Sets the value `user` sees. The property must already exist.
    pub fn set_property_for(
        &mut self,
        id: EntityId,
        user: UserId,
        key: PropertyKey,
        value: impl Into<PropertyValue>,
    ) -> MutationOutcome {
        match value.into() {
            PropertyValue::List(items) => self.set_list_for(id, user, key, items),
            value => self.mutate(id, |entity| match entity.properties.get_mut(&key) {
                Some(property) => property.set_value_for(user, value),
                None => {
                    tracing::debug!(id = %entity.id, key, "override of undeclared property ignored");
                    None
                }
            }),
        }
    }

    /// Drops the override `user` holds on a property or list.
    pub fn reset_property_for(&mut self, id: EntityId, user: UserId, key: PropertyKey) -> MutationOutcome {
        self.mutate(id, |entity| {
            if let Some(property) = entity.properties.get_mut(&key) {
                property.reset_value_for(user)
            } else {
                entity.lists.get_mut(&key)?.reset_value_for(user)
            }
        })
    }

    /// Appends to a list, creating the list if needed.
    pub fn push_item(
        &mut self,
        id: EntityId,
        key: PropertyKey,
        item: impl Into<PropertyValue>,
    ) -> MutationOutcome {
        let item = item.into();
        self.mutate(id, |entity| Some(entity.list_mut(key).push(item)))
    }

    /// Inserts into a list.
    pub fn insert_item(
        &mut self,
        id: EntityId,
        key: PropertyKey,
        index: usize,
        item: impl Into<PropertyValue>,
    ) -> MutationOutcome {
        let item = item.into();
        self.mutate(id, |entity| entity.list_mut(key).insert(index, item))
    }

    /// Removes the first item equal to `item`.
    pub fn remove_item(&mut self, id: EntityId, key: PropertyKey, item: &PropertyValue) -> MutationOutcome {
        self.mutate(id, |entity| entity.lists.get_mut(&key)?.remove(item))
    }

    /// Removes the item at `index`.
    pub fn remove_item_at(&mut self, id: EntityId, key: PropertyKey, index: usize) -> MutationOutcome {
        self.mutate(id, |entity| entity.lists.get_mut(&key)?.remove_at(index))
    }

    /// Replaces the item at `index`.
    pub fn set_item(
        &mut self,
        id: EntityId,
        key: PropertyKey,
        index: usize,
        item: impl Into<PropertyValue>,
    ) -> MutationOutcome {
        let item = item.into();
        self.mutate(id, |entity| entity.lists.get_mut(&key)?.set_item(index, item))
    }

    /// Replaces a whole list.
    pub fn set_list(&mut self, id: EntityId, key: PropertyKey, items: Vec<PropertyValue>) -> MutationOutcome {
        self.mutate(id, |entity| {
            let created = !entity.lists.contains_key(&key);
            let list = entity.list_mut(key);
            list.set_value(items)
                .or_else(|| created.then(|| list.snapshot_operation()))
        })
    }

    /// Replaces the whole list `user` sees.
    pub fn set_list_for(
        &mut self,
        id: EntityId,
        user: UserId,
        key: PropertyKey,
        items: Vec<PropertyValue>,
    ) -> MutationOutcome {
        self.mutate(id, |entity| entity.list_mut(key).set_value_for(user, items))
    }

    /// Drops every override held by `user`, silently.
    pub fn forget_user(&mut self, user: UserId) {
        for entity in self.entities.values_mut() {
            entity.properties.values_mut().for_each(|p| p.forget_user(user));
            entity.lists.values_mut().for_each(|l| l.forget_user(user));
        }
    }

    /// Operations recorded since the last drain, in mutation order.
    #[must_use]
    pub fn pending_operations(&self) -> &[Operation] {
        &self.outbox
    }

    /// Takes the recorded operations.
    pub fn drain_operations(&mut self) -> Vec<Operation> {
        std::mem::take(&mut self.outbox)
    }

    /// Every entity in parent-before-child order.
    pub fn iter_tree(&self) -> impl Iterator<Item = &Entity> + '_ {
        let mut stack: Vec<EntityId> = self.roots.iter().rev().copied().collect();
        std::iter::from_fn(move || loop {
            let id = stack.pop()?;
            if let Some(entity) = self.entities.get(&id) {
                stack.extend(entity.children.iter().rev());
                return Some(entity);
            }
        })
    }

    fn mutate(&mut self, id: EntityId, edit: impl FnOnce(&mut Entity) -> Option<Operation>) -> MutationOutcome {
        let Some(entity) = self.entities.get_mut(&id) else {
            tracing::trace!(%id, "mutation of missing entity ignored");
            return MutationOutcome::Missing;
        };
        match edit(entity) {
            Some(operation) => {
                self.outbox.push(operation);
                MutationOutcome::Recorded
            }
            None => MutationOutcome::Unchanged,
        }
    }

    fn siblings_mut(&mut self, parent: Option<EntityId>) -> &mut Vec<EntityId> {
        match parent.and_then(|parent| self.entities.get_mut(&parent)) {
            Some(entity) => &mut entity.children,
            None => &mut self.roots,
        }
    }
}
