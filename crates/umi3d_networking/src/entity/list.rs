//! List-valued async properties.
//!
//! Each audience (the default list and every per-user override) carries its
//! own version counter. Every edit bumps the counter of the audience it
//! touches and stamps the post-edit version on the emitted operation, so a
//! receiver can tell a replay (version already seen) from a gap.

use std::collections::BTreeMap;

use umi3d_shared::PropertyKey;

use super::property::{default_audience, Equality};
use crate::entity::EntityId;
use crate::protocol::{Operation, PropertyValue, UserSet};
use crate::server::UserId;

#[derive(Clone, Debug, PartialEq)]
struct ListState<T> {
    items: Vec<T>,
    version: u32,
}

/// Observable, per-user overridable list property.
#[derive(Clone, Debug)]
pub struct AsyncListProperty<T> {
    entity: EntityId,
    key: PropertyKey,
    default: ListState<T>,
    overrides: BTreeMap<UserId, ListState<T>>,
    equality: Equality<T>,
}

impl<T> AsyncListProperty<T>
where
    T: Clone + PartialEq + Into<PropertyValue>,
{
    /// Creates a list at version 0.
    pub fn new(entity: EntityId, key: PropertyKey, items: Vec<T>) -> Self {
        Self {
            entity,
            key,
            default: ListState { items, version: 0 },
            overrides: BTreeMap::new(),
            equality: <T as PartialEq>::eq,
        }
    }

    /// Replaces the item comparison used for dirty checking.
    #[must_use]
    pub fn with_equality(mut self, equality: Equality<T>) -> Self {
        self.equality = equality;
        self
    }

    /// Owning entity.
    #[must_use]
    pub const fn entity(&self) -> EntityId {
        self.entity
    }

    /// Property key.
    #[must_use]
    pub const fn key(&self) -> PropertyKey {
        self.key
    }

    /// Default items.
    #[must_use]
    pub fn get_value(&self) -> &[T] {
        &self.default.items
    }

    /// Items seen by `user`.
    #[must_use]
    pub fn get_value_for(&self, user: UserId) -> &[T] {
        &self.state(Some(user)).items
    }

    /// Version of the default list.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.default.version
    }

    /// Version of the list seen by `user`.
    #[must_use]
    pub fn version_for(&self, user: UserId) -> u32 {
        self.state(Some(user)).version
    }

    /// Returns true if `user` holds an override.
    #[must_use]
    pub fn has_override(&self, user: UserId) -> bool {
        self.overrides.contains_key(&user)
    }

    /// Appends to the default list.
    pub fn push(&mut self, item: T) -> Operation {
        let index = self.default.items.len();
        self.insert_unchecked(None, index, item)
    }

    /// Appends to the list seen by `user`.
    pub fn push_for(&mut self, user: UserId, item: T) -> Operation {
        let index = self.state(Some(user)).items.len();
        self.insert_unchecked(Some(user), index, item)
    }

    /// Inserts into the default list; `None` if `index` is past the end.
    #[must_use = "the returned operation must be broadcast"]
    pub fn insert(&mut self, index: usize, item: T) -> Option<Operation> {
        self.insert_in(None, index, item)
    }

    /// Inserts into the list seen by `user`.
    #[must_use = "the returned operation must be broadcast"]
    pub fn insert_for(&mut self, user: UserId, index: usize, item: T) -> Option<Operation> {
        self.insert_in(Some(user), index, item)
    }

    /// Removes the first item equal to `item` from the default list.
    #[must_use = "the returned operation must be broadcast"]
    pub fn remove(&mut self, item: &T) -> Option<Operation> {
        let index = self.position(None, item)?;
        self.remove_in(None, index)
    }

    /// Removes the first item equal to `item` from the list seen by `user`.
    #[must_use = "the returned operation must be broadcast"]
    pub fn remove_for(&mut self, user: UserId, item: &T) -> Option<Operation> {
        let index = self.position(Some(user), item)?;
        self.remove_in(Some(user), index)
    }

    /// Removes the item at `index` from the default list.
    #[must_use = "the returned operation must be broadcast"]
    pub fn remove_at(&mut self, index: usize) -> Option<Operation> {
        self.remove_in(None, index)
    }

    /// Removes the item at `index` from the list seen by `user`.
    #[must_use = "the returned operation must be broadcast"]
    pub fn remove_at_for(&mut self, user: UserId, index: usize) -> Option<Operation> {
        self.remove_in(Some(user), index)
    }

    /// Replaces one item of the default list.
    #[must_use = "the returned operation must be broadcast"]
    pub fn set_item(&mut self, index: usize, item: T) -> Option<Operation> {
        self.set_item_in(None, index, item)
    }

    /// Replaces one item of the list seen by `user`.
    #[must_use = "the returned operation must be broadcast"]
    pub fn set_item_for(&mut self, user: UserId, index: usize, item: T) -> Option<Operation> {
        self.set_item_in(Some(user), index, item)
    }

    /// Replaces the whole default list.
    #[must_use = "the returned operation must be broadcast"]
    pub fn set_value(&mut self, items: Vec<T>) -> Option<Operation> {
        self.set_value_in(None, items)
    }

    /// Replaces the whole list seen by `user`.
    #[must_use = "the returned operation must be broadcast"]
    pub fn set_value_for(&mut self, user: UserId, items: Vec<T>) -> Option<Operation> {
        self.set_value_in(Some(user), items)
    }

    /// Drops the override of `user`, sending the default list if it
    /// differs.
    #[must_use = "the returned operation must be broadcast"]
    pub fn reset_value_for(&mut self, user: UserId) -> Option<Operation> {
        let previous = self.overrides.remove(&user)?;
        if self.same_items(&previous.items, &self.default.items) {
            return None;
        }
        Some(self.full_list(None, UserSet::only(user)))
    }

    /// Drops the override of a disconnected user without notifying anyone.
    pub fn forget_user(&mut self, user: UserId) {
        self.overrides.remove(&user);
    }

    /// Re-derives the default list as one operation.
    #[must_use]
    pub fn snapshot_operation(&self) -> Operation {
        self.full_list(None, default_audience(&self.overrides))
    }

    /// Re-derives the list seen by `user` as one operation.
    #[must_use]
    pub fn snapshot_operation_for(&self, user: UserId) -> Operation {
        self.full_list(Some(user), UserSet::only(user))
    }

    fn state(&self, user: Option<UserId>) -> &ListState<T> {
        user.and_then(|user| self.overrides.get(&user))
            .unwrap_or(&self.default)
    }

    /// Mutable state of an audience. An override starts as a copy of the
    /// default list, version included, since that is what the user holds.
    fn state_mut(&mut self, user: Option<UserId>) -> &mut ListState<T> {
        match user {
            None => &mut self.default,
            Some(user) => {
                let default = &self.default;
                self.overrides.entry(user).or_insert_with(|| default.clone())
            }
        }
    }

    fn audience(&self, user: Option<UserId>) -> UserSet {
        user.map_or_else(|| default_audience(&self.overrides), UserSet::only)
    }

    fn position(&self, user: Option<UserId>, item: &T) -> Option<usize> {
        self.state(user)
            .items
            .iter()
            .position(|candidate| (self.equality)(candidate, item))
    }

    fn same_items(&self, a: &[T], b: &[T]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(a, b)| (self.equality)(a, b))
    }

    fn insert_in(&mut self, user: Option<UserId>, index: usize, item: T) -> Option<Operation> {
        (index <= self.state(user).items.len()).then(|| self.insert_unchecked(user, index, item))
    }

    fn insert_unchecked(&mut self, user: Option<UserId>, index: usize, item: T) -> Operation {
        let (entity, key) = (self.entity, self.key);
        let users = self.audience(user);
        let state = self.state_mut(user);
        state.items.insert(index, item.clone());
        state.version += 1;
        Operation::AddEntityListItem {
            entity,
            key,
            index: wire_index(index),
            value: item.into(),
            version: state.version,
            users,
        }
    }

    fn remove_in(&mut self, user: Option<UserId>, index: usize) -> Option<Operation> {
        if index >= self.state(user).items.len() {
            return None;
        }
        let (entity, key) = (self.entity, self.key);
        let users = self.audience(user);
        let state = self.state_mut(user);
        state.items.remove(index);
        state.version += 1;
        Some(Operation::RemoveEntityListItem {
            entity,
            key,
            index: wire_index(index),
            version: state.version,
            users,
        })
    }

    fn set_item_in(&mut self, user: Option<UserId>, index: usize, item: T) -> Option<Operation> {
        let current = self.state(user).items.get(index)?;
        if (self.equality)(current, &item) {
            return None;
        }
        let (entity, key) = (self.entity, self.key);
        let users = self.audience(user);
        let state = self.state_mut(user);
        state.items[index] = item.clone();
        state.version += 1;
        Some(Operation::SetEntityListItem {
            entity,
            key,
            index: wire_index(index),
            value: item.into(),
            version: state.version,
            users,
        })
    }

    fn set_value_in(&mut self, user: Option<UserId>, items: Vec<T>) -> Option<Operation> {
        if self.same_items(&self.state(user).items, &items) {
            // A user setting the value they already see still pins it.
            self.state_mut(user);
            return None;
        }
        let users = self.audience(user);
        let state = self.state_mut(user);
        state.items = items;
        state.version += 1;
        Some(self.full_list(user, users))
    }

    fn full_list(&self, user: Option<UserId>, users: UserSet) -> Operation {
        let items = self.state(user).items.iter().cloned().map(Into::into).collect();
        Operation::SetEntityProperty {
            entity: self.entity,
            key: self.key,
            value: PropertyValue::List(items),
            users,
        }
    }
}

fn wire_index(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use umi3d_shared::{keys, EntityCategory};

    const ALICE: UserId = UserId(1);

    fn materials() -> AsyncListProperty<i32> {
        AsyncListProperty::new(
            EntityId::new(EntityCategory::Object3D, 1),
            keys::MATERIALS,
            vec![10, 20],
        )
    }

    #[test]
    fn test_each_edit_has_its_own_kind_and_bumps_the_version() {
        let mut list = materials();

        let op = list.push(30);
        assert!(matches!(op, Operation::AddEntityListItem { index: 2, version: 1, .. }));

        let op = list.set_item(0, 11).unwrap();
        assert!(matches!(op, Operation::SetEntityListItem { index: 0, version: 2, .. }));

        let op = list.remove(&20).unwrap();
        assert!(matches!(op, Operation::RemoveEntityListItem { index: 1, version: 3, .. }));

        assert_eq!(list.get_value(), &[11, 30]);
        assert_eq!(list.version(), 3);
    }

    #[test]
    fn test_no_ops_cost_nothing() {
        let mut list = materials();
        assert!(list.set_item(0, 10).is_none());
        assert!(list.set_item(9, 1).is_none());
        assert!(list.remove_at(2).is_none());
        assert!(list.insert(3, 1).is_none());
        assert!(list.remove(&99).is_none());
        assert!(list.set_value(vec![10, 20]).is_none());
        assert_eq!(list.version(), 0);
    }

    #[test]
    fn test_override_copies_default_then_diverges() {
        let mut list = materials();
        let op = list.push_for(ALICE, 99);
        assert!(matches!(op, Operation::AddEntityListItem { version: 1, .. }));
        assert_eq!(op.users(), &UserSet::only(ALICE));

        assert_eq!(list.get_value_for(ALICE), &[10, 20, 99]);
        assert_eq!(list.get_value(), &[10, 20]);

        let op = list.push(30);
        assert!(!op.users().contains(ALICE));
        assert_eq!(list.version_for(ALICE), 1);
        assert_eq!(list.version(), 1);
    }

    #[test]
    fn test_rejected_user_edit_creates_no_override() {
        let mut list = materials();
        assert!(list.remove_at_for(ALICE, 5).is_none());
        assert!(!list.has_override(ALICE));
    }

    #[test]
    fn test_reset_sends_full_default() {
        let mut list = materials();
        let _ = list.set_value_for(ALICE, vec![1]);
        let op = list.reset_value_for(ALICE).unwrap();
        assert_eq!(
            op,
            Operation::SetEntityProperty {
                entity: list.entity(),
                key: keys::MATERIALS,
                value: PropertyValue::List(vec![PropertyValue::Int(10), PropertyValue::Int(20)]),
                users: UserSet::only(ALICE),
            }
        );
        assert_eq!(list.get_value_for(ALICE), &[10, 20]);
    }
}
