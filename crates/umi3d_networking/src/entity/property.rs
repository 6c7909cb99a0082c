//! # Async Properties
//!
//! A property holds a default value and an optional override per user.
//! Every mutation goes through a setter that compares old and new values and
//! returns the operation to broadcast, or `None` when nothing observable
//! changed.
//!
//! ```text
//! set_value(v)          -> SetEntityProperty to everyone without an override
//! set_value_for(u, v)   -> SetEntityProperty to u only
//! reset_value_for(u)    -> SetEntityProperty(default) to u, if it differs
//! ```

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use umi3d_shared::PropertyKey;

use crate::entity::EntityId;
use crate::protocol::{Operation, PropertyValue, UserSet};
use crate::server::UserId;

/// Value comparison used for dirty checking.
pub type Equality<T> = fn(&T, &T) -> bool;

/// Audience of a default-value change: everyone who does not hold an
/// override.
pub(crate) fn default_audience<V>(overrides: &BTreeMap<UserId, V>) -> UserSet {
    if overrides.is_empty() {
        UserSet::All
    } else {
        UserSet::AllExcept(overrides.keys().copied().collect::<BTreeSet<_>>())
    }
}

/// Observable, per-user overridable property value.
#[derive(Clone, Debug)]
pub struct AsyncProperty<T> {
    entity: EntityId,
    key: PropertyKey,
    value: T,
    overrides: BTreeMap<UserId, T>,
    equality: Equality<T>,
}

impl<T> AsyncProperty<T>
where
    T: Clone + PartialEq + Into<PropertyValue>,
{
    /// Creates a property with exact equality.
    pub fn new(entity: EntityId, key: PropertyKey, value: T) -> Self {
        Self {
            entity,
            key,
            value,
            overrides: BTreeMap::new(),
            equality: <T as PartialEq>::eq,
        }
    }

    /// Replaces the dirty check, e.g. with an approximate float comparison.
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

    /// Default value.
    #[must_use]
    pub const fn get_value(&self) -> &T {
        &self.value
    }

    /// Value seen by `user`.
    #[must_use]
    pub fn get_value_for(&self, user: UserId) -> &T {
        self.overrides.get(&user).unwrap_or(&self.value)
    }

    /// Returns true if `user` holds an override.
    #[must_use]
    pub fn has_override(&self, user: UserId) -> bool {
        self.overrides.contains_key(&user)
    }

    /// Users holding an override.
    pub fn overriding_users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.overrides.keys().copied()
    }

    /// Sets the default value.
    #[must_use = "the returned operation must be broadcast"]
    pub fn set_value(&mut self, value: T) -> Option<Operation> {
        if (self.equality)(&self.value, &value) {
            return None;
        }
        self.value = value;
        Some(self.operation(self.value.clone(), default_audience(&self.overrides)))
    }

    /// Sets the value seen by `user`.
    ///
    /// The override is kept even when it equals the current default, so a
    /// later default change does not reach that user.
    #[must_use = "the returned operation must be broadcast"]
    pub fn set_value_for(&mut self, user: UserId, value: T) -> Option<Operation> {
        let changed = !(self.equality)(self.get_value_for(user), &value);
        self.overrides.insert(user, value.clone());
        changed.then(|| self.operation(value, UserSet::only(user)))
    }

    /// Drops the override of `user`, sending the default if it differs.
    #[must_use = "the returned operation must be broadcast"]
    pub fn reset_value_for(&mut self, user: UserId) -> Option<Operation> {
        let previous = self.overrides.remove(&user)?;
        if (self.equality)(&previous, &self.value) {
            return None;
        }
        Some(self.operation(self.value.clone(), UserSet::only(user)))
    }

    /// Drops the override of a disconnected user without notifying anyone.
    pub fn forget_user(&mut self, user: UserId) {
        self.overrides.remove(&user);
    }

    /// Re-derives the default as an operation, for resynchronization.
    #[must_use]
    pub fn snapshot_operation(&self) -> Operation {
        self.operation(self.value.clone(), default_audience(&self.overrides))
    }

    /// Re-derives the value seen by `user` as an operation.
    #[must_use]
    pub fn snapshot_operation_for(&self, user: UserId) -> Operation {
        self.operation(self.get_value_for(user).clone(), UserSet::only(user))
    }

    fn operation(&self, value: T, users: UserSet) -> Operation {
        Operation::SetEntityProperty {
            entity: self.entity,
            key: self.key,
            value: value.into(),
            users,
        }
    }
}

/// Equality that tolerates float noise below `1e-5` in every component.
#[must_use]
pub fn approx_equal(a: &PropertyValue, b: &PropertyValue) -> bool {
    const EPSILON: f32 = 1e-5;
    let close = |x: f32, y: f32| (x - y).abs() <= EPSILON;
    match (a, b) {
        (PropertyValue::Float(x), PropertyValue::Float(y)) => close(*x, *y),
        (PropertyValue::Vec3(x), PropertyValue::Vec3(y)) => {
            x.to_array().iter().zip(y.to_array()).all(|(x, y)| close(*x, y))
        }
        (PropertyValue::Quaternion(x), PropertyValue::Quaternion(y)) => {
            x.to_array().iter().zip(y.to_array()).all(|(x, y)| close(*x, y))
        }
        (PropertyValue::Color(x), PropertyValue::Color(y)) => {
            x.iter().zip(y).all(|(x, y)| close(*x, *y))
        }
        (PropertyValue::List(x), PropertyValue::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| approx_equal(x, y))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umi3d_shared::{keys, EntityCategory, Vec3};

    const ALICE: UserId = UserId(1);
    const BOB: UserId = UserId(2);

    fn name() -> AsyncProperty<String> {
        AsyncProperty::new(
            EntityId::new(EntityCategory::Object3D, 1),
            keys::NAME,
            "cube".to_string(),
        )
    }

    #[test]
    fn test_setting_current_value_is_free() {
        let mut property = name();
        assert!(property.set_value("cube".to_string()).is_none());
        assert!(property.set_value("sphere".to_string()).is_some());
        assert!(property.set_value("sphere".to_string()).is_none());
    }

    #[test]
    fn test_override_precedence() {
        let mut property = name();
        let op = property.set_value_for(ALICE, "alice's cube".to_string()).unwrap();
        assert_eq!(op.users(), &UserSet::only(ALICE));

        assert_eq!(property.get_value_for(ALICE), "alice's cube");
        assert_eq!(property.get_value_for(BOB), "cube");
        assert_eq!(property.get_value(), "cube");
    }

    #[test]
    fn test_default_change_skips_overriding_users() {
        let mut property = name();
        let _ = property.set_value_for(ALICE, "pinned".to_string());
        let op = property.set_value("renamed".to_string()).unwrap();
        assert!(!op.users().contains(ALICE));
        assert!(op.users().contains(BOB));
        assert_eq!(property.get_value_for(ALICE), "pinned");
    }

    #[test]
    fn test_override_equal_to_default_still_pins() {
        let mut property = name();
        assert!(property.set_value_for(ALICE, "cube".to_string()).is_none());
        assert!(property.has_override(ALICE));
        let _ = property.set_value("renamed".to_string());
        assert_eq!(property.get_value_for(ALICE), "cube");
    }

    #[test]
    fn test_reset_sends_default_only_when_it_differs() {
        let mut property = name();
        let _ = property.set_value_for(ALICE, "pinned".to_string());
        let op = property.reset_value_for(ALICE).unwrap();
        assert_eq!(
            op,
            Operation::SetEntityProperty {
                entity: property.entity(),
                key: keys::NAME,
                value: "cube".into(),
                users: UserSet::only(ALICE),
            }
        );
        assert!(property.reset_value_for(ALICE).is_none());

        let _ = property.set_value_for(BOB, "cube".to_string());
        assert!(property.reset_value_for(BOB).is_none());
        assert!(!property.has_override(BOB));
    }

    #[test]
    fn test_forget_user_is_silent() {
        let mut property = name();
        let _ = property.set_value_for(ALICE, "pinned".to_string());
        property.forget_user(ALICE);
        assert_eq!(property.get_value_for(ALICE), "cube");
        assert_eq!(property.snapshot_operation().users(), &UserSet::All);
    }

    #[test]
    fn test_approximate_equality() {
        let position = AsyncProperty::new(
            EntityId::new(EntityCategory::Node, 1),
            keys::POSITION,
            PropertyValue::Vec3(Vec3::new(1.0, 2.0, 3.0)),
        );
        let mut position = position.with_equality(approx_equal);
        assert!(position
            .set_value(PropertyValue::Vec3(Vec3::new(1.0, 2.0, 3.000_001)))
            .is_none());
        assert!(position
            .set_value(PropertyValue::Vec3(Vec3::new(1.0, 2.0, 3.5)))
            .is_some());
    }
}
