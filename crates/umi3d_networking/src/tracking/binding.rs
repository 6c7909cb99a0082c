//! Rigid attachment of external objects to avatar bones.
//!
//! A binding names a target the host application owns. Targets may not exist
//! yet when the binding arrives (a model still loading), so every fixed
//! update re-checks the ones still waiting. Waiting bindings back off
//! exponentially in fixed updates and are dropped with
//! [`TrackingError::BindingUnresolved`] once the attempt budget runs out.

use umi3d_shared::{BoneType, Transform};

use crate::config::BindingConfig;
use crate::error::TrackingError;
use crate::server::UserId;

/// Objects a binding can move.
pub trait BindingTargets {
    /// Whether the target currently exists.
    fn exists(&self, target: u64) -> bool;

    /// Writes the world transform of a target.
    fn set_transform(&mut self, target: u64, transform: Transform);
}

/// One attachment request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Binding {
    /// Avatar owner
    pub user: UserId,
    /// Bone followed
    pub bone: BoneType,
    /// Host object moved
    pub target: u64,
    /// Offset from the bone, in bone space
    pub offset: Transform,
}

#[derive(Clone, Copy, Debug)]
struct Pending {
    binding: Binding,
    attempts: u32,
    next_attempt: u64,
    resolved: bool,
}

/// Keeps bound targets glued to their bones.
#[derive(Debug)]
pub struct BindingResolver {
    config: BindingConfig,
    bindings: Vec<Pending>,
    updates: u64,
}

impl BindingResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub const fn new(config: BindingConfig) -> Self {
        Self {
            config,
            bindings: Vec::new(),
            updates: 0,
        }
    }

    /// Adds a binding, replacing any previous binding of the same target.
    pub fn add(&mut self, binding: Binding) {
        self.remove_target(binding.target);
        self.bindings.push(Pending {
            binding,
            attempts: 0,
            next_attempt: self.updates,
            resolved: false,
        });
    }

    /// Drops the binding of a target.
    pub fn remove_target(&mut self, target: u64) {
        self.bindings.retain(|pending| pending.binding.target != target);
    }

    /// Drops every binding following a departed user.
    pub fn forget_user(&mut self, user: UserId) {
        self.bindings.retain(|pending| pending.binding.user != user);
    }

    /// Number of live bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns true when nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Whether the binding of a target currently drives it.
    #[must_use]
    pub fn is_resolved(&self, target: u64) -> bool {
        self.bindings
            .iter()
            .any(|pending| pending.binding.target == target && pending.resolved)
    }

    /// Runs one fixed update.
    ///
    /// `bone_world` answers the current world transform of a bone. Returns
    /// the bindings dropped during this update.
    pub fn fixed_update<F>(&mut self, targets: &mut dyn BindingTargets, mut bone_world: F) -> Vec<TrackingError>
    where
        F: FnMut(UserId, BoneType) -> Option<Transform>,
    {
        let now = self.updates;
        self.updates += 1;
        let config = self.config;
        let mut dropped = Vec::new();

        self.bindings.retain_mut(|pending| {
            if !pending.resolved && pending.next_attempt > now {
                return true;
            }
            let binding = pending.binding;
            let bone = if targets.exists(binding.target) {
                bone_world(binding.user, binding.bone)
            } else {
                None
            };

            if let Some(bone) = bone {
                if !pending.resolved {
                    tracing::debug!(
                        user = %binding.user,
                        bone = %binding.bone,
                        target = binding.target,
                        attempts = pending.attempts,
                        "binding resolved"
                    );
                }
                targets.set_transform(binding.target, bone.compose(&binding.offset));
                pending.resolved = true;
                pending.attempts = 0;
                return true;
            }

            pending.resolved = false;
            pending.attempts += 1;
            if pending.attempts >= config.max_attempts {
                tracing::warn!(
                    user = %binding.user,
                    bone = %binding.bone,
                    target = binding.target,
                    attempts = pending.attempts,
                    "binding unresolved, dropped"
                );
                dropped.push(TrackingError::BindingUnresolved {
                    user: binding.user,
                    bone: binding.bone,
                    target: binding.target,
                    attempts: pending.attempts,
                });
                return false;
            }
            let backoff = 1_u64
                .checked_shl(pending.attempts)
                .unwrap_or(u64::MAX)
                .min(u64::from(config.max_backoff_updates.max(1)));
            pending.next_attempt = now + backoff;
            true
        });

        dropped
    }
}
