//! # Tracking Dispatcher
//!
//! ## Send Path
//!
//! ```text
//!   tick ──> sampling cooldown elapsed? ──> walk skeleton ──> last frame
//!        └─> send throttle open?        ──> transmit last frame
//! ```
//!
//! Sampling and transmission run at independent rates. The throttle is time
//! based when `send_interval_ms` is set, count based when
//! `send_every_n_ticks` is set, and open every tick otherwise.
//!
//! ## Receive Path
//!
//! ```text
//!   frame ──> validate bones ──> KalmanChannel (lazy) per node and kind
//!                                   │
//!   render tick ──> extrapolate ────┴──> AvatarRenderer
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use umi3d_shared::{BoneType, Quaternion, Transform, Vec3};

use super::channel::{ChannelKind, KalmanChannel};
use crate::config::{KalmanNoise, TrackingConfig};
use crate::error::TrackingError;
use crate::protocol::{BoneSample, TrackingFrameMessage};
use crate::server::UserId;

// =============================================================================
// SEND PATH
// =============================================================================

/// Local skeleton the send path samples.
pub trait SkeletonSource {
    /// Avatar root, in world space.
    fn root(&self) -> Transform;

    /// Appends every bone currently known, in local space.
    fn bones(&self, out: &mut Vec<BoneSample>);
}

/// Samples the local skeleton and throttles transmissions.
#[derive(Debug)]
pub struct TrackingSender {
    user: UserId,
    config: TrackingConfig,
    last_frame: Option<TrackingFrameMessage>,
    last_sample: Option<Instant>,
    last_send: Option<Instant>,
    ticks_since_send: u32,
    frames_sent: u64,
}

impl TrackingSender {
    /// Creates a sender for `user`.
    #[must_use]
    pub const fn new(user: UserId, config: TrackingConfig) -> Self {
        Self {
            user,
            config,
            last_frame: None,
            last_sample: None,
            last_send: None,
            ticks_since_send: 0,
            frames_sent: 0,
        }
    }

    /// Runs one tick; returns the frame to transmit, if any.
    pub fn tick(&mut self, now: Instant, source: &dyn SkeletonSource) -> Option<TrackingFrameMessage> {
        let sample_due = self
            .last_sample
            .map_or(true, |last| now.saturating_duration_since(last) >= self.config.sample_interval());
        if sample_due {
            self.last_frame = Some(self.sample(source));
            self.last_sample = Some(now);
        }

        self.ticks_since_send = self.ticks_since_send.saturating_add(1);
        let send_interval = self.config.send_interval();
        let send_due = if !send_interval.is_zero() {
            self.last_send
                .map_or(true, |last| now.saturating_duration_since(last) >= send_interval)
        } else if self.config.send_every_n_ticks > 0 {
            self.ticks_since_send >= self.config.send_every_n_ticks
        } else {
            true
        };
        if !send_due {
            return None;
        }

        let frame = self.last_frame.clone()?;
        self.last_send = Some(now);
        self.ticks_since_send = 0;
        self.frames_sent += 1;
        Some(frame)
    }

    fn sample(&self, source: &dyn SkeletonSource) -> TrackingFrameMessage {
        let root = source.root();
        let mut frame = TrackingFrameMessage {
            position: root.position,
            rotation: root.rotation,
            scale: root.scale,
            ..TrackingFrameMessage::new(self.user)
        };
        source.bones(&mut frame.bones);
        frame
    }

    /// Last sampled frame.
    #[must_use]
    pub const fn last_frame(&self) -> Option<&TrackingFrameMessage> {
        self.last_frame.as_ref()
    }

    /// Number of frames handed out for transmission.
    #[must_use]
    pub const fn frames_sent(&self) -> u64 {
        self.frames_sent
    }
}

// =============================================================================
// RECEIVE PATH
// =============================================================================

/// Node of an avatar that carries its own channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackedNode {
    /// Avatar root
    Root,
    /// One bone
    Bone(BoneType),
}

/// Key of one filtered channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    /// Owner
    pub user: UserId,
    /// Node
    pub node: TrackedNode,
    /// Quantity
    pub kind: ChannelKind,
}

/// Rendered state of one bone.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BonePose {
    /// Joint
    pub bone: BoneType,
    /// Local position
    pub position: Vec3,
    /// Local rotation
    pub rotation: Quaternion,
    /// Local scale, as last received
    pub scale: Vec3,
    /// Whether a device drives the bone
    pub tracked: bool,
}

/// Rendered state of one avatar.
#[derive(Clone, Debug, PartialEq)]
pub struct AvatarPose {
    /// Owner
    pub user: UserId,
    /// Root transform
    pub root: Transform,
    /// Bones, ordered by bone type
    pub bones: Vec<BonePose>,
}

impl AvatarPose {
    /// World transform of a bone.
    #[must_use]
    pub fn bone_world(&self, bone: BoneType) -> Option<Transform> {
        self.bones
            .iter()
            .find(|pose| pose.bone == bone)
            .map(|pose| self.root.compose(&Transform::new(pose.position, pose.rotation, pose.scale)))
    }
}

/// Display side of received avatars.
pub trait AvatarRenderer {
    /// Writes one avatar pose.
    fn apply_pose(&mut self, pose: &AvatarPose);
}

/// What happened to one received frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Bones routed to their channels
    pub accepted: usize,
    /// Bone type values that were rejected
    pub rejected: Vec<u32>,
}

#[derive(Clone, Copy, Debug)]
struct BoneExtras {
    scale: Vec3,
    tracked: bool,
}

#[derive(Clone, Debug)]
struct AvatarState {
    scale: Vec3,
    bones: BTreeMap<BoneType, BoneExtras>,
    frames: u64,
}

/// Filters received frames and feeds the renderer.
#[derive(Debug)]
pub struct TrackingReceiver {
    config: TrackingConfig,
    channels: HashMap<ChannelKey, KalmanChannel>,
    avatars: HashMap<UserId, AvatarState>,
}

impl TrackingReceiver {
    /// Creates a receiver with no avatar.
    #[must_use]
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            channels: HashMap::new(),
            avatars: HashMap::new(),
        }
    }

    /// Routes one frame to its channels.
    ///
    /// Unknown bones are skipped and listed in the report. A frame naming a
    /// bone twice is refused whole, before anything is applied.
    pub fn receive(&mut self, frame: &TrackingFrameMessage, now: Instant) -> Result<FrameReport, TrackingError> {
        let mut seen = HashSet::with_capacity(frame.bones.len());
        if let Some(duplicate) = frame.bones.iter().find(|sample| !seen.insert(sample.bone)) {
            tracing::warn!(user = %frame.user, bone = %duplicate.bone, "tracking frame names a bone twice, dropped");
            return Err(TrackingError::DuplicateBone(duplicate.bone));
        }

        let user = frame.user;
        let root_noise = self.config.root;
        self.channel_mut(user, TrackedNode::Root, ChannelKind::Position, root_noise)
            .observe_position(frame.position, now);
        self.channel_mut(user, TrackedNode::Root, ChannelKind::Rotation, root_noise)
            .observe_rotation(frame.rotation, now);

        let mut report = FrameReport::default();
        let mut extras = Vec::with_capacity(frame.bones.len());
        let bone_noise = self.config.bones;
        for sample in &frame.bones {
            if !sample.bone.is_known() {
                tracing::debug!(%user, bone = sample.bone.0, "unknown bone rejected");
                report.rejected.push(sample.bone.0);
                continue;
            }
            let node = TrackedNode::Bone(sample.bone);
            self.channel_mut(user, node, ChannelKind::Position, bone_noise)
                .observe_position(sample.position, now);
            self.channel_mut(user, node, ChannelKind::Rotation, bone_noise)
                .observe_rotation(sample.rotation, now);
            extras.push((
                sample.bone,
                BoneExtras {
                    scale: sample.scale,
                    tracked: sample.tracked,
                },
            ));
            report.accepted += 1;
        }

        let avatar = self.avatars.entry(user).or_insert_with(|| {
            tracing::info!(%user, "first tracking frame, avatar created");
            AvatarState {
                scale: Vec3::ONE,
                bones: BTreeMap::new(),
                frames: 0,
            }
        });
        avatar.scale = frame.scale;
        avatar.bones.extend(extras);
        avatar.frames += 1;

        Ok(report)
    }

    /// Channel of one (user, node, kind), if it was ever measured.
    #[must_use]
    pub fn channel(&self, user: UserId, node: TrackedNode, kind: ChannelKind) -> Option<&KalmanChannel> {
        self.channels.get(&ChannelKey { user, node, kind })
    }

    /// Number of live channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Users with an avatar.
    pub fn users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.avatars.keys().copied()
    }

    /// Display pose of one avatar at `now`.
    #[must_use]
    pub fn pose(&self, user: UserId, now: Instant) -> Option<AvatarPose> {
        let avatar = self.avatars.get(&user)?;
        let position = |node| self.channel(user, node, ChannelKind::Position).map(|c| c.sample_position(now));
        let rotation = |node| self.channel(user, node, ChannelKind::Rotation).map(|c| c.sample_rotation(now));

        let root = Transform::new(
            position(TrackedNode::Root).unwrap_or(Vec3::ZERO),
            rotation(TrackedNode::Root).unwrap_or(Quaternion::IDENTITY),
            avatar.scale,
        );
        let bones = avatar
            .bones
            .iter()
            .filter_map(|(bone, extras)| {
                let node = TrackedNode::Bone(*bone);
                Some(BonePose {
                    bone: *bone,
                    position: position(node)?,
                    rotation: rotation(node)?,
                    scale: extras.scale,
                    tracked: extras.tracked,
                })
            })
            .collect();
        Some(AvatarPose { user, root, bones })
    }

    /// World transform of one bone at `now`.
    #[must_use]
    pub fn bone_transform(&self, user: UserId, bone: BoneType, now: Instant) -> Option<Transform> {
        let avatar = self.avatars.get(&user)?;
        let extras = avatar.bones.get(&bone)?;
        let node = TrackedNode::Bone(bone);
        let local = Transform::new(
            self.channel(user, node, ChannelKind::Position)?.sample_position(now),
            self.channel(user, node, ChannelKind::Rotation)?.sample_rotation(now),
            extras.scale,
        );
        let root = Transform::new(
            self.channel(user, TrackedNode::Root, ChannelKind::Position)?.sample_position(now),
            self.channel(user, TrackedNode::Root, ChannelKind::Rotation)?.sample_rotation(now),
            avatar.scale,
        );
        Some(root.compose(&local))
    }

    /// Writes every avatar's display pose to the renderer.
    pub fn apply(&self, now: Instant, renderer: &mut dyn AvatarRenderer) {
        let mut users: Vec<_> = self.users().collect();
        users.sort_unstable();
        for user in users {
            if let Some(pose) = self.pose(user, now) {
                renderer.apply_pose(&pose);
            }
        }
    }

    /// Drops every channel of a departed user.
    pub fn forget_user(&mut self, user: UserId) {
        if self.avatars.remove(&user).is_some() {
            tracing::debug!(%user, "avatar dropped");
        }
        self.channels.retain(|key, _| key.user != user);
    }

    fn channel_mut(&mut self, user: UserId, node: TrackedNode, kind: ChannelKind, noise: KalmanNoise) -> &mut KalmanChannel {
        let config = &self.config;
        self.channels
            .entry(ChannelKey { user, node, kind })
            .or_insert_with(|| KalmanChannel::new(kind, noise, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const ALICE: UserId = UserId(1);

    struct StaticSkeleton;

    impl SkeletonSource for StaticSkeleton {
        fn root(&self) -> Transform {
            Transform::IDENTITY
        }

        fn bones(&self, out: &mut Vec<BoneSample>) {
            out.push(BoneSample::tracked(BoneType::HEAD, Vec3::Y, Quaternion::IDENTITY));
        }
    }

    #[derive(Default)]
    struct Recorder(Vec<AvatarPose>);

    impl AvatarRenderer for Recorder {
        fn apply_pose(&mut self, pose: &AvatarPose) {
            self.0.push(pose.clone());
        }
    }

    fn left_hand_frame(position: Vec3) -> TrackingFrameMessage {
        TrackingFrameMessage {
            bones: vec![BoneSample::tracked(BoneType::LEFT_HAND, position, Quaternion::IDENTITY)],
            ..TrackingFrameMessage::new(ALICE)
        }
    }

    #[test]
    fn test_time_throttle() {
        let config = TrackingConfig {
            send_interval_ms: 100,
            ..TrackingConfig::default()
        };
        let mut sender = TrackingSender::new(ALICE, config);
        let start = Instant::now();
        let sent: Vec<bool> = (0..10)
            .map(|tick| {
                sender
                    .tick(start + Duration::from_millis(tick * 30), &StaticSkeleton)
                    .is_some()
            })
            .collect();
        // 0, 120, 240 ms
        assert_eq!(sent.iter().filter(|s| **s).count(), 3);
        assert!(sent[0]);
        assert_eq!(sender.frames_sent(), 3);
        assert!(sender.last_frame().is_some_and(|f| f.bone(BoneType::HEAD).is_some()));
    }

    #[test]
    fn test_count_throttle() {
        let config = TrackingConfig {
            send_interval_ms: 0,
            send_every_n_ticks: 3,
            ..TrackingConfig::default()
        };
        let mut sender = TrackingSender::new(ALICE, config);
        let now = Instant::now();
        let sent: Vec<bool> = (0..9).map(|_| sender.tick(now, &StaticSkeleton).is_some()).collect();
        assert_eq!(sent, [false, false, true, false, false, true, false, false, true]);
    }

    #[test]
    fn test_sampling_cooldown_is_independent() {
        let config = TrackingConfig {
            sample_interval_ms: 1_000,
            send_interval_ms: 0,
            ..TrackingConfig::default()
        };
        let mut sender = TrackingSender::new(ALICE, config);
        let start = Instant::now();
        assert!(sender.tick(start, &StaticSkeleton).is_some());
        // still sends the last sample even though no new one was taken
        assert!(sender.tick(start + Duration::from_millis(10), &StaticSkeleton).is_some());
    }

    #[test]
    fn test_first_bone_sample_passes_through() {
        let mut receiver = TrackingReceiver::new(TrackingConfig::default());
        let report = receiver
            .receive(&left_hand_frame(Vec3::new(0.0, 1.0, 0.0)), Instant::now())
            .unwrap();
        assert_eq!(report.accepted, 1);

        let channel = receiver
            .channel(ALICE, TrackedNode::Bone(BoneType::LEFT_HAND), ChannelKind::Position)
            .unwrap();
        assert_eq!(channel.state(), [0.0, 1.0, 0.0]);
        // root position and rotation, left hand position and rotation
        assert_eq!(receiver.channel_count(), 4);
    }

    #[test]
    fn test_unknown_bone_is_rejected_alone() {
        let mut receiver = TrackingReceiver::new(TrackingConfig::default());
        let mut frame = left_hand_frame(Vec3::ZERO);
        frame.bones.push(BoneSample::tracked(BoneType(9_999), Vec3::ZERO, Quaternion::IDENTITY));

        let report = receiver.receive(&frame, Instant::now()).unwrap();
        assert_eq!(report, FrameReport { accepted: 1, rejected: vec![9_999] });
        assert!(receiver
            .channel(ALICE, TrackedNode::Bone(BoneType(9_999)), ChannelKind::Position)
            .is_none());
    }

    #[test]
    fn test_duplicate_bone_rejects_the_frame() {
        let mut receiver = TrackingReceiver::new(TrackingConfig::default());
        let mut frame = left_hand_frame(Vec3::ZERO);
        frame.bones.push(frame.bones[0]);

        let err = receiver.receive(&frame, Instant::now()).unwrap_err();
        assert_eq!(err, TrackingError::DuplicateBone(BoneType::LEFT_HAND));
        assert_eq!(receiver.channel_count(), 0);
        assert!(receiver.pose(ALICE, Instant::now()).is_none());
    }

    #[test]
    fn test_renderer_receives_poses_and_forget_drops_them() {
        let mut receiver = TrackingReceiver::new(TrackingConfig::default());
        let now = Instant::now();
        receiver.receive(&left_hand_frame(Vec3::new(0.0, 1.0, 0.0)), now).unwrap();

        let mut renderer = Recorder::default();
        receiver.apply(now, &mut renderer);
        assert_eq!(renderer.0.len(), 1);
        assert_eq!(renderer.0[0].bones[0].position, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(
            renderer.0[0].bone_world(BoneType::LEFT_HAND).map(|t| t.position),
            Some(Vec3::new(0.0, 1.0, 0.0))
        );

        receiver.forget_user(ALICE);
        assert_eq!(receiver.channel_count(), 0);
        assert_eq!(receiver.users().count(), 0);
    }
}
