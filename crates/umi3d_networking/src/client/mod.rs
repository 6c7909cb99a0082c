//! # Environment Client
//!
//! Browser side of an environment: a read-only mirror of the scene and the
//! tracking pipeline for every avatar.
//!
//! ## Tick Order
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  1. drain InboundDecoder                                    │
//! │  2. Transactions ──> EntityMirror                           │
//! │     TrackingFrames ──> TrackingReceiver                     │
//! │  3. TrackingSender samples the local skeleton               │
//! │  4. TrackingReceiver ──> AvatarRenderer                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::time::Instant;

use crate::background::InboundDecoder;
use crate::codec::from_bytes;
use crate::config::Umi3dConfig;
use crate::entity::{EntityId, EntityMirror, TransactionReport};
use crate::error::{CodecResult, NetworkError, TrackingError};
use crate::protocol::{DecoderTable, EntityDescriptor, Message, Transaction};
use crate::server::{EnterDescriptor, UserId};
use crate::tracking::{AvatarRenderer, Binding, BindingResolver, BindingTargets, SkeletonSource, TrackingReceiver, TrackingSender};

/// Client state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientState {
    /// Not logged in.
    #[default]
    Disconnected,
    /// Logged in, scene not loaded yet.
    Loading,
    /// Scene loaded.
    Connected,
}

/// Client counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Transactions applied
    pub transactions: u64,
    /// Peer tracking frames accepted
    pub frames: u64,
    /// Frames refused whole
    pub rejected_frames: u64,
    /// Payloads that did not decode
    pub malformed: u64,
}

/// What one client tick produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientTick {
    /// Encoded tracking frame to send, if the throttle opened
    pub outgoing: Option<Vec<u8>>,
    /// Entities changed this tick
    pub dirty: Vec<EntityId>,
    /// Entities whose list edits arrived out of sequence and need a reload
    pub reload: Vec<EntityId>,
}

/// Client side of an environment.
#[derive(Debug)]
pub struct EnvironmentClient {
    config: Umi3dConfig,
    state: ClientState,
    user: Option<UserId>,
    mirror: EntityMirror,
    receiver: TrackingReceiver,
    sender: Option<TrackingSender>,
    bindings: BindingResolver,
    decoder: InboundDecoder<()>,
    stats: ClientStats,
}

impl EnvironmentClient {
    /// Creates a disconnected client.
    #[must_use]
    pub fn new(config: Umi3dConfig) -> Self {
        Self {
            state: ClientState::Disconnected,
            user: None,
            mirror: EntityMirror::new(),
            receiver: TrackingReceiver::new(config.tracking),
            sender: None,
            bindings: BindingResolver::new(config.binding),
            decoder: InboundDecoder::spawn(DecoderTable::standard(), config.background),
            stats: ClientStats::default(),
            config,
        }
    }

    /// Takes the identity handed out by `/login`.
    pub fn enter(&mut self, descriptor: &EnterDescriptor) {
        self.user = Some(descriptor.user);
        self.sender = Some(TrackingSender::new(descriptor.user, self.config.tracking));
        self.state = ClientState::Loading;
        tracing::info!(user = %descriptor.user, delivery = ?descriptor.delivery, "entered environment");
    }

    /// Loads the body of a `/load` response.
    pub fn load_response(&mut self, body: &[u8]) -> CodecResult<usize> {
        let descriptors: Vec<EntityDescriptor> = from_bytes(body, "entity descriptors")?;
        let count = descriptors.len();
        for descriptor in descriptors {
            self.mirror.load(descriptor);
        }
        if self.state == ClientState::Loading {
            self.state = ClientState::Connected;
        }
        Ok(count)
    }

    /// Applies the body of an `/update` response.
    pub fn update_response(&mut self, body: &[u8]) -> CodecResult<TransactionReport> {
        let transactions: Vec<Transaction> = from_bytes(body, "transactions")?;
        let mut report = TransactionReport::default();
        for transaction in &transactions {
            report.merge(self.apply_transaction(transaction));
        }
        Ok(report)
    }

    /// Queues a socket payload for decoding.
    pub fn submit_payload(&self, bytes: Vec<u8>) -> Result<(), NetworkError> {
        self.decoder.submit((), bytes)
    }

    /// Applies one decoded message.
    pub fn apply_message(&mut self, message: &Message, now: Instant) {
        match message {
            Message::Transaction(transaction) => {
                self.apply_transaction(transaction);
            }
            Message::TrackingFrame(frame) if Some(frame.user) == self.user => {}
            Message::TrackingFrame(frame) => match self.receiver.receive(frame, now) {
                Ok(_) => self.stats.frames += 1,
                Err(_) => self.stats.rejected_frames += 1,
            },
            Message::Interaction(request) => {
                tracing::debug!(user = %request.user, "interaction echoed to a client, ignored");
            }
        }
    }

    fn apply_transaction(&mut self, transaction: &Transaction) -> TransactionReport {
        self.stats.transactions += 1;
        self.mirror.apply_transaction(transaction)
    }

    /// Runs one client tick.
    pub fn tick(
        &mut self,
        now: Instant,
        skeleton: Option<&dyn SkeletonSource>,
        renderer: &mut dyn AvatarRenderer,
    ) -> ClientTick {
        for decoded in self.decoder.drain() {
            match decoded.result {
                Ok(message) => self.apply_message(&message, now),
                Err(_) => self.stats.malformed += 1,
            }
        }

        let outgoing = match (self.sender.as_mut(), skeleton) {
            (Some(sender), Some(skeleton)) => sender
                .tick(now, skeleton)
                .map(|frame| Message::TrackingFrame(frame).to_bytes()),
            _ => None,
        };

        self.receiver.apply(now, renderer);

        ClientTick {
            outgoing,
            dirty: self.mirror.drain_dirty(),
            reload: self.mirror.take_desynced(),
        }
    }

    /// Moves bound objects to their bones.
    pub fn fixed_update(&mut self, targets: &mut dyn BindingTargets, now: Instant) -> Vec<TrackingError> {
        let receiver = &self.receiver;
        self.bindings
            .fixed_update(targets, |user, bone| receiver.bone_transform(user, bone, now))
    }

    /// Attaches an object to a bone.
    pub fn bind(&mut self, binding: Binding) {
        self.bindings.add(binding);
    }

    /// Drops everything known about a departed peer.
    pub fn forget_user(&mut self, user: UserId) {
        self.receiver.forget_user(user);
        self.bindings.forget_user(user);
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ClientState {
        self.state
    }

    /// Own user, once entered.
    #[must_use]
    pub const fn user(&self) -> Option<UserId> {
        self.user
    }

    /// Scene mirror.
    #[must_use]
    pub const fn mirror(&self) -> &EntityMirror {
        &self.mirror
    }

    /// Peer avatars.
    #[must_use]
    pub const fn receiver(&self) -> &TrackingReceiver {
        &self.receiver
    }

    /// Counters.
    #[must_use]
    pub const fn stats(&self) -> &ClientStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BoneSample, TrackingFrameMessage};
    use crate::server::Delivery;
    use crate::tracking::{AvatarPose, TrackedNode, ChannelKind};
    use umi3d_shared::{BoneType, Quaternion, Transform, Vec3};

    #[derive(Default)]
    struct Poses(Vec<AvatarPose>);

    impl AvatarRenderer for Poses {
        fn apply_pose(&mut self, pose: &AvatarPose) {
            self.0.push(pose.clone());
        }
    }

    struct Standing;

    impl SkeletonSource for Standing {
        fn root(&self) -> Transform {
            Transform::IDENTITY
        }

        fn bones(&self, out: &mut Vec<BoneSample>) {
            out.push(BoneSample::tracked(BoneType::HEAD, Vec3::new(0.0, 1.7, 0.0), Quaternion::IDENTITY));
        }
    }

    fn entered() -> EnvironmentClient {
        let mut client = EnvironmentClient::new(Umi3dConfig::default());
        client.enter(&EnterDescriptor {
            user: UserId(1),
            delivery: Delivery::Socket,
            socket_port: 0,
            tick_rate: 30,
        });
        client
    }

    #[test]
    fn test_own_frames_are_ignored() {
        let mut client = entered();
        let now = Instant::now();
        client.apply_message(&Message::TrackingFrame(TrackingFrameMessage::new(UserId(1))), now);
        assert_eq!(client.receiver().users().count(), 0);

        let mut peer = TrackingFrameMessage::new(UserId(2));
        peer.bones.push(BoneSample::tracked(BoneType::LEFT_HAND, Vec3::Y, Quaternion::IDENTITY));
        client.apply_message(&Message::TrackingFrame(peer), now);
        assert_eq!(client.stats().frames, 1);
        assert!(client
            .receiver()
            .channel(UserId(2), TrackedNode::Bone(BoneType::LEFT_HAND), ChannelKind::Position)
            .is_some());
    }

    #[test]
    fn test_tick_sends_and_renders() {
        let mut client = entered();
        let now = Instant::now();
        let mut peer = TrackingFrameMessage::new(UserId(2));
        peer.bones.push(BoneSample::tracked(BoneType::HEAD, Vec3::Y, Quaternion::IDENTITY));
        client.apply_message(&Message::TrackingFrame(peer), now);

        let mut poses = Poses::default();
        let tick = client.tick(now, Some(&Standing), &mut poses);
        let outgoing = tick.outgoing.unwrap();
        match DecoderTable::standard().decode(&outgoing) {
            Ok(Message::TrackingFrame(frame)) => {
                assert_eq!(frame.user, UserId(1));
                assert!(frame.bone(BoneType::HEAD).is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(poses.0.len(), 1);
        assert_eq!(poses.0[0].user, UserId(2));
    }

    #[test]
    fn test_malformed_load_body() {
        let mut client = entered();
        assert!(client.load_response(&[1, 0]).is_err());
        assert_eq!(client.state(), ClientState::Loading);
        assert_eq!(client.load_response(&[0, 0, 0, 0]), Ok(0));
        assert_eq!(client.state(), ClientState::Connected);
    }
}
