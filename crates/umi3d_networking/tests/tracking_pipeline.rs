//! Integration tests for the tracking pipeline: sender, relay, receiver,
//! renderer and bindings.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use umi3d_networking::config::KalmanNoise;
use umi3d_networking::protocol::BoneSample;
use umi3d_networking::server::{EnterDescriptor, Request};
use umi3d_networking::tracking::{
    AvatarPose, AvatarRenderer, Binding, BindingTargets, ChannelKind, RegressionExtrapolator, SkeletonSource,
    TrackedNode,
};
use umi3d_networking::{
    EnvironmentClient, EnvironmentServer, NetworkCommand, NetworkEvent, TrackingFrameMessage, TrackingReceiver,
    Umi3dConfig, UnscentedKalmanFilter, UserId,
};
use umi3d_shared::{BoneType, Quaternion, Transform, Vec3};

struct StandingAvatar;

impl SkeletonSource for StandingAvatar {
    fn root(&self) -> Transform {
        Transform::IDENTITY
    }

    fn bones(&self, out: &mut Vec<BoneSample>) {
        out.push(BoneSample::tracked(BoneType::LEFT_HAND, Vec3::new(0.0, 1.0, 0.0), Quaternion::IDENTITY));
        out.push(BoneSample::tracked(BoneType::HEAD, Vec3::new(0.0, 1.7, 0.0), Quaternion::IDENTITY));
    }
}

#[derive(Default)]
struct RecordingRenderer {
    poses: HashMap<UserId, AvatarPose>,
}

impl AvatarRenderer for RecordingRenderer {
    fn apply_pose(&mut self, pose: &AvatarPose) {
        self.poses.insert(pose.user, pose.clone());
    }
}

#[derive(Default)]
struct Props {
    transforms: HashMap<u64, Transform>,
}

impl BindingTargets for Props {
    fn exists(&self, target: u64) -> bool {
        target == 42
    }

    fn set_transform(&mut self, target: u64, transform: Transform) {
        self.transforms.insert(target, transform);
    }
}

#[test]
fn test_kalman_converges_on_constant_signal() {
    let mut filter = UnscentedKalmanFilter::new(KalmanNoise::BONE);
    for _ in 0..25 {
        filter.update([1.0, 2.0, 3.0]);
    }
    for (estimate, expected) in filter.state().into_iter().zip([1.0, 2.0, 3.0]) {
        assert!((estimate - expected).abs() < 1e-3, "{estimate} vs {expected}");
    }
}

#[test]
fn test_kalman_smooths_noisy_signal() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut filter = UnscentedKalmanFilter::new(KalmanNoise::ROOT);
    for _ in 0..200 {
        let noise: f64 = rng.gen_range(-0.05..0.05);
        filter.update([1.0 + noise, 2.0 - noise, 3.0 + noise]);
    }
    for (estimate, expected) in filter.state().into_iter().zip([1.0, 2.0, 3.0]) {
        assert!((estimate - expected).abs() < 0.1, "{estimate} vs {expected}");
    }
}

#[test]
fn test_regression_at_zero_delta_is_previous() {
    let start = Instant::now();
    let mut regression = RegressionExtrapolator::new(15.0, Duration::from_millis(500));
    regression.push([0.0, 0.0, 0.0], start);
    regression.push([1.0, 2.0, 3.0], start + Duration::from_millis(100));

    assert_eq!(regression.value(Duration::ZERO), regression.previous());
    assert_eq!(regression.value(Duration::ZERO), [0.0, 0.0, 0.0]);
}

#[test]
fn test_first_frame_creates_channel_at_measurement() {
    let mut receiver = TrackingReceiver::new(Umi3dConfig::default().tracking);
    let user = UserId(9);
    let mut frame = TrackingFrameMessage::new(user);
    frame.bones.push(BoneSample::tracked(
        BoneType::LEFT_HAND,
        Vec3::new(0.0, 1.0, 0.0),
        Quaternion::IDENTITY,
    ));

    let report = receiver.receive(&frame, Instant::now()).unwrap();
    assert_eq!(report.accepted, 1);

    let channel = receiver
        .channel(user, TrackedNode::Bone(BoneType::LEFT_HAND), ChannelKind::Position)
        .unwrap();
    assert_eq!(channel.state(), [0.0, 1.0, 0.0]);
}

fn login(server: &mut EnvironmentServer, name: &str) -> EnterDescriptor {
    let body = format!(r#"{{"login":"{name}"}}"#).into_bytes();
    serde_json::from_slice(&server.handle_http(&Request::post("/login", body)).body).unwrap()
}

#[test]
fn test_frame_travels_from_one_client_to_another() {
    let config = Umi3dConfig::default();
    let (mut server, network) = EnvironmentServer::new(config.clone());

    let mut alice = EnvironmentClient::new(config.clone());
    let mut bob = EnvironmentClient::new(config);
    let alice_enter = login(&mut server, "alice");
    let bob_enter = login(&mut server, "bob");
    alice.enter(&alice_enter);
    bob.enter(&bob_enter);
    network.events.send(NetworkEvent::Connected(alice_enter.user)).unwrap();
    network.events.send(NetworkEvent::Connected(bob_enter.user)).unwrap();
    server.tick(Instant::now());

    let mut renderer = RecordingRenderer::default();
    let outgoing = alice
        .tick(Instant::now(), Some(&StandingAvatar as &dyn SkeletonSource), &mut renderer)
        .outgoing
        .expect("first tick transmits");
    network
        .events
        .send(NetworkEvent::Payload {
            user: alice_enter.user,
            bytes: outgoing,
        })
        .unwrap();

    // decoding runs in the background: tick until the relay shows up
    let deadline = Instant::now() + Duration::from_secs(5);
    let relayed = loop {
        server.tick(Instant::now());
        let relayed = network.commands.try_iter().find_map(|command| match command {
            NetworkCommand::Send { user, reliable, bytes } if user == bob_enter.user => {
                assert!(!reliable);
                Some(bytes)
            }
            _ => None,
        });
        if let Some(bytes) = relayed {
            break bytes;
        }
        assert!(Instant::now() < deadline, "frame never relayed");
        std::thread::sleep(Duration::from_millis(5));
    };
    assert_eq!(server.stats().relayed_frames, 1);

    bob.submit_payload(relayed).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !renderer.poses.contains_key(&alice_enter.user) {
        bob.tick(Instant::now(), None, &mut renderer);
        assert!(Instant::now() < deadline, "pose never rendered");
        std::thread::sleep(Duration::from_millis(5));
    }

    let pose = &renderer.poses[&alice_enter.user];
    let hand = pose.bone_world(BoneType::LEFT_HAND).unwrap();
    assert!((hand.position.y - 1.0).abs() < 1e-4);
    assert_eq!(bob.stats().frames, 1);

    // a prop bound to alice's hand follows it
    bob.bind(Binding {
        user: alice_enter.user,
        bone: BoneType::LEFT_HAND,
        target: 42,
        offset: Transform::IDENTITY,
    });
    let mut props = Props::default();
    assert!(bob.fixed_update(&mut props, Instant::now()).is_empty());
    let prop = props.transforms[&42];
    assert!((prop.position.y - 1.0).abs() < 1e-4);
}

#[test]
fn test_binding_to_missing_target_gives_up() {
    let config = Umi3dConfig::from_toml_str("[binding]\nmax_attempts = 3\nmax_backoff_updates = 1").unwrap();
    let mut client = EnvironmentClient::new(config);
    client.bind(Binding {
        user: UserId(5),
        bone: BoneType::HEAD,
        target: 7,
        offset: Transform::IDENTITY,
    });

    let mut props = Props::default();
    let mut errors = Vec::new();
    for _ in 0..20 {
        errors.extend(client.fixed_update(&mut props, Instant::now()));
    }
    assert_eq!(errors.len(), 1);
    assert!(props.transforms.is_empty());
}
