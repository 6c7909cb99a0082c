//! Integration tests for entity synchronization, from registry to mirror.

use std::time::{Duration, Instant};

use umi3d_networking::entity::ApplyOutcome;
use umi3d_networking::server::{Delivery, EnterDescriptor, Request};
use umi3d_networking::tracking::{AvatarPose, AvatarRenderer};
use umi3d_networking::{
    ClientState, DecoderTable, EntityDraft, EntityMirror, EntityRegistry, EnvironmentClient, EnvironmentServer, Message,
    MutationOutcome, NetworkCommand, NetworkEvent, Operation, PropertyValue, Transaction, TransactionBatcher,
    Umi3dConfig, UserId,
};
use umi3d_shared::{keys, EntityCategory, Vec3};

struct NoRenderer;

impl AvatarRenderer for NoRenderer {
    fn apply_pose(&mut self, _pose: &AvatarPose) {}
}

fn mirror_of(registry: &EntityRegistry, user: UserId) -> EntityMirror {
    let mut mirror = EntityMirror::new();
    for entity in registry.iter_tree() {
        if let Some(descriptor) = registry.descriptor(entity.id(), user) {
            mirror.load(descriptor);
        }
    }
    mirror
}

#[test]
fn test_set_property_applied_twice_converges() {
    let mut registry = EntityRegistry::new();
    let id = registry.register(EntityDraft::new(EntityCategory::Object3D).with_name("cube"));
    let mut mirror = mirror_of(&registry, UserId(1));
    let _ = registry.drain_operations();

    registry.set_property(id, keys::NAME, "sphere");
    let operations = registry.drain_operations();
    assert_eq!(operations.len(), 1);

    let transaction = Transaction::from_operations(operations);
    mirror.apply_transaction(&transaction);
    let once = mirror.get(id).unwrap().property(keys::NAME).cloned();
    mirror.apply_transaction(&transaction);
    let twice = mirror.get(id).unwrap().property(keys::NAME).cloned();

    assert_eq!(once, Some(PropertyValue::Text("sphere".to_string())));
    assert_eq!(once, twice);
}

#[test]
fn test_setting_current_value_records_nothing() {
    let mut registry = EntityRegistry::new();
    let id = registry.register(EntityDraft::new(EntityCategory::Object3D).with_property(keys::INTERACTABLE, true));
    let _ = registry.drain_operations();

    assert_eq!(registry.set_property(id, keys::INTERACTABLE, true), MutationOutcome::Unchanged);
    assert!(registry.pending_operations().is_empty());
}

#[test]
fn test_fourth_operation_starts_second_batch() {
    let config = Umi3dConfig::from_toml_str("[batcher]\nmax_operations = 3\nflush_interval_ms = 0").unwrap();
    let mut registry = EntityRegistry::new();
    let mut batcher = TransactionBatcher::new(config.batcher, Vec::<Transaction>::new());
    let now = Instant::now();

    for name in ["a", "b", "c", "d"] {
        registry.register(EntityDraft::new(EntityCategory::Object3D).with_name(name));
    }
    batcher.extend(registry.drain_operations(), now);
    assert_eq!(batcher.sink().len(), 1);
    assert_eq!(batcher.pending_len(), 1);

    batcher.flush();
    let sizes: Vec<usize> = batcher.sink().iter().map(Transaction::len).collect();
    assert_eq!(sizes, vec![3, 1]);
}

#[test]
fn test_override_wins_for_its_user_only() {
    let mut registry = EntityRegistry::new();
    let id = registry.register(
        EntityDraft::new(EntityCategory::Object3D).with_property(keys::POSITION, Vec3::new(0.0, 0.0, 0.0)),
    );
    let (alice, bob) = (UserId(1), UserId(2));

    registry.set_property_for(id, alice, keys::POSITION, Vec3::new(1.0, 0.0, 0.0));
    registry.set_property(id, keys::POSITION, Vec3::new(5.0, 0.0, 0.0));

    let for_alice = registry.descriptor(id, alice).unwrap();
    let for_bob = registry.descriptor(id, bob).unwrap();
    assert_eq!(
        for_alice.property(keys::POSITION),
        Some(&PropertyValue::Vec3(Vec3::new(1.0, 0.0, 0.0)))
    );
    assert_eq!(
        for_bob.property(keys::POSITION),
        Some(&PropertyValue::Vec3(Vec3::new(5.0, 0.0, 0.0)))
    );
}

#[test]
fn test_remove_twice_is_noop() {
    let mut registry = EntityRegistry::new();
    let parent = registry.register(EntityDraft::new(EntityCategory::Object3D));
    let child = registry.register(EntityDraft::new(EntityCategory::Node).with_parent(parent));
    let _ = registry.drain_operations();

    assert_eq!(registry.remove(parent), MutationOutcome::Recorded);
    assert!(registry.get(parent).is_none());
    assert!(registry.get(child).is_none());
    assert_eq!(registry.remove(parent), MutationOutcome::Missing);

    let operations = registry.drain_operations();
    assert_eq!(operations.len(), 1);
    assert!(matches!(operations[0], Operation::DeleteEntity { entity, .. } if entity == parent));
}

#[test]
fn test_list_edit_out_of_sequence_asks_for_reload() {
    let mut registry = EntityRegistry::new();
    let id = registry.register(
        EntityDraft::new(EntityCategory::Object3D).with_property(keys::MATERIALS, vec![PropertyValue::Int(1)]),
    );
    let mut mirror = mirror_of(&registry, UserId(1));
    let _ = registry.drain_operations();

    registry.push_item(id, keys::MATERIALS, PropertyValue::Int(2));
    registry.push_item(id, keys::MATERIALS, PropertyValue::Int(3));
    let operations = registry.drain_operations();
    assert_eq!(operations.len(), 2);

    // the first edit is lost on the way
    assert_eq!(mirror.apply(&operations[1]), ApplyOutcome::Desynced);
    assert_eq!(mirror.take_desynced(), vec![id]);
}

fn login(server: &mut EnvironmentServer, name: &str) -> EnterDescriptor {
    let body = format!(r#"{{"login":"{name}"}}"#).into_bytes();
    let response = server.handle_http(&Request::post("/login", body));
    assert_eq!(response.status, 200);
    serde_json::from_slice(&response.body).unwrap()
}

#[test]
fn test_server_to_client_over_channels() {
    let config = Umi3dConfig::default();
    let (mut server, network) = EnvironmentServer::new(config.clone());
    let cube = server.registry_mut().register(
        EntityDraft::new(EntityCategory::Object3D)
            .with_name("cube")
            .with_property(keys::ACTIVE, true),
    );
    server.flush(Instant::now());

    let mut client = EnvironmentClient::new(config);
    let enter = login(&mut server, "alice");
    assert_eq!(enter.delivery, Delivery::Socket);
    client.enter(&enter);
    assert_eq!(client.state(), ClientState::Loading);

    network.events.send(NetworkEvent::Connected(enter.user)).unwrap();
    server.tick(Instant::now());

    let load = server.handle_http(&Request::get(&format!("/load?user={}", enter.user.0)));
    assert_eq!(load.status, 200);
    assert_eq!(client.load_response(&load.body).unwrap(), 1);
    assert_eq!(client.state(), ClientState::Connected);

    // the load itself marked the cube dirty
    let mut renderer = NoRenderer;
    assert_eq!(client.tick(Instant::now(), None, &mut renderer).dirty, vec![cube]);

    server.registry_mut().set_property(cube, keys::NAME, "renamed");
    server.flush(Instant::now());

    let table = DecoderTable::standard();
    let mut delivered = 0;
    for command in network.commands.try_iter() {
        if let NetworkCommand::Send { user, bytes, .. } = command {
            assert_eq!(user, enter.user);
            assert!(matches!(table.decode(&bytes), Ok(Message::Transaction(_))));
            client.submit_payload(bytes).unwrap();
            delivered += 1;
        }
    }
    assert_eq!(delivered, 1);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let tick = client.tick(Instant::now(), None, &mut renderer);
        if tick.dirty.contains(&cube) {
            break;
        }
        assert!(Instant::now() < deadline, "transaction never reached the mirror");
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(
        client.mirror().get(cube).unwrap().property(keys::NAME),
        Some(&PropertyValue::Text("renamed".to_string()))
    );
}

#[test]
fn test_polling_user_collects_updates() {
    let (mut server, _network) = EnvironmentServer::new(Umi3dConfig::default());
    let body = br#"{"login":"bob","polling":true}"#.to_vec();
    let enter: EnterDescriptor =
        serde_json::from_slice(&server.handle_http(&Request::post("/login", body)).body).unwrap();
    assert_eq!(enter.delivery, Delivery::Polling);

    let mut client = EnvironmentClient::new(Umi3dConfig::default());
    client.enter(&enter);
    let load = server.handle_http(&Request::get(&format!("/load?user={}", enter.user.0)));
    client.load_response(&load.body).unwrap();

    let id = server
        .registry_mut()
        .register(EntityDraft::new(EntityCategory::Object3D).with_name("late"));
    server.flush(Instant::now());

    let update = server.handle_http(&Request::get(&format!("/update?user={}", enter.user.0)));
    let report = client.update_response(&update.body).unwrap();
    assert_eq!(report.applied, 1);
    assert!(client.mirror().get(id).is_some());

    // the queue was emptied by the first poll
    let again = server.handle_http(&Request::get(&format!("/update?user={}", enter.user.0)));
    assert_eq!(client.update_response(&again.body).unwrap().applied, 0);
}
