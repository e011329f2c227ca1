#![allow(clippy::unwrap_used)]
// End-to-end scenarios: supervisor + controller sessions driven by the
// simulated driver, mirrored into an in-memory tree.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use zwlink_api::{
    DriverCall, HomeId, Notification, NotificationCode, NotificationKind, SimData,
    SimDriver, SimNetwork, SimNode, SimValue,
};
use zwlink_core::codec::{self, attr};
use zwlink_core::{
    ActionArgs, ControllerSession, CoreError, EngineConfig, EntityId, MemoryTree, SessionStatus,
    Supervisor, Tree, TreeValue, ValueType, ops,
};

// ── Helpers ─────────────────────────────────────────────────────────

const PORT: &str = "/dev/ttyUSB0";
const HOME: HomeId = HomeId(42);

fn dimmer() -> SimNode {
    SimNode::new(3, "Dimmer")
        .with_value(SimValue::new("Level (%)", 0x26, SimData::Byte(10)))
        .with_value(SimValue::new("Basic", 0x20, SimData::Byte(10)))
        .with_value(SimValue::new("Setpoint", 0x43, SimData::Decimal(20.0)).with_units("C"))
}

fn network() -> SimNetwork {
    SimNetwork::new(PORT, HOME, 1)
        .with_node(SimNode::new(1, "Stick"))
        .with_node(dimmer())
}

struct Engine {
    tree: Arc<MemoryTree>,
    driver: Arc<SimDriver>,
    supervisor: Supervisor,
}

impl Engine {
    fn new(driver: SimDriver) -> Self {
        Self::with_tree(driver, MemoryTree::new())
    }

    fn with_tree(driver: SimDriver, tree: MemoryTree) -> Self {
        let tree = Arc::new(tree);
        let driver = Arc::new(driver);
        let supervisor =
            Supervisor::new(driver.clone(), tree.clone(), EngineConfig::default()).unwrap();
        Self {
            tree,
            driver,
            supervisor,
        }
    }

    /// Add the "Stick" connection and replay the full startup sequence.
    async fn ready(&self) -> ControllerSession {
        let session = self.supervisor.add_connection("Stick", PORT).unwrap();
        self.driver.emit_all(self.driver.startup_sequence(PORT));
        session.sync().await;
        session
    }

    fn device(&self, session: &ControllerSession, name: &str) -> EntityId {
        self.tree.child(session.entity(), name).unwrap()
    }

    fn point(&self, session: &ControllerSession, device: &str, point: &str) -> EntityId {
        let device = self.device(session, device);
        self.tree.child(device, point).unwrap()
    }

    fn emit(&self, node_id: u8, kind: NotificationKind) {
        self.driver.emit(Notification::new(HOME, node_id, kind));
    }
}

fn value_id(node: &SimNode, index: usize) -> zwlink_api::ValueId {
    node.values[index].value_id(HOME, node.id)
}

/// Every bound device is a live child of the controller tagged with its
/// own node id, and no entity is bound twice. With `exhaustive`, every
/// tagged child of the controller is also bound.
async fn assert_identities(engine: &Engine, session: &ControllerSession, exhaustive: bool) {
    let devices = session.devices().await.unwrap();
    let mut bound = HashSet::new();
    for device in &devices {
        let node_id = device.node_id;
        assert_eq!(
            engine.tree.parent(device.entity),
            Some(session.entity()),
            "node {node_id} is bound outside the controller"
        );
        let tag = engine.tree.attribute(device.entity, attr::NETWORK_DEVICE_ID);
        assert_eq!(
            tag.as_ref().and_then(codec::node_id_of),
            Some(node_id),
            "node {node_id} is bound to an entity tagged {tag:?}"
        );
        assert!(bound.insert(device.entity), "entity of node {node_id} is bound twice");
    }
    if exhaustive {
        for child in engine.tree.children(session.entity()) {
            if engine.tree.attribute(child, attr::NETWORK_DEVICE_ID).is_some() {
                assert!(bound.contains(&child), "{:?} is tagged but unbound", engine.tree.name(child));
            }
        }
    }
}

fn bound_entity(devices: &[zwlink_core::DeviceSummary], node_id: u8) -> Option<EntityId> {
    devices.iter().find(|d| d.node_id == node_id).map(|d| d.entity)
}

// ── Readiness ───────────────────────────────────────────────────────

#[tokio::test]
async fn controller_operations_appear_only_after_the_full_query() {
    let engine = Engine::new(SimDriver::new().with_network(network()));
    let session = engine.supervisor.add_connection("Stick", PORT).unwrap();
    assert_eq!(session.status(), SessionStatus::Loading);

    let mut startup = engine.driver.startup_sequence(PORT);
    let milestone = startup.pop().unwrap();
    engine.driver.emit_all(startup);
    session.sync().await;

    assert_eq!(session.status(), SessionStatus::Ready);
    assert_eq!(session.home_id(), Some(HOME));
    for op in ops::CONTROLLER_OPERATIONS {
        assert!(engine.tree.child(session.entity(), op).is_none(), "{op}");
    }

    engine.driver.emit(milestone);
    session.sync().await;

    for op in ops::CONTROLLER_OPERATIONS {
        assert!(engine.tree.child(session.entity(), op).is_some(), "{op}");
    }
    assert!(engine
        .driver
        .calls()
        .contains(&DriverCall::WriteConfig { home_id: HOME }));
}

#[tokio::test]
async fn devices_and_points_are_mirrored() {
    let engine = Engine::new(SimDriver::new().with_network(network()));
    let session = engine.ready().await;

    let controller = engine.device(&session, "1");
    assert!(engine.tree.hidden(controller));
    assert!(engine.tree.child(controller, ops::ALL_ON).is_some());

    let device = engine.device(&session, "3");
    assert_eq!(engine.tree.display_name(device).as_deref(), Some("Dimmer-3"));
    assert!(engine.tree.child(device, "Level (Percent)").is_some());
    assert!(engine.tree.child(device, "Basic").is_none());

    let setpoint = engine.point(&session, "3", "Setpoint");
    assert_eq!(engine.tree.attribute(setpoint, attr::UNIT), Some(TreeValue::from("C")));
    assert_eq!(
        engine.tree.attribute(setpoint, attr::VALUE_KIND),
        Some(TreeValue::from("DECIMAL"))
    );
}

#[tokio::test]
async fn basic_class_values_never_become_points() {
    let engine = Engine::new(SimDriver::new().with_network(network()));
    let session = engine.ready().await;
    let device = engine.device(&session, "3");
    let before = engine.tree.children(device).len();

    let basic = value_id(&dimmer(), 1);
    engine.emit(
        3,
        NotificationKind::ValueAdded {
            value: basic,
            group: 0,
            scene_id: 0,
            button_id: 0,
        },
    );
    engine.emit(3, NotificationKind::ValueChanged { value: basic });
    session.sync().await;

    assert_eq!(engine.tree.children(device).len(), before);
}

// ── Values ──────────────────────────────────────────────────────────

#[tokio::test]
async fn external_writes_reach_the_driver_once() {
    let engine = Engine::new(SimDriver::new().with_network(network()).echo_writes(true));
    let session = engine.ready().await;
    let id = value_id(&dimmer(), 2);
    let setpoint = engine.point(&session, "3", "Setpoint");

    engine.driver.set_data(&id, SimData::Decimal(21.5)).unwrap();
    engine.emit(3, NotificationKind::ValueChanged { value: id });
    session.sync().await;
    assert_eq!(engine.tree.value(setpoint), Some(TreeValue::Number(21.5)));
    assert_eq!(engine.tree.value_type(setpoint), Some(ValueType::Number));

    engine.driver.clear_calls();
    engine
        .tree
        .external_write(setpoint, TreeValue::Number(22.0))
        .unwrap();
    // Once for the write, once for the driver's echo.
    session.sync().await;
    session.sync().await;

    assert_eq!(
        engine.driver.setter_calls(),
        vec![DriverCall::SetFloat { id, value: 22.0 }]
    );
    assert_eq!(engine.tree.value(setpoint), Some(TreeValue::Number(22.0)));
}

#[tokio::test]
async fn changes_for_unknown_points_are_ignored() {
    let engine = Engine::new(SimDriver::new().with_network(network()));
    let session = engine.ready().await;
    let before = engine.tree.len();

    let stray = SimValue::new("Stray", 0x31, SimData::Int(1)).value_id(HOME, 9);
    engine.emit(9, NotificationKind::ValueChanged { value: stray });
    engine.emit(9, NotificationKind::ValueRemoved { value: stray });
    engine.emit(3, NotificationKind::Unknown);
    session.sync().await;

    assert_eq!(engine.tree.len(), before);
    assert_eq!(session.status(), SessionStatus::Ready);
}

// ── Device operations ───────────────────────────────────────────────

#[tokio::test]
async fn rename_keeps_points_and_write_back() {
    let engine = Engine::new(SimDriver::new().with_network(network()));
    let session = engine.ready().await;
    let level = engine.point(&session, "3", "Level (Percent)");

    let rename = engine.tree.child(engine.device(&session, "3"), ops::RENAME).unwrap();
    engine
        .tree
        .invoke(rename, ActionArgs::new().with(ops::PARAM_NAME, "Lamp"))
        .unwrap();
    session.sync().await;

    assert!(engine.tree.child(session.entity(), "3").is_none());
    let lamp = engine.device(&session, "Lamp");
    assert_eq!(engine.tree.child(lamp, "Level (Percent)"), Some(level));
    assert_eq!(
        engine.tree.attribute(lamp, attr::NETWORK_DEVICE_ID),
        Some(TreeValue::Number(3.0))
    );
    assert!(engine.tree.child(lamp, ops::RENAME).is_some());

    let devices = session.devices().await.unwrap();
    let bound = devices.iter().find(|d| d.node_id == 3).unwrap();
    assert_eq!(bound.entity, lamp);
    assert_eq!(bound.display_name, "Lamp");

    engine.driver.clear_calls();
    engine
        .tree
        .external_write(level, TreeValue::Number(55.0))
        .unwrap();
    session.sync().await;
    assert_eq!(
        engine.driver.setter_calls(),
        vec![DriverCall::SetByte {
            id: value_id(&dimmer(), 0),
            value: 55
        }]
    );
}

#[tokio::test]
async fn rename_rejects_taken_names() {
    let engine = Engine::new(SimDriver::new().with_network(network()));
    let session = engine.ready().await;
    let device = engine.device(&session, "3");

    let result = session
        .execute(zwlink_core::Command::RenameDevice {
            device,
            name: ops::STATUS.into(),
        })
        .await;

    assert!(matches!(result, Err(CoreError::InvalidParameter { .. })));
    assert!(engine.tree.exists(device));
}

#[tokio::test]
async fn change_node_id_retags_the_device() {
    let engine = Engine::new(SimDriver::new().with_network(network()));
    let session = engine.ready().await;
    let device = engine.device(&session, "3");
    let level = engine.point(&session, "3", "Level (Percent)");

    let op = engine.tree.child(device, ops::CHANGE_NODE_ID).unwrap();
    engine
        .tree
        .invoke(op, ActionArgs::new().with(ops::PARAM_NODE_ID, "7"))
        .unwrap();
    session.sync().await;

    assert_eq!(
        engine.tree.attribute(device, attr::NETWORK_DEVICE_ID),
        Some(TreeValue::Number(7.0))
    );
    assert_eq!(
        engine.tree.attribute(level, attr::NETWORK_DEVICE_ID),
        Some(TreeValue::Number(7.0))
    );
    let nodes: Vec<_> = session
        .devices()
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.node_id)
        .collect();
    assert_eq!(nodes, vec![1, 7]);
}

// ── Identity across discovery sequences ────────────────────────────

#[tokio::test]
async fn identities_survive_add_rename_remove_sequences() {
    let engine = Engine::new(SimDriver::new().with_network(network()));
    let session = engine.ready().await;
    assert_identities(&engine, &session, true).await;

    // Rename device 3 to a name that looks like another node id.
    let dimmer = engine.device(&session, "3");
    session
        .execute(zwlink_core::Command::RenameDevice {
            device: dimmer,
            name: "5".into(),
        })
        .await
        .unwrap();
    let renamed = engine.device(&session, "5");
    assert_identities(&engine, &session, true).await;

    // Node 5 joins: it must not take over the entity named "5".
    engine.emit(5, NotificationKind::NodeAdded);
    session.sync().await;
    let devices = session.devices().await.unwrap();
    assert_eq!(bound_entity(&devices, 3), Some(renamed));
    assert_eq!(bound_entity(&devices, 5), Some(engine.device(&session, "5 (2)")));
    assert_identities(&engine, &session, true).await;

    // Node 3 leaves and comes back: it finds its renamed entity by tag.
    engine.emit(3, NotificationKind::NodeRemoved);
    session.sync().await;
    assert_identities(&engine, &session, false).await;
    engine.emit(3, NotificationKind::NodeAdded);
    session.sync().await;
    let devices = session.devices().await.unwrap();
    assert_eq!(bound_entity(&devices, 3), Some(renamed));
    assert_eq!(engine.tree.display_name(renamed).as_deref(), Some("5"));
    assert_identities(&engine, &session, true).await;

    // Re-address 3 as 7, then let a new node 3 join.
    session
        .execute(zwlink_core::Command::ChangeNodeId {
            device: renamed,
            node_id: 7,
        })
        .await
        .unwrap();
    engine.emit(3, NotificationKind::NodeAdded);
    session.sync().await;
    let devices = session.devices().await.unwrap();
    assert_eq!(bound_entity(&devices, 7), Some(renamed));
    assert_eq!(bound_entity(&devices, 3), Some(engine.device(&session, "3")));
    assert_identities(&engine, &session, true).await;

    // Renaming onto a taken name changes nothing.
    let result = session
        .execute(zwlink_core::Command::RenameDevice {
            device: engine.device(&session, "3"),
            name: "5 (2)".into(),
        })
        .await;
    assert!(matches!(result, Err(CoreError::InvalidParameter { .. })));
    assert_identities(&engine, &session, true).await;

    engine.emit(1, NotificationKind::AllNodesQueried);
    session.sync().await;
    let nodes: Vec<_> = session
        .devices()
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.node_id)
        .collect();
    assert_eq!(nodes, vec![1, 3, 5, 7]);
    assert_identities(&engine, &session, true).await;
}

// ── Pruning ─────────────────────────────────────────────────────────

#[tokio::test]
async fn orphans_are_pruned_once() {
    let engine = Engine::new(SimDriver::new().with_network(network()));
    let session = engine.supervisor.add_connection("Stick", PORT).unwrap();
    let orphan = engine.tree.create_child(session.entity(), "Old Sensor").unwrap();
    engine
        .tree
        .set_attribute(orphan, attr::NETWORK_DEVICE_ID, TreeValue::Number(9.0))
        .unwrap();

    engine.driver.emit_all(engine.driver.startup_sequence(PORT));
    session.sync().await;
    assert!(!engine.tree.exists(orphan));

    let snapshot = engine.tree.snapshot();
    engine.emit(1, NotificationKind::AllNodesQueried);
    session.sync().await;
    assert_eq!(engine.tree.snapshot(), snapshot);
}

#[tokio::test]
async fn removed_devices_are_pruned_at_the_next_milestone() {
    let engine = Engine::new(SimDriver::new().with_network(network()));
    let session = engine.ready().await;
    let device = engine.device(&session, "3");

    engine.emit(3, NotificationKind::NodeRemoved);
    session.sync().await;
    assert!(engine.tree.exists(device));

    engine.emit(1, NotificationKind::AwakeNodesQueried);
    session.sync().await;
    assert!(!engine.tree.exists(device));
    assert_eq!(session.devices().await.unwrap().len(), 1);
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn refresh_restarts_and_recovers() {
    let engine = Engine::new(
        SimDriver::new()
            .with_network(network())
            .auto_announce(true),
    );
    let session = engine.supervisor.add_connection("Stick", PORT).unwrap();
    session.sync().await;
    assert_eq!(session.status(), SessionStatus::Ready);

    let refresh = engine.tree.child(session.entity(), ops::REFRESH).unwrap();
    engine.tree.invoke(refresh, ActionArgs::new()).unwrap();
    session.sync().await;

    let mut status = session.subscribe_status();
    status
        .wait_for(|s| *s == SessionStatus::Ready)
        .await
        .unwrap();
    session.sync().await;

    assert!(engine
        .driver
        .calls()
        .contains(&DriverCall::RequestNodeState {
            home_id: HOME,
            node_id: 1
        }));
    assert!(engine.tree.child(session.entity(), ops::EDIT).is_some());
    assert_eq!(session.devices().await.unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn dead_controller_is_polled_back() {
    let engine = Engine::new(
        SimDriver::new()
            .with_network(network())
            .auto_announce(true),
    );
    let session = engine.supervisor.add_connection("Stick", PORT).unwrap();
    session.sync().await;

    engine.driver.set_awake(HOME, 1, false).unwrap();
    engine.emit(
        1,
        NotificationKind::Generic {
            code: NotificationCode::Dead,
        },
    );
    session.sync().await;
    assert_eq!(session.status(), SessionStatus::Disconnected);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(session.status(), SessionStatus::Disconnected);

    engine.driver.set_awake(HOME, 1, true).unwrap();
    let mut status = session.subscribe_status();
    status
        .wait_for(|s| *s == SessionStatus::Ready)
        .await
        .unwrap();
}

#[tokio::test]
async fn edit_relabels_without_restarting() {
    let engine = Engine::new(SimDriver::new().with_network(network()));
    let session = engine.ready().await;
    engine.driver.clear_calls();

    let edit = engine.tree.child(session.entity(), ops::EDIT).unwrap();
    engine
        .tree
        .invoke(edit, ActionArgs::new().with(ops::PARAM_NAME, "Upstairs"))
        .unwrap();
    session.sync().await;

    assert_eq!(
        engine.tree.display_name(session.entity()).as_deref(),
        Some("Upstairs")
    );
    assert!(engine.driver.calls().is_empty());
    assert_eq!(session.status(), SessionStatus::Ready);
}

#[tokio::test]
async fn delete_drops_late_events() {
    let engine = Engine::new(SimDriver::new().with_network(network()));
    let session = engine.ready().await;
    let entity = session.entity();

    session.execute(zwlink_core::Command::Delete).await.unwrap();
    engine.emit(3, NotificationKind::NodeAdded);
    engine.emit(1, NotificationKind::AllNodesQueried);

    assert_eq!(session.status(), SessionStatus::Removed);
    assert!(!engine.tree.exists(entity));
    assert!(engine.supervisor.session("Stick").is_none());
    assert!(engine.supervisor.sessions().is_empty());

    // The name and port are free again.
    engine.supervisor.add_connection("Stick", PORT).unwrap();
}

#[tokio::test]
async fn port_conflicts_are_rejected() {
    let engine = Engine::new(SimDriver::new().with_network(network()));
    engine.ready().await;

    let result = engine.supervisor.add_connection("Second", PORT);

    assert!(matches!(result, Err(CoreError::InvalidParameter { .. })));
    assert!(engine.tree.child(engine.tree.root(), "Second").is_none());
}

#[tokio::test(start_paused = true)]
async fn edit_onto_an_owned_port_is_refused() {
    let engine = Engine::new(
        SimDriver::new()
            .with_network(network())
            .with_network(
                SimNetwork::new("/dev/ttyUSB1", HomeId(43), 1).with_node(SimNode::new(1, "Stick")),
            )
            .auto_announce(true),
    );
    let first = engine.supervisor.add_connection("First", PORT).unwrap();
    let second = engine.supervisor.add_connection("Second", "/dev/ttyUSB1").unwrap();
    first.sync().await;
    second.sync().await;
    engine.driver.clear_calls();

    let result = second
        .execute(zwlink_core::Command::Edit {
            name: None,
            port: Some(PORT.into()),
        })
        .await;

    assert!(matches!(result, Err(CoreError::InvalidParameter { .. })));
    assert_eq!(second.port(), "/dev/ttyUSB1");
    assert_eq!(
        engine.tree.attribute(second.entity(), attr::PORT),
        Some(TreeValue::from("/dev/ttyUSB1"))
    );
    assert_eq!(second.status(), SessionStatus::Ready);
    assert!(engine.driver.calls().is_empty());

    // The first session still receives its own driver-ready events.
    first.execute(zwlink_core::Command::Restart).await.unwrap();
    let mut status = first.subscribe_status();
    status
        .wait_for(|s| *s == SessionStatus::Ready)
        .await
        .unwrap();
    first.sync().await;
    assert_eq!(first.home_id(), Some(HOME));
    assert_eq!(second.home_id(), Some(HomeId(43)));
    assert_eq!(second.status(), SessionStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn edit_moves_to_a_free_port_and_survives_a_bad_one() {
    let engine = Engine::new(
        SimDriver::new()
            .with_network(network())
            .with_network(
                SimNetwork::new("/dev/ttyUSB2", HomeId(44), 1).with_node(SimNode::new(1, "Stick")),
            )
            .auto_announce(true),
    );
    let session = engine.supervisor.add_connection("Stick", PORT).unwrap();
    session.sync().await;

    session
        .execute(zwlink_core::Command::Edit {
            name: None,
            port: Some("/dev/ttyUSB2".into()),
        })
        .await
        .unwrap();
    let mut status = session.subscribe_status();
    status
        .wait_for(|s| *s == SessionStatus::Ready)
        .await
        .unwrap();
    session.sync().await;

    assert_eq!(session.port(), "/dev/ttyUSB2");
    assert_eq!(session.home_id(), Some(HomeId(44)));
    assert!(engine.driver.is_open("/dev/ttyUSB2"));
    assert!(!engine.driver.is_open(PORT));

    // The old port is free for a new connection.
    engine.supervisor.add_connection("Spare", PORT).unwrap();

    let result = session
        .execute(zwlink_core::Command::Edit {
            name: None,
            port: Some("/dev/ttyUSB9".into()),
        })
        .await;

    assert!(matches!(result, Err(CoreError::Driver(_))));
    assert_eq!(session.port(), "/dev/ttyUSB2");
    assert_eq!(
        engine.tree.attribute(session.entity(), attr::PORT),
        Some(TreeValue::from("/dev/ttyUSB2"))
    );
    assert_eq!(session.status(), SessionStatus::Ready);
    assert!(engine.driver.is_open("/dev/ttyUSB2"));
}

// ── Restore ─────────────────────────────────────────────────────────

#[tokio::test]
async fn restore_rebinds_persisted_devices() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("tree.json");

    {
        let engine = Engine::new(SimDriver::new().with_network(network()));
        let session = engine.ready().await;
        let rename = engine.tree.child(engine.device(&session, "3"), ops::RENAME).unwrap();
        engine
            .tree
            .invoke(rename, ActionArgs::new().with(ops::PARAM_NAME, "Lamp"))
            .unwrap();
        session.sync().await;
        engine.supervisor.shutdown().await;
        assert!(!engine.driver.is_open(PORT));
        engine.tree.save(&snapshot).unwrap();
    }

    let tree = MemoryTree::load(&snapshot).unwrap();
    tree.create_child(tree.root(), "Leftover").unwrap();
    let engine = Engine::with_tree(SimDriver::new().with_network(network()), tree);

    assert_eq!(engine.supervisor.restore().unwrap(), 1);
    assert!(engine.tree.child(engine.tree.root(), "Leftover").is_none());
    assert!(engine.tree.child(engine.tree.root(), ops::ADD_CONNECTION).is_some());

    let session = engine.supervisor.session("Stick").unwrap();
    assert_eq!(session.port(), PORT);
    assert!(engine.driver.is_open(PORT));

    engine.driver.emit_all(engine.driver.startup_sequence(PORT));
    session.sync().await;

    let lamp = engine.device(&session, "Lamp");
    assert!(engine.tree.child(session.entity(), "3").is_none());
    assert_eq!(engine.tree.display_name(lamp).as_deref(), Some("Lamp"));
    let devices = session.devices().await.unwrap();
    assert!(devices.iter().any(|d| d.node_id == 3 && d.entity == lamp));
}

#[tokio::test]
async fn restore_with_a_missing_port_starts_disconnected() {
    let tree = MemoryTree::new();
    let controller = tree.create_child(tree.root(), "Garage").unwrap();
    tree.set_attribute(controller, attr::PORT, TreeValue::from("/dev/ttyUSB7"))
        .unwrap();
    let engine = Engine::with_tree(SimDriver::new().with_network(network()), tree);

    assert_eq!(engine.supervisor.restore().unwrap(), 1);

    let session = engine.supervisor.session("Garage").unwrap();
    assert_eq!(session.status(), SessionStatus::Disconnected);
    session.execute(zwlink_core::Command::Delete).await.unwrap();
    assert!(!engine.tree.exists(controller));
    assert!(engine.supervisor.sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn restored_session_reopens_its_port_once_available() {
    let tree = MemoryTree::new();
    let controller = tree.create_child(tree.root(), "Garage").unwrap();
    tree.set_attribute(controller, attr::PORT, TreeValue::from("/dev/ttyUSB7"))
        .unwrap();
    let engine = Engine::with_tree(
        SimDriver::new().with_network(network()).auto_announce(true),
        tree,
    );

    assert_eq!(engine.supervisor.restore().unwrap(), 1);
    let session = engine.supervisor.session("Garage").unwrap();
    session.sync().await;
    assert_eq!(session.status(), SessionStatus::Disconnected);
    assert!(engine.tree.child(controller, ops::EDIT).is_some());
    assert!(engine.tree.child(controller, ops::DELETE).is_some());
    assert!(engine.tree.child(controller, ops::ALL_ON).is_none());

    tokio::time::sleep(Duration::from_secs(5)).await;
    session.sync().await;
    assert_eq!(session.status(), SessionStatus::Disconnected);

    engine.driver.add_network(
        SimNetwork::new("/dev/ttyUSB7", HomeId(77), 1).with_node(SimNode::new(1, "Stick")),
    );
    let mut status = session.subscribe_status();
    status
        .wait_for(|s| *s == SessionStatus::Ready)
        .await
        .unwrap();
    session.sync().await;

    assert!(engine.driver.is_open("/dev/ttyUSB7"));
    assert_eq!(session.home_id(), Some(HomeId(77)));
    assert!(engine.tree.child(controller, ops::ALL_ON).is_some());
}
