// ── Device session ──
//
// One discovered network device: its tree entity, its points, and the
// operations published on it. A device session never talks to anything
// but the tree and the driver; identity bookkeeping lives in the
// `IdentityIndex`, sequencing in the owning controller session.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use zwlink_api::{Driver, HomeId, NodeId, ValueId};

use crate::codec::{self, PointMeta, attr};
use crate::command::{Command, Mailbox};
use crate::error::CoreError;
use crate::ops;
use crate::tree::{Action, EntityId, Param, Permission, Tree, TreeError, ValueType, WriteEvent};

/// Collaborators a device operation works against.
pub(crate) struct DeviceContext<'a> {
    pub tree: &'a dyn Tree,
    pub driver: &'a dyn Driver,
    pub mailbox: &'a Mailbox,
    pub home_id: HomeId,
    /// Entity of the owning controller session.
    pub controller: EntityId,
}

/// A point as bound in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct PointEntry {
    pub entity: EntityId,
    pub value_id: ValueId,
}

/// Read-only description of a device, returned to hosts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSummary {
    pub node_id: NodeId,
    pub entity: EntityId,
    pub name: String,
    pub display_name: String,
    pub hidden: bool,
    pub points: Vec<String>,
}

#[derive(Debug)]
pub struct DeviceSession {
    node_id: NodeId,
    entity: EntityId,
    display_name: String,
    points: BTreeMap<String, PointEntry>,
    hidden: bool,
}

impl DeviceSession {
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn point(&self, name: &str) -> Option<&PointEntry> {
        self.points.get(name)
    }

    pub fn points(&self) -> impl Iterator<Item = (&str, &PointEntry)> {
        self.points.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn summary(&self, tree: &dyn Tree) -> DeviceSummary {
        DeviceSummary {
            node_id: self.node_id,
            entity: self.entity,
            name: tree.name(self.entity).unwrap_or_default(),
            display_name: self.display_name.clone(),
            hidden: self.hidden,
            points: self.points.keys().cloned().collect(),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Bind a newly announced device to a tree entity.
    ///
    /// An entity under the controller already tagged with `node_id` is
    /// reused (restored sessions); otherwise a fresh one named after the
    /// node id is created and tagged. A child that merely carries that
    /// name is never adopted: the new entity becomes `"<id> (2)"` and so
    /// on.
    pub(crate) fn discover(
        ctx: &DeviceContext<'_>,
        node_id: NodeId,
        is_controller: bool,
    ) -> Result<Self, CoreError> {
        let tree = ctx.tree;
        let entity = match find_tagged(tree, ctx.controller, node_id) {
            Some(entity) => entity,
            None => {
                let name = free_device_name(tree, ctx.controller, node_id)?;
                tree.create_child(ctx.controller, &name)?
            }
        };
        tree.set_attribute(entity, attr::NETWORK_DEVICE_ID, node_id.into())?;
        tree.set_hidden(entity, is_controller)?;

        // Keep the label of a device the user renamed in an earlier run.
        let display_name = if is_renamed(tree, entity, node_id) {
            tree.display_name(entity).unwrap_or_else(|| node_id.to_string())
        } else {
            let label = product_label(ctx, node_id);
            tree.set_display_name(entity, &label)?;
            label
        };

        let session = Self {
            node_id,
            entity,
            display_name,
            points: BTreeMap::new(),
            hidden: is_controller,
        };
        session.attach_operations(ctx)?;
        Ok(session)
    }

    /// Publish the operations of this device on its entity.
    ///
    /// The controller's own device carries the network-wide switches
    /// instead of the per-device operations.
    pub(crate) fn attach_operations(&self, ctx: &DeviceContext<'_>) -> Result<(), TreeError> {
        let tree = ctx.tree;
        let device = self.entity;

        if self.hidden {
            let mailbox = ctx.mailbox.clone();
            tree.attach_action(
                device,
                ops::ALL_ON,
                Action::new(Permission::Write, move |_| ops::enqueue(&mailbox, Command::AllOn)),
            )?;
            let mailbox = ctx.mailbox.clone();
            tree.attach_action(
                device,
                ops::ALL_OFF,
                Action::new(Permission::Write, move |_| ops::enqueue(&mailbox, Command::AllOff)),
            )?;
            let mailbox = ctx.mailbox.clone();
            tree.attach_action(
                device,
                ops::REFRESH,
                Action::new(Permission::Read, move |_| ops::enqueue(&mailbox, Command::Restart)),
            )?;
            return Ok(());
        }

        let mailbox = ctx.mailbox.clone();
        let rename = Action::new(Permission::Read, move |args| {
            let name = args
                .string(ops::PARAM_NAME)
                .ok_or_else(|| CoreError::MissingParameter {
                    name: ops::PARAM_NAME.into(),
                })?;
            ops::enqueue(&mailbox, Command::RenameDevice { device, name })
        })
        .with_param(
            Param::new(ops::PARAM_NAME, ValueType::String).with_default(self.display_name.clone()),
        );
        tree.attach_action(device, ops::RENAME, rename)?;

        let mailbox = ctx.mailbox.clone();
        let change_id = Action::new(Permission::Read, move |args| {
            let raw = args
                .string(ops::PARAM_NODE_ID)
                .ok_or_else(|| CoreError::MissingParameter {
                    name: ops::PARAM_NODE_ID.into(),
                })?;
            let node_id = raw
                .trim()
                .parse::<NodeId>()
                .map_err(|e| CoreError::InvalidParameter {
                    name: ops::PARAM_NODE_ID.into(),
                    reason: e.to_string(),
                })?;
            ops::enqueue(&mailbox, Command::ChangeNodeId { device, node_id })
        })
        .with_param(
            Param::new(ops::PARAM_NODE_ID, ValueType::String).with_default(self.node_id.to_string()),
        );
        tree.attach_action(device, ops::CHANGE_NODE_ID, change_id)?;

        let mailbox = ctx.mailbox.clone();
        tree.attach_action(
            device,
            ops::REFRESH,
            Action::new(Permission::Read, move |_| {
                ops::enqueue(&mailbox, Command::RefreshDevice { device })
            }),
        )?;
        Ok(())
    }

    /// Relabel after the driver learned the device's product name.
    /// Devices renamed by the user keep their label.
    pub(crate) fn relabel(&mut self, ctx: &DeviceContext<'_>) -> Result<(), CoreError> {
        if is_renamed(ctx.tree, self.entity, self.node_id) {
            return Ok(());
        }
        let label = product_label(ctx, self.node_id);
        ctx.tree.set_display_name(self.entity, &label)?;
        self.display_name = label;
        self.attach_operations(ctx)?;
        Ok(())
    }

    pub(crate) fn refresh(&self, ctx: &DeviceContext<'_>) -> Result<(), CoreError> {
        ctx.driver.refresh_node_info(ctx.home_id, self.node_id)?;
        Ok(())
    }

    // ── Points ───────────────────────────────────────────────────────

    /// Materialize a point for `id`. Returns `None` when the value is not
    /// materialized (Basic command class, empty label).
    pub(crate) fn add_point(
        &mut self,
        ctx: &DeviceContext<'_>,
        id: &ValueId,
        meta: &PointMeta,
    ) -> Result<Option<EntityId>, CoreError> {
        if !id.is_materialized() {
            tracing::debug!(value = %id, "basic command class value not materialized");
            return Ok(None);
        }
        let name = codec::point_name(&ctx.driver.value_label(id)?);
        if name.is_empty() {
            tracing::debug!(value = %id, "value without a label not materialized");
            return Ok(None);
        }

        let entity = ctx.tree.create_child(self.entity, &name)?;
        codec::tag_point(ctx.tree, entity, id, meta)?;
        read_point(ctx, entity, id)?;
        self.points.insert(
            name,
            PointEntry {
                entity,
                value_id: *id,
            },
        );
        Ok(Some(entity))
    }

    /// Re-read a known point. Unknown points are left alone.
    pub(crate) fn change_point(
        &mut self,
        ctx: &DeviceContext<'_>,
        id: &ValueId,
    ) -> Result<bool, CoreError> {
        if !id.is_materialized() {
            return Ok(false);
        }
        let Some((name, entry)) = self.find_point(id) else {
            tracing::debug!(value = %id, "change for an unknown point ignored");
            return Ok(false);
        };
        if !ctx.tree.exists(entry.entity) {
            tracing::debug!(value = %id, "point entity removed externally, unbinding");
            self.points.remove(&name);
            return Ok(false);
        }
        read_point(ctx, entry.entity, id)?;
        Ok(true)
    }

    pub(crate) fn remove_point(
        &mut self,
        ctx: &DeviceContext<'_>,
        id: &ValueId,
    ) -> Result<bool, CoreError> {
        if !id.is_materialized() {
            return Ok(false);
        }
        let Some((name, entry)) = self.find_point(id) else {
            return Ok(false);
        };
        self.points.remove(&name);
        if ctx.tree.exists(entry.entity) {
            ctx.tree.remove(entry.entity)?;
        }
        Ok(true)
    }

    fn find_point(&self, id: &ValueId) -> Option<(String, PointEntry)> {
        self.points
            .iter()
            .find(|(_, p)| p.value_id == *id)
            .map(|(name, p)| (name.clone(), p.clone()))
    }

    // ── Rename & renumber ────────────────────────────────────────────

    /// Build a copy of this device's entity called `name` and move every
    /// child that is not an operation onto it: tracked points as well as
    /// restored children no value has claimed yet. Write-back is re-wired
    /// on tracked writable points. The old entity is left in place,
    /// holding only its operations, for the caller to swap out.
    ///
    /// On failure the children are moved back and the copy is removed.
    pub(crate) fn duplicate(&self, ctx: &DeviceContext<'_>, name: &str) -> Result<EntityId, CoreError> {
        let tree = ctx.tree;
        let copy = tree.create_child(ctx.controller, name)?;
        for (key, value) in tree.attributes(self.entity) {
            tree.set_attribute(copy, &key, value)?;
        }
        tree.set_display_name(copy, name)?;
        tree.set_hidden(copy, self.hidden)?;

        let children: Vec<EntityId> = tree
            .children(self.entity)
            .into_iter()
            .filter(|&child| tree.action(child).is_none())
            .collect();
        let mut moved = Vec::with_capacity(children.len());
        for child in children {
            if let Err(e) = tree.move_child(child, copy) {
                for entity in moved {
                    if let Err(e) = tree.move_child(entity, self.entity) {
                        tracing::warn!(error = %e, "failed to roll back child move");
                    }
                }
                tree.remove(copy).ok();
                return Err(e.into());
            }
            moved.push(child);
        }
        for entry in self.points.values() {
            if tree.writable(entry.entity) {
                attach_write_back(tree, entry.entity, ctx.mailbox)?;
            }
        }
        Ok(copy)
    }

    /// Point this session at `entity` after a successful duplicate.
    pub(crate) fn rebind_to(&mut self, entity: EntityId, display_name: &str) {
        self.entity = entity;
        self.display_name = display_name.to_owned();
    }

    /// This device re-addressed as `node_id`: the device entity and every
    /// point entity are re-tagged, and point addresses re-scoped.
    pub(crate) fn renumber(self, ctx: &DeviceContext<'_>, node_id: NodeId) -> Result<Self, CoreError> {
        let tree = ctx.tree;
        tree.set_attribute(self.entity, attr::NETWORK_DEVICE_ID, node_id.into())?;
        let mut points = BTreeMap::new();
        for (name, entry) in self.points {
            if tree.exists(entry.entity) {
                tree.set_attribute(entry.entity, attr::NETWORK_DEVICE_ID, node_id.into())?;
            }
            points.insert(
                name,
                PointEntry {
                    entity: entry.entity,
                    value_id: entry.value_id.with_node(node_id),
                },
            );
        }
        let session = Self {
            node_id,
            entity: self.entity,
            display_name: self.display_name,
            points,
            hidden: self.hidden,
        };
        session.attach_operations(ctx)?;
        Ok(session)
    }
}

/// Read `id` from the driver into its point entity.
///
/// The write handler is installed before the value is stored so that
/// the engine's own write is seen, and ignored, as internal.
fn read_point(ctx: &DeviceContext<'_>, entity: EntityId, id: &ValueId) -> Result<(), CoreError> {
    let decoded = codec::decode(ctx.driver, id)?;
    if decoded.writable {
        attach_write_back(ctx.tree, entity, ctx.mailbox)?;
    } else {
        ctx.tree.set_write_handler(entity, None)?;
    }
    codec::apply(ctx.tree, entity, &decoded)?;
    Ok(())
}

/// Forward external writes on `entity` to the session as commands.
pub(crate) fn attach_write_back(
    tree: &dyn Tree,
    entity: EntityId,
    mailbox: &Mailbox,
) -> Result<(), TreeError> {
    let mailbox = mailbox.clone();
    tree.set_write_handler(
        entity,
        Some(Arc::new(move |event: WriteEvent| {
            if !event.external {
                return;
            }
            let command = Command::WritePoint {
                entity: event.entity,
                value: event.value,
            };
            if !mailbox.command(command) {
                tracing::debug!(entity = %event.entity, "session stopped, write dropped");
            }
        })),
    )
}

/// Child of `controller` tagged with `node_id`, if any.
pub(crate) fn find_tagged(tree: &dyn Tree, controller: EntityId, node_id: NodeId) -> Option<EntityId> {
    tree.children(controller).into_iter().find(|child| {
        tree.attribute(*child, attr::NETWORK_DEVICE_ID)
            .as_ref()
            .and_then(codec::node_id_of)
            == Some(node_id)
    })
}

/// First name under `controller` a new entity for `node_id` can take:
/// `"<id>"`, else `"<id> (2)"`, `"<id> (3)"`, ...
fn free_device_name(
    tree: &dyn Tree,
    controller: EntityId,
    node_id: NodeId,
) -> Result<String, TreeError> {
    let base = node_id.to_string();
    if tree.child(controller, &base).is_none() {
        return Ok(base);
    }
    for n in 2..=u16::MAX {
        let name = format!("{base} ({n})");
        if tree.child(controller, &name).is_none() {
            return Ok(name);
        }
    }
    Err(TreeError::NameTaken {
        parent: controller,
        name: base,
    })
}

/// Whether `name` is one `free_device_name` hands out for `node_id`.
fn is_default_name(name: &str, node_id: NodeId) -> bool {
    let base = node_id.to_string();
    let Some(rest) = name.strip_prefix(base.as_str()) else {
        return false;
    };
    rest.is_empty()
        || rest
            .strip_prefix(" (")
            .and_then(|n| n.strip_suffix(')'))
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

fn is_renamed(tree: &dyn Tree, entity: EntityId, node_id: NodeId) -> bool {
    tree.name(entity)
        .is_some_and(|name| !is_default_name(&name, node_id))
}

fn product_label(ctx: &DeviceContext<'_>, node_id: NodeId) -> String {
    match ctx.driver.node_product_name(ctx.home_id, node_id) {
        Ok(product) if !product.is_empty() => format!("{product}-{node_id}"),
        Ok(_) => node_id.to_string(),
        Err(e) => {
            tracing::debug!(node_id, error = %e, "no product name");
            node_id.to_string()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc::UnboundedReceiver;
    use zwlink_api::{SimData, SimDriver, SimNetwork, SimNode, SimValue};

    use super::*;
    use crate::command::SessionMessage;
    use crate::tree::{ActionArgs, MemoryTree, TreeValue};

    struct Fixture {
        tree: MemoryTree,
        driver: SimDriver,
        mailbox: Mailbox,
        rx: UnboundedReceiver<SessionMessage>,
        controller: EntityId,
    }

    fn dimmer() -> SimNode {
        SimNode::new(3, "Dimmer")
            .with_value(SimValue::new("Level (%)", 0x26, SimData::Byte(10)))
            .with_value(SimValue::new("Basic", 0x20, SimData::Byte(10)))
            .with_value(SimValue::new("Schedule", 0x53, SimData::Schedule))
    }

    impl Fixture {
        fn new() -> Self {
            let driver = SimDriver::new()
                .with_network(SimNetwork::new("/dev/ttyUSB0", 42u64, 1).with_node(dimmer()));
            let tree = MemoryTree::new();
            let controller = tree.create_child(tree.root(), "Stick").unwrap();
            let (mailbox, rx) = Mailbox::channel();
            Self {
                tree,
                driver,
                mailbox,
                rx,
                controller,
            }
        }

        fn ctx(&self) -> DeviceContext<'_> {
            DeviceContext {
                tree: &self.tree,
                driver: &self.driver,
                mailbox: &self.mailbox,
                home_id: HomeId(42),
                controller: self.controller,
            }
        }

        fn value(&self, index: usize) -> ValueId {
            dimmer().values[index].value_id(HomeId(42), 3)
        }

        fn commands(&mut self) -> Vec<Command> {
            let mut out = Vec::new();
            while let Ok(message) = self.rx.try_recv() {
                if let SessionMessage::Command(envelope) = message {
                    out.push(envelope.command);
                }
            }
            out
        }
    }

    #[test]
    fn discovery_creates_a_tagged_entity_with_operations() {
        let f = Fixture::new();
        let device = DeviceSession::discover(&f.ctx(), 3, false).unwrap();

        assert_eq!(f.tree.child(f.controller, "3"), Some(device.entity()));
        assert_eq!(device.display_name(), "Dimmer-3");
        assert_eq!(
            f.tree.attribute(device.entity(), attr::NETWORK_DEVICE_ID),
            Some(TreeValue::Number(3.0))
        );
        for op in [ops::RENAME, ops::CHANGE_NODE_ID, ops::REFRESH] {
            let child = f.tree.child(device.entity(), op).unwrap();
            assert!(f.tree.action(child).is_some(), "{op}");
        }
        assert!(f.tree.child(device.entity(), ops::ALL_ON).is_none());
    }

    #[test]
    fn controller_device_is_hidden_with_network_switches() {
        let f = Fixture::new();
        let device = DeviceSession::discover(&f.ctx(), 1, true).unwrap();

        assert!(device.is_hidden());
        assert!(f.tree.hidden(device.entity()));
        for op in [ops::ALL_ON, ops::ALL_OFF, ops::REFRESH] {
            assert!(f.tree.child(device.entity(), op).is_some(), "{op}");
        }
        assert!(f.tree.child(device.entity(), ops::RENAME).is_none());
    }

    #[test]
    fn discovery_reuses_a_restored_entity() {
        let f = Fixture::new();
        let restored = f.tree.create_child(f.controller, "Porch Light").unwrap();
        f.tree
            .set_attribute(restored, attr::NETWORK_DEVICE_ID, TreeValue::String("3".into()))
            .unwrap();
        f.tree.set_display_name(restored, "Porch Light").unwrap();

        let device = DeviceSession::discover(&f.ctx(), 3, false).unwrap();

        assert_eq!(device.entity(), restored);
        assert_eq!(device.display_name(), "Porch Light");
        assert!(f.tree.child(f.controller, "3").is_none());
    }

    #[test]
    fn discovery_never_takes_over_a_foreign_entity() {
        let f = Fixture::new();
        let renamed = f.tree.create_child(f.controller, "5").unwrap();
        f.tree
            .set_attribute(renamed, attr::NETWORK_DEVICE_ID, TreeValue::Number(3.0))
            .unwrap();

        let device = DeviceSession::discover(&f.ctx(), 5, false).unwrap();

        assert_ne!(device.entity(), renamed);
        assert_eq!(f.tree.child(f.controller, "5 (2)"), Some(device.entity()));
        assert_eq!(
            f.tree.attribute(renamed, attr::NETWORK_DEVICE_ID),
            Some(TreeValue::Number(3.0))
        );
        assert_eq!(
            f.tree.attribute(device.entity(), attr::NETWORK_DEVICE_ID),
            Some(TreeValue::Number(5.0))
        );
        assert!(!is_renamed(&f.tree, device.entity(), 5));
    }

    #[test]
    fn default_names_include_collision_suffixes() {
        assert!(is_default_name("5", 5));
        assert!(is_default_name("5 (2)", 5));
        assert!(is_default_name("5 (17)", 5));
        assert!(!is_default_name("55", 5));
        assert!(!is_default_name("5 ()", 5));
        assert!(!is_default_name("5 (x)", 5));
        assert!(!is_default_name("Lamp", 5));
    }

    #[test]
    fn basic_class_and_points_are_filtered() {
        let f = Fixture::new();
        let mut device = DeviceSession::discover(&f.ctx(), 3, false).unwrap();

        let level = device
            .add_point(&f.ctx(), &f.value(0), &PointMeta::default())
            .unwrap()
            .unwrap();
        assert!(device
            .add_point(&f.ctx(), &f.value(1), &PointMeta::default())
            .unwrap()
            .is_none());

        assert_eq!(device.point("Level (Percent)").map(|p| p.entity), Some(level));
        assert_eq!(f.tree.value(level), Some(TreeValue::Number(10.0)));
        assert!(f.tree.writable(level));
        assert_eq!(device.points().count(), 1);
    }

    #[test]
    fn unsupported_points_exist_but_are_inert() {
        let f = Fixture::new();
        let mut device = DeviceSession::discover(&f.ctx(), 3, false).unwrap();

        let schedule = device
            .add_point(&f.ctx(), &f.value(2), &PointMeta::default())
            .unwrap()
            .unwrap();

        assert!(!f.tree.writable(schedule));
        assert_eq!(f.tree.value(schedule), Some(TreeValue::Null));
    }

    #[test]
    fn only_external_writes_become_commands() {
        let mut f = Fixture::new();
        let mut device = DeviceSession::discover(&f.ctx(), 3, false).unwrap();
        let level = device
            .add_point(&f.ctx(), &f.value(0), &PointMeta::default())
            .unwrap()
            .unwrap();

        f.driver.set_data(&f.value(0), SimData::Byte(55)).unwrap();
        assert!(device.change_point(&f.ctx(), &f.value(0)).unwrap());
        f.tree.external_write(level, TreeValue::Number(70.0)).unwrap();

        assert_eq!(
            f.commands(),
            vec![Command::WritePoint {
                entity: level,
                value: TreeValue::Number(70.0)
            }]
        );
    }

    #[test]
    fn duplicate_moves_points_and_keeps_write_back() {
        let mut f = Fixture::new();
        let mut device = DeviceSession::discover(&f.ctx(), 3, false).unwrap();
        let level = device
            .add_point(&f.ctx(), &f.value(0), &PointMeta::default())
            .unwrap()
            .unwrap();
        let old = device.entity();

        let copy = device.duplicate(&f.ctx(), "Lamp").unwrap();

        assert_eq!(f.tree.child(copy, "Level (Percent)"), Some(level));
        assert_eq!(
            f.tree.attribute(copy, attr::NETWORK_DEVICE_ID),
            Some(TreeValue::Number(3.0))
        );
        assert_eq!(f.tree.child(old, "Level (Percent)"), None);

        f.tree.external_write(level, TreeValue::Number(1.0)).unwrap();
        assert_eq!(f.commands().len(), 1);
    }

    #[test]
    fn duplicate_carries_unclaimed_children() {
        let f = Fixture::new();
        let device = DeviceSession::discover(&f.ctx(), 3, false).unwrap();
        let old = device.entity();
        let restored = f.tree.create_child(old, "Restored").unwrap();
        f.tree.set_value(restored, TreeValue::Number(4.0)).unwrap();

        let copy = device.duplicate(&f.ctx(), "Lamp").unwrap();

        assert_eq!(f.tree.child(copy, "Restored"), Some(restored));
        assert_eq!(f.tree.value(restored), Some(TreeValue::Number(4.0)));
        assert!(f.tree.child(old, "Restored").is_none());
        assert!(f.tree.child(old, ops::RENAME).is_some());
        assert!(f.tree.child(copy, ops::RENAME).is_none());
    }

    #[test]
    fn renumber_retags_device_and_points() {
        let f = Fixture::new();
        let mut device = DeviceSession::discover(&f.ctx(), 3, false).unwrap();
        let level = device
            .add_point(&f.ctx(), &f.value(0), &PointMeta::default())
            .unwrap()
            .unwrap();

        let device = device.renumber(&f.ctx(), 9).unwrap();

        assert_eq!(device.node_id(), 9);
        assert_eq!(device.point("Level (Percent)").unwrap().value_id.node_id, 9);
        assert_eq!(
            f.tree.attribute(level, attr::NETWORK_DEVICE_ID),
            Some(TreeValue::Number(9.0))
        );
    }

    #[test]
    fn rename_operation_validates_and_enqueues() {
        let mut f = Fixture::new();
        let device = DeviceSession::discover(&f.ctx(), 3, false).unwrap();
        let rename = f.tree.child(device.entity(), ops::RENAME).unwrap();
        let change = f.tree.child(device.entity(), ops::CHANGE_NODE_ID).unwrap();

        f.tree
            .invoke(rename, ActionArgs::new().with(ops::PARAM_NAME, "Lamp"))
            .unwrap();
        assert!(matches!(
            f.tree
                .invoke(change, ActionArgs::new().with(ops::PARAM_NODE_ID, "x")),
            Err(CoreError::InvalidParameter { .. })
        ));

        assert_eq!(
            f.commands(),
            vec![Command::RenameDevice {
                device: device.entity(),
                name: "Lamp".into()
            }]
        );
    }

    #[test]
    fn removed_points_leave_the_tree() {
        let f = Fixture::new();
        let mut device = DeviceSession::discover(&f.ctx(), 3, false).unwrap();
        let level = device
            .add_point(&f.ctx(), &f.value(0), &PointMeta::default())
            .unwrap()
            .unwrap();

        assert!(device.remove_point(&f.ctx(), &f.value(0)).unwrap());
        assert!(!f.tree.exists(level));
        assert!(!device.remove_point(&f.ctx(), &f.value(0)).unwrap());
    }
}
