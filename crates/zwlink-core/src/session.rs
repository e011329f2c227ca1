// ── Controller session ──
//
// One hardware connection (one port, one home id) and every device
// behind it. All state lives in a single actor task fed by one FIFO
// mailbox: driver notifications, host commands, and tree handler
// requests are applied strictly in arrival order, never concurrently.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{AsRefStr, Display};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zwlink_api::{Driver, HomeId, NodeId, NotificationCode, ValueId};

use crate::codec::{self, PointMeta, attr};
use crate::command::{Command, CommandEnvelope, CommandResult, Mailbox, SessionMessage};
use crate::config::EngineConfig;
use crate::device::{DeviceContext, DeviceSession, DeviceSummary};
use crate::dispatch::{self, Milestone, NotificationHandler};
use crate::error::CoreError;
use crate::index::IdentityIndex;
use crate::ops;
use crate::route::RouteTable;
use crate::tree::{Action, EntityId, Param, Permission, Tree, TreeValue, ValueType};

// ── SessionStatus ────────────────────────────────────────────────

/// Lifecycle state observable by hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    /// Connection requested, no home id yet.
    Loading,
    Ready,
    /// Controller unreachable; polling until it answers again.
    Disconnected,
    Restarting,
    /// Deleted. Terminal.
    Removed,
}

/// Progress text mirrored into the controller's `Status` child.
mod status_text {
    pub const LOADING: &str = "Loading...";
    pub const DRIVER_READY: &str = "Driver Ready";
    pub const FINALIZING: &str = "Finalizing Node Queries...";
    pub const READY: &str = "Ready";
    pub const RESTARTING: &str = "Restarting";
    pub const DISCONNECTED: &str = "Disconnected";
}

/// Watch channels shared between the actor and its handles.
struct SessionShared {
    name: String,
    entity: EntityId,
    mailbox: Mailbox,
    status: watch::Sender<SessionStatus>,
    home_id: watch::Sender<Option<HomeId>>,
    port: watch::Sender<String>,
    last_full_query: watch::Sender<Option<DateTime<Utc>>>,
}

// ── ControllerSession ────────────────────────────────────────────

/// Handle to one running controller session.
///
/// Cheaply cloneable. Every operation is a message to the session's
/// actor; reads of the observable state go through watch channels and
/// never wait on the actor.
#[derive(Clone)]
pub struct ControllerSession {
    shared: Arc<SessionShared>,
}

/// Everything a session actor needs at startup.
pub(crate) struct SessionParams {
    pub name: String,
    pub entity: EntityId,
    pub port: String,
    pub tree: Arc<dyn Tree>,
    pub driver: Arc<dyn Driver>,
    pub routes: RouteTable,
    pub config: EngineConfig,
    /// Runtime the actor and its poll task run on.
    pub runtime: tokio::runtime::Handle,
    /// Parent token; cancelling it stops the actor.
    pub cancel: CancellationToken,
    /// Whether the driver connection was opened successfully.
    pub connected: bool,
}

impl ControllerSession {
    /// Create the session's `Status` child and spawn its actor on the
    /// current runtime.
    pub(crate) fn spawn(
        params: SessionParams,
        mailbox: Mailbox,
        rx: mpsc::UnboundedReceiver<SessionMessage>,
    ) -> Result<Self, CoreError> {
        let SessionParams {
            name,
            entity,
            port,
            tree,
            driver,
            routes,
            config,
            runtime,
            cancel,
            connected,
        } = params;

        let status_entity = tree.create_child(entity, ops::STATUS)?;
        tree.set_value_type(status_entity, ValueType::String)?;
        tree.set_writable(status_entity, false)?;
        tree.set_serializable(status_entity, false)?;

        let initial = if connected {
            SessionStatus::Loading
        } else {
            SessionStatus::Disconnected
        };
        let shared = Arc::new(SessionShared {
            name: name.clone(),
            entity,
            mailbox: mailbox.clone(),
            status: watch::channel(initial).0,
            home_id: watch::channel(None).0,
            port: watch::channel(port.clone()).0,
            last_full_query: watch::channel(None).0,
        });

        let actor = SessionActor {
            shared: Arc::clone(&shared),
            links: Links {
                tree,
                driver,
                mailbox,
                entity,
            },
            status_entity,
            routes,
            config,
            port,
            home_id: None,
            controller_node: None,
            index: IdentityIndex::new(),
            cancel: cancel.child_token(),
            poll: None,
            connected,
        };
        if connected {
            actor.show(status_text::LOADING);
        } else {
            actor.show(status_text::DISCONNECTED);
            // No milestone will come; the host still needs a way to fix
            // or drop the connection.
            if let Err(e) = actor.publish_management_operations() {
                warn!(session = %name, error = %e, "failed to publish management operations");
            }
        }
        info!(session = %name, port = %actor.port, connected, "controller session started");
        runtime.spawn(actor.run(rx));

        Ok(Self { shared })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The controller's tree entity.
    pub fn entity(&self) -> EntityId {
        self.shared.entity
    }

    pub fn status(&self) -> SessionStatus {
        *self.shared.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status.subscribe()
    }

    /// Home id reported by the driver; `None` until the driver is ready.
    pub fn home_id(&self) -> Option<HomeId> {
        *self.shared.home_id.borrow()
    }

    pub fn port(&self) -> String {
        self.shared.port.borrow().clone()
    }

    /// When the last full-query milestone was handled.
    pub fn last_full_query(&self) -> Option<DateTime<Utc>> {
        *self.shared.last_full_query.borrow()
    }

    // ── Command execution ────────────────────────────────────────

    /// Run `command` on the session actor and wait for its result.
    pub async fn execute(&self, command: Command) -> Result<CommandResult, CoreError> {
        if self.status() == SessionStatus::Removed {
            return Err(self.removed());
        }

        let (tx, rx) = oneshot::channel();
        let sent = self.shared.mailbox.send(SessionMessage::Command(CommandEnvelope {
            command,
            response_tx: Some(tx),
        }));
        if !sent {
            return Err(self.removed());
        }
        rx.await.map_err(|_| self.removed())?
    }

    /// Devices currently bound under this controller.
    pub async fn devices(&self) -> Result<Vec<DeviceSummary>, CoreError> {
        match self.execute(Command::ListDevices).await? {
            CommandResult::Devices(devices) => Ok(devices),
            CommandResult::Ok => Ok(Vec::new()),
        }
    }

    /// Wait until every message queued before this call has been handled.
    pub async fn sync(&self) {
        let (tx, rx) = oneshot::channel();
        if self.shared.mailbox.send(SessionMessage::Barrier(tx)) {
            // A dropped barrier means the actor stopped: nothing is pending.
            let _ = rx.await;
        }
    }

    /// Close the driver connection and stop the actor, keeping the tree.
    pub(crate) async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.shared.mailbox.send(SessionMessage::Shutdown(tx)) {
            let _ = rx.await;
        }
    }

    fn removed(&self) -> CoreError {
        CoreError::SessionRemoved {
            name: self.shared.name.clone(),
        }
    }
}

// ── Actor ────────────────────────────────────────────────────────

/// Collaborators device operations borrow while the index is mutated.
struct Links {
    tree: Arc<dyn Tree>,
    driver: Arc<dyn Driver>,
    mailbox: Mailbox,
    /// The controller entity.
    entity: EntityId,
}

impl Links {
    fn device_context(&self, home_id: HomeId) -> DeviceContext<'_> {
        DeviceContext {
            tree: self.tree.as_ref(),
            driver: self.driver.as_ref(),
            mailbox: &self.mailbox,
            home_id,
            controller: self.entity,
        }
    }
}

struct SessionActor {
    shared: Arc<SessionShared>,
    links: Links,
    status_entity: EntityId,
    routes: RouteTable,
    config: EngineConfig,
    port: String,
    home_id: Option<HomeId>,
    controller_node: Option<NodeId>,
    index: IdentityIndex,
    cancel: CancellationToken,
    /// Cancels the running reachability poll, if any.
    poll: Option<CancellationToken>,
    /// Whether the driver connection on `port` is open.
    connected: bool,
}

impl SessionActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionMessage>) {
        if !self.connected {
            self.start_polling();
        }
        loop {
            let message = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                message = rx.recv() => message,
            };
            let Some(message) = message else { break };

            match message {
                SessionMessage::Notification(notification) => {
                    dispatch::dispatch(&mut self, &notification);
                }
                SessionMessage::Command(envelope) => {
                    let result = self.handle_command(envelope.command).await;
                    match envelope.response_tx {
                        Some(tx) => {
                            let _ = tx.send(result);
                        }
                        None => {
                            if let Err(e) = result {
                                warn!(session = %self.shared.name, error = %e, "queued command failed");
                            }
                        }
                    }
                }
                SessionMessage::Barrier(tx) => {
                    let _ = tx.send(());
                }
                SessionMessage::Shutdown(tx) => {
                    self.close();
                    let _ = tx.send(());
                    break;
                }
            }
        }
        self.stop_polling();
        debug!(session = %self.shared.name, "controller session stopped");
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn tree(&self) -> &dyn Tree {
        self.links.tree.as_ref()
    }

    fn driver(&self) -> &dyn Driver {
        self.links.driver.as_ref()
    }

    fn status(&self) -> SessionStatus {
        *self.shared.status.borrow()
    }

    fn set_status(&self, status: SessionStatus) {
        self.shared.status.send_replace(status);
    }

    /// Mirror progress text into the `Status` child.
    fn show(&self, text: &str) {
        if let Err(e) = self.tree().set_value(self.status_entity, TreeValue::from(text)) {
            debug!(error = %e, "status entity unavailable");
        }
    }

    /// Home id, for commands that need a live network.
    fn network(&self) -> Result<HomeId, CoreError> {
        match self.home_id {
            Some(home_id) if self.status() != SessionStatus::Restarting => Ok(home_id),
            _ => Err(CoreError::NotReady {
                name: self.shared.name.clone(),
            }),
        }
    }

    fn node_for_device(&self, device: EntityId) -> Result<NodeId, CoreError> {
        self.index
            .node_for(device)
            .ok_or_else(|| CoreError::DeviceNotFound {
                identifier: device.to_string(),
            })
    }

    // ── Commands ─────────────────────────────────────────────────

    async fn handle_command(&mut self, command: Command) -> Result<CommandResult, CoreError> {
        debug!(session = %self.shared.name, ?command, "handling command");
        if command.requires_network() {
            self.network()?;
        }

        match command {
            Command::Edit { name, port } => self.edit(name, port).await,
            Command::Delete => Ok(self.delete()),
            Command::Restart => self.restart().await,
            Command::Reconnect => self.reconnect().await,
            Command::AllOn => {
                let home_id = self.network()?;
                self.driver().switch_all_on(home_id)?;
                Ok(CommandResult::Ok)
            }
            Command::AllOff => {
                let home_id = self.network()?;
                self.driver().switch_all_off(home_id)?;
                Ok(CommandResult::Ok)
            }
            Command::RenameDevice { device, name } => {
                self.rename_device(device, &name)?;
                Ok(CommandResult::Ok)
            }
            Command::ChangeNodeId { device, node_id } => {
                self.change_node_id(device, node_id)?;
                Ok(CommandResult::Ok)
            }
            Command::RefreshDevice { device } => {
                let home_id = self.network()?;
                let node_id = self.node_for_device(device)?;
                if let Some(session) = self.index.get(node_id) {
                    session.refresh(&self.links.device_context(home_id))?;
                }
                Ok(CommandResult::Ok)
            }
            Command::WritePoint { entity, value } => {
                self.write_point(entity, &value)?;
                Ok(CommandResult::Ok)
            }
            Command::ListDevices => Ok(CommandResult::Devices(
                self.index
                    .iter()
                    .map(|device| device.summary(self.tree()))
                    .collect(),
            )),
        }
    }

    async fn edit(
        &mut self,
        name: Option<String>,
        port: Option<String>,
    ) -> Result<CommandResult, CoreError> {
        if let Some(name) = name {
            let name = name.trim();
            if name.is_empty() {
                return Err(CoreError::MissingParameter {
                    name: ops::PARAM_NAME.into(),
                });
            }
            self.tree().set_display_name(self.links.entity, name)?;
            info!(session = %self.shared.name, display_name = name, "controller relabeled");
        }
        match port {
            Some(port) if port.is_empty() => Err(CoreError::MissingParameter {
                name: ops::PARAM_PORT.into(),
            }),
            Some(port) if port != self.port => self.move_to(port).await,
            _ => Ok(CommandResult::Ok),
        }
    }

    /// Tear the session down for good. Late events are dropped from here on.
    fn delete(&mut self) -> CommandResult {
        info!(session = %self.shared.name, "deleting controller session");
        self.close();
        if let Err(e) = self.tree().remove(self.links.entity) {
            warn!(error = %e, "controller entity already gone");
        }
        self.set_status(SessionStatus::Removed);
        CommandResult::Ok
    }

    /// Release the driver connection and the routes, then stop the actor.
    fn close(&mut self) {
        self.stop_polling();
        self.close_connection();
        self.routes.unbind_port(&self.port, &self.links.mailbox);
        if let Some(home_id) = self.home_id {
            self.routes.unbind_home(home_id, &self.links.mailbox);
        }
        self.cancel.cancel();
    }

    fn close_connection(&mut self) {
        if !std::mem::take(&mut self.connected) {
            return;
        }
        if let Err(e) = self.driver().remove_connection(&self.port) {
            warn!(port = %self.port, error = %e, "failed to close driver connection");
        }
    }

    /// Withdraw the controller operations until the next milestone.
    fn enter_restarting(&mut self) {
        self.set_status(SessionStatus::Restarting);
        self.show(status_text::RESTARTING);
        self.remove_controller_operations();
        self.stop_polling();
    }

    /// Remove and re-add the driver connection. The session becomes
    /// `Ready` again on the next driver-ready event.
    async fn restart(&mut self) -> Result<CommandResult, CoreError> {
        info!(session = %self.shared.name, port = %self.port, "restarting controller");
        self.enter_restarting();
        self.close_connection();

        if let Err(e) = self.driver().add_connection(&self.port) {
            warn!(port = %self.port, error = %e, "failed to reopen driver connection");
            self.disconnected();
            return Err(e.into());
        }
        self.connected = true;
        self.settle().await
    }

    /// Switch to `port`. The new port is claimed and opened before the
    /// session lets go of the old one; any failure leaves the session as
    /// it was.
    async fn move_to(&mut self, port: String) -> Result<CommandResult, CoreError> {
        let mailbox = self.links.mailbox.clone();
        if !self.routes.try_bind_port(&port, &mailbox) {
            return Err(CoreError::InvalidParameter {
                name: ops::PARAM_PORT.into(),
                reason: format!("{port} is already used by another connection"),
            });
        }
        if let Err(e) = self.driver().add_connection(&port) {
            warn!(session = %self.shared.name, port = %port, error = %e, "new port failed to open");
            self.routes.unbind_port(&port, &mailbox);
            return Err(e.into());
        }
        let persisted = self.tree().set_attribute(
            self.links.entity,
            attr::PORT,
            TreeValue::from(port.as_str()),
        );
        if let Err(e) = persisted {
            if let Err(e) = self.driver().remove_connection(&port) {
                warn!(port = %port, error = %e, "failed to close the new port");
            }
            self.routes.unbind_port(&port, &mailbox);
            return Err(e.into());
        }

        info!(session = %self.shared.name, from = %self.port, to = %port, "moving controller");
        self.enter_restarting();
        self.close_connection();
        self.routes.unbind_port(&self.port, &mailbox);
        self.shared.port.send_replace(port.clone());
        self.port = port;
        self.connected = true;
        self.settle().await
    }

    /// Try to open the port of a session that lost it. No-op while the
    /// port is open; a port that is still unavailable is not an error.
    async fn reconnect(&mut self) -> Result<CommandResult, CoreError> {
        if self.connected {
            return Ok(CommandResult::Ok);
        }
        if !self.routes.try_bind_port(&self.port, &self.links.mailbox) {
            debug!(port = %self.port, "port owned by another connection, not reopening");
            return Ok(CommandResult::Ok);
        }
        if let Err(e) = self.driver().add_connection(&self.port) {
            debug!(port = %self.port, error = %e, "port still unavailable");
            return Ok(CommandResult::Ok);
        }

        info!(session = %self.shared.name, port = %self.port, "controller port reopened");
        self.connected = true;
        self.stop_polling();
        if self.home_id.is_some() {
            self.enter_restarting();
            return self.settle().await;
        }
        self.set_status(SessionStatus::Loading);
        self.show(status_text::LOADING);
        Ok(CommandResult::Ok)
    }

    /// Wait out the driver's settle delay after a re-add, then ask the
    /// controller for its state.
    async fn settle(&mut self) -> Result<CommandResult, CoreError> {
        // The driver rejects calls for a short while after a re-add.
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Ok(CommandResult::Ok),
            () = tokio::time::sleep(self.config.settle_delay) => {}
        }

        if let (Some(home_id), Some(node_id)) = (self.home_id, self.controller_node) {
            if let Err(e) = self.driver().request_node_state(home_id, node_id) {
                warn!(%home_id, node_id, error = %e, "controller state request failed");
            }
        }
        Ok(CommandResult::Ok)
    }

    fn rename_device(&mut self, device: EntityId, name: &str) -> Result<(), CoreError> {
        let home_id = self.network()?;
        let node_id = self.node_for_device(device)?;
        let name = name.trim();

        let current = self.tree().name(device).unwrap_or_default();
        if name == current {
            return Ok(());
        }
        let invalid = |reason: &str| CoreError::InvalidParameter {
            name: ops::PARAM_NAME.into(),
            reason: reason.into(),
        };
        if name.is_empty() {
            return Err(invalid("name is empty"));
        }
        if name.contains('/') {
            return Err(invalid("name contains '/'"));
        }
        if self.tree().child(self.links.entity, name).is_some() {
            return Err(invalid("name is already taken"));
        }

        let ctx = self.links.device_context(home_id);
        let Some(session) = self.index.get(node_id) else {
            return Err(CoreError::DeviceNotFound {
                identifier: node_id.to_string(),
            });
        };
        let renamed = session.duplicate(&ctx, name)?;
        self.index.rebind(node_id, renamed, name);
        if let Some(session) = self.index.get(node_id) {
            session.attach_operations(&ctx)?;
        }
        ctx.tree.remove(device)?;

        info!(node_id, from = %current, to = name, "device renamed");
        Ok(())
    }

    fn change_node_id(&mut self, device: EntityId, node_id: NodeId) -> Result<(), CoreError> {
        let home_id = self.network()?;
        let current = self.node_for_device(device)?;
        if current == node_id {
            return Ok(());
        }
        if self.index.contains(node_id) {
            return Err(CoreError::InvalidParameter {
                name: ops::PARAM_NODE_ID.into(),
                reason: format!("node {node_id} is already bound"),
            });
        }

        let ctx = self.links.device_context(home_id);
        let Some(session) = self.index.remove(current) else {
            return Err(CoreError::DeviceNotFound {
                identifier: current.to_string(),
            });
        };
        let renumbered = session.renumber(&ctx, node_id)?;
        self.index.insert(renumbered)?;

        info!(from = current, to = node_id, "device node id changed");
        Ok(())
    }

    /// Forward an external point write to the driver.
    fn write_point(&self, entity: EntityId, value: &TreeValue) -> Result<(), CoreError> {
        let home_id = self.network()?;
        let tree = self.tree();

        let owner = tree.parent(entity).and_then(|device| self.index.node_for(device));
        if owner.is_none() {
            return Err(CoreError::PointNotFound {
                identifier: entity.to_string(),
            });
        }

        let id = codec::address_from_attributes(tree, entity, home_id)?;
        if !id.kind.is_supported() {
            error!(value = %id, "write to an unsupported value kind rejected");
            return Err(CoreError::UnsupportedValueKind { kind: id.kind });
        }
        let encoded = codec::encode(id.kind, value)?;
        if let Err(e) = codec::send(self.driver(), &id, &encoded) {
            warn!(value = %id, error = %e, "driver rejected point write");
            return Err(e.into());
        }
        debug!(value = %id, %value, "point written");
        Ok(())
    }

    // ── Controller operations ────────────────────────────────────

    fn publish_controller_operations(&self) -> Result<(), CoreError> {
        self.publish_management_operations()?;
        for (name, permission, command) in [
            (ops::ALL_ON, Permission::Write, Command::AllOn),
            (ops::ALL_OFF, Permission::Write, Command::AllOff),
            (ops::REFRESH, Permission::Read, Command::Restart),
        ] {
            self.attach_command(name, permission, command)?;
        }
        Ok(())
    }

    /// Edit and Delete, which work whether or not the network is up.
    fn publish_management_operations(&self) -> Result<(), CoreError> {
        let tree = self.tree();
        let entity = self.links.entity;

        let mut ports = self.driver().available_ports();
        ports.insert(self.port.clone());
        let display_name = tree
            .display_name(entity)
            .unwrap_or_else(|| self.shared.name.clone());

        let mailbox = self.links.mailbox.clone();
        let edit = Action::new(Permission::Write, move |args| {
            let name = args.string(ops::PARAM_NAME);
            let port = args.string(ops::PARAM_PORT);
            ops::enqueue(&mailbox, Command::Edit { name, port })
        })
        .with_param(Param::new(ops::PARAM_NAME, ValueType::String).with_default(display_name))
        .with_param(
            Param::new(ops::PARAM_PORT, ValueType::Enum(ports.into_iter().collect()))
                .with_default(self.port.clone()),
        );
        tree.attach_action(entity, ops::EDIT, edit)?;
        self.attach_command(ops::DELETE, Permission::Write, Command::Delete)
    }

    fn attach_command(
        &self,
        name: &str,
        permission: Permission,
        command: Command,
    ) -> Result<(), CoreError> {
        let mailbox = self.links.mailbox.clone();
        self.tree().attach_action(
            self.links.entity,
            name,
            Action::new(permission, move |_| ops::enqueue(&mailbox, command.clone())),
        )?;
        Ok(())
    }

    fn remove_controller_operations(&self) {
        for name in ops::CONTROLLER_OPERATIONS {
            if let Err(e) = self.tree().remove_child(self.links.entity, name) {
                debug!(operation = name, error = %e, "controller operation not removed");
            }
        }
    }

    /// Drop tree devices the driver no longer reports, and index entries
    /// whose entity was deleted. Returns how many entries were dropped.
    fn prune(&mut self) -> usize {
        let tree = self.links.tree.as_ref();
        let mut pruned = 0;
        for child in tree.children(self.links.entity) {
            let Some(tag) = tree.attribute(child, attr::NETWORK_DEVICE_ID) else {
                continue;
            };
            let bound = codec::node_id_of(&tag)
                .and_then(|node_id| self.index.get(node_id))
                .is_some_and(|device| device.entity() == child);
            if bound {
                continue;
            }
            match tree.remove(child) {
                Ok(()) => {
                    debug!(entity = %child, "orphaned device pruned");
                    pruned += 1;
                }
                Err(e) => warn!(entity = %child, error = %e, "failed to prune orphaned device"),
            }
        }

        let dropped = self.index.retain(|device| tree.exists(device.entity()));
        pruned + dropped.len()
    }

    // ── Reachability ─────────────────────────────────────────────

    fn disconnected(&mut self) {
        warn!(session = %self.shared.name, port = %self.port, "controller disconnected");
        self.set_status(SessionStatus::Disconnected);
        self.show(status_text::DISCONNECTED);
        if let Err(e) = self.publish_management_operations() {
            warn!(error = %e, "failed to publish management operations");
        }
        self.start_polling();
    }

    /// Poll until the session can recover: reopen a closed port, or wait
    /// for the controller to answer and then queue a restart. Only one
    /// poll runs at a time.
    fn start_polling(&mut self) {
        let target = match (self.connected, self.home_id, self.controller_node) {
            (false, _, _) => PollTarget::Port,
            (true, Some(home_id), Some(node_id)) => PollTarget::Controller { home_id, node_id },
            (true, _, _) => {
                debug!(session = %self.shared.name, "no network yet, not polling reachability");
                return;
            }
        };
        self.stop_polling();

        let token = self.cancel.child_token();
        self.poll = Some(token.clone());
        let driver = Arc::clone(&self.links.driver);
        let mailbox = self.links.mailbox.clone();
        let period = self.config.poll_interval();
        tokio::spawn(reachability_poll_task(driver, mailbox, target, period, token));
    }

    fn stop_polling(&mut self) {
        if let Some(token) = self.poll.take() {
            token.cancel();
        }
    }
}

/// What a disconnected session waits for.
#[derive(Debug, Clone, Copy)]
enum PollTarget {
    /// The port is closed: ask the actor to reopen it every tick. The
    /// actor stops the poll once it succeeds.
    Port,
    /// The port is open but the controller went quiet.
    Controller { home_id: HomeId, node_id: NodeId },
}

async fn reachability_poll_task(
    driver: Arc<dyn Driver>,
    mailbox: Mailbox,
    target: PollTarget,
    period: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => match target {
                PollTarget::Port => {
                    if !mailbox.command(Command::Reconnect) {
                        break;
                    }
                }
                PollTarget::Controller { home_id, node_id } => {
                    if matches!(driver.is_node_awake(home_id, node_id), Ok(true)) {
                        info!(%home_id, node_id, "controller reachable again, restarting");
                        mailbox.command(Command::Restart);
                        break;
                    }
                    debug!(%home_id, node_id, "controller still unreachable");
                }
            },
        }
    }
}

// ── Notification handling ────────────────────────────────────────

impl NotificationHandler for SessionActor {
    fn driver_ready(&mut self, home_id: HomeId, node_id: NodeId, port: &str) -> Result<(), CoreError> {
        if port != self.port {
            debug!(port, expected = %self.port, "driver ready for another port ignored");
            return Ok(());
        }
        if let Some(previous) = self.home_id.filter(|previous| *previous != home_id) {
            self.routes.unbind_home(previous, &self.links.mailbox);
        }

        let controller_node = match self.driver().controller_node_id(home_id) {
            Ok(controller_node) => controller_node,
            Err(e) => {
                debug!(%home_id, error = %e, "controller node id unavailable, using the notification's");
                node_id
            }
        };
        self.home_id = Some(home_id);
        self.controller_node = Some(controller_node);
        self.shared.home_id.send_replace(Some(home_id));
        self.set_status(SessionStatus::Ready);
        self.show(status_text::DRIVER_READY);
        info!(session = %self.shared.name, %home_id, controller_node, "driver ready");
        Ok(())
    }

    fn query_milestone(&mut self, milestone: Milestone) -> Result<(), CoreError> {
        let Some(home_id) = self.home_id else {
            debug!(?milestone, "query milestone before driver ready ignored");
            return Ok(());
        };

        if let Err(e) = self.driver().write_config(home_id) {
            warn!(%home_id, error = %e, "failed to persist network configuration");
        }
        let pruned = self.prune();
        self.publish_controller_operations()?;

        self.show(status_text::READY);
        self.shared.last_full_query.send_replace(Some(Utc::now()));
        info!(
            session = %self.shared.name,
            %home_id,
            ?milestone,
            devices = self.index.len(),
            pruned,
            "network query complete"
        );
        Ok(())
    }

    fn node_added(&mut self, node_id: NodeId) -> Result<(), CoreError> {
        let Some(home_id) = self.home_id else {
            return Ok(());
        };
        if self.index.contains(node_id) {
            debug!(node_id, "duplicate node announcement ignored");
            return Ok(());
        }

        self.show(&format!("Adding node {node_id}"));
        let is_controller = self.controller_node == Some(node_id);
        let device =
            DeviceSession::discover(&self.links.device_context(home_id), node_id, is_controller)?;
        info!(%home_id, node_id, name = device.display_name(), "device discovered");
        self.index.insert(device)
    }

    fn node_removed(&mut self, node_id: NodeId) -> Result<(), CoreError> {
        if self.index.remove(node_id).is_some() {
            info!(node_id, "device removed from the network");
        }
        Ok(())
    }

    fn node_naming(&mut self, node_id: NodeId) -> Result<(), CoreError> {
        let Some(home_id) = self.home_id else {
            return Ok(());
        };
        let ctx = self.links.device_context(home_id);
        match self.index.get_mut(node_id) {
            Some(device) => device.relabel(&ctx),
            None => Ok(()),
        }
    }

    fn node_queries_complete(&mut self, node_id: NodeId) -> Result<(), CoreError> {
        debug!(node_id, "node queries complete");
        self.show(status_text::FINALIZING);
        Ok(())
    }

    fn value_added(&mut self, value: &ValueId, mut meta: PointMeta) -> Result<(), CoreError> {
        let Some(home_id) = self.home_id else {
            return Ok(());
        };
        if !self.index.contains(value.node_id) {
            debug!(%value, "value for an unknown device ignored");
            return Ok(());
        }

        self.show(&format!("Adding value to node {}", value.node_id));
        meta.unit = self.driver().value_units(value).unwrap_or_default();
        let ctx = self.links.device_context(home_id);
        if let Some(device) = self.index.get_mut(value.node_id) {
            device.add_point(&ctx, value, &meta)?;
        }
        Ok(())
    }

    fn value_changed(&mut self, value: &ValueId) -> Result<(), CoreError> {
        let Some(home_id) = self.home_id else {
            return Ok(());
        };
        let ctx = self.links.device_context(home_id);
        match self.index.get_mut(value.node_id) {
            Some(device) => device.change_point(&ctx, value).map(|_| ()),
            None => {
                debug!(%value, "change for an unknown device ignored");
                Ok(())
            }
        }
    }

    fn value_removed(&mut self, value: &ValueId) -> Result<(), CoreError> {
        let Some(home_id) = self.home_id else {
            return Ok(());
        };
        self.show(&format!("Removing value from node {}", value.node_id));
        let ctx = self.links.device_context(home_id);
        match self.index.get_mut(value.node_id) {
            Some(device) => device.remove_point(&ctx, value).map(|_| ()),
            None => Ok(()),
        }
    }

    /// Only `Dead` and `Timeout` can mean the controller is gone. From the
    /// controller itself they are conclusive; from any other node the
    /// controller's awake state decides.
    fn health_report(&mut self, node_id: NodeId, code: NotificationCode) -> Result<(), CoreError> {
        if !matches!(code, NotificationCode::Dead | NotificationCode::Timeout) {
            return Ok(());
        }
        let (Some(home_id), Some(controller)) = (self.home_id, self.controller_node) else {
            return Ok(());
        };
        if matches!(
            self.status(),
            SessionStatus::Disconnected | SessionStatus::Restarting
        ) {
            return Ok(());
        }

        if node_id == controller
            || !matches!(self.driver().is_node_awake(home_id, controller), Ok(true))
        {
            self.disconnected();
        }
        Ok(())
    }
}
